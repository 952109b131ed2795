use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use sbrain_events::{Bus, Subscription};
use sbrain_topics::TOPIC_SESSION_LOGOUT;

use crate::error::ClientError;

/// Payload of the `session.logout` signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogoutNotice {
    pub error: String,
}

/// Announces that the session can no longer be recovered.
///
/// Subscribers (routing, caches) should drop everything tied to the session.
#[derive(Clone)]
pub struct LogoutBroadcaster {
    bus: Bus,
    fired: Arc<AtomicU64>,
}

impl LogoutBroadcaster {
    pub fn new(bus: Bus) -> Self {
        Self {
            bus,
            fired: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe_kinds(&[TOPIC_SESSION_LOGOUT])
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Number of logout signals fired since startup.
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::SeqCst)
    }

    pub(crate) fn announce(&self, err: &ClientError) {
        self.fired.fetch_add(1, Ordering::SeqCst);
        let delivered = self.bus.publish(
            TOPIC_SESSION_LOGOUT,
            &LogoutNotice {
                error: err.to_string(),
            },
        );
        tracing::warn!(error = %err, delivered, "session ended; logout broadcast");
    }
}
