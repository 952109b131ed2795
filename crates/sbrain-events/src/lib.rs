use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Minimal event envelope (RFC3339 time).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Envelope {
    pub time: String,
    pub kind: String,
    pub payload: Value,
}

/// Process-wide broadcast hub for JSON-serializable notifications.
///
/// Cloning a `Bus` yields another handle onto the same channel. Subscribers own a
/// [`Subscription`]; dropping it unsubscribes.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Envelope>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to every topic.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            kinds: None,
        }
    }

    /// Subscribe to a fixed set of topics; other envelopes are skipped.
    pub fn subscribe_kinds(&self, kinds: &[&str]) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            kinds: Some(kinds.iter().map(|k| k.to_string()).collect()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event; returns how many subscribers it reached.
    pub fn publish<T: Serialize>(&self, kind: &str, payload: &T) -> usize {
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let val =
            serde_json::to_value(payload).unwrap_or_else(|_| serde_json::json!({"_ser":"error"}));
        self.tx
            .send(Envelope {
                time: now,
                kind: kind.to_string(),
                payload: val,
            })
            .unwrap_or(0)
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(256)
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<Envelope>,
    kinds: Option<Vec<String>>,
}

impl Subscription {
    fn wants(&self, env: &Envelope) -> bool {
        match &self.kinds {
            Some(kinds) => kinds.iter().any(|k| k == &env.kind),
            None => true,
        }
    }

    /// Wait for the next matching envelope. Returns `None` once every `Bus` handle is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.recv().await {
                Ok(env) if self.wants(&env) => return Some(env),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.try_recv() {
                Ok(env) if self.wants(&env) => return Some(env),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn filtered_subscription_skips_other_topics() {
        let bus = Bus::new(8);
        let mut only_logout = bus.subscribe_kinds(&["session.logout"]);
        bus.publish("share.toggle.committed", &json!({"scope": "brain"}));
        bus.publish("session.logout", &json!({"error": "expired"}));

        let env = only_logout.recv().await.expect("logout event");
        assert_eq!(env.kind, "session.logout");
        assert_eq!(env.payload["error"], "expired");
        assert!(only_logout.try_recv().is_none());
    }

    #[test]
    fn dropping_a_subscription_unsubscribes() {
        let bus = Bus::new(8);
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.publish("cache.cleared", &json!({})), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish("cache.cleared", &json!({})), 0);
    }

    #[tokio::test]
    async fn recv_ends_when_bus_is_dropped() {
        let bus = Bus::new(4);
        let mut sub = bus.subscribe();
        drop(bus);
        assert!(sub.recv().await.is_none());
    }
}
