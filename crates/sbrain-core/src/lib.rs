use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use sbrain_events::Bus;

pub mod cache;
pub mod client;
mod config;
pub use config::{
    config_schema_json, load_config, CacheConfig, Config, EventsConfig, HttpConfig,
    DEFAULT_BASE_URL, DEFAULT_CONFIG_PATH, DEFAULT_REFRESH_PATH,
};
pub mod error;
pub mod keys;
pub mod logout;
pub mod queries;
pub mod request;
pub mod session;
pub mod share;
#[doc(hidden)]
pub mod test_support;
pub mod transport;

pub use cache::{CacheKey, CacheStore, CacheTxn};
pub use client::HttpClient;
pub use error::{ClientError, TransportError};
pub use logout::{LogoutBroadcaster, LogoutNotice};
pub use queries::BrainApi;
pub use request::{Method, Request, Response};
pub use session::{RefreshPhase, SessionCoordinator};
pub use share::{ShareScope, ShareToggle, SkipReason, ToggleError, ToggleOutcome};
pub use transport::{ReqwestTransport, Transport};

/// Everything a front end needs, wired to one hub and one cache.
///
/// Creating it spawns the task that invalidates the cache on logout, so it must be
/// built inside a tokio runtime. The task stops when this value is dropped.
pub struct SecondBrain {
    pub bus: Bus,
    pub client: HttpClient,
    pub cache: CacheStore,
    pub shares: ShareToggle,
    pub api: BrainApi,
    logout: LogoutBroadcaster,
    listener: JoinHandle<()>,
}

impl SecondBrain {
    /// Wire the stack over a reqwest transport built from `cfg.http`.
    pub fn connect(cfg: &Config) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(&cfg.http)?;
        tracing::debug!(base_url = %transport.base_url(), "client configured");
        Ok(Self::with_transport(Arc::new(transport), cfg))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, cfg: &Config) -> Self {
        let bus = Bus::new(cfg.events.capacity);
        let logout = LogoutBroadcaster::new(bus.clone());
        let client = HttpClient::new(transport, &cfg.http, logout.clone());
        let cache = CacheStore::new(Duration::from_secs(cfg.cache.stale_time_secs));
        let listener = cache.spawn_logout_listener(logout.subscribe());
        let shares = ShareToggle::with_bus(client.clone(), cache.clone(), bus.clone());
        let api = BrainApi::new(client.clone(), cache.clone());
        Self {
            bus,
            client,
            cache,
            shares,
            api,
            logout,
            listener,
        }
    }

    pub fn logout_signal(&self) -> &LogoutBroadcaster {
        &self.logout
    }
}

impl Drop for SecondBrain {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
