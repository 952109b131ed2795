#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use sbrain_core::test_support::ScriptedTransport;
use sbrain_core::{Config, HttpClient, HttpConfig, LogoutBroadcaster, SecondBrain};
use sbrain_events::Bus;

pub const REFRESH: &str = "/user/refresh-tokens";

pub fn client_over(transport: &Arc<ScriptedTransport>) -> (HttpClient, LogoutBroadcaster) {
    let logout = LogoutBroadcaster::new(Bus::new(16));
    let client = HttpClient::new(transport.clone(), &HttpConfig::default(), logout.clone());
    (client, logout)
}

pub fn brain_over(transport: &Arc<ScriptedTransport>) -> SecondBrain {
    SecondBrain::with_transport(transport.clone(), &Config::default())
}

/// Yield to other tasks until `cond` holds; fails the test after two seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}
