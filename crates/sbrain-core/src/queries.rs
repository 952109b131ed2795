use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use sbrain_protocol::{
    Content, LoginRequest, MessageBody, ShareStatus, SharedPieceEnvelope, SignupRequest, User,
};

use crate::cache::CacheStore;
use crate::client::HttpClient;
use crate::error::ClientError;
use crate::keys;
use crate::request::{Request, Response};

/// Extra attempts allowed for shared-link lookups after the first failure.
pub const SHARED_MAX_RETRIES: u32 = 2;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Typed, cached reads and the session endpoints.
///
/// Reads go through [`CacheStore::fetch_with`] under the same keys the share toggle
/// writes, so a toggle is visible to the next read without a round-trip.
#[derive(Clone)]
pub struct BrainApi {
    client: HttpClient,
    cache: CacheStore,
    retry_delay: Duration,
}

impl BrainApi {
    pub fn new(client: HttpClient, cache: CacheStore) -> Self {
        Self {
            client,
            cache,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Base delay between shared-link retries; doubles per attempt up to 30s.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub async fn brain_share_status(&self) -> Result<ShareStatus, ClientError> {
        let client = &self.client;
        let value = self
            .cache
            .fetch_with(keys::brain_status(), move || async move {
                let resp = client.get("/content/brain/share/status").await?;
                share_status_body(resp, "Invalid brain share response")
            })
            .await?;
        decode(value)
    }

    pub async fn piece_share_status(&self, content_id: &str) -> Result<ShareStatus, ClientError> {
        let client = &self.client;
        let path = format!("/content/brain/piece/share/status/{content_id}");
        let value = self
            .cache
            .fetch_with(keys::piece_status(content_id), move || async move {
                let resp = client.get(&path).await?;
                share_status_body(resp, "Invalid brain piece share response")
            })
            .await?;
        decode(value)
    }

    /// The signed-in user's saved items, as the raw list is cached.
    pub async fn user_contents(&self) -> Result<Vec<Content>, ClientError> {
        let client = &self.client;
        let value = self
            .cache
            .fetch_with(keys::user_contents(), move || async move {
                let resp = client.get("/content/user").await?;
                take_field(resp, "contents", Value::is_array)
            })
            .await?;
        decode(value)
    }

    /// Items behind a whole-collection share link.
    pub async fn shared_brain(&self, hash: &str) -> Result<Vec<Content>, ClientError> {
        let hash = require_hash(hash)?;
        let client = &self.client;
        let path = format!("/content/brain/shared/{hash}");
        let path = path.as_str();
        let value = self
            .cache
            .fetch_with(keys::shared_brain(hash), move || {
                self.with_shared_retry(move || async move {
                    let resp = client.get(path).await?;
                    take_field(resp, "brain", Value::is_array)
                })
            })
            .await?;
        decode(value)
    }

    pub async fn shared_piece(&self, hash: &str) -> Result<SharedPieceEnvelope, ClientError> {
        let hash = require_hash(hash)?;
        let client = &self.client;
        let path = format!("/content/brain/piece/shared/{hash}");
        let path = path.as_str();
        let value = self
            .cache
            .fetch_with(keys::shared_piece(hash), move || {
                self.with_shared_retry(move || async move {
                    let resp = client.get(path).await?;
                    match resp.body.get("brainPiece") {
                        Some(piece) if piece.is_object() => Ok(resp.body),
                        _ => Err(invalid_structure()),
                    }
                })
            })
            .await?;
        decode(value)
    }

    /// Never retried; a 401 here goes through the refresh gate like any other call.
    pub async fn me(&self) -> Result<User, ClientError> {
        let client = &self.client;
        let value = self
            .cache
            .fetch_with(keys::user(), move || async move {
                let resp = client.get("/user/me").await?;
                take_field(resp, "user", Value::is_object)
            })
            .await?;
        decode(value)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Option<String>, ClientError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let resp = self.client.post("/user/login", &body).await?;
        self.cache.invalidate(&keys::user());
        tracing::info!("signed in");
        Ok(message_of(&resp))
    }

    pub async fn signup(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Option<String>, ClientError> {
        let body = SignupRequest {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        let resp = self.client.post("/user/signup", &body).await?;
        self.cache.invalidate(&keys::user());
        Ok(message_of(&resp))
    }

    /// Ends the session server-side and drops every cached entry.
    pub async fn logout(&self) -> Result<Option<String>, ClientError> {
        let resp = self.client.send(Request::post("/user/logout")).await?;
        self.cache.clear();
        tracing::info!("signed out; cache cleared");
        Ok(message_of(&resp))
    }

    async fn with_shared_retry<F, Fut>(&self, mut fetch: F) -> Result<Value, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, ClientError>>,
    {
        let mut failures = 0u32;
        loop {
            match fetch().await {
                Ok(value) => return Ok(value),
                Err(err) if should_retry_shared(failures, &err) => {
                    let delay = self
                        .retry_delay
                        .saturating_mul(1 << failures)
                        .min(MAX_RETRY_DELAY);
                    tracing::debug!(attempt = failures + 1, error = %err, "retrying shared lookup");
                    failures += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Shared-link lookups retry transient failures but never a missing, expired or
/// forbidden link.
pub fn should_retry_shared(failures: u32, err: &ClientError) -> bool {
    if matches!(err.status(), Some(401 | 403 | 404)) {
        return false;
    }
    failures < SHARED_MAX_RETRIES
}

fn require_hash(hash: &str) -> Result<&str, ClientError> {
    let hash = hash.trim();
    if hash.is_empty() {
        return Err(ClientError::InvalidRequest("Hash is required".into()));
    }
    Ok(hash)
}

fn share_status_body(resp: Response, invalid: &str) -> Result<Value, ClientError> {
    match resp.body.get("isSharing") {
        Some(Value::Bool(_)) => Ok(resp.body),
        _ => Err(ClientError::InvalidResponse(invalid.to_string())),
    }
}

fn take_field(
    mut resp: Response,
    field: &str,
    valid: impl Fn(&Value) -> bool,
) -> Result<Value, ClientError> {
    match resp.body.get_mut(field).map(Value::take) {
        Some(value) if valid(&value) => Ok(value),
        _ => Err(invalid_structure()),
    }
}

fn invalid_structure() -> ClientError {
    ClientError::InvalidResponse("Invalid response structure".into())
}

fn message_of(resp: &Response) -> Option<String> {
    resp.json::<MessageBody>().ok().and_then(|m| m.message)
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|e| ClientError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbrain_protocol::ErrorBody;

    fn http(status: u16) -> ClientError {
        ClientError::Http {
            status,
            body: ErrorBody::default(),
        }
    }

    #[test]
    fn shared_retry_stops_on_terminal_statuses() {
        assert!(should_retry_shared(0, &http(500)));
        assert!(should_retry_shared(1, &ClientError::Transport("reset".into())));
        assert!(!should_retry_shared(2, &http(500)));
        for status in [401, 403, 404] {
            assert!(!should_retry_shared(0, &http(status)));
        }
        assert!(!should_retry_shared(
            0,
            &ClientError::RefreshFailed(Box::new(http(401)))
        ));
    }

    #[test]
    fn blank_hash_is_rejected_locally() {
        let err = require_hash("  ").unwrap_err();
        assert_eq!(err.to_string(), "invalid request: Hash is required");
        assert_eq!(require_hash(" abc ").unwrap(), "abc");
    }

    #[test]
    fn share_status_requires_boolean_flag() {
        let ok = Response::new(200, serde_json::json!({"isSharing": true, "hash": "h"}));
        assert!(share_status_body(ok, "bad").is_ok());
        let bad = Response::new(200, serde_json::json!({"isSharing": "true"}));
        let err = share_status_body(bad, "Invalid brain share response").unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse(ref m) if m == "Invalid brain share response"));
    }
}
