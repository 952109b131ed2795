use std::sync::Arc;
use std::time::Instant;

use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;

use crate::config::HttpConfig;
use crate::error::ClientError;
use crate::logout::LogoutBroadcaster;
use crate::request::{Request, Response};
use crate::session::SessionCoordinator;
use crate::transport::Transport;

/// Entry point for every API call.
///
/// Wraps the transport and routes eligible 401s through the [`SessionCoordinator`].
/// A 401 is returned unchanged when the request already went through a refresh or
/// targets an authentication-boundary path.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    session: SessionCoordinator,
    auth_boundary_paths: Vec<String>,
}

impl HttpClient {
    pub fn new(transport: Arc<dyn Transport>, cfg: &HttpConfig, logout: LogoutBroadcaster) -> Self {
        let auth_boundary_paths = cfg
            .auth_boundary_paths
            .iter()
            .map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self {
            inner: Arc::new(ClientInner {
                transport,
                session: SessionCoordinator::new(cfg.refresh_path.clone(), logout),
                auth_boundary_paths,
            }),
        }
    }

    pub fn session(&self) -> &SessionCoordinator {
        &self.inner.session
    }

    /// Send a request. Fails with `Transport` when no response arrived and `Http` on
    /// any non-2xx status the refresh gate did not absorb.
    pub fn send(&self, req: Request) -> BoxFuture<'_, Result<Response, ClientError>> {
        async move {
            let resp = self.exchange(&req).await?;
            if resp.is_success() {
                return Ok(resp);
            }
            if resp.status == 401 {
                if req.is_retried() {
                    tracing::debug!(request_id = %req.id(), "401 after refresh; not retrying again");
                } else if self.is_auth_boundary(req.route()) {
                    tracing::debug!(request_id = %req.id(), path = %req.path, "401 on auth boundary");
                } else {
                    return self.inner.session.recover(self, req).await;
                }
            }
            Err(ClientError::from_response(resp))
        }
        .boxed()
    }

    pub async fn get(&self, path: &str) -> Result<Response, ClientError> {
        self.send(Request::get(path)).await
    }

    pub async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<Response, ClientError> {
        self.send(Request::post(path).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Response, ClientError> {
        self.send(Request::delete(path)).await
    }

    /// One transport round-trip, logged on the `http.access` target. No gating.
    pub(crate) async fn exchange(&self, req: &Request) -> Result<Response, ClientError> {
        let started = Instant::now();
        match self.inner.transport.send(req).await {
            Ok(resp) => {
                tracing::info!(
                    target: "http.access",
                    request_id = %req.id(),
                    method = %req.method,
                    path = %req.path,
                    status = resp.status,
                    retried = req.is_retried(),
                    credentials = req.with_credentials(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "request completed"
                );
                Ok(resp)
            }
            Err(err) => {
                tracing::warn!(
                    target: "http.access",
                    request_id = %req.id(),
                    method = %req.method,
                    path = %req.path,
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "request failed without a response"
                );
                Err(err.into())
            }
        }
    }

    pub fn is_auth_boundary(&self, route: &str) -> bool {
        self.inner.auth_boundary_paths.iter().any(|p| {
            route == p.as_str()
                || route
                    .strip_prefix(p.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}
