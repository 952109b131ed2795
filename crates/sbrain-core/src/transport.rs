use anyhow::Result;
use async_trait::async_trait;

use crate::config::HttpConfig;
use crate::error::TransportError;
use crate::request::{Method, Request, Response};

/// Raw send primitive underneath the client core.
///
/// Implementations perform exactly one network exchange per call and never retry.
/// Non-2xx statuses are returned as responses; only a missing response is an error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, req: &Request) -> Result<Response, TransportError>;
}

/// reqwest-backed transport with a shared cookie jar, so credentials set by the
/// login and refresh endpoints accompany every later call.
#[derive(Clone)]
pub struct ReqwestTransport {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(cfg: &HttpConfig) -> Result<Self> {
        let mut cb = reqwest::Client::builder().cookie_store(true);
        // No timeout unless configured: a hung call holds its gate until the
        // socket itself gives up.
        if let Some(secs) = cfg.request_timeout_secs {
            cb = cb.timeout(std::time::Duration::from_secs(secs));
        }
        let client = cb.build().map_err(|e| TransportError(e.to_string()))?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, req: &Request) -> Result<Response, TransportError> {
        let url = self.url_for(&req.path);
        let mut rb = match req.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Patch => self.client.patch(&url),
            Method::Delete => self.client.delete(&url),
        };
        rb = rb.header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = &req.body {
            rb = rb.json(body);
        }
        let resp = rb.send().await.map_err(|e| TransportError(e.to_string()))?;
        let status = resp.status().as_u16();
        let raw = resp
            .bytes()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        Ok(Response::new(status, Response::decode_body(&raw)))
    }
}
