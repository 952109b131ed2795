use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request descriptor handed to the client core.
///
/// The descriptor travels by value through the gate and the refresh replay, so the
/// `retried` flag belongs to exactly one logical request and can only move from
/// `false` to `true`.
#[derive(Debug, Clone)]
pub struct Request {
    id: Uuid,
    pub method: Method,
    /// Path relative to the configured base URL, e.g. `/content/user`.
    pub path: String,
    pub body: Option<Value>,
    with_credentials: bool,
    retried: bool,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.into(),
            body: None,
            with_credentials: true,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Self {
        self.body =
            Some(serde_json::to_value(body).unwrap_or_else(|_| serde_json::json!({"_ser":"error"})));
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether cookies/credentials accompany the call. Always set by the constructors.
    pub fn with_credentials(&self) -> bool {
        self.with_credentials
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// Flip `retried`; returns `false` when it was already set.
    pub(crate) fn mark_retried(&mut self) -> bool {
        !std::mem::replace(&mut self.retried, true)
    }

    /// Path without any query string.
    pub fn route(&self) -> &str {
        self.path.split('?').next().unwrap_or_default()
    }
}

/// A response as seen by the client core: status plus decoded JSON body.
///
/// Empty bodies decode to `Value::Null`; non-JSON bodies are kept as a string.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_value(self.body.clone()).map_err(|e| ClientError::Decode(e.to_string()))
    }

    pub fn decode_body(raw: &[u8]) -> Value {
        if raw.iter().all(|b| b.is_ascii_whitespace()) {
            return Value::Null;
        }
        serde_json::from_slice(raw)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(raw).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retried_flag_flips_once() {
        let mut req = Request::get("/user/me");
        assert!(!req.is_retried());
        assert!(req.mark_retried());
        assert!(req.is_retried());
        assert!(!req.mark_retried());
        assert!(req.is_retried());
    }

    #[test]
    fn clones_keep_identity() {
        let req = Request::delete("/content/brain/share");
        let copy = req.clone();
        assert_eq!(req.id(), copy.id());
        assert_ne!(req.id(), Request::delete("/content/brain/share").id());
        assert!(req.with_credentials());
    }

    #[test]
    fn route_strips_query() {
        assert_eq!(Request::get("/content/user?page=2").route(), "/content/user");
        assert_eq!(Request::get("/content/user").route(), "/content/user");
    }

    #[test]
    fn decode_body_handles_empty_and_text() {
        assert_eq!(Response::decode_body(b""), Value::Null);
        assert_eq!(Response::decode_body(b"  \n"), Value::Null);
        assert_eq!(Response::decode_body(br#"{"ok":true}"#), json!({"ok": true}));
        assert_eq!(
            Response::decode_body(b"Unauthorized"),
            Value::String("Unauthorized".into())
        );
    }
}
