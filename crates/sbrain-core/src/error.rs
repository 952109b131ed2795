use sbrain_protocol::ErrorBody;

use crate::request::Response;

/// No response was obtained from the network.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Errors surfaced by the HTTP client core and everything layered on it.
///
/// `Clone` so that a single refresh failure can be handed to every queued caller.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http {status}: {}", describe(.body))]
    Http { status: u16, body: ErrorBody },
    #[error("session refresh failed: {0}")]
    RefreshFailed(Box<ClientError>),
    #[error("session refresh was cancelled before it settled")]
    RefreshCancelled,
    #[error("response decode error: {0}")]
    Decode(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// Rejected locally; nothing was sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

fn describe(body: &ErrorBody) -> &str {
    body.message
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or("request failed")
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        ClientError::Transport(err.0)
    }
}

impl ClientError {
    pub fn from_response(resp: Response) -> Self {
        ClientError::Http {
            status: resp.status,
            body: ErrorBody::from_value(&resp.body),
        }
    }

    /// HTTP status of the failing response, looking through refresh failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            ClientError::RefreshFailed(inner) => inner.status(),
            _ => None,
        }
    }

    pub fn is_refresh_failure(&self) -> bool {
        matches!(
            self,
            ClientError::RefreshFailed(_) | ClientError::RefreshCancelled
        )
    }

    /// Text for a user-facing notification: the server's message when it sent one,
    /// otherwise the error itself, otherwise `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        if let ClientError::Http { body, .. } = self {
            if let Some(msg) = body.message.as_deref().filter(|m| !m.trim().is_empty()) {
                return msg.to_string();
            }
        }
        let text = self.to_string();
        if text.trim().is_empty() {
            fallback.to_string()
        } else {
            text
        }
    }
}
