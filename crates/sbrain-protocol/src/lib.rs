use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Error payload returned by the API on non-2xx responses.
///
/// `field_errors` belongs to form-level callers; the client core only reads `message`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<BTreeMap<String, FieldError>>,
}

impl ErrorBody {
    /// Best-effort parse of an error body; anything unrecognised yields an empty body.
    pub fn from_value(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
#[serde(untagged)]
pub enum FieldError {
    One(String),
    Many(Vec<String>),
}

/// `{ "message": ... }` acknowledgement returned by most mutations.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct MessageBody {
    #[serde(default)]
    pub message: Option<String>,
}

/// Share status of the whole collection or of one piece.
///
/// `view_count`/`created_at` are only reported for the collection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShareStatus {
    pub is_sharing: bool,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Video,
    Tweet,
    Link,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Tag {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
}

/// One saved item in the user's collection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub link: String,
    #[serde(rename = "type")]
    pub kind: ContentType,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
    /// Mirrors the piece's share status.
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ContentListEnvelope {
    pub contents: Vec<Content>,
}

/// Public view of a shared piece.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SharedPiece {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(rename = "type")]
    pub kind: ContentType,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SharedPieceEnvelope {
    pub brain_piece: SharedPiece,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SharedBrainEnvelope {
    pub brain: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserEnvelope {
    pub user: User,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_body_accepts_string_and_list_field_errors() {
        let body = ErrorBody::from_value(&json!({
            "message": "Validation failed",
            "fieldErrors": { "tags": ["duplicate tag"], "title": "required" }
        }));
        assert_eq!(body.message.as_deref(), Some("Validation failed"));
        let fields = body.field_errors.expect("field errors");
        assert_eq!(
            fields.get("tags"),
            Some(&FieldError::Many(vec!["duplicate tag".into()]))
        );
        assert_eq!(fields.get("title"), Some(&FieldError::One("required".into())));
    }

    #[test]
    fn error_body_tolerates_unexpected_shapes() {
        assert_eq!(ErrorBody::from_value(&json!("boom")), ErrorBody::default());
        assert_eq!(ErrorBody::from_value(&json!(null)), ErrorBody::default());
    }

    #[test]
    fn content_uses_mongo_style_ids() {
        let content: Content = serde_json::from_value(json!({
            "_id": "abc",
            "title": "Rust talk",
            "link": "https://example.com/v",
            "type": "video",
            "tags": [{ "_id": "t1", "name": "rust" }],
            "isActive": true
        }))
        .expect("content parses");
        assert_eq!(content.id, "abc");
        assert_eq!(content.kind, ContentType::Video);
        assert!(content.is_active);
        assert_eq!(content.tags[0].name, "rust");
    }

    #[test]
    fn share_status_omits_collection_only_fields_for_pieces() {
        let status = ShareStatus {
            is_sharing: false,
            hash: None,
            expires_at: None,
            view_count: None,
            created_at: None,
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({ "isSharing": false, "hash": null, "expiresAt": null })
        );
    }
}
