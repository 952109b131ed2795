//! Cache keys shared by the query layer and the share toggle.

use crate::cache::CacheKey;

pub fn brain_status() -> CacheKey {
    CacheKey::new(["brain", "status"])
}

pub fn piece_status(content_id: &str) -> CacheKey {
    CacheKey::new(["brain", "piece", "status", content_id])
}

pub fn user_contents() -> CacheKey {
    CacheKey::new(["user-contents"])
}

pub fn user() -> CacheKey {
    CacheKey::new(["user"])
}

pub fn shared_brain(hash: &str) -> CacheKey {
    CacheKey::new(["brain", "shared", hash])
}

pub fn shared_piece(hash: &str) -> CacheKey {
    CacheKey::new(["brain", "piece", "shared", hash])
}
