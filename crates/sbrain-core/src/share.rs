use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::{json, Value};

use sbrain_events::Bus;
use sbrain_protocol::MessageBody;
use sbrain_topics::{TOPIC_SHARE_TOGGLE_COMMITTED, TOPIC_SHARE_TOGGLE_ROLLED_BACK};

use crate::cache::{CacheKey, CacheStore, CacheTxn};
use crate::client::HttpClient;
use crate::error::ClientError;
use crate::keys;
use crate::request::Request;

/// What a share toggle targets: the whole collection or a single piece.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ShareScope {
    Brain,
    Piece(String),
}

impl ShareScope {
    pub fn piece(content_id: impl Into<String>) -> Self {
        ShareScope::Piece(content_id.into())
    }

    /// Every cache slot a toggle on this scope writes.
    pub fn keys(&self) -> ScopeKeys {
        match self {
            ShareScope::Brain => ScopeKeys {
                status: keys::brain_status(),
                content: None,
            },
            ShareScope::Piece(id) => ScopeKeys {
                status: keys::piece_status(id),
                content: Some(ContentSlot {
                    list: keys::user_contents(),
                    content_id: id.clone(),
                }),
            },
        }
    }

    fn share_path(&self) -> String {
        match self {
            ShareScope::Brain => "/content/brain/share".to_string(),
            ShareScope::Piece(id) => format!("/content/brain/piece/share/{id}"),
        }
    }

    pub fn enable_request(&self) -> Request {
        Request::post(self.share_path())
    }

    pub fn disable_request(&self) -> Request {
        Request::delete(self.share_path())
    }
}

impl fmt::Display for ShareScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShareScope::Brain => f.write_str("brain"),
            ShareScope::Piece(id) => write!(f, "piece:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeKeys {
    pub status: CacheKey,
    /// For pieces: the content list entry whose `isActive` mirrors `isSharing`.
    pub content: Option<ContentSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSlot {
    pub list: CacheKey,
    pub content_id: String,
}

/// Prior state of the mirrored `isActive` field.
#[derive(Debug, Clone, PartialEq)]
enum ActiveField {
    /// List not cached or item not in it; nothing was written.
    Untracked,
    /// Item present without the field.
    Absent,
    Value(Value),
}

/// Pre-toggle values, alive only while the toggle is in flight.
#[derive(Debug, Clone)]
struct OptimisticSnapshot {
    status: Value,
    is_active: ActiveField,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No share status cached for the scope yet.
    NotLoaded,
    /// A toggle for the scope is already outstanding.
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Committed {
        is_sharing: bool,
        message: Option<String>,
    },
    Skipped(SkipReason),
}

#[derive(thiserror::Error, Debug)]
pub enum ToggleError {
    #[error("share toggle for {scope} rejected: {source}")]
    MutationRejected {
        scope: ShareScope,
        #[source]
        source: ClientError,
    },
}

impl ToggleError {
    pub fn client_error(&self) -> &ClientError {
        match self {
            ToggleError::MutationRejected { source, .. } => source,
        }
    }
}

/// Optimistic controller for the share on/off switch.
///
/// Flips the cached status (and, for pieces, the mirrored content flag) before the
/// server answers, keeps at most one call per scope outstanding, and restores the
/// captured snapshot if the call fails.
#[derive(Clone)]
pub struct ShareToggle {
    inner: Arc<ToggleInner>,
}

struct ToggleInner {
    client: HttpClient,
    cache: CacheStore,
    bus: Option<Bus>,
    in_flight: Mutex<HashMap<ShareScope, OptimisticSnapshot>>,
}

impl ShareToggle {
    pub fn new(client: HttpClient, cache: CacheStore) -> Self {
        Self::build(client, cache, None)
    }

    /// Also publish commit/rollback notices on `bus`.
    pub fn with_bus(client: HttpClient, cache: CacheStore, bus: Bus) -> Self {
        Self::build(client, cache, Some(bus))
    }

    fn build(client: HttpClient, cache: CacheStore, bus: Option<Bus>) -> Self {
        Self {
            inner: Arc::new(ToggleInner {
                client,
                cache,
                bus,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<ShareScope, OptimisticSnapshot>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_mutating(&self, scope: &ShareScope) -> bool {
        self.in_flight().contains_key(scope)
    }

    /// Cached `isSharing` for the scope, `false` when nothing is cached.
    pub fn is_sharing(&self, scope: &ShareScope) -> bool {
        self.inner
            .cache
            .get(&scope.keys().status)
            .and_then(|v| v.get("isSharing").and_then(Value::as_bool))
            .unwrap_or(false)
    }

    pub async fn toggle(&self, scope: ShareScope) -> Result<ToggleOutcome, ToggleError> {
        let keys = scope.keys();
        let next = {
            let mut in_flight = self.in_flight();
            if in_flight.contains_key(&scope) {
                tracing::debug!(scope = %scope, "share toggle already in flight; ignoring");
                return Ok(ToggleOutcome::Skipped(SkipReason::InFlight));
            }
            let Some((next, snapshot)) = self.inner.cache.transaction(|txn| begin(txn, &keys))
            else {
                tracing::debug!(scope = %scope, "share status not loaded; nothing to toggle");
                return Ok(ToggleOutcome::Skipped(SkipReason::NotLoaded));
            };
            in_flight.insert(scope.clone(), snapshot);
            next
        };

        let mut pending = Pending {
            toggle: self,
            scope: &scope,
            keys: &keys,
            settled: false,
        };
        let req = if next {
            scope.enable_request()
        } else {
            scope.disable_request()
        };
        tracing::info!(scope = %scope, sharing = next, "share toggle sent");

        match self.inner.client.send(req).await {
            Ok(resp) => {
                pending.commit();
                let message = resp.json::<MessageBody>().ok().and_then(|m| m.message);
                self.publish(
                    TOPIC_SHARE_TOGGLE_COMMITTED,
                    json!({ "scope": scope.to_string(), "isSharing": next, "message": message }),
                );
                Ok(ToggleOutcome::Committed {
                    is_sharing: next,
                    message,
                })
            }
            Err(source) => {
                pending.rollback();
                tracing::warn!(scope = %scope, error = %source, "share toggle rejected; rolled back");
                self.publish(
                    TOPIC_SHARE_TOGGLE_ROLLED_BACK,
                    json!({ "scope": scope.to_string(), "error": source.user_message("Failed to update sharing") }),
                );
                Err(ToggleError::MutationRejected {
                    scope: scope.clone(),
                    source,
                })
            }
        }
    }

    fn publish(&self, kind: &str, payload: Value) {
        if let Some(bus) = &self.inner.bus {
            bus.publish(kind, &payload);
        }
    }
}

/// Read the current flag, capture the snapshot, and write the flipped value to
/// every slot of the scope in one step.
fn begin(txn: &mut CacheTxn<'_>, keys: &ScopeKeys) -> Option<(bool, OptimisticSnapshot)> {
    let status = txn.get(&keys.status)?;
    let next = !status.get("isSharing")?.as_bool()?;
    let status = status.clone();
    let is_active = match &keys.content {
        Some(slot) => match content_item(txn, slot) {
            Some(item) => item
                .get("isActive")
                .cloned()
                .map_or(ActiveField::Absent, ActiveField::Value),
            None => ActiveField::Untracked,
        },
        None => ActiveField::Untracked,
    };

    if let Some(obj) = txn.get_mut(&keys.status).and_then(Value::as_object_mut) {
        obj.insert("isSharing".into(), Value::Bool(next));
    }
    if let Some(slot) = &keys.content {
        if let Some(item) = content_item_mut(txn, slot) {
            item.insert("isActive".into(), Value::Bool(next));
        }
    }
    Some((next, OptimisticSnapshot { status, is_active }))
}

fn restore(txn: &mut CacheTxn<'_>, keys: &ScopeKeys, snapshot: OptimisticSnapshot) {
    txn.set(keys.status.clone(), snapshot.status);
    if let Some(slot) = &keys.content {
        match snapshot.is_active {
            ActiveField::Untracked => {}
            ActiveField::Absent => {
                if let Some(item) = content_item_mut(txn, slot) {
                    item.remove("isActive");
                }
            }
            ActiveField::Value(prev) => {
                if let Some(item) = content_item_mut(txn, slot) {
                    item.insert("isActive".into(), prev);
                }
            }
        }
    }
}

fn content_item<'a>(txn: &'a CacheTxn<'_>, slot: &ContentSlot) -> Option<&'a Value> {
    txn.get(&slot.list)?
        .as_array()?
        .iter()
        .find(|item| item.get("_id").and_then(Value::as_str) == Some(slot.content_id.as_str()))
}

fn content_item_mut<'a>(
    txn: &'a mut CacheTxn<'_>,
    slot: &ContentSlot,
) -> Option<&'a mut serde_json::Map<String, Value>> {
    txn.get_mut(&slot.list)?
        .as_array_mut()?
        .iter_mut()
        .find(|item| item.get("_id").and_then(Value::as_str) == Some(slot.content_id.as_str()))?
        .as_object_mut()
}

/// Settles an in-flight toggle exactly once. If the toggle future is dropped before
/// the call returns, the snapshot is restored as if the call had failed.
struct Pending<'a> {
    toggle: &'a ShareToggle,
    scope: &'a ShareScope,
    keys: &'a ScopeKeys,
    settled: bool,
}

impl Pending<'_> {
    fn commit(&mut self) {
        self.settle(false);
    }

    fn rollback(&mut self) {
        self.settle(true);
    }

    fn settle(&mut self, restore_snapshot: bool) {
        if self.settled {
            return;
        }
        self.settled = true;
        let mut in_flight = self.toggle.in_flight();
        let snapshot = in_flight.get(self.scope).cloned();
        self.toggle.inner.cache.transaction(|txn| {
            if restore_snapshot {
                if let Some(snapshot) = snapshot {
                    restore(txn, self.keys, snapshot);
                }
            }
            txn.invalidate(&self.keys.status);
        });
        in_flight.remove(self.scope);
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(scope = %self.scope, "share toggle dropped before settling; rolling back");
            self.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cache_with(status: Value, contents: Option<Value>, id: &str) -> (CacheStore, ScopeKeys) {
        let cache = CacheStore::new(Duration::from_secs(60));
        let slots = ShareScope::piece(id).keys();
        cache.set(slots.status.clone(), status);
        if let Some(list) = contents {
            cache.set(keys::user_contents(), list);
        }
        (cache, slots)
    }

    #[test]
    fn scope_resolver_maps_piece_to_both_slots() {
        let slots = ShareScope::piece("abc").keys();
        assert_eq!(slots.status, CacheKey::new(["brain", "piece", "status", "abc"]));
        let slot = slots.content.expect("piece mirrors into the content list");
        assert_eq!(slot.list, CacheKey::new(["user-contents"]));
        assert_eq!(slot.content_id, "abc");

        let brain = ShareScope::Brain.keys();
        assert_eq!(brain.status, CacheKey::new(["brain", "status"]));
        assert!(brain.content.is_none());
    }

    #[test]
    fn share_requests_target_scope_endpoints() {
        let brain_on = ShareScope::Brain.enable_request();
        assert_eq!(brain_on.method, crate::request::Method::Post);
        assert_eq!(brain_on.path, "/content/brain/share");
        let piece_off = ShareScope::piece("p1").disable_request();
        assert_eq!(piece_off.method, crate::request::Method::Delete);
        assert_eq!(piece_off.path, "/content/brain/piece/share/p1");
    }

    #[test]
    fn begin_then_restore_is_exact_even_without_is_active_field() {
        let status = json!({"isSharing": false, "hash": null, "expiresAt": null});
        let list = json!([{"_id": "abc", "title": "t"}, {"_id": "other", "isActive": true}]);
        let (cache, slots) = cache_with(status.clone(), Some(list.clone()), "abc");

        let (next, snapshot) = cache
            .transaction(|txn| begin(txn, &slots))
            .expect("status cached");
        assert!(next);
        assert_eq!(cache.get(&slots.status).unwrap()["isSharing"], json!(true));
        assert_eq!(
            cache.get(&keys::user_contents()).unwrap()[0]["isActive"],
            json!(true)
        );

        cache.transaction(|txn| restore(txn, &slots, snapshot));
        assert_eq!(cache.get(&slots.status), Some(status));
        assert_eq!(cache.get(&keys::user_contents()), Some(list));
    }

    #[test]
    fn begin_skips_malformed_status() {
        let (cache, slots) = cache_with(json!({"isSharing": "yes"}), None, "abc");
        assert!(cache.transaction(|txn| begin(txn, &slots)).is_none());
    }

    #[test]
    fn scope_display_is_stable() {
        assert_eq!(ShareScope::Brain.to_string(), "brain");
        assert_eq!(ShareScope::piece("p1").to_string(), "piece:p1");
        assert_eq!(
            serde_json::to_value(ShareScope::piece("p1")).unwrap(),
            json!({"type": "piece", "id": "p1"})
        );
    }
}
