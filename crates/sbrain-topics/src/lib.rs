//! Canonical event topic constants published on the notification hub.
//!
//! Keep this list alphabetized within sections and favor dot.case names.

// Session
pub const TOPIC_SESSION_LOGOUT: &str = "session.logout";

// Share toggles
pub const TOPIC_SHARE_TOGGLE_COMMITTED: &str = "share.toggle.committed";
pub const TOPIC_SHARE_TOGGLE_ROLLED_BACK: &str = "share.toggle.rolled_back";
