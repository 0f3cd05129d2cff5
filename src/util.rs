//! Shared utility functions for the conductor crate.

use uuid::Uuid;

/// Generate a short collision-resistant identifier: the first 8 hex
/// characters of a random UUID.
pub fn short_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

/// Truncate `s` to at most `max` characters, replacing the tail with an
/// ellipsis marker when truncation occurs. Operates on characters, not
/// bytes, so multi-byte input never splits a code point.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}
