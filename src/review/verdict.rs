//! Verdict extraction from free-text reviewer output.
//!
//! The LLM reviewer is asked to end its response with a line of the exact
//! form `VERDICT: <APPROVE|REQUEST_CHANGES|BLOCK>`. Free-text parsing is
//! inherently fragile, so it lives here as a small pure function: the first
//! `VERDICT:` line wins, the value is matched case-insensitively after
//! trimming, and anything unrecognized (including the absence of a verdict
//! line) falls back to `RequestChanges`. Absence of an explicit verdict is
//! never treated as approval.

use crate::review::Verdict;

/// Parse a reviewer response into a verdict, defaulting to
/// `RequestChanges`.
pub fn parse_verdict(output: &str) -> Verdict {
    for line in output.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("VERDICT:") {
            return match value.trim().to_ascii_uppercase().as_str() {
                "APPROVE" => Verdict::Approve,
                "REQUEST_CHANGES" => Verdict::RequestChanges,
                "BLOCK" => Verdict::Block,
                _ => Verdict::RequestChanges,
            };
        }
    }
    Verdict::RequestChanges
}
