//! Input validation and message sanitization.
//!
//! Branch names flow into filesystem paths and git invocations, so they are
//! validated against a conservative pattern before use. Error messages may
//! carry local filesystem paths; they are scrubbed before leaving the
//! process through any notification channel.

use regex::Regex;
use std::sync::LazyLock;

/// Valid branch name: starts alphanumeric, then alphanumerics, hyphens,
/// underscores, slashes. `..` is rejected separately to block traversal.
static BRANCH_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9/_-]*$").expect("valid regex"));

static PATH_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"/home/[^\s:]+",
        r"/Users/[^\s:]+",
        r"/var/[^\s:]+",
        r"/tmp/[^\s:]+",
        r"C:\\[^\s:]+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Maximum sanitized message length sent to external channels.
const MAX_MESSAGE_LEN: usize = 500;

/// Validate that a branch name is safe to use in file paths and git
/// commands.
pub fn is_valid_branch_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 200 {
        return false;
    }
    if name.contains("..") {
        return false;
    }
    BRANCH_NAME_RE.is_match(name)
}

/// Strip local filesystem paths from a message and bound its length before
/// it is sent to an external notification channel.
pub fn sanitize_message(message: &str) -> String {
    let mut msg = message.to_string();
    for re in PATH_PATTERNS.iter() {
        msg = re.replace_all(&msg, "[path]").into_owned();
    }
    crate::util::truncate(&msg, MAX_MESSAGE_LEN)
}
