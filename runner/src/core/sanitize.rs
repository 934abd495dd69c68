//! Reduce raw terraform output to the part a reviewer cares about.
//!
//! Every function here is pure and total: anchors and patterns are optional,
//! and all slicing happens on positions returned by `find`/regex matches, so
//! no input can produce an out-of-range or mid-character slice.

use std::error::Error;
use std::sync::LazyLock;

use regex::Regex;

/// Emitted after the version banner on every invocation.
pub const BACKEND_MARKER: &str = "Initializing the backend...";
/// Start of the diff when the plan or apply changes something.
pub const CHANGES_ANCHOR: &str = "Terraform will perform the following actions:";
/// Start of the summary when nothing changes.
pub const NO_CHANGES_ANCHOR: &str = "No changes. Your infrastructure matches the configuration.";

/// Horizontal rule printed before the post-plan boilerplate.
static PLAN_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"───────────.+").expect("separator pattern is valid"));

/// Trim tool output to the relevant excerpt.
///
/// On error, returns `stderr` when non-empty, else `stdout` (after the banner
/// is dropped). Otherwise returns `stdout` from the change anchor up to the
/// end of the last `trailing` match. Missing anchors or matches leave that end
/// of the output untouched.
pub fn cleanup_output(
    non_empty_change: bool,
    error: Option<&dyn Error>,
    stdout: &str,
    stderr: &str,
    trailing: Option<&Regex>,
) -> String {
    let stdout = match stdout.find(BACKEND_MARKER) {
        Some(pos) => &stdout[pos..],
        None => stdout,
    };

    if error.is_some() {
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        return stdout.to_string();
    }

    let anchor = if non_empty_change {
        CHANGES_ANCHOR
    } else {
        NO_CHANGES_ANCHOR
    };
    let start = stdout.find(anchor).unwrap_or(0);

    let mut end = stdout.len();
    if let Some(last) = trailing.and_then(|pattern| pattern.find_iter(stdout).last()) {
        end = last.end();
    }
    if end <= start {
        end = stdout.len();
    }

    stdout[start..end].to_string()
}

/// Apply-mode cleanup: no trailing trim.
pub fn cleanup_apply(
    non_empty_change: bool,
    error: Option<&dyn Error>,
    stdout: &str,
    stderr: &str,
) -> String {
    cleanup_output(non_empty_change, error, stdout, stderr, None)
}

/// Plan-mode cleanup: also drops everything after the last separator line.
pub fn cleanup_plan(
    non_empty_change: bool,
    error: Option<&dyn Error>,
    stdout: &str,
    stderr: &str,
) -> String {
    cleanup_output(non_empty_change, error, stdout, stderr, Some(&*PLAN_SEPARATOR))
}
