//! Environment preparation for the worker process.

use tokio::process::Command;

/// Inherited variables that must not reach the worker.
pub const DEFAULT_ENV_DENYLIST: &[&str] = &[
    "*_API_KEY",
    "*_SECRET*",
    "*_TOKEN*",
    "*_PASSWORD*",
    "AWS_*",
];

/// Match `key_upper` against one denylist pattern.
///
/// A `*` is only meaningful at either end of the pattern: leading means
/// "ends with", trailing means "starts with", both means "contains". The
/// pattern is uppercased before comparison.
pub(crate) fn denylist_pattern_matches(pattern: &str, key_upper: &str) -> bool {
    let pattern = pattern.to_uppercase();
    let (any_prefix, rest) = match pattern.strip_prefix('*') {
        Some(rest) => (true, rest),
        None => (false, pattern.as_str()),
    };
    let (any_suffix, literal) = match rest.strip_suffix('*') {
        Some(literal) => (true, literal),
        None => (false, rest),
    };
    match (any_prefix, any_suffix) {
        (true, true) => key_upper.contains(literal),
        (true, false) => key_upper.ends_with(literal),
        (false, true) => key_upper.starts_with(literal),
        (false, false) => key_upper == literal,
    }
}

/// Strip denylisted inherited variables from `cmd`, then apply `overrides`.
///
/// Overrides are applied last, so an explicitly configured variable survives
/// even when its name matches the denylist.
pub(crate) fn apply_environment<'a>(
    cmd: &mut Command,
    inherited: impl IntoIterator<Item = String>,
    denylist: &[String],
    overrides: impl IntoIterator<Item = (&'a String, &'a String)>,
) {
    for key in inherited {
        let upper = key.to_uppercase();
        if denylist.iter().any(|pat| denylist_pattern_matches(pat, &upper)) {
            tracing::trace!(key = %key, "Removing denylisted variable from worker environment");
            cmd.env_remove(&key);
        }
    }
    for (key, value) in overrides {
        cmd.env(key, value);
    }
}
