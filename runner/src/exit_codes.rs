//! Stable exit codes for `plan-runner` commands.

/// Command completed.
pub const OK: i32 = 0;
/// Invalid config, a failed step or any other error.
pub const FAILED: i32 = 1;
/// The project lock is held by another holder; nothing ran.
pub const LOCKED: i32 = 2;
