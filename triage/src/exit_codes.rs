//! Stable exit codes for triage CLI commands.

/// Command succeeded, or `triage process` resolved the message.
pub const OK: i32 = 0;
/// Command failed due to invalid layout/config or other setup errors.
pub const INVALID: i32 = 1;
/// `triage process` ran but the resolution reported an error.
pub const UNRESOLVED: i32 = 2;
