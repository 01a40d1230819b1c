//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Validation error - inputs failed check
pub const VALIDATION_ERROR: i32 = 2;

/// Configuration error - malformed values, override types or non-installable charts
pub const CONFIG_ERROR: i32 = 3;

/// Partial failure - the release exists but is not healthy; state was saved
pub const PARTIAL_FAILURE: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
