//! Exit codes for the CLI

/// Every job succeeded
pub const SUCCESS: i32 = 0;

/// A job failed, or the workspace is not ready for testing
pub const FAILURE: i32 = 1;

/// User interrupted the run
pub const INTERRUPTED: i32 = 130;
