//! Process exit codes for `ztdf-bind`.
//! Scripts depend on these; treat them as a stable contract.

pub const SUCCESS: i32 = 0;
pub const CONFIG_ERROR: i32 = 2; // Trust material missing, unreadable or misconfigured
pub const CHAIN_INVALID: i32 = 3; // Hierarchy loaded but failed validation
pub const VERIFICATION_FAILED: i32 = 4; // At least one policy failed verification
