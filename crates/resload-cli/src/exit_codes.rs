//! Process exit codes for the `resload` binary.

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_LOAD_FAILED: i32 = 1; // Fetch, transform or cache failure
pub const EXIT_CONFIG_ERROR: i32 = 2; // Bad arguments, key or environment
pub const EXIT_NOT_CACHED: i32 = 3; // inspect: nothing stored for the key
