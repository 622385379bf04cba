//! Environment variables exchanged with the runtime and with criu.

/// Explicit path to the criu executable.
pub const CRIU_PATH: &str = "CRAC_CRIU_PATH";
/// Extra criu arguments, split on whitespace.
pub const CRIU_OPTS: &str = "CRAC_CRIU_OPTS";
/// Any value asks criu to leave the dumped process running.
pub const LEAVE_RUNNING: &str = "CRAC_CRIU_LEAVE_RUNNING";
/// Set by criu when it runs us as `--action-script`.
pub const SCRIPT_ACTION: &str = "CRTOOLS_SCRIPT_ACTION";
/// Set by criu to the pid of the restored root task.
pub const INIT_PID: &str = "CRTOOLS_INIT_PID";
/// Resume argument id echoed back to the runtime after restore.
pub const NEW_ARGS_ID: &str = "CRAC_NEW_ARGS_ID";

/// Reads a variable from the process environment, treating non-unicode
/// values as absent.
pub fn var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
