use criuengine_common::nix::{
    self,
    errno::Errno,
    sys::wait::{waitpid, WaitStatus},
    unistd::Pid,
};

/// `waitpid` that retries when interrupted by a signal.
pub(crate) fn wait_retrying(pid: Pid) -> nix::Result<WaitStatus> {
    loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => continue,
            res => return res,
        }
    }
}

/// Exit code a shell would report for `status`.
pub(crate) fn shell_exit_code(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, signal, _) => Some(128 + signal as i32),
        _ => None,
    }
}
