//! The result channel back to the runtime: a single queued real-time signal
//! whose integer payload carries the result code.
//!
//! Where queued real-time signals are not available the relay compiles down
//! to a no-op that always succeeds. Callers must not rely on the runtime
//! actually being notified on such platforms.

use anyhow::Result;
use nix::unistd::Pid;

/// Checkpoint or restore succeeded.
pub const SUCCESS: i32 = 0;
/// Checkpoint failed, the runtime should resume as if nothing happened.
pub const FAILURE: i32 = -1;

#[cfg(target_os = "linux")]
mod imp {
    use std::ffi::c_void;

    use anyhow::{Context, Result};
    use nix::{errno::Errno, unistd::Pid};

    use crate::tracing::debug;

    pub fn signal_number() -> libc::c_int {
        libc::SIGRTMIN() + 2
    }

    pub fn kick(target: Pid, code: i32) -> Result<()> {
        debug!("relaying {code} to {target}");
        let value = libc::sigval {
            sival_ptr: encode(code),
        };
        let res = unsafe { libc::sigqueue(target.as_raw(), signal_number(), value) };
        Errno::result(res)
            .map(drop)
            .with_context(|| format!("sigqueue to {target} failed"))
    }

    // libc only exposes the pointer member of the union, the runtime reads
    // the int member which overlays its first four bytes.
    fn encode(code: i32) -> *mut c_void {
        let raw = code as u32 as usize;
        #[cfg(all(target_endian = "big", target_pointer_width = "64"))]
        let raw = raw << 32;
        raw as *mut c_void
    }

    pub fn decode(value: libc::sigval) -> i32 {
        let raw = value.sival_ptr as usize;
        #[cfg(all(target_endian = "big", target_pointer_width = "64"))]
        let raw = raw >> 32;
        raw as u32 as i32
    }

}

#[cfg(not(target_os = "linux"))]
mod imp {
    use anyhow::Result;
    use nix::unistd::Pid;

    use crate::tracing::trace;

    pub fn kick(target: Pid, code: i32) -> Result<()> {
        trace!("no queued signals on this platform, not relaying {code} to {target}");
        Ok(())
    }
}

#[cfg(target_os = "linux")]
pub use imp::{decode, signal_number};

/// Delivers `code` to `target`. The caller decides whether a failed relay is
/// itself fatal.
pub fn kick(target: Pid, code: i32) -> Result<()> {
    imp::kick(target, code)
}
