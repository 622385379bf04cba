//! `restorewait`: criu execs this in its own place once the tree is restored,
//! making us the parent of the restored root task. We pass every signal on to
//! it and exit the way it did.

use std::{
    ffi::c_void,
    sync::atomic::{AtomicI32, Ordering},
};

use criuengine_common::{
    anyhow::{bail, Result},
    env, libc,
    nix::{
        sys::{
            signal::{
                self, raise, sigaction, sigprocmask, SaFlags, SigAction, SigHandler, SigSet,
                SigmaskHow, Signal,
            },
            wait::WaitStatus,
        },
        unistd::Pid,
    },
    tracing::{debug, error, warn},
};

use crate::proc::wait_retrying;

/// The restored root task, read by the forwarding handler.
static WORKLOAD: WorkloadPid = WorkloadPid::new();

/// A pid published once by the main thread and read from signal handlers.
/// Reads are a single atomic load, so they are async-signal-safe.
pub struct WorkloadPid(AtomicI32);

const UNSET: i32 = -1;

impl WorkloadPid {
    pub const fn new() -> Self {
        Self(AtomicI32::new(UNSET))
    }

    /// Fails if a pid was already published.
    pub fn publish(&self, pid: Pid) -> Result<()> {
        match self
            .0
            .compare_exchange(UNSET, pid.as_raw(), Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Ok(()),
            Err(current) => bail!("workload pid already set to {current}"),
        }
    }

    pub fn get(&self) -> Option<Pid> {
        match self.0.load(Ordering::SeqCst) {
            UNSET => None,
            pid => Some(Pid::from_raw(pid)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestoreWaitConfig {
    pub workload: Option<Pid>,
}

impl RestoreWaitConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let workload = lookup(env::INIT_PID).and_then(|pid| match pid.trim().parse() {
            Ok(pid) if pid > 0 => Some(Pid::from_raw(pid)),
            _ => {
                warn!("ignoring malformed {}={pid}", env::INIT_PID);
                None
            }
        });
        Self { workload }
    }
}

pub fn restorewait(config: RestoreWaitConfig) -> i32 {
    match config.workload {
        Some(pid) => {
            if let Err(e) = WORKLOAD.publish(pid) {
                error!("{e:#}");
                return 1;
            }
        }
        None => warn!("no {}: signals may not be delivered", env::INIT_PID),
    }

    forward_all_signals();

    // criu may exec us with signals still blocked
    if let Err(e) = sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&SigSet::all()), None) {
        error!("sigprocmask: {e}");
    }

    let Some(workload) = config.workload else {
        error!("no restored process to wait for");
        return 1;
    };

    debug!("waiting for workload {workload}");
    match wait_retrying(workload) {
        Ok(status) => {
            debug!("workload finished: {status:?}");
            exit_code(status, reraise)
        }
        Err(e) => {
            error!("waitpid: {e}");
            1
        }
    }
}

/// Installs the forwarding handler for every signal that can be caught.
pub fn forward_all_signals() {
    let action = SigAction::new(
        SigHandler::SigAction(forward),
        SaFlags::SA_SIGINFO,
        SigSet::all(),
    );

    for sig in Signal::iterator().filter(|s| !matches!(s, Signal::SIGKILL | Signal::SIGSTOP)) {
        if let Err(e) = unsafe { sigaction(sig, &action) } {
            warn!("failed to install handler for {sig}: {e}");
        }
    }
}

extern "C" fn forward(sig: libc::c_int, _info: *mut libc::siginfo_t, _ctx: *mut c_void) {
    if let Some(pid) = WORKLOAD.get() {
        unsafe {
            libc::kill(pid.as_raw(), sig);
        }
    }
}

// Dies from `sig` if its default action terminates, returns otherwise.
fn reraise(sig: Signal) {
    unsafe {
        let _ = signal::signal(sig, SigHandler::SigDfl);
    }
    let _ = raise(sig);
}

/// Mirrors the workload's end. A signal is first re-raised against ourselves
/// so our parent sees the same signal; if we survive that, we exit 128+n the
/// way shells do.
pub(crate) fn exit_code(status: WaitStatus, reraise: impl FnOnce(Signal)) -> i32 {
    match status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, sig, _) => {
            reraise(sig);
            128 + sig as i32
        }
        other => {
            error!("unexpected wait status {other:?}");
            1
        }
    }
}
