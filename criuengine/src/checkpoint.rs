//! `checkpoint`: dump the runtime, our parent, with criu.
//!
//! criu dumps a whole process tree, so the process running it must not be
//! part of the runtime's tree. We fork twice and let the grandchild be
//! reparented before criu is started from it. The runtime gets back our exit
//! code right away and learns the result of the dump through the relay
//! signal, unless the dump was supposed to end it.

use std::{
    env, fs,
    path::{Path, PathBuf},
    process, thread,
    time::Duration,
};

use criuengine_common::{
    anyhow::{Context, Result},
    nix::{
        self,
        errno::Errno,
        sys::wait::WaitStatus,
        unistd::{execv, fork, getpid, getppid, ForkResult, Pid},
    },
    relay,
    tracing::{debug, error, info, warn},
};

use crate::{
    config::ToolConfig,
    proc::{shell_exit_code, wait_retrying},
    tool::ToolCommand,
};

/// Exit code of the criu child when exec itself failed. criu never uses it,
/// and the child has already printed why.
pub const SUPPRESS_ERROR_IN_PARENT: i32 = 77;

/// Written into the image directory, holds the pid of the dumped runtime.
pub const PID_FILE: &str = "pid";

const DEFAULT_LOG_FILE: &str = "dump4.log";
const REPARENT_ATTEMPTS: u32 = 300;
const REPARENT_INTERVAL: Duration = Duration::from_micros(10);
const INIT: Pid = Pid::from_raw(1);

pub fn checkpoint(config: ToolConfig, target: Pid) -> i32 {
    let dump = Dump::new(config, target);

    if let Err(e) = write_pid_file(&dump.image_dir, target) {
        warn!("{e:#}");
    }

    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => wait_for_middle(child),
        Ok(ForkResult::Child) => process::exit(fork_detached(dump)),
        Err(e) => {
            error!("failed to fork: {e}");
            1
        }
    }
}

// The middle process exits as soon as it has forked, so this returns quickly.
fn wait_for_middle(child: Pid) -> i32 {
    match wait_retrying(child) {
        Ok(status) => shell_exit_code(status).unwrap_or(1),
        Err(e) => {
            error!("failed to wait for {child}: {e}");
            1
        }
    }
}

fn fork_detached(dump: Dump) -> i32 {
    let original_parent = getpid();

    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => 0,
        Ok(ForkResult::Child) => process::exit(run_detached(dump, original_parent)),
        Err(e) => {
            error!("failed to fork: {e}");
            kick(dump.target, relay::FAILURE);
            1
        }
    }
}

fn run_detached(dump: Dump, original_parent: Pid) -> i32 {
    match detach(original_parent, dump.target) {
        Detachment::Detached => debug!("reparented to init"),
        Detachment::AlreadyOutside(parent) => {
            debug!("reparented to {parent}, outside of the runtime's tree")
        }
        Detachment::TimedOut(parent) => {
            error!("can't move out of the runtime's process hierarchy (parent is still {parent})");
            kick(dump.target, relay::FAILURE);
            return 1;
        }
    }

    let outcome = dump.run();
    outcome.report(&dump);

    if let Some(code) = outcome.relay_code(dump.leave_running) {
        kick(dump.target, code);
    }

    match outcome {
        DumpOutcome::Succeeded => 0,
        _ => 1,
    }
}

fn kick(target: Pid, code: i32) {
    if let Err(e) = relay::kick(target, code) {
        error!("{e:#}");
    }
}

fn write_pid_file(image_dir: &Path, pid: Pid) -> Result<()> {
    let path = image_dir.join(PID_FILE);
    fs::write(&path, format!("{pid}\n"))
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Where the grandchild ended up after its parent exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detachment {
    /// Adopted by init.
    Detached,
    /// Adopted by a subreaper above the runtime.
    AlreadyOutside(Pid),
    /// Still parented inside the runtime's tree when polling gave up.
    TimedOut(Pid),
}

/// Polls our parent pid until init adopts us or the attempts run out.
pub fn detach(original_parent: Pid, target: Pid) -> Detachment {
    poll_reparent(
        original_parent,
        target,
        REPARENT_ATTEMPTS,
        REPARENT_INTERVAL,
        getppid,
    )
}

fn poll_reparent(
    original_parent: Pid,
    target: Pid,
    attempts: u32,
    interval: Duration,
    mut parent_of_self: impl FnMut() -> Pid,
) -> Detachment {
    let mut parent = parent_of_self();
    let mut attempts = attempts;
    while parent != INIT && attempts > 0 {
        thread::sleep(interval);
        parent = parent_of_self();
        attempts -= 1;
    }

    if parent == INIT {
        Detachment::Detached
    } else if parent == original_parent || parent == target {
        Detachment::TimedOut(parent)
    } else {
        Detachment::AlreadyOutside(parent)
    }
}

/// A prepared `criu dump` of one process.
#[derive(Debug, Clone)]
pub struct Dump {
    target: Pid,
    image_dir: PathBuf,
    log_file: String,
    leave_running: bool,
    command: ToolCommand,
}

impl Dump {
    pub fn new(config: ToolConfig, target: Pid) -> Self {
        let log_file = config
            .log_file
            .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());
        let pid = target.to_string();
        let image_dir = config.image_dir.to_string_lossy().into_owned();

        let mut command = ToolCommand::new(&config.criu);
        command.args([
            "dump",
            "-t",
            pid.as_str(),
            "-D",
            image_dir.as_str(),
            "--shell-job",
            config.verbosity.as_str(),
            // without -W criu changes into the image directory, the log lands there
            "-o",
            log_file.as_str(),
        ]);
        if config.leave_running {
            command.arg("-R");
        }
        command.extra_args(&config.extra_opts);

        Self {
            target,
            image_dir: config.image_dir,
            log_file,
            leave_running: config.leave_running,
            command,
        }
    }

    /// Absolute path of the criu log, for diagnostics.
    pub fn log_path(&self) -> PathBuf {
        let cwd = env::current_dir().unwrap_or_default();
        resolve_log_path(&cwd, &self.image_dir, &self.log_file)
    }

    /// Runs criu in a child process and waits for it.
    pub fn run(&self) -> DumpOutcome {
        let argv = match self.command.to_cstrings() {
            Ok(argv) => argv,
            Err(e) => {
                error!("{e:#}");
                return DumpOutcome::ExecFailed;
            }
        };

        info!("running {}", self.command.display());

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                let err = match execv(&argv[0], &argv) {
                    Ok(never) => match never {},
                    Err(e) => e,
                };
                error!("Cannot execute CRIU \"{}\": {err}", self.command.display());
                process::exit(SUPPRESS_ERROR_IN_PARENT)
            }
            Ok(ForkResult::Parent { child }) => {
                debug!("criu started as {child}");
                DumpOutcome::from_wait(wait_retrying(child))
            }
            Err(e) => DumpOutcome::SpawnFailed(e),
        }
    }
}

fn resolve_log_path(cwd: &Path, image_dir: &Path, log_file: &str) -> PathBuf {
    // joining an absolute path replaces whatever came before it
    cwd.join(image_dir).join(log_file)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpOutcome {
    SpawnFailed(Errno),
    WaitFailed(Errno),
    /// criu did not exit on its own, e.g. it was killed.
    Abnormal(WaitStatus),
    /// exec of criu failed in the child.
    ExecFailed,
    Failed(i32),
    Succeeded,
}

impl DumpOutcome {
    pub fn from_wait(res: nix::Result<WaitStatus>) -> Self {
        match res {
            Err(e) => DumpOutcome::WaitFailed(e),
            Ok(WaitStatus::Exited(_, 0)) => DumpOutcome::Succeeded,
            Ok(WaitStatus::Exited(_, SUPPRESS_ERROR_IN_PARENT)) => DumpOutcome::ExecFailed,
            Ok(WaitStatus::Exited(_, code)) => DumpOutcome::Failed(code),
            Ok(status) => DumpOutcome::Abnormal(status),
        }
    }

    /// What to tell the runtime. A successful dump that did not leave the
    /// runtime running has nobody left to tell.
    pub fn relay_code(&self, leave_running: bool) -> Option<i32> {
        match self {
            DumpOutcome::Succeeded if leave_running => Some(relay::SUCCESS),
            DumpOutcome::Succeeded => None,
            _ => Some(relay::FAILURE),
        }
    }

    fn report(&self, dump: &Dump) {
        match self {
            DumpOutcome::Succeeded => {
                debug!("checkpoint of {} done", dump.target);
                return;
            }
            DumpOutcome::ExecFailed => return,
            DumpOutcome::SpawnFailed(e) => error!("failed to fork for CRIU: {e}"),
            DumpOutcome::WaitFailed(e) => error!("Error waiting for CRIU: {e}"),
            DumpOutcome::Abnormal(status) => error!(
                "CRIU has not properly exited, waitpid status was {status:?} - check {}",
                dump.log_path().display()
            ),
            DumpOutcome::Failed(code) => error!(
                "CRIU failed with exit code {code} - check {}",
                dump.log_path().display()
            ),
        }
        error!("Command: {}", dump.command.display());
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, collections::VecDeque};

    use criuengine_common::nix::sys::signal::Signal;

    use super::*;

    fn config() -> ToolConfig {
        ToolConfig {
            criu: PathBuf::from("/usr/sbin/criu"),
            this_exe: PathBuf::from("/opt/rt/lib/criuengine"),
            image_dir: PathBuf::from("/tmp/img"),
            verbosity: "-v4".to_string(),
            log_file: Some("dump4.log".to_string()),
            leave_running: false,
            extra_opts: vec![],
        }
    }

    #[test]
    fn dump_command() {
        let dump = Dump::new(config(), Pid::from_raw(4242));
        assert_eq!(
            dump.command.to_vec(),
            [
                "/usr/sbin/criu",
                "dump",
                "-t",
                "4242",
                "-D",
                "/tmp/img",
                "--shell-job",
                "-v4",
                "-o",
                "dump4.log"
            ]
        );
    }

    #[test]
    fn leave_running_and_extras_come_last() {
        let mut config = config();
        config.leave_running = true;
        config.extra_opts = vec!["--tcp-established".to_string()];
        let argv = Dump::new(config, Pid::from_raw(7)).command.to_vec();
        assert_eq!(&argv[argv.len() - 2..], ["-R", "--tcp-established"]);
    }

    #[test]
    fn log_path_follows_the_image_dir() {
        let cwd = Path::new("/home/rt");
        assert_eq!(
            resolve_log_path(cwd, Path::new("img"), "dump4.log"),
            PathBuf::from("/home/rt/img/dump4.log")
        );
        assert_eq!(
            resolve_log_path(cwd, Path::new("/tmp/img"), "dump4.log"),
            PathBuf::from("/tmp/img/dump4.log")
        );
        assert_eq!(
            resolve_log_path(cwd, Path::new("img"), "/var/log/criu.log"),
            PathBuf::from("/var/log/criu.log")
        );
    }

    #[test]
    fn outcomes_from_wait_status() {
        let pid = Pid::from_raw(10);
        assert_eq!(
            DumpOutcome::from_wait(Ok(WaitStatus::Exited(pid, 0))),
            DumpOutcome::Succeeded
        );
        assert_eq!(
            DumpOutcome::from_wait(Ok(WaitStatus::Exited(pid, SUPPRESS_ERROR_IN_PARENT))),
            DumpOutcome::ExecFailed
        );
        assert_eq!(
            DumpOutcome::from_wait(Ok(WaitStatus::Exited(pid, 1))),
            DumpOutcome::Failed(1)
        );
        assert_eq!(
            DumpOutcome::from_wait(Ok(WaitStatus::Signaled(pid, Signal::SIGKILL, false))),
            DumpOutcome::Abnormal(WaitStatus::Signaled(pid, Signal::SIGKILL, false))
        );
        assert_eq!(
            DumpOutcome::from_wait(Err(Errno::ECHILD)),
            DumpOutcome::WaitFailed(Errno::ECHILD)
        );
    }

    #[test]
    fn every_failure_relays_failure() {
        let failures = [
            DumpOutcome::SpawnFailed(Errno::EAGAIN),
            DumpOutcome::WaitFailed(Errno::ECHILD),
            DumpOutcome::Abnormal(WaitStatus::Signaled(
                Pid::from_raw(1),
                Signal::SIGSEGV,
                true,
            )),
            DumpOutcome::ExecFailed,
            DumpOutcome::Failed(2),
        ];
        for outcome in failures {
            assert_eq!(outcome.relay_code(false), Some(relay::FAILURE));
            assert_eq!(outcome.relay_code(true), Some(relay::FAILURE));
        }
    }

    #[test]
    fn success_relays_only_when_left_running() {
        assert_eq!(DumpOutcome::Succeeded.relay_code(false), None);
        assert_eq!(DumpOutcome::Succeeded.relay_code(true), Some(relay::SUCCESS));
    }

    fn parents(pids: &[i32]) -> impl FnMut() -> Pid {
        let mut pids: VecDeque<_> = pids.iter().copied().collect();
        move || {
            let pid = if pids.len() > 1 {
                pids.pop_front().unwrap()
            } else {
                pids[0]
            };
            Pid::from_raw(pid)
        }
    }

    #[test]
    fn adopted_by_init() {
        let polls = Cell::new(0);
        let mut next = parents(&[100, 100, 1]);
        let res = poll_reparent(
            Pid::from_raw(100),
            Pid::from_raw(50),
            300,
            Duration::ZERO,
            || {
                polls.set(polls.get() + 1);
                next()
            },
        );
        assert_eq!(res, Detachment::Detached);
        assert_eq!(polls.get(), 3);
    }

    #[test]
    fn stuck_with_the_original_parent() {
        let res = poll_reparent(
            Pid::from_raw(100),
            Pid::from_raw(50),
            5,
            Duration::ZERO,
            parents(&[100]),
        );
        assert_eq!(res, Detachment::TimedOut(Pid::from_raw(100)));
    }

    #[test]
    fn adopted_by_the_runtime_itself() {
        let res = poll_reparent(
            Pid::from_raw(100),
            Pid::from_raw(50),
            5,
            Duration::ZERO,
            parents(&[100, 50]),
        );
        assert_eq!(res, Detachment::TimedOut(Pid::from_raw(50)));
    }

    #[test]
    fn adopted_by_a_subreaper() {
        let res = poll_reparent(
            Pid::from_raw(100),
            Pid::from_raw(50),
            5,
            Duration::ZERO,
            parents(&[100, 20]),
        );
        assert_eq!(res, Detachment::AlreadyOutside(Pid::from_raw(20)));
    }

    #[test]
    fn pid_file_holds_the_target() {
        let dir = tempfile::tempdir().unwrap();
        write_pid_file(dir.path(), Pid::from_raw(4242)).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join(PID_FILE)).unwrap(),
            "4242\n"
        );
    }
}
