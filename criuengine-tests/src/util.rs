use std::{
    env, fs,
    io::Read,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::{self, Stdio},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use criuengine_common::{
    env as vars,
    nix::{
        sys::signal::{self, Signal},
        unistd::Pid,
    },
};
use tempfile::TempDir;

pub fn workspace_dir() -> PathBuf {
    let output = process::Command::new(env::var("CARGO").unwrap())
        .arg("locate-project")
        .arg("--workspace")
        .arg("--message-format=plain")
        .output()
        .unwrap()
        .stdout;
    let cargo_path = Path::new(std::str::from_utf8(&output).unwrap().trim());
    cargo_path.parent().unwrap().to_path_buf()
}

#[cfg(debug_assertions)]
pub fn cargo_profile() -> &'static str {
    "debug"
}

#[cfg(not(debug_assertions))]
pub fn cargo_profile() -> &'static str {
    "release"
}

pub fn target_dir() -> PathBuf {
    workspace_dir().join("target").join(cargo_profile())
}

pub fn criuengine_bin() -> String {
    target_dir().join("criuengine").to_string_lossy().to_string()
}

pub fn fake_runtime_bin() -> String {
    target_dir().join("fake-runtime").to_string_lossy().to_string()
}

/// Removes every variable the helper reads, so the caller's environment
/// cannot leak into a test.
pub fn clean_env(cmd: &mut process::Command) -> &mut process::Command {
    for var in [
        vars::CRIU_PATH,
        vars::CRIU_OPTS,
        vars::LEAVE_RUNNING,
        vars::SCRIPT_ACTION,
        vars::INIT_PID,
        vars::NEW_ARGS_ID,
    ] {
        cmd.env_remove(var);
    }
    cmd
}

pub struct ChildWithStreamedOutput {
    pub proc: process::Child,
    pub stdout: Arc<Mutex<String>>,
    pub stderr: Arc<Mutex<String>>,
}

impl ChildWithStreamedOutput {
    pub fn signal(&mut self, signal: Signal) {
        signal::kill(Pid::from_raw(self.proc.id() as _), signal).unwrap();
    }
}

pub fn spawn(cmd: &mut process::Command) -> ChildWithStreamedOutput {
    let mut proc = clean_env(cmd)
        .env("RUST_LOG", "criuengine=trace")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn");

    let stdout = Arc::new(Mutex::new("".to_string()));
    let stderr = Arc::new(Mutex::new("".to_string()));

    let pid = proc.id();
    let stdout_pipe = proc.stdout.take().unwrap();
    let stderr_pipe = proc.stderr.take().unwrap();

    stream(pid, stdout_pipe, stdout.clone());
    stream(pid, stderr_pipe, stderr.clone());

    ChildWithStreamedOutput {
        proc,
        stdout,
        stderr,
    }
}

fn stream(pid: u32, mut pipe: impl Read + Send + 'static, buf: Arc<Mutex<String>>) {
    thread::spawn(move || {
        let mut bbuf = [0u8; 1024];
        loop {
            let len = match pipe.read(&mut bbuf) {
                Ok(0) | Err(_) => break,
                Ok(len) => len,
            };
            let out = String::from_utf8_lossy(&bbuf[..len]).to_string();
            print!("{}", out.replace('\n', &format!("\n [{pid}] ")));
            buf.lock().unwrap().push_str(out.as_str());
        }
    });
}

pub fn wait_for_output(child: &ChildWithStreamedOutput, contents: &'static str) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        for out in [&child.stdout, &child.stderr] {
            let out = out.lock().unwrap();
            if out.contains(contents) {
                return;
            }
        }

        assert!(Instant::now() < deadline, "timed out waiting for {contents:?}");
        thread::sleep(Duration::from_millis(10));
    }
}

/// A shell script standing in for criu. It records its arguments, one per
/// line, and exits with a fixed code.
pub struct FakeCriu {
    _dir: TempDir,
    pub path: PathBuf,
    pub args_file: PathBuf,
}

impl FakeCriu {
    pub fn exiting_with(code: i32) -> Self {
        Self::with_body(&format!("exit {code}"), 0o755)
    }

    /// Kills itself instead of exiting.
    pub fn killed() -> Self {
        Self::with_body("kill -9 $$", 0o755)
    }

    /// Exists but cannot be executed.
    pub fn not_executable() -> Self {
        Self::with_body("exit 0", 0o644)
    }

    fn with_body(body: &str, mode: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("criu");
        let args_file = dir.path().join("args");
        fs::write(
            &path,
            format!(
                "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\n{body}\n",
                args_file.display()
            ),
        )
        .unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();

        Self {
            _dir: dir,
            path,
            args_file,
        }
    }

    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    /// Arguments of the last run, `None` if criu never ran.
    pub fn recorded_args(&self) -> Option<Vec<String>> {
        fs::read_to_string(&self.args_file)
            .ok()
            .map(|s| s.lines().map(str::to_string).collect())
    }
}

/// What the fake runtime saw while the helper ran as its child.
#[derive(Debug)]
pub struct RuntimeReport {
    pub pid: i32,
    pub helper_exit: Option<i32>,
    pub relays: Vec<i32>,
    pub stderr: String,
}

/// Runs the helper with `helper_args` under the fake runtime, which is given
/// `runtime_args`.
pub fn run_under_runtime(
    runtime_args: &[&str],
    helper_args: &[&str],
    envs: &[(&str, &str)],
) -> RuntimeReport {
    let mut cmd = process::Command::new(fake_runtime_bin());
    clean_env(&mut cmd)
        .env("RUST_LOG", "warn")
        .args(runtime_args)
        .arg("--")
        .arg(criuengine_bin())
        .args(helper_args)
        .envs(envs.iter().copied())
        .stdin(Stdio::null());

    // stdout and stderr are only closed once the detached grandchild is gone
    let output = cmd.output().expect("failed to run fake runtime");
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    print!("{stderr}");
    assert!(output.status.success(), "fake runtime failed: {stdout}");

    let mut report = RuntimeReport {
        pid: 0,
        helper_exit: None,
        relays: vec![],
        stderr,
    };
    for line in stdout.lines() {
        if let Some(pid) = line.strip_prefix("runtime pid: ") {
            report.pid = pid.parse().unwrap();
        } else if let Some(code) = line.strip_prefix("helper exit: ") {
            report.helper_exit = Some(code.parse().unwrap());
        } else if let Some(code) = line.strip_prefix("relay: ") {
            report.relays.push(code.parse().unwrap());
        }
    }
    report
}
