use std::path::{Path, PathBuf};

use criuengine_common::{
    anyhow::{bail, Context, Result},
    env,
    tracing::debug,
};

use crate::args::{Action, Args};

/// Used when neither `CRAC_CRIU_PATH` nor a bundled criu is available.
pub const SYSTEM_CRIU: &str = "/usr/sbin/criu";

/// Everything `checkpoint` and `restore` need to build a criu command line.
/// Built once per invocation and handed over by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub criu: PathBuf,
    /// This executable, handed to criu for `--action-script` and `--exec-cmd`.
    pub this_exe: PathBuf,
    pub image_dir: PathBuf,
    /// Already in criu syntax, e.g. `-v4` or `--verbosity=2`.
    pub verbosity: String,
    pub log_file: Option<String>,
    pub leave_running: bool,
    pub extra_opts: Vec<String>,
}

impl ToolConfig {
    pub fn load(
        action: Action,
        args: &Args,
        this_exe: PathBuf,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let image_dir = match args.image_dir() {
            Some(dir) => PathBuf::from(dir),
            None => bail!("{action} requires an image directory"),
        };

        let exe_dir = this_exe
            .parent()
            .context("executable path has no parent directory")?;
        let criu = resolve_criu(lookup(env::CRIU_PATH), exe_dir)?;
        debug!("using criu at {}", criu.display());

        let verbosity = match &args.verbosity {
            Some(level) => format!("--verbosity={level}"),
            None if action == Action::Checkpoint => "-v4".to_string(),
            None => "-v1".to_string(),
        };

        let log_file = match &args.log_file {
            Some(log) => Some(log.clone()),
            None if action == Action::Checkpoint => Some("dump4.log".to_string()),
            None => None,
        };

        let extra_opts = lookup(env::CRIU_OPTS)
            .map(|opts| opts.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Ok(Self {
            criu,
            this_exe,
            image_dir,
            verbosity,
            log_file,
            leave_running: lookup(env::LEAVE_RUNNING).is_some(),
            extra_opts,
        })
    }
}

/// Finds criu: the explicit override, then next to this executable, then the
/// system location. Only paths that exist are returned.
pub fn resolve_criu(explicit: Option<String>, exe_dir: &Path) -> Result<PathBuf> {
    if let Some(path) = explicit {
        let path = PathBuf::from(path);
        if !path.exists() {
            bail!("{}={} does not exist", env::CRIU_PATH, path.display());
        }
        return Ok(path);
    }

    let bundled = exe_dir.join("criu");
    if bundled.exists() {
        return Ok(bundled);
    }

    let system = PathBuf::from(SYSTEM_CRIU);
    if system.exists() {
        return Ok(system);
    }

    bail!("cannot find CRIU to use")
}
