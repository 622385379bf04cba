//! `restore`: replace ourselves with `criu restore`. criu calls back into this
//! executable twice, once as its action script and once through `--exec-cmd`
//! to supervise the restored tree.

use criuengine_common::{
    nix::unistd::execv,
    tracing::{debug, error},
};

use crate::{config::ToolConfig, tool::ToolCommand};

pub fn restore(config: ToolConfig) -> i32 {
    let command = restore_command(&config);

    let argv = match command.to_cstrings() {
        Ok(argv) => argv,
        Err(e) => {
            error!("{e:#}");
            return 1;
        }
    };

    debug!("exec {}", command.display());
    let err = match execv(&argv[0], &argv) {
        Ok(never) => match never {},
        Err(e) => e,
    };
    error!("Cannot execute CRIU \"{}\": {err}", command.display());
    1
}

pub fn restore_command(config: &ToolConfig) -> ToolCommand {
    let this_exe = config.this_exe.to_string_lossy().into_owned();
    let image_dir = config.image_dir.to_string_lossy().into_owned();

    let mut command = ToolCommand::new(&config.criu);
    command.args([
        "restore",
        "-W",
        ".",
        "--shell-job",
        "--action-script",
        this_exe.as_str(),
        "-D",
        image_dir.as_str(),
        config.verbosity.as_str(),
    ]);
    if let Some(log_file) = &config.log_file {
        command.args(["-o", log_file.as_str()]);
    }
    command
        .tail(["--exec-cmd", "--", this_exe.as_str(), "restorewait"])
        .extra_args(&config.extra_opts);

    command
}
