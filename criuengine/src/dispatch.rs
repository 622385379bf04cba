use std::env;

use criuengine_common::{
    anyhow::{Context, Result},
    env as vars,
    nix::unistd::getppid,
    tracing::{debug, error},
};

use crate::{
    args::{Action, Args},
    checkpoint::checkpoint,
    config::ToolConfig,
    post_resume::script_action,
    restore::restore,
    restorewait::{restorewait, RestoreWaitConfig},
};

/// Picks the mode for this invocation and returns the process exit code.
pub fn run(args: Args) -> i32 {
    let Some(action) = args.action.as_deref() else {
        return match vars::var(vars::SCRIPT_ACTION) {
            Some(action) => script_action(&action, vars::var),
            None => {
                error!("unknown context");
                1
            }
        };
    };

    let action = match action.parse::<Action>() {
        Ok(action) => action,
        Err(e) => {
            error!("{e}");
            return 1;
        }
    };
    debug!("action: {action}");

    if action == Action::RestoreWait {
        return restorewait(RestoreWaitConfig::from_lookup(vars::var));
    }

    let config = match tool_config(action, &args) {
        Ok(config) => config,
        Err(e) => {
            error!("{e:#}");
            return 1;
        }
    };

    match action {
        Action::Checkpoint => checkpoint(config, getppid()),
        _ => restore(config),
    }
}

fn tool_config(action: Action, args: &Args) -> Result<ToolConfig> {
    let this_exe = env::current_exe().context("cannot locate own executable")?;
    ToolConfig::load(action, args, this_exe, vars::var)
}
