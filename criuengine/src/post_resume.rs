//! criu runs us as its action script at several points of a restore. After
//! `post-resume` the restored runtime is waiting to hear from us.

use criuengine_common::{
    anyhow::{Context, Result},
    env,
    nix::unistd::Pid,
    relay,
    tracing::{debug, error},
};

/// The only action-script notification we react to.
pub const POST_RESUME: &str = "post-resume";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostResume {
    pub target: Pid,
    pub new_args_id: i32,
}

impl PostResume {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let target = lookup(env::INIT_PID)
            .with_context(|| format!("cannot find {} env", env::INIT_PID))?;
        let target: i32 = target
            .trim()
            .parse()
            .ok()
            .filter(|pid| *pid > 0)
            .with_context(|| format!("malformed {}={target}", env::INIT_PID))?;

        let new_args_id = match lookup(env::NEW_ARGS_ID) {
            Some(id) => id
                .trim()
                .parse()
                .with_context(|| format!("malformed {}={id}", env::NEW_ARGS_ID))?,
            None => relay::SUCCESS,
        };

        Ok(Self {
            target: Pid::from_raw(target),
            new_args_id,
        })
    }
}

/// Handles one action-script notification.
pub fn script_action(action: &str, lookup: impl Fn(&str) -> Option<String>) -> i32 {
    if action != POST_RESUME {
        debug!("ignoring {action} notification");
        return 0;
    }

    match PostResume::from_lookup(lookup).and_then(post_resume) {
        Ok(()) => 0,
        Err(e) => {
            error!("{e:#}");
            1
        }
    }
}

pub fn post_resume(config: PostResume) -> Result<()> {
    debug!("restore of {} complete", config.target);
    relay::kick(config.target, config.new_args_id)
}
