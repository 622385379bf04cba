use std::{ffi::OsString, fmt, str::FromStr};

use clap::Parser;

/// Options that take a value, as (short, long).
const VALUE_OPTIONS: &[(&str, &str)] = &[("-v", "--verbosity"), ("-o", "--log-file")];

/// Checkpoint/restore helper driving criu on behalf of a running runtime.
///
/// When run without an action it behaves as a criu `--action-script` and
/// looks at `CRTOOLS_SCRIPT_ACTION` instead.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "criuengine", disable_help_flag = true, disable_version_flag = true)]
pub struct Args {
    /// checkpoint, restore or restorewait
    pub action: Option<String>,

    /// criu verbosity level, passed on as --verbosity=<V>
    #[arg(short, long, allow_hyphen_values = true)]
    pub verbosity: Option<String>,

    /// criu log file, relative to the image directory unless absolute
    #[arg(short = 'o', long, allow_hyphen_values = true)]
    pub log_file: Option<String>,

    /// image directory, anything after it is ignored
    pub rest: Vec<String>,
}

impl Args {
    /// Parses a full argv, program name first. Unknown options are skipped
    /// wherever they appear and known ones are honoured anywhere after the
    /// action, like getopt with argument permutation.
    pub fn from_argv<I, T>(argv: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let argv = argv
            .into_iter()
            .map(|a| a.into().to_string_lossy().into_owned());
        Self::try_parse_from(known_tokens(argv))
    }

    /// The first leftover token that is not an option.
    pub fn image_dir(&self) -> Option<&str> {
        self.rest
            .iter()
            .map(String::as_str)
            .find(|a| !a.starts_with('-'))
    }
}

/// Keeps the program name, positionals and known options with their values.
fn known_tokens(argv: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut argv = argv.into_iter();
    let mut kept: Vec<String> = argv.next().into_iter().collect();

    while let Some(token) = argv.next() {
        if token == "--" {
            kept.push(token);
            kept.extend(argv.by_ref());
            break;
        }
        if !token.starts_with('-') || token == "-" {
            kept.push(token);
            continue;
        }
        match value_option(&token) {
            Some(OptionValue::Separate) => {
                kept.push(token);
                kept.extend(argv.next());
            }
            Some(OptionValue::Joined) => kept.push(token),
            None => {}
        }
    }

    kept
}

enum OptionValue {
    /// `-v 3`, `--verbosity 3`
    Separate,
    /// `-v3`, `--verbosity=3`
    Joined,
}

fn value_option(token: &str) -> Option<OptionValue> {
    VALUE_OPTIONS.iter().find_map(|(short, long)| {
        if token == *short || token == *long {
            Some(OptionValue::Separate)
        } else if token.starts_with(&format!("{long}="))
            || (!token.starts_with("--") && token.starts_with(short))
        {
            Some(OptionValue::Joined)
        } else {
            None
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Checkpoint,
    Restore,
    /// Run by criu through `--exec-cmd` once the tree is restored.
    RestoreWait,
}

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkpoint" => Ok(Action::Checkpoint),
            "restore" => Ok(Action::Restore),
            "restorewait" => Ok(Action::RestoreWait),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Checkpoint => "checkpoint",
            Action::Restore => "restore",
            Action::RestoreWait => "restorewait",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAction(pub String);

impl fmt::Display for UnknownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown command-line action: {}", self.0)
    }
}

impl std::error::Error for UnknownAction {}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::from_argv(std::iter::once("criuengine").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn options_follow_the_action() {
        let args = parse(&["checkpoint", "--verbosity=2", "--log-file", "cp.log", "/tmp/img"]);
        assert_eq!(args.action.as_deref(), Some("checkpoint"));
        assert_eq!(args.verbosity.as_deref(), Some("2"));
        assert_eq!(args.log_file.as_deref(), Some("cp.log"));
        assert_eq!(args.image_dir(), Some("/tmp/img"));
    }

    #[test]
    fn short_options() {
        let args = parse(&["restore", "-v", "3", "-o", "r.log", "img"]);
        assert_eq!(args.verbosity.as_deref(), Some("3"));
        assert_eq!(args.log_file.as_deref(), Some("r.log"));
        assert_eq!(args.image_dir(), Some("img"));
    }

    #[test]
    fn unknown_options_are_skipped() {
        let args = parse(&["checkpoint", "--frobnicate", "/tmp/img", "extra"]);
        assert_eq!(args.image_dir(), Some("/tmp/img"));
    }

    #[test]
    fn unknown_options_do_not_hide_later_options() {
        let args = parse(&["checkpoint", "--frobnicate", "-v", "3", "/img"]);
        assert_eq!(args.verbosity.as_deref(), Some("3"));
        assert_eq!(args.image_dir(), Some("/img"));
    }

    #[test]
    fn options_after_the_image_dir_apply() {
        let args = parse(&["checkpoint", "/img", "--verbosity=2", "-ocp.log"]);
        assert_eq!(args.verbosity.as_deref(), Some("2"));
        assert_eq!(args.log_file.as_deref(), Some("cp.log"));
        assert_eq!(args.image_dir(), Some("/img"));
    }

    #[test]
    fn help_and_version_are_just_unknown_options() {
        let args = parse(&["checkpoint", "-h", "--help", "-V", "/img"]);
        assert_eq!(args.action.as_deref(), Some("checkpoint"));
        assert_eq!(args.image_dir(), Some("/img"));

        let args = parse(&["--help"]);
        assert_eq!(args.action, None);
    }

    #[test]
    fn no_arguments_at_all() {
        let args = parse(&[]);
        assert_eq!(args.action, None);
        assert_eq!(args.image_dir(), None);
    }

    #[test]
    fn actions() {
        assert_eq!("checkpoint".parse(), Ok(Action::Checkpoint));
        assert_eq!("restorewait".parse(), Ok(Action::RestoreWait));
        assert_eq!(
            "dump".parse::<Action>().unwrap_err().to_string(),
            "unknown command-line action: dump"
        );
    }
}
