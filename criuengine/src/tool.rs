use std::{ffi::CString, path::Path};

use criuengine_common::{
    anyhow::{Context, Result},
    env, shell,
    tracing::warn,
};

/// Upper bound on a criu argv, program path included.
pub const MAX_TOOL_ARGS: usize = 31;

/// A criu argv made of a fixed head, a fixed tail, and user supplied extra
/// arguments in between. Only the extras are ever dropped to stay within
/// [`MAX_TOOL_ARGS`].
#[derive(Debug, Clone, Default)]
pub struct ToolCommand {
    head: Vec<String>,
    extra: Vec<String>,
    tail: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: &Path) -> Self {
        Self {
            head: vec![program.to_string_lossy().into_owned()],
            ..Default::default()
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.head.push(arg.into());
        self.check_capacity();
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    /// Arguments that must stay last, after any extras.
    pub fn tail<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tail.extend(args.into_iter().map(Into::into));
        self.check_capacity();
        self
    }

    /// Appends as many of `extra` as fit and warns about the rest.
    pub fn extra_args(&mut self, extra: &[String]) -> &mut Self {
        let room = MAX_TOOL_ARGS - self.len();
        if let Some(dropped) = extra.get(room) {
            warn!(
                "too many arguments in {} (dropped from '{dropped}')",
                env::CRIU_OPTS
            );
        }
        self.extra.extend(extra.iter().take(room).cloned());
        self
    }

    fn len(&self) -> usize {
        self.head.len() + self.extra.len() + self.tail.len()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.head
            .iter()
            .chain(&self.extra)
            .chain(&self.tail)
            .cloned()
            .collect()
    }

    pub fn to_cstrings(&self) -> Result<Vec<CString>> {
        self.to_vec()
            .into_iter()
            .map(|a| CString::new(a).context("criu argument contains a NUL byte"))
            .collect()
    }

    /// Shell-quoted rendering for diagnostics.
    pub fn display(&self) -> String {
        shell::join(&self.to_vec())
    }

    fn check_capacity(&self) {
        assert!(
            self.len() <= MAX_TOOL_ARGS,
            "fixed criu arguments exceed {MAX_TOOL_ARGS}"
        );
    }
}
