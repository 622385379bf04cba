pub mod args;
pub mod checkpoint;
pub mod config;
pub mod dispatch;
pub mod post_resume;
mod proc;
pub mod restore;
pub mod restorewait;
pub mod tool;

use std::{env, process};

use crate::args::Args;

pub fn main() {
    criuengine_common::tracing::init();

    let args = match Args::from_argv(env::args_os()) {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        }
    };

    process::exit(crate::dispatch::run(args));
}
