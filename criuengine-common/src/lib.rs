pub mod env;
pub mod relay;
pub mod shell;
pub mod tracing;

pub use anyhow;
pub use libc;
pub use nix;
