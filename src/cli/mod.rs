//! Command-line entry points behind the `pytr` subcommands

pub mod probe;
pub mod server;

pub use probe::{ProbeArgs, run_probe_mode};
pub use server::{ServerArgs, run_server_mode};
