//! Command-line interface for reviewd.
//!
//! Provides the serve, worker, and migrate commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
