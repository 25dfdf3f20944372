//! Command-line interface for image-forge.
//!
//! Provides the `run` and `plan` commands.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
