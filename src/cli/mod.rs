//! Command-line interface for consensus-forge.
//!
//! Provides commands for running debates, orchestrating multi-phase
//! decisions, analyzing questions and previewing panels.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
