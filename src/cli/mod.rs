//! Command-line interface for taskforge.
//!
//! Provides the supervisor entry point (`run`) and the worker entry point
//! (`worker`) that spawned worker processes execute.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
