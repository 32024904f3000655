//! Command-line interface for asin-finder.
//!
//! This module provides CLI commands for resolving single books, resolving a
//! batch file, and maintaining the ASIN cache.

mod commands;

pub use commands::{CacheCommand, Cli, Commands, run_command};
