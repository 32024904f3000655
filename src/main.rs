//! ASIN Finder - resolve a book's marketplace identifier from its title,
//! author or ISBN.

use asin_finder::cli;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("asin_finder=info".parse()?))
        .init();

    cli::run_command(&args)
}
