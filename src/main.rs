//! Faultline CLI entry point.

use clap::Parser;
use faultline::cli::{self, Cli};

fn main() {
    let cli = Cli::parse();
    std::process::exit(cli::run(cli));
}
