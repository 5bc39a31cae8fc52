//! mgpipe: assembles paired-end metagenomes, annotates contigs with profile
//! HMMs and reports per-sample coverage and variants.
//!
//! External tools do the heavy lifting; every step declares the files it reads
//! and writes, and the runner orders and checks them.

mod annotation;
mod bio;
mod cli;
mod config;
mod database;
mod io;
mod pipeline;
mod relabel;
mod utils;

use anyhow::Result;
use clap::Parser;
use cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    run_cli(cli)
}
