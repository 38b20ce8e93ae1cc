use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use crate::cli::args::{Cli, CliCommand};

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("hostprep error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        CliCommand::RepoSync(args) => {
            commands::repo_sync::run_repo_sync(cli.config, cli.verbose, &args)
        }
        CliCommand::WildcardTls(args) => {
            commands::wildcard_tls::run_wildcard_tls(cli.config, cli.verbose, &args)
        }
    }
}
