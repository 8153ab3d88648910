use anyhow::{bail, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::check::CheckArgs;

const USAGE: &str = "\
Usage:
  nachos validate <file-or-dir>...
  nachos check --policies <dir> --tool <name> [--mode <mode>] [--session <id>] [--user <id>] [--param key=value]...
  nachos classify [--config <file>] <tool>...
  nachos config [<file>]";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    tracing::debug!(command = %command, "running command");
    match command.as_str() {
        "validate" => {
            if rest.is_empty() {
                bail!("validate needs at least one path\n\n{}", USAGE);
            }
            let paths: Vec<PathBuf> = rest.iter().map(PathBuf::from).collect();
            let ok = commands::validate::run(&paths).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        "check" => {
            let args = CheckArgs::parse(rest)?;
            let allowed = commands::check::run(&args).await?;
            if !allowed {
                std::process::exit(2);
            }
        }
        "classify" => commands::classify::run(rest)?,
        "config" => commands::config::run(rest.first().map(PathBuf::from))?,
        "help" | "--help" | "-h" => println!("{}", USAGE),
        other => bail!("unknown command '{}'\n\n{}", other, USAGE),
    }
    Ok(())
}
