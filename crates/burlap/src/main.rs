use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::info;

use burlap::{config::Config, emit, walk, WalkOptions};

#[derive(Debug, Parser)]
#[command(name = "burlap", version, about = "Bundle a module tree into a single file")]
struct Cli {
    /// Config file (TOML); entries may be given directly instead
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Entry module references (in addition to the config's)
    entry: Vec<String>,

    /// Output file, overriding the config
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Base directory for entry resolution, overriding the config
    #[arg(long)]
    base_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    run(Cli::parse())
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.entries.extend(cli.entry);
    if let Some(output) = cli.output {
        config.output = output;
    }
    if let Some(base_dir) = cli.base_dir {
        config.base_dir = Some(base_dir);
    }

    if config.entries.is_empty() {
        bail!("no entry modules given");
    }

    let base_dir = match config.base_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to determine working directory")?,
    };

    let mut options = WalkOptions::new(base_dir);
    options.package_paths = config.package_paths;
    options.skip = config.skip;

    let records = walk(config.entries, options).collect_records()?;
    info!("processing {} files", records.len());

    let bundle = emit::bundle(&records);
    if let Some(parent) = config.output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    std::fs::write(&config.output, bundle.code)
        .with_context(|| format!("failed to write {}", config.output.display()))?;
    info!("written output in '{}'", config.output.display());

    Ok(())
}
