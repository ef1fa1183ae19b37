mod cache;
mod complete;
mod config;
mod csv;
mod local;
mod output;
mod redirect;
mod repl;
mod service;
mod store;
mod terminal;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::Config;
use local::{CwdDownloads, LocalDataService, LoggingNavigator, SystemClipboard};
use store::{FileKvStore, MemoryKvStore, StateStore};
use terminal::{Collaborators, Terminal};

#[derive(Parser)]
#[command(name = "puterm", version)]
#[command(about = "Power-user command terminal")]
struct Cli {
    /// Execute a single command and exit
    #[arg(short = 'c', long = "command")]
    command: Option<String>,

    /// Do not persist history or transcript
    #[arg(long)]
    ephemeral: bool,

    /// Override the data directory (default: ~/.puterm)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let data_dir = cli.data_dir.unwrap_or_else(config::default_data_dir);
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;
    let config = Config::load(&data_dir)?;

    let collab = Collaborators {
        data: Box::new(LocalDataService::load_or_default(&data_dir)),
        navigator: Box::new(LoggingNavigator),
        clipboard: Box::new(SystemClipboard),
        downloads: Box::new(CwdDownloads),
    };

    let state = if cli.ephemeral {
        StateStore::new(Box::new(MemoryKvStore::new()))
    } else {
        StateStore::new(Box::new(FileKvStore::new(data_dir.join("state.json"))?))
    };

    let mut term = Terminal::new(collab, state, config.identity.clone());

    match cli.command {
        Some(command) => {
            let before = term.output().len();
            term.execute(&command);
            repl::render_delta(&term, before, config.display.timestamps);
            Ok(())
        }
        None => repl::run(&mut term, &config.display),
    }
}
