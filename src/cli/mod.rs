use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{ConfigLoader, CONFIG_ENV, DATA_ENV};
use crate::storage;

pub mod commands;

use self::commands::{CreateArgs, DeleteArgs, ListArgs, UpdateArgs};

#[derive(Parser, Debug)]
#[command(
    name = "diradmin",
    version,
    about = "Browse and edit a hierarchical business directory"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over DIRADMIN_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over DIRADMIN_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print one page of a screen as a table (default)
    List(ListArgs),
    /// Create a record
    Create(CreateArgs),
    /// Rename a record or replace its extra fields
    Update(UpdateArgs),
    /// Delete a record and everything nested under it
    Delete(DeleteArgs),
    /// Insert the demo directory
    Seed,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var(CONFIG_ENV, path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var(DATA_ENV, path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = loader.load_or_init()?;
    let storage = storage::init(&paths, &config.storage)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;

    let command = cli.command.unwrap_or_else(|| {
        Commands::List(ListArgs {
            page: 1,
            child_page: 1,
            ..ListArgs::default()
        })
    });
    let output = match command {
        Commands::List(args) => runtime.block_on(commands::list(&config, &storage, &args))?,
        Commands::Create(args) => {
            let name = commands::name_or_prompt(args.name)?;
            let extra = commands::extra_or_stdin(args.extra)?;
            runtime.block_on(commands::create(
                &config,
                &storage,
                &args.target,
                &name,
                extra.as_deref(),
            ))?
        }
        Commands::Update(args) => {
            let name = commands::name_or_prompt(args.name)?;
            let extra = commands::extra_or_stdin(args.extra)?;
            runtime.block_on(commands::update(
                &config,
                &storage,
                &args.target,
                args.id,
                &name,
                extra.as_deref(),
            ))?
        }
        Commands::Delete(args) => runtime.block_on(commands::delete(&config, &storage, &args))?,
        Commands::Seed => commands::seed(&storage)?,
    };
    print!("{output}");
    Ok(())
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
