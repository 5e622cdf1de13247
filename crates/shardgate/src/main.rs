use anyhow::Context;
use clap::{Parser, Subcommand};
use shardgate::{catalog_summary, describe, init_tracing};
use shardgate_common::sharding::load_catalog;
use shardgate_common::CatalogHandle;
use shardgate_coordinator::{prepare_parsed, Router, RouterOptions, Settings};
use shardgate_sql::StatementParser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (TOML); `SHARDGATE_CONFIG_PATH` or the bundled default otherwise.
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Routes a statement and prints the groups, per-group SQL and merge plan.
    Route {
        /// Sharding catalog (JSON), overriding the settings file.
        #[arg(short, long)]
        sharding: Option<String>,
        /// Session database.
        #[arg(long)]
        db: Option<String>,
        sql: String,
    },
    /// Loads a sharding catalog and reports whether it is valid.
    Check {
        #[arg(short, long)]
        sharding: Option<String>,
    },
}

fn load_settings(path: Option<&str>) -> anyhow::Result<Settings> {
    let settings = match path {
        Some(p) => Settings::from_file(p),
        None => Settings::new(),
    };
    settings.context("loading settings")
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut settings = load_settings(args.config.as_deref())?;

    match args.command {
        Command::Route { sharding, db, sql } => {
            if let Some(path) = sharding {
                settings.sharding_config = path;
            }
            let catalog = load_catalog(&settings.sharding_config)
                .with_context(|| format!("loading {}", settings.sharding_config))?;
            let router = Router::new(CatalogHandle::new(catalog), RouterOptions::from(&settings));
            let parsed = StatementParser::new()
                .parse(&sql)
                .context("parsing statement")?;
            let prepared = prepare_parsed(&router, &settings, parsed, db.as_deref());
            print!("{}", describe(&prepared));
        }
        Command::Check { sharding } => {
            let path = sharding.unwrap_or_else(|| settings.sharding_config.clone());
            let catalog =
                load_catalog(&path).with_context(|| format!("loading {path}"))?;
            info!(%path, "sharding catalog is valid");
            println!("{}", catalog_summary(&catalog));
        }
    }
    Ok(())
}
