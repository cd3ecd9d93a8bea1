use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rlu_core::{ResourceId, ResourceRecord};
use rlu_store::RecordStore;
use rlu_store_sqlite::SqliteRecordStore;
use rlu_workflow::scenario;
use rlu_workflow::Config;

#[derive(Parser)]
#[command(name = "rlu", version)]
struct Cli {
    /// Log filter, e.g. `debug` or `rlu_workflow=debug`; overrides RUST_LOG
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config under .rlu/ and create the record database
    Init,

    /// Inspect or seed resource records
    Record {
        #[command(subcommand)]
        cmd: RecordCommand,
    },

    /// Run a scenario directory end to end against simulated collaborators
    Simulate {
        #[arg(long)]
        scenario: PathBuf,
    },
}

#[derive(Subcommand)]
enum RecordCommand {
    /// Insert or replace a record from a JSON file
    Put {
        #[arg(long)]
        file: PathBuf,
    },
    /// Print a record as JSON
    Show {
        #[arg(long)]
        id: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let filter = match &cli.log {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let root = std::env::current_dir()?;
    let config_path = Config::config_path(&root);
    tracing::debug!(config = %config_path.display(), "resolved config path");

    match cli.cmd {
        Command::Init => {
            let cfg = Config::load_or_default(&config_path)?;
            if !config_path.exists() {
                cfg.save_to(&config_path)?;
            }
            let db = cfg.db_path(&root);
            SqliteRecordStore::open(&db)?;
            println!("Initialized rlu in {} (records: {})", root.display(), db.display());
        }
        Command::Record { cmd } => {
            let cfg = Config::load_or_default(&config_path)?;
            let store = SqliteRecordStore::open(&cfg.db_path(&root))?;
            match cmd {
                RecordCommand::Put { file } => {
                    let raw = std::fs::read_to_string(&file).with_context(|| format!("read {}", file.display()))?;
                    let record: ResourceRecord =
                        serde_json::from_str(&raw).with_context(|| format!("parse {}", file.display()))?;
                    store.put(&record)?;
                    println!("Stored {} [{}]", record.id, record.status);
                }
                RecordCommand::Show { id } => {
                    let id = ResourceId::from_str(id);
                    let record = store.get(&id, true)?.ok_or_else(|| anyhow!("no record {id}"))?;
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
            }
        }
        Command::Simulate { scenario: dir } => {
            let cfg = Config::load_or_default(&config_path)?;
            let loaded = scenario::load_scenario(&dir)?;
            let store = Arc::new(SqliteRecordStore::open(&cfg.db_path(&root))?);
            store.put(&loaded.record)?;

            let outcome = scenario::run_with(&loaded, store, &cfg.workflow)?;
            match (&outcome.context, &outcome.error) {
                (Some(ctx), _) => println!("{}", serde_json::to_string_pretty(&ctx.to_json()?)?),
                (None, Some(error)) => println!("run failed: {error}"),
                (None, None) => {}
            }
            match loaded.expected.check(&outcome, cfg.workflow.container_name.as_deref()) {
                Ok(()) => println!("{}: OK", loaded.scenario_id),
                Err(e) => {
                    println!("{}: FAILED: {e:#}", loaded.scenario_id);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
