//! `tapeq` inspects and maintains a tape job queue store.

use std::io;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tapeq::object_store::ObjectStore;
use tapeq::settings::AppConfig;
use tapeq::{admin, trace};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "tapeq", version, about)]
/// Application CLI arguments
struct Args {
    /// path to a TOML config file
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Output in JSON format instead of human-readable tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the root entry
    Root,
    /// List every stored object address
    Objects,
    /// Dump one object as JSON
    Object {
        /// Object address
        address: String,
    },
    /// Show the drive register
    Drives,
    /// Queue summaries
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// List agents whose heartbeat has expired
    StaleAgents,
    /// Garbage-collect a dead agent, or every stale agent
    Collect {
        /// Agent address; all stale agents when omitted
        agent: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum QueueAction {
    /// Summary of a tape pool's archive queue
    Archive { tapepool: String },
    /// Summary of a tape's retrieve queue
    Retrieve { vid: String },
}

async fn run(args: &Args, store: &ObjectStore) -> anyhow::Result<()> {
    let mut stdout = io::stdout();
    let json = args.json;
    match &args.command {
        Command::Root => admin::dump_root(store, &mut stdout, json).await,
        Command::Objects => admin::list_objects(store, &mut stdout, json).await,
        Command::Object { address } => admin::dump_object(store, &mut stdout, address).await,
        Command::Drives => admin::dump_drives(store, &mut stdout, json).await,
        Command::Queue { action } => match action {
            QueueAction::Archive { tapepool } => {
                admin::archive_queue_summary(store, &mut stdout, tapepool, json).await
            }
            QueueAction::Retrieve { vid } => {
                admin::retrieve_queue_summary(store, &mut stdout, vid, json).await
            }
        },
        Command::StaleAgents => admin::stale_agents(store, &mut stdout, json).await,
        Command::Collect { agent } => {
            admin::collect(store, &mut stdout, agent.as_deref(), json).await
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = AppConfig::load(args.config.as_deref())?;
    trace::init(cfg.logging.format)?;

    let store = ObjectStore::open(&cfg).await?;
    let result = run(&args, &store).await;
    if !store.shutdown().await? {
        warn!(agent = %store.agent_address(), "agent left registered");
    }
    result
}
