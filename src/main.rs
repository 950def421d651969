mod doctor;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use authflow_core::config::AppConfig;
use authflow_interaction::auth::{self, AuthIntent, AuthNode};
use authflow_interaction::engine::{GraphStore, Intent, Node};
use authflow_store::SqliteKv;

#[derive(Parser)]
#[command(name = "authflow", version, about = "Interaction graph store tooling")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "authflow.toml", env = "AUTHFLOW_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration
    Config,
    /// List the registered intent and node kinds
    Kinds,
    /// Print a persisted graph instance
    Inspect {
        /// Instance ID
        instance_id: String,
        /// Dump the stored document instead of a summary
        #[arg(long)]
        raw: bool,
    },
    /// Count live graph rows
    Stats,
    /// Delete expired graph rows
    Purge,
    /// Check the config, the graph store and savepoint support
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("authflow=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        warn!(path = %cli.config.display(), "No config file found, using defaults");
        AppConfig::default()
    };

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Kinds => {
            println!("Intents:");
            for kind in AuthIntent::registry().kinds() {
                println!("  {}", kind);
            }
            println!("Nodes:");
            for kind in AuthNode::registry().kinds() {
                println!("  {}", kind);
            }
        }
        Commands::Inspect { instance_id, raw } => {
            let kv = open_kv(&config)?;
            let store = GraphStore::new(
                kv,
                auth::shared_codec(),
                config.store.key_prefix.clone(),
                config.interaction.graph_lifetime(),
            );
            let graph = store.get_graph_instance(&instance_id).await?;

            if raw {
                let doc: serde_json::Value = serde_json::from_str(&store.codec().encode(&graph)?)?;
                println!("{}", serde_json::to_string_pretty(&doc)?);
                return Ok(());
            }

            println!("graph:    {}", graph.graph_id);
            println!("instance: {}", graph.instance_id);
            println!("intent:   {}", graph.intent.kind());
            for (i, annotated) in graph.nodes().iter().enumerate() {
                let marker = if annotated.interactive { "*" } else { " " };
                println!("  {:>2}{} {}", i, marker, annotated.node.kind());
            }
            if let Ok(user_id) = graph.user_id() {
                println!("user:     {}", user_id);
            }
            let amr = graph.amr();
            if !amr.is_empty() {
                println!("amr:      {}", amr.join(" "));
            }
        }
        Commands::Stats => {
            let kv = open_kv(&config)?;
            println!("{} live rows in {}", kv.live_count()?, config.store_path().display());
        }
        Commands::Purge => {
            let kv = open_kv(&config)?;
            let removed = kv.purge_expired()?;
            println!("Removed {} expired rows", removed);
        }
        Commands::Doctor => {
            println!("authflow doctor");
            println!();
            doctor::run_doctor(&config).await;
        }
    }

    Ok(())
}

fn open_kv(config: &AppConfig) -> anyhow::Result<Arc<SqliteKv>> {
    let path = config.store_path();
    info!(path = %path.display(), "Opening graph store");
    Ok(Arc::new(SqliteKv::open(&path)?))
}
