//! `chain-runner` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` — check a chain definition JSON file.
//! - `plan`     — print the execution tiers of a chain definition.
//! - `status`   — show the stored chain execution of a content item and the
//!                plans stored for its chain.
//! - `reset`    — delete the stored chain execution of a content item.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;

use chain::{ChainDefinition, ChainOutcome, ChainReport, ExecutionMetadata, ExecutionPlan};
use store::repository::{executions, plans};
use store::StorePool;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "chain-runner",
    about = "Run and inspect enhancement chains over content items",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a chain definition JSON file.
    Validate {
        /// Path to the chain definition.
        path: PathBuf,
    },
    /// Print the execution tiers of a chain definition.
    Plan {
        path: PathBuf,
    },
    /// Show the stored chain execution of a content item.
    Status {
        #[arg(long, env = "CHAIN_STORE")]
        store: PathBuf,
        content_item_id: String,
    },
    /// Delete the stored chain execution of a content item.
    Reset {
        #[arg(long, env = "CHAIN_STORE")]
        store: PathBuf,
        content_item_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let definition = read_definition(&path)?;
            let plan = definition.declared_plan()?;
            chain::validate_plan(&plan)?;
            println!(
                "✅ Chain '{}' is valid: {} engines in {} tiers.",
                definition.name,
                plan.nodes.len(),
                plan.layers().len()
            );
        }
        Command::Plan { path } => {
            let definition = read_definition(&path)?;
            let plan = definition.declared_plan()?;
            println!("chain '{}' (plan {})", plan.chain_name, plan.id);
            for (tier, layer) in plan.layers().iter().enumerate() {
                let engines: Vec<String> = layer
                    .iter()
                    .map(|n| if n.optional { format!("{}?", n.engine) } else { n.engine.clone() })
                    .collect();
                println!("  tier {tier}: {}", engines.join(", "));
            }
        }
        Command::Status { store, content_item_id } => {
            let pool = open_store(&store).await?;
            let (report, plan_id) = load_report(&pool, &content_item_id).await?;
            print!("{report}");

            let history = plans::list_plans_for_chain(&pool, &report.chain_name).await?;
            println!("plans stored for chain '{}':", report.chain_name);
            for plan in history {
                let marker = if plan.id == plan_id { "*" } else { " " };
                println!("  {marker} {} (created {})", plan.id, plan.created_at.to_rfc3339());
            }
        }
        Command::Reset { store, content_item_id } => {
            let pool = open_store(&store).await?;
            let Some(row) = executions::find_chain_execution_for_content_item(&pool, &content_item_id).await?
            else {
                bail!("no chain execution stored for content item '{content_item_id}'");
            };
            executions::delete_chain_execution(&pool, row.id).await?;
            pool.flush().await?;
            info!("deleted chain execution {} of '{}'", row.id, content_item_id);
            println!("Removed chain execution {} ({}).", row.id, row.chain_name);
        }
    }

    Ok(())
}

fn read_definition(path: &Path) -> anyhow::Result<ChainDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    ChainDefinition::from_json(&content)
        .with_context(|| format!("invalid chain definition in {}", path.display()))
}

async fn open_store(path: &Path) -> anyhow::Result<StorePool> {
    store::pool::create_pool(path)
        .await
        .with_context(|| format!("cannot open store {}", path.display()))
}

/// The report of the stored chain execution and the id of its plan.
async fn load_report(pool: &StorePool, content_item_id: &str) -> anyhow::Result<(ChainReport, Uuid)> {
    let Some(row) = executions::find_chain_execution_for_content_item(pool, content_item_id).await? else {
        bail!("no chain execution stored for content item '{content_item_id}'");
    };
    let plan_row = plans::get_plan(pool, row.plan_id)
        .await
        .with_context(|| format!("plan {} of chain execution {} is missing", row.plan_id, row.id))?;
    let plan_id = plan_row.id;
    let plan: ExecutionPlan = serde_json::from_value(plan_row.definition)?;
    let engine_rows = executions::list_engine_executions(pool, row.id).await?;

    let metadata = ExecutionMetadata::from_rows(row, engine_rows);
    let outcome = ChainOutcome::infer(&plan, &metadata);
    Ok((ChainReport::new(&plan, &metadata, outcome), plan_id))
}
