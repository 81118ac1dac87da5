//! LLM failover engine (v1)
//!
//! Operator CLI around the reliability execution engine.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────────┐
//!                         │             CompletionStateMachine                │
//!     payload +           │  ┌──────────┐   ┌──────────────────────────────┐  │
//!     candidates ─────────┼─▶│ tracking │──▶│     ReliabilityExecutor      │  │
//!                         │  │  create  │   │  ┌─────────┐  ┌───────────┐  │  │
//!                         │  └──────────┘   │  │ planner │─▶│  circuit  │  │  │
//!                         │                 │  └────┬────┘  │  breakers │  │  │        ┌─────────┐
//!                         │                 │       ▼       └───────────┘  │  │        │ backend │
//!                         │                 │  ┌─────────┐  ┌───────────┐  │──┼───────▶│   x/y   │
//!                         │                 │  │ invoker │◀─│ deadline  │  │  │        └─────────┘
//!                         │                 │  └─────────┘  └───────────┘  │  │
//!     summary +           │  ┌──────────┐   └──────────────────────────────┘  │
//!     record  ◀───────────┼──│ finalize │◀── AttemptTracker                    │
//!                         │  └──────────┘                                      │
//!                         └──────────────────────────────────────────────────┘
//! ```
//!
//! # Commands
//!
//! - `check`: load and validate a config, print it
//! - `run`: send one payload through the engine against the configured
//!   HTTP backends and print the summary and tracking record

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use llm_failover::config::load_config;
use llm_failover::execution::{ExecutionSummary, ReliabilityExecutor};
use llm_failover::http::HttpInvoker;
use llm_failover::observability::{logging, metrics};
use llm_failover::resilience::InMemoryCircuitBreakerStore;
use llm_failover::routing::FallbackPlanner;
use llm_failover::tracking::{CompletionStateMachine, InMemoryTrackingStore};

#[derive(Parser)]
#[command(name = "llm-failover")]
#[command(about = "Fallback execution across LLM backends", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "failover.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print it
    Check,
    /// Send one JSON payload through the fallback chain
    Run {
        /// File holding the request payload (JSON)
        #[arg(short, long)]
        payload: PathBuf,

        /// Override the candidate list from the config
        #[arg(long, value_delimiter = ',')]
        candidates: Vec<String>,

        /// Tracking store file, overrides `tracking.persistence_path`
        #[arg(long)]
        tracking_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init_logging(&config.observability)?;
    tracing::info!(config = %cli.config.display(), "llm-failover v0.1.0 starting");

    match cli.command {
        Commands::Check => {
            tracing::info!(
                candidates = config.execution.candidates.len(),
                backends = config.backends.len(),
                total_timeout_ms = config.execution.total_timeout_ms,
                "Configuration valid"
            );
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Run {
            payload,
            candidates,
            tracking_file,
        } => {
            if config.observability.metrics_enabled {
                match config.observability.metrics_address.parse() {
                    Ok(addr) => metrics::init_metrics(addr)?,
                    Err(_) => tracing::error!(
                        metrics_address = %config.observability.metrics_address,
                        "Failed to parse metrics address"
                    ),
                }
            }

            let payload: Value = serde_json::from_str(&std::fs::read_to_string(&payload)?)?;
            let candidates = if candidates.is_empty() {
                config.execution.candidates.clone()
            } else {
                candidates
            };

            let store = match tracking_file.or_else(|| config.tracking.persistence_path.as_ref().map(PathBuf::from)) {
                Some(path) => InMemoryTrackingStore::load_from_file(path)?,
                None => InMemoryTrackingStore::default(),
            };
            let store = Arc::new(store);

            let breakers = Arc::new(InMemoryCircuitBreakerStore::new(config.circuit_breaker));
            let executor = ReliabilityExecutor::from_config(&config, FallbackPlanner::new(breakers));
            let engine = CompletionStateMachine::new(store.clone(), executor);
            let invoker = HttpInvoker::new(&config.backends, payload);

            let run = engine.run_tracked(&candidates, &invoker).await;
            let summary = ExecutionSummary::from_result(&run.result);
            let record = run.record_id.and_then(|id| store.get(id));

            if let Err(e) = store.save_to_file() {
                tracing::error!(error = %e, "Failed to save tracking records");
            }

            let response = run.result.as_ref().ok().map(|o| o.response().body.clone());
            let output = json!({
                "summary": summary,
                "record": record,
                "response": response,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);

            if !summary.success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
