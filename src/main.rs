use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use epistemic_arbiter::config::load_config;
use epistemic_arbiter::dispatcher::{self, DispatchInput, Pipeline};
use epistemic_arbiter::server::run_stdio_server;
use epistemic_arbiter::state::ServiceState;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "epistemic-arbiter")]
#[command(version)]
#[command(about = "Epistemic retrieval and arbitration service (MCP server)")]
struct Cli {
    /// Workspace root to operate against. Defaults to the current directory.
    #[arg(long, value_name = "PATH")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the MCP stdio server.
    Mcp,
    /// Run a single dispatcher action against the local index and print the
    /// resulting envelope, without starting the stdio server. Useful for
    /// scripting and for the integration test suite.
    Run {
        /// Action name (search, catalog, preflight, validate, orient,
        /// challenge, gate, encode, get, version, cleanup). Omit to let the
        /// phrase-matcher infer one from `--input`/`--context`.
        #[arg(long)]
        action: Option<String>,
        #[arg(long)]
        input: Option<String>,
        #[arg(long)]
        context: Option<String>,
        #[arg(long)]
        canon_url: Option<String>,
    },
}

/// Structured logging to stderr; stdout is reserved for the JSON-RPC stream.
/// Level is controlled by `RUST_LOG` (defaults to `info`).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Some(Command::Mcp) | None => run_stdio_server(cli.root),
        Some(Command::Run { action, input, context, canon_url }) => {
            let repo_root = cli
                .root
                .map(Ok)
                .unwrap_or_else(|| std::env::current_dir().context("Failed to get current dir"))?;

            let config = load_config(&repo_root);
            let state_dir = if config.state.state_dir.is_absolute() {
                config.state.state_dir.clone()
            } else {
                repo_root.join(&config.state.state_dir)
            };
            let baseline_cache_root = if config.baseline.cache_root.is_absolute() {
                config.baseline.cache_root.clone()
            } else {
                repo_root.join(&config.baseline.cache_root)
            };
            let state = ServiceState::new(state_dir, baseline_cache_root);
            let pipeline = Pipeline { local_root: &repo_root, config: &config, state: &state };

            let dispatch_input = DispatchInput { action, input, context, mode: None, canon_url, state: None };
            let envelope = dispatcher::dispatch(&pipeline, dispatch_input);
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            Ok(())
        }
    }
}
