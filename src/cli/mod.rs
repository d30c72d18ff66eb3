//! Command-line front end (feature `cli`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::LiveTxtConfig;
use crate::error::{LiveTxtError, Result};
use crate::executor::TurnExecutor;
use crate::gateway::GatewayWorker;
use crate::loader::AgentCatalog;
use crate::server::{self, ServerState};
use crate::types::{JobRequest, SessionState};

/// livetxt: voice-room agents over text
#[derive(Parser, Debug)]
#[command(name = "livetxt", version, about = "Run voice-room agents against text turns")]
pub struct Cli {
    /// Log level or filter directive (overridden by RUST_LOG)
    #[arg(long, global = true, env = "LIVETXT_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// TOML configuration file
    #[arg(long, global = true, env = "LIVETXT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to the gateway and serve live sessions
    Run(RunArgs),
    /// Serve the HTTP turn API
    Serve(ServeArgs),
    /// Execute one turn locally and print the result as JSON
    Exec(ExecArgs),
    /// List registered agents and entrypoints
    Agents,
    /// Print the version
    Version,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Registered entrypoint or agent name
    pub agent: Option<String>,

    #[arg(long, env = "LIVETXT_GATEWAY_URL")]
    pub gateway_url: Option<String>,

    #[arg(long, env = "LIVETXT_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Agent to pre-load
    pub agent: Option<String>,

    #[arg(long, default_value = "127.0.0.1:8080")]
    pub addr: SocketAddr,
}

#[derive(Parser, Debug)]
pub struct ExecArgs {
    pub agent: String,

    /// User message for the turn
    pub message: String,

    /// JSON file holding the session state from a previous turn
    #[arg(long)]
    pub state: Option<PathBuf>,

    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

/// Application entry for binaries that register their own agents.
pub async fn run_app(catalog: AgentCatalog) -> ExitCode {
    let cli = Cli::parse();
    match run(cli, catalog).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

pub async fn run(cli: Cli, catalog: AgentCatalog) -> Result<()> {
    let mut config = LiveTxtConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    init_tracing(&config.log_level);

    match cli.command {
        Commands::Run(args) => handle_run(args, config, &catalog).await,
        Commands::Serve(args) => handle_serve(args, config, catalog).await,
        Commands::Exec(args) => handle_exec(args, config, &catalog).await,
        Commands::Agents => {
            for name in catalog.entrypoint_names() {
                println!("entrypoint  {name}");
            }
            for name in catalog.agent_names() {
                println!("agent       {name}");
            }
            Ok(())
        }
        Commands::Version => {
            println!("livetxt {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

async fn handle_run(args: RunArgs, mut config: LiveTxtConfig, catalog: &AgentCatalog) -> Result<()> {
    if let Some(url) = args.gateway_url {
        config = config.with_gateway_url(url);
    }
    if let Some(key) = args.api_key {
        config = config.with_api_key(key);
    }
    config.validate_for_gateway()?;
    let (name, entrypoint) = catalog.load_entrypoint(args.agent.as_deref())?;
    tracing::info!(agent = %name, gateway_url = ?config.gateway_url, "Starting worker");
    GatewayWorker::new(config, entrypoint).run().await
}

async fn handle_serve(args: ServeArgs, config: LiveTxtConfig, catalog: AgentCatalog) -> Result<()> {
    let selected = match args.agent.as_deref() {
        Some(_) => Some(catalog.load_entrypoint(args.agent.as_deref())?.0),
        None => None,
    };
    let mut state = ServerState::new(catalog, TurnExecutor::new(config.executor_config()));
    if let Some(name) = selected {
        state = state.with_selected(name);
    }
    server::serve(args.addr, state).await
}

async fn handle_exec(args: ExecArgs, config: LiveTxtConfig, catalog: &AgentCatalog) -> Result<()> {
    let (_, entrypoint) = catalog.load_entrypoint(Some(&args.agent))?;
    let state = match &args.state {
        Some(path) => read_state(path)?,
        None => SessionState::empty(),
    };
    let request = JobRequest::new(uuid::Uuid::new_v4().to_string(), args.message).with_state(state);
    let executor = TurnExecutor::new(config.executor_config());
    let result = executor
        .execute_with_timeout(&entrypoint, &request, args.timeout_ms)
        .await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn read_state(path: &std::path::Path) -> Result<SessionState> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        LiveTxtError::Configuration(format!("cannot read state file {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| LiveTxtError::Configuration(format!("invalid state file {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_exec() {
        let cli = Cli::try_parse_from(["livetxt", "exec", "echo", "hi", "--timeout-ms", "250"]).unwrap();
        let Commands::Exec(args) = cli.command else {
            panic!("expected exec");
        };
        assert_eq!(args.agent, "echo");
        assert_eq!(args.message, "hi");
        assert_eq!(args.timeout_ms, Some(250));
    }

    #[test]
    fn serve_has_default_addr() {
        let cli = Cli::try_parse_from(["livetxt", "serve"]).unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert!(args.agent.is_none());
    }

    #[test]
    fn unreadable_state_file_is_a_configuration_error() {
        let err = read_state(std::path::Path::new("/definitely/missing.json")).unwrap_err();
        assert!(err.is_fatal_at_startup());
    }
}
