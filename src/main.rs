//! mcp-learning-server: MCP server exposing tools, resources and prompts
//!
//! Serves a single client over stdio. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use mcp_learning_server::config::{self, Config};
use mcp_learning_server::error::ServerError;
use mcp_learning_server::mcp::{McpServer, ServerOptions};
use mcp_learning_server::reload::{Registries, ReloadWatcher, Reloader};

/// How long to wait for blocked stdin reads and handlers after the session
/// has ended.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// MCP server exposing schema-validated tools, sandboxed resources and
/// prompt templates.
#[derive(Parser, Debug)]
#[command(name = "mcp-learning-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,

    /// Sandbox root holding resources and index.json
    #[arg(long, value_name = "DIR")]
    resource_dir: Option<PathBuf>,

    /// Directory of prompt templates
    #[arg(long, value_name = "DIR")]
    prompts_dir: Option<PathBuf>,

    /// Directory of tool manifests (built-in tools when absent)
    #[arg(long, value_name = "DIR")]
    tools_dir: Option<PathBuf>,

    /// Watch the directories and reload on change
    #[arg(long)]
    hot_reload: bool,
}

impl Args {
    fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(dir) = &self.resource_dir {
            cfg.resource_dir.clone_from(dir);
        }
        if let Some(dir) = &self.prompts_dir {
            cfg.prompts_dir.clone_from(dir);
        }
        if let Some(dir) = &self.tools_dir {
            cfg.tools_dir = Some(dir.clone());
        }
        if self.hot_reload {
            cfg.hot_reload.enabled = true;
        }
    }
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN, // Default to warn for unknown levels
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the registries, starts the optional watcher and serves stdio.
async fn serve(cfg: Arc<Config>) -> Result<(), ServerError> {
    let registries = Arc::new(Registries::load(&cfg)?);
    let mut server = McpServer::new(Arc::clone(&registries), ServerOptions::from_config(&cfg));

    // Kept alive for the whole session; dropping it stops watching.
    let _watcher = if cfg.hot_reload.enabled {
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let reloader = Reloader::new(registries, &cfg).with_events(events_tx);
        let watcher = ReloadWatcher::start(reloader, cfg.hot_reload.debounce())?;
        server = server.with_reload_events(events_rx);
        Some(watcher)
    } else {
        None
    };

    info!("MCP server ready, waiting for client connection...");
    server.run().await?;
    Ok(())
}

/// Entry point for the mcp-learning-server.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let mut cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if config_path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nExpected config at: {}", default_path.display());
                }
            }
            return ExitCode::from(2);
        }
    };
    args.apply_overrides(&mut cfg);

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        resource_dir = %cfg.resource_dir.display(),
        prompts_dir = %cfg.prompts_dir.display(),
        workers = cfg.workers,
        hot_reload = cfg.hot_reload.enabled,
        "Starting mcp-learning-server"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .max_blocking_threads(cfg.workers.saturating_add(2))
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");

    let result = runtime.block_on(serve(Arc::new(cfg)));
    // stdin is read on a blocking thread that cannot be interrupted.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) if e.is_fatal() => {
            error!(error = %e, "Failed to start server");
            eprintln!("Error: {e}");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn cli_flags_override_config() {
        let args = Args::parse_from([
            "mcp-learning-server",
            "--resource-dir",
            "/srv/docs",
            "--tools-dir",
            "/srv/tools",
            "--hot-reload",
        ]);
        let mut cfg = Config::default();
        args.apply_overrides(&mut cfg);

        assert_eq!(cfg.resource_dir, PathBuf::from("/srv/docs"));
        assert_eq!(cfg.tools_dir, Some(PathBuf::from("/srv/tools")));
        assert_eq!(cfg.prompts_dir, Config::default().prompts_dir);
        assert!(cfg.hot_reload.enabled);
    }

    #[test]
    fn log_level_precedence() {
        assert_eq!(get_log_level(0, true, "trace"), Level::ERROR);
        assert_eq!(get_log_level(2, false, "warn"), Level::DEBUG);
        assert_eq!(get_log_level(0, false, "info"), Level::INFO);
        assert_eq!(get_log_level(0, false, "bogus"), Level::WARN);
    }
}
