//! Plug WebSocket server: entry point.
//!
//! Listens for HTTP upgrade requests, switches each accepted connection to the
//! WebSocket protocol, and either echoes every message back (`--mode echo`) or
//! just logs it (`--mode log`).
//!
//! # Usage
//!
//! ```text
//! plug-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>            TOML config file
//!   --bind <IP>                Address to bind [default: 0.0.0.0]
//!   --port <PORT>              Port to listen on [default: 9001]
//!   --max-message-size <BYTES> Largest accepted message [default: 16 MiB]
//!   --close-timeout-ms <MS>    Wait for the peer's Close reply [default: 5000]
//!   --log-level <LEVEL>        Log filter when RUST_LOG is unset [default: info]
//!   --mode <MODE>              echo | log [default: echo]
//! ```
//!
//! # Configuration precedence
//!
//! Built-in defaults, then the `--config` file, then environment variables,
//! then CLI flags.  `RUST_LOG`, when set, replaces the log level entirely.
//!
//! | Variable                 | Flag                 |
//! |--------------------------|----------------------|
//! | `PLUG_CONFIG`            | `--config`           |
//! | `PLUG_BIND`              | `--bind`             |
//! | `PLUG_PORT`              | `--port`             |
//! | `PLUG_MAX_MESSAGE_SIZE`  | `--max-message-size` |
//! | `PLUG_CLOSE_TIMEOUT_MS`  | `--close-timeout-ms` |
//! | `PLUG_LOG`               | `--log-level`        |

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use plug_server::application::{EchoHandler, LogHandler};
use plug_server::domain::{load_file_config, FileConfig, ServerConfig};
use plug_server::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// What the server does with each received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Send every message back to its sender.
    Echo,
    /// Log messages without replying.
    Log,
}

/// Plug WebSocket upgrade server.
#[derive(Debug, Parser)]
#[command(
    name = "plug-server",
    about = "WebSocket upgrade server with an echo or logging handler",
    version
)]
struct Cli {
    /// TOML configuration file.  Flags given on the command line override it.
    #[arg(long, env = "PLUG_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind the listener to.
    ///
    /// Use `0.0.0.0` to accept connections on every interface, or `127.0.0.1`
    /// to accept only local connections.
    #[arg(long, env = "PLUG_BIND")]
    bind: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "PLUG_PORT")]
    port: Option<u16>,

    /// Largest message, in bytes, accepted from a peer.
    #[arg(long, env = "PLUG_MAX_MESSAGE_SIZE")]
    max_message_size: Option<usize>,

    /// How long to wait for the peer's Close reply, in milliseconds.
    #[arg(long, env = "PLUG_CLOSE_TIMEOUT_MS")]
    close_timeout_ms: Option<u64>,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, env = "PLUG_LOG")]
    log_level: Option<String>,

    /// Message handler to run.
    #[arg(long, value_enum, default_value_t = Mode::Echo)]
    mode: Mode,
}

impl Cli {
    /// Layers the CLI flags over `base` and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting bind address or limits are invalid.
    fn apply(&self, mut base: FileConfig) -> anyhow::Result<ServerConfig> {
        if let Some(bind) = &self.bind {
            base.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            base.port = port;
        }
        if let Some(size) = self.max_message_size {
            base.max_message_size = size;
        }
        if let Some(ms) = self.close_timeout_ms {
            base.close_timeout_ms = ms;
        }
        if let Some(level) = &self.log_level {
            base.log_level = level.clone();
        }
        Ok(base.into_server_config()?)
    }

    /// Loads the config file (if any) and applies the CLI flags on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// the merged configuration is invalid.
    fn into_server_config(&self) -> anyhow::Result<ServerConfig> {
        let base = match &self.config {
            Some(path) => load_file_config(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => FileConfig::default(),
        };
        self.apply(base)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed with `clap` and merged with the config file
///    into a [`ServerConfig`].
/// 2. `tracing_subscriber` is initialised.  `RUST_LOG` wins; otherwise the
///    configured `log_level` is used.
/// 3. A Ctrl+C handler is spawned; it clears a shared `AtomicBool`.
/// 4. [`run_server`] binds the listener and serves connections until the flag
///    is cleared, then closes every open connection with `1001 Going Away`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.into_server_config()?;

    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        "Plug WebSocket server starting — bind={}, mode={:?}, max_message_size={}",
        config.bind_addr, cli.mode, config.max_message_size
    );

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C — initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    // ── Main server loop ──────────────────────────────────────────────────────
    match cli.mode {
        Mode::Echo => run_server(config, EchoHandler, running).await?,
        Mode::Log => run_server(config, LogHandler, running).await?,
    }

    info!("Plug WebSocket server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
