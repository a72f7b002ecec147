//! Model Mesh - Stdio Tool Server
//!
//! Hosts a model mesh behind a newline-delimited JSON-RPC stdio transport so
//! agents can call specialised models by role.
//!
//! # Usage
//!
//! ```bash
//! # Start with the default config (~/.config/model-mesh/mesh.toml)
//! model-mesh
//!
//! # Explicit config and prompt catalog
//! model-mesh --config ./mesh.toml --prompts ./model_mesh_prompts.json
//!
//! # Skip startup probing, reprobe every 30 seconds
//! model-mesh --no-probe --reprobe-secs 30
//!
//! # Verbose logging (stderr; stdout carries the protocol)
//! RUST_LOG=debug model-mesh
//! ```
//!
//! # Shutdown
//!
//! End of stdin drains in-flight calls and exits. Ctrl-C aborts them.

mod jsonrpc;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use model_mesh_core::{
    default_config_path, load_config_from_path, load_prompt_catalog, ConfigOverrides, Mesh,
};

use server::{McpServer, ServerConfig};

/// Model Mesh - role-keyed model routing for agents
#[derive(Parser, Debug)]
#[command(name = "model-mesh")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "MODEL_MESH_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Prompt catalog (JSON) path
    #[arg(long, value_name = "FILE")]
    prompts: Option<PathBuf>,

    /// Provider for roles that name none (ollama, litellm)
    #[arg(long, value_name = "PROVIDER")]
    default_provider: Option<String>,

    /// Skip the startup availability probe
    #[arg(long)]
    no_probe: bool,

    /// Seconds between reprobes of unavailable roles (0 disables)
    #[arg(long, value_name = "SECS")]
    reprobe_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "MODEL_MESH_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if self.no_probe {
            overrides = overrides.with_probe_on_startup(false);
        }
        if let Some(secs) = self.reprobe_secs {
            overrides = overrides.with_reprobe_interval_secs(secs);
        }
        if let Some(ref path) = self.prompts {
            overrides = overrides.with_prompt_config_path(path.clone());
        }
        if let Some(ref provider) = self.default_provider {
            overrides = overrides.with_default_provider(provider.clone());
        }
        overrides
    }
}

/// Initialize logging on stderr with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "model_mesh_daemon={level},model_mesh_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);

    info!("Model mesh starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.clone().or_else(default_config_path);
    if let Some(ref path) = config_path {
        info!(config_path = %path.display(), "Config file");
    }

    let mut config =
        load_config_from_path(config_path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    info!(source = %config.source(), roles = config.backends.len(), "Configuration resolved");

    let prompts = load_prompt_catalog(&config).context("Failed to load prompt catalog")?;

    let mesh = Mesh::builder(config)
        .with_prompts(prompts)
        .build()
        .await
        .context("Failed to build model mesh")?;

    let server = McpServer::new(Arc::new(mesh), ServerConfig::default());

    tokio::select! {
        result = server.run(tokio::io::stdin(), tokio::io::stdout()) => {
            result.context("Stdio server failed")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!(in_flight = server.in_flight(), "Received Ctrl-C, shutting down");
            server.abort_all();
        }
    }

    info!("Model mesh stopped");
    Ok(())
}
