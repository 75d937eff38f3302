//! Vigil Agent Binary
//!
//! Connects to a Vigil backend, sends keepalives and runs the checks it
//! is asked to run.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vigil_agent::{Agent, AgentConfig};

/// Vigil monitoring agent
#[derive(Debug, Parser)]
#[command(name = "vigil-agent", version, about)]
struct Cli {
    /// Configuration file (.yml, .yaml or .json)
    #[arg(short, long, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Entity name
    #[arg(long, env = "VIGIL_NAME")]
    name: Option<String>,

    /// Backend endpoint, may be repeated
    #[arg(long = "backend-url")]
    backend_urls: Vec<String>,

    /// Asset cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
            None => AgentConfig::default(),
        };
        if let Some(name) = self.name {
            config.name = name;
        }
        if !self.backend_urls.is_empty() {
            config.backend_urls = self.backend_urls;
        }
        if let Some(cache_dir) = self.cache_dir {
            config.cache_dir = cache_dir;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Cli::parse().into_config()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Vigil agent {}", config.name);
    let deadline = config.shutdown_timeout;
    let agent = Agent::new(config).context("failed to start agent")?;
    let handle = agent.handle();

    let run = agent.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => {
            result.context("agent stopped")?;
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested, waiting up to {:?}", deadline);
            handle.shutdown();
            match tokio::time::timeout(deadline, run).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Agent error during shutdown: {}", e),
                Err(_) => warn!("Agent did not stop within {:?}", deadline),
            }
        }
    }

    info!("Agent shutting down");
    Ok(())
}
