//! taskwire-stdio: MCP server over stdin/stdout with background tasks.
//!
//! Serves the built-in demo components. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! taskwire-stdio
//!
//! # Named profile, tasks switched off
//! taskwire-stdio --profile prod --no-tasks
//!
//! # Via environment variables
//! TASK_DEFAULT_TTL_MS=5000 RUST_LOG=debug taskwire-stdio
//! ```

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use taskwire_component::builtin::demo_components;
use taskwire_component::ComponentRegistry;
use taskwire_core::config::{load_dotenv, Config};
use taskwire_core::logging::init_tracing;
use taskwire_mcp::{McpServer, StdioTransport};
use taskwire_tasks::spawn_sweeper;

/// MCP server over stdio with task-augmented execution.
#[derive(Parser, Debug)]
#[command(name = "taskwire-stdio", version, about)]
struct Cli {
    /// Server name reported during initialize.
    #[arg(long)]
    name: Option<String>,

    /// Configuration profile (overrides TASKWIRE_PROFILE).
    #[arg(long, env = "TASKWIRE_PROFILE")]
    profile: Option<String>,

    /// Disable background task execution.
    #[arg(long)]
    no_tasks: bool,
}

impl Cli {
    fn into_config(self) -> Config {
        let mut config = match self.profile.as_deref() {
            Some(profile) => Config::for_profile(profile),
            None => Config::from_env(),
        };
        if let Some(name) = self.name {
            config.server.name = name;
        }
        if self.no_tasks {
            config.tasks.enabled = false;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_tracing("info");

    let cli = Cli::parse();
    tracing::info!(?cli, "starting taskwire-stdio");

    let config = cli.into_config();
    config.log_summary();

    let mut registry = ComponentRegistry::new();
    for component in demo_components() {
        registry
            .register(component)
            .context("registering demo components")?;
    }
    tracing::info!(
        components = registry.len(),
        task_eligible = registry.task_eligible().len(),
        "registry ready"
    );

    let mut server = McpServer::from_config(Arc::new(registry), &config);

    let sweeper = config
        .tasks
        .sweep_interval()
        .map(|interval| spawn_sweeper(server.router().store().clone(), interval));

    let mut transport = StdioTransport::new();
    tokio::select! {
        result = server.run(&mut transport) => result.context("serving stdio")?,
        _ = shutdown_signal() => tracing::info!("shutdown signal received"),
    }

    server.shutdown();
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    tracing::info!("taskwire-stdio exited cleanly");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
