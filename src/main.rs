use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser, ValueHint};
use greeter_server::{Server, ServerConfig};
use greeter_telemetry::{init_telemetry, TelemetryConfig};
use tracing::Level;

/// Streaming greeter server.
#[derive(Parser, Debug)]
#[clap(
    name = "greeter",
    version,
    about = "Pushes a greeting to every connected client on a fixed interval."
)]
struct Cli {
    /// JSON config file. Flags below override its values.
    #[clap(long, env = "GREETER_CONFIG", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[clap(long, env = "GREETER_LISTEN", value_name = "ADDR")]
    listen: Option<String>,

    /// Milliseconds between greetings.
    #[clap(long, env = "GREETER_BROADCAST_INTERVAL_MS", value_name = "MS")]
    broadcast_interval_ms: Option<u64>,

    /// Text each greeting starts with.
    #[clap(long, env = "GREETER_GREETING")]
    greeting: Option<String>,

    /// Default log level (RUST_LOG takes precedence).
    #[clap(long, env = "GREETER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[clap(long, env = "GREETER_LOG_JSON", action = ArgAction::SetTrue)]
    log_json: bool,
}

impl Cli {
    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => ServerConfig::default(),
        };
        if let Some(listen) = &self.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(ms) = self.broadcast_interval_ms {
            config.broadcast_interval_ms = ms;
        }
        if let Some(greeting) = &self.greeting {
            config.greeting = greeting.clone();
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level: Level = cli
        .log_level
        .parse()
        .with_context(|| format!("unknown log level {:?}", cli.log_level))?;
    let telemetry = init_telemetry(TelemetryConfig {
        log_level,
        json: cli.log_json,
        ..Default::default()
    });

    let config = cli.server_config()?;
    tracing::info!(listen = %config.listen_addr, "Starting greeter server");

    let server = Server::bind(config)
        .await
        .context("failed to bind listener")?
        .with_metrics(telemetry.metrics());

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl+c");
            }
            tracing::info!("Shutting down");
        })
        .await?;

    for metric in telemetry.metrics().snapshot() {
        tracing::info!(name = %metric.name, value = metric.value, "final metric");
    }
    Ok(())
}
