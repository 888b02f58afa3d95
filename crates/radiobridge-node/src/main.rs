//! Radiobridge - MQTT to packet-radio bridge process
//!
//! Loads a YAML configuration, starts the bus and modem legs plus the relay,
//! and runs until SIGINT or SIGTERM.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use radiobridge::{BridgeConfig, RadioBridge};

#[derive(Parser)]
#[command(name = "radiobridge")]
#[command(about = "Bidirectional MQTT to AX.25 packet-radio bridge over a KISS TCP modem")]
#[command(version)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(default_value = "config.yaml")]
    config: PathBuf,

    /// Enable debug logging (overrides logging_level)
    #[arg(long, short)]
    verbose: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    init_logging(&config, args.verbose)?;

    if args.check {
        info!(path = %args.config.display(), "Configuration is valid");
        return Ok(());
    }

    let bridge = RadioBridge::new(config)?;
    let cancel = bridge.cancel_token();
    let handle = bridge.start();

    shutdown_signal().await;
    info!("Shutdown signal received");
    cancel.cancel();

    let stats = handle.wait().await;
    info!(
        bus_to_modem = stats.bus_to_modem,
        modem_to_bus = stats.modem_to_bus,
        duplicates_suppressed = stats.duplicates_suppressed,
        wrong_destination = stats.wrong_destination,
        malformed_frames = stats.malformed_frames,
        wrapper_errors = stats.wrapper_errors,
        send_failures = stats.send_failures,
        publish_failures = stats.publish_failures,
        "Final relay statistics"
    );
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<BridgeConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading configuration from {}", path.display()))?;
    parse_config(&text).with_context(|| format!("invalid configuration in {}", path.display()))
}

fn parse_config(text: &str) -> anyhow::Result<BridgeConfig> {
    let config: BridgeConfig = serde_yaml::from_str(text)?;
    config.validate()?;
    Ok(config)
}

/// `RUST_LOG` wins, then `--verbose`, then the configured level
fn init_logging(config: &BridgeConfig, verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose {
        "debug".to_string()
    } else {
        config.logging_level.to_ascii_lowercase()
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&default_level))
        .context("building log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing log subscriber: {}", e))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl-C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SAMPLE: &str = r#"
mqtt:
  host: broker.local
  root_topic: msh
  keep_alive: 30s
modem:
  host: 10.0.0.5
  port: 8001
stations:
  local: N0CALL-1
  peer: N0CALL-2
dedup:
  ttl: 2m
logging_level: debug
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.mqtt.subscription(), "msh/#");
        assert_eq!(config.mqtt.keep_alive, Duration::from_secs(30));
        assert_eq!(config.modem.address(), "10.0.0.5:8001");
        assert_eq!(config.stations.local.to_string(), "N0CALL-1");
        assert_eq!(config.dedup.ttl, Duration::from_secs(120));
        assert_eq!(config.logging_level, "debug");
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let same_stations = SAMPLE.replace("peer: N0CALL-2", "peer: N0CALL-1");
        assert!(parse_config(&same_stations).is_err());

        let bad_call = SAMPLE.replace("N0CALL-2", "TOOLONGCALL");
        assert!(parse_config(&bad_call).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/radiobridge.yaml")).unwrap_err();
        assert!(err.to_string().contains("reading configuration"));
    }

    #[test]
    fn test_args() {
        let args = Args::parse_from(["radiobridge", "bridge.yaml", "--verbose"]);
        assert_eq!(args.config, PathBuf::from("bridge.yaml"));
        assert!(args.verbose);
        assert!(!args.check);

        let args = Args::parse_from(["radiobridge"]);
        assert_eq!(args.config, PathBuf::from("config.yaml"));
    }
}
