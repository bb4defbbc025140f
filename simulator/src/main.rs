use anyhow::{Context, Result};
use clap::Parser;
use stakebook_execution::MemoryStore;
use stakebook_simulator::{Api, Config, Simulator};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML config file. Every field is optional.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host interface to bind (overrides the config file).
    #[arg(long)]
    host: Option<IpAddr>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Seed for crash points and sweeper draws (overrides the config file).
    #[arg(long)]
    seed: Option<u64>,

    /// One of trace, debug, info, warn, error (overrides the config file).
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => read_config(path)?,
        None => Config::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    Ok(config)
}

fn read_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config {}", path.display()))
}

fn init_tracing(level: Level) {
    tracing_subscriber::fmt().with_max_level(level).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?
        .validate()
        .context("invalid configuration")?;

    init_tracing(config.log_level);
    if config.seed.is_some() {
        warn!("running with a fixed seed; crash points and event outcomes are predictable");
    }

    let addr = SocketAddr::new(config.host, config.port);
    let simulator = Arc::new(Simulator::new(config, MemoryStore::new()));
    let sweeper = simulator.spawn_sweeper();
    let app = Api::new(simulator.clone()).router();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "failed to listen for shutdown signal");
        }
    })
    .await
    .context("axum server error")?;

    info!("shutting down");
    sweeper.abort();
    simulator.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "port: 9000\nseed: 1\nsweeper:\n  win_probability: 0.5\nround:\n  tick_ms: 50"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = Args::parse_from(["stakebook-simulator", "--config", &path, "--seed", "7"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.sweeper.win_probability, 0.5);
        assert_eq!(config.round.tick_ms, 50);

        let validated = config.validate().unwrap();
        assert_eq!(validated.round.tick_ms, 50);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let args = Args::parse_from(["stakebook-simulator", "-c", &path, "-p", "7000"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn rejects_unreadable_config() {
        let args = Args::parse_from(["stakebook-simulator", "--config", "/nonexistent/stakebook.yaml"]);
        let err = load_config(&args).unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}
