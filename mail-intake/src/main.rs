use anyhow::{Context, Result};
use clap::Parser;
use mail_intake::config::{Config, LoggingConfig};
use mail_intake::smtp::SmtpServer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mail-intake")]
#[command(about = "Receive-only SMTP drop box that saves attachments", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file; created with defaults when missing
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !cli.config.exists() {
        Config::write_default(&cli.config).with_context(|| {
            format!("Failed to write default config to {}", cli.config.display())
        })?;
        eprintln!(
            "No configuration found. A default one was written to {}; review it and restart.",
            cli.config.display()
        );
        std::process::exit(1);
    }

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    init_logging(&config.logging)?;

    info!("Starting mail-intake");
    info!("  SMTP listening on: {}", config.listen_addr()?);
    info!("  Attachments dir: {}", config.storage.attachments_dir.display());
    info!("  Whitelisted IPs: {:?}", config.access.whitelisted_ips);
    if config.access.whitelisted_ips.is_empty() {
        warn!("Whitelist is empty, every message will be rejected");
    }

    let handle = SmtpServer::new(Arc::new(config))
        .start()
        .await
        .context("Failed to start SMTP server")?;

    let signal = wait_for_shutdown().await?;
    info!("Received {}, shutting down", signal);
    handle.stop().await;

    Ok(())
}

/// Console plus plain-text log file. `RUST_LOG` overrides the configured level.
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .with_context(|| format!("Invalid log level {:?}", logging.level))?;

    let (dir, file) = split_log_path(&logging.log_file)?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let file_appender = tracing_appender::rolling::never(&dir, file);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_appender);
    let console_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

fn split_log_path(path: &Path) -> Result<(PathBuf, PathBuf)> {
    let file = path
        .file_name()
        .map(PathBuf::from)
        .with_context(|| format!("Log file path {} has no file name", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, file))
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut h_term = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut h_int = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    Ok(tokio::select! {
        _ = h_term.recv() => "SIGTERM",
        _ = h_int.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    Ok("Ctrl-C")
}
