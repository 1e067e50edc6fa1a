//! Zentinel WS-Security command line processor.
//!
//! Run with: `zentinel-wss --config config.yaml inbound request.xml`
//!
//! `inbound` verifies a secured SOAP message, writes the processed document
//! and prints the security events as JSON lines on stderr. `outbound`
//! applies the configured actions to a plain message.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_wss::config::SoapVersion;
use zentinel_wss::{
    ns, soap_fault_response, StaticCredentials, WssConfig, WssInbound, WssOutbound,
};

/// Streaming WS-Security processor for SOAP messages.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify a secured message
    Inbound {
        /// Input SOAP document
        input: PathBuf,

        /// Where to write the processed document (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Secure a plain message with the configured actions
    Outbound {
        /// Input SOAP document
        input: PathBuf,

        /// Where to write the secured document (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging on stderr, stdout carries documents
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Starting Zentinel WS-Security processor v{}", env!("CARGO_PKG_VERSION"));
    info!("Config file: {}", args.config.display());

    let config = load_config(&args.config).await?;

    info!(
        strict = config.settings.strict,
        actor = ?config.settings.actor,
        actions = config.outbound.actions.len(),
        "Configuration loaded"
    );

    let credentials = Arc::new(
        StaticCredentials::from_config(&config.credentials)
            .context("Failed to load credentials")?,
    );

    match args.command {
        Command::Inbound { input, output } => {
            let xml = tokio::fs::read(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let inbound = WssInbound::new(config, credentials).context("Invalid configuration")?;

            match inbound.process_document(&xml) {
                Ok(processed) => {
                    for event in &processed.events {
                        eprintln!("{}", serde_json::to_string(event)?);
                    }
                    write_output(output.as_deref(), &processed.xml).await?;
                    info!(events = processed.events.len(), "Inbound processing complete");
                }
                Err(e) => {
                    error!(error = %e, fault = e.fault_code().as_str(), "Verification failed");
                    let fault = soap_fault_response(&e, Some(detect_version(&xml)));
                    write_output(output.as_deref(), fault.as_bytes()).await?;
                    std::process::exit(1);
                }
            }
        }
        Command::Outbound { input, output } => {
            let xml = tokio::fs::read(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let outbound =
                WssOutbound::new(config, credentials).context("Invalid configuration")?;
            let secured = outbound
                .secure_document(&xml)
                .context("Failed to secure document")?;
            write_output(output.as_deref(), &secured).await?;
            info!(
                secured = outbound.documents_secured(),
                "Outbound processing complete"
            );
        }
    }

    Ok(())
}

async fn load_config(path: &Path) -> Result<WssConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;
        serde_yaml::from_str(&content).context("Failed to parse config file")
    } else {
        info!("Config file not found, using defaults");
        Ok(WssConfig::default())
    }
}

async fn write_output(path: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match path {
        Some(path) => tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            use std::io::Write;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.flush()?;
            Ok(())
        }
    }
}

/// Best-effort SOAP version for the fault envelope.
fn detect_version(xml: &[u8]) -> SoapVersion {
    let needle = ns::SOAP_12.as_bytes();
    if xml.windows(needle.len()).any(|w| w == needle) {
        SoapVersion::Soap12
    } else {
        SoapVersion::Soap11
    }
}
