// crates/backend-bin/src/main.rs
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use backend_lib::{
    config::{LogFormat, Settings, SettingsOverrides},
    server, GatewayState,
};
use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Stream the BBS log to authenticated users
#[derive(Debug, Parser)]
#[command(name = "talisman-gateway", version)]
struct Cli {
    /// Port number for the server
    #[arg(long)]
    port: Option<u16>,

    /// Required security level for user access
    #[arg(long, allow_negative_numbers = true)]
    seclevel: Option<i64>,

    /// Path to the BBS directory containing talisman.ini
    #[arg(long)]
    path: Option<PathBuf>,

    /// Optional TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormatArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl Cli {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            port: self.port,
            seclevel: self.seclevel,
            bbs_path: self.path.clone(),
            log_format: self.log_format.map(Into::into),
        }
    }
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.to_ascii_lowercase()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match settings.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref(), &cli.overrides())
        .context("--port, --seclevel and --path are required (flags, config file or TALISMAN_GATEWAY_* env)")?;
    init_tracing(&settings);

    // Store and paths must be usable before the socket is opened
    let addr = settings.listen_addr();
    let state = Arc::new(GatewayState::open(settings).context("gateway startup failed")?);
    let listener = server::bind(addr).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(err) => {
                warn!(error = %err, "could not listen for interrupt");
                std::future::pending::<()>().await;
            }
        }
        let _ = shutdown_tx.send(true);
    });

    server::serve(listener, state, shutdown_rx).await?;
    Ok(())
}
