//! Deal Relay - main entry point
//!
//! Starts the HTTP relay immediately and establishes the WhatsApp session in
//! the background. Until the session is ready, `/send-deal` answers 503.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use deal_relay::integrations::WppConnectClient;
use deal_relay::qr::{CompositeQrSink, FileQrSink, LogQrSink, QrSink};
use deal_relay::session::{SessionLock, SessionProvider};
use deal_relay::{bootstrap, server, AppContext, Config};

#[derive(Parser)]
#[command(name = "deal_relay")]
#[command(about = "Relay deals from HTTP to a WhatsApp group", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to config.yml (defaults to ./config.yml, then ../config.yml)
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "RELAY_PORT")]
    port: Option<u16>,

    /// WPPConnect Server base URL (overrides config)
    #[arg(long, env = "WPP_BASE_URL")]
    wpp_url: Option<String>,

    /// Where the pairing QR image is written (overrides config)
    #[arg(long, env = "QR_PATH")]
    qr_path: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::new(),
    };
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(url) = &cli.wpp_url {
        config.wpp_base_url = url.clone();
    }
    if let Some(path) = &cli.qr_path {
        config.qr_path = path.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("deal_relay=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let _lock = SessionLock::acquire(SessionLock::path_for(&config.session_name))?;

    let ctx = Arc::new(AppContext::from_config(&config));
    let (addr, server_task) = server::spawn_server(config.listen_addr()?, ctx.clone()).await?;
    info!(%addr, "WhatsApp Service running");

    let provider: Arc<dyn SessionProvider> = Arc::new(WppConnectClient::from_config(&config)?);
    let sink: Arc<dyn QrSink> = Arc::new(
        CompositeQrSink::new()
            .with(LogQrSink)
            .with(FileQrSink::new(&config.qr_path)),
    );
    bootstrap::spawn(ctx, provider, sink, config.invite_code.clone());

    tokio::select! {
        result = server_task => {
            if let Err(err) = result {
                error!("Relay server task failed: {}", err);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
