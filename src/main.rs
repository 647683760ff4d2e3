//! filedepot server binary

use clap::Parser;
use filedepot::api::{router, AppState};
use filedepot::config::Config;
use filedepot::progress::ProgressRegistry;
use filedepot::rpc::RpcClient;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Streaming multipart upload gateway for a content-addressed file repository
#[derive(Parser, Debug)]
#[command(name = "filedepot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Priority: RUST_LOG > --verbose > default
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("filedepot=debug,tower_http=debug")
        } else {
            EnvFilter::new("filedepot=info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = if let Some(ref path) = cli.config {
        Config::from_file(path)?
    } else {
        Config::load()
    };
    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }

    info!("Starting filedepot v{}", env!("CARGO_PKG_VERSION"));
    info!("  Listen address: {}", config.listen_addr);
    info!("  Service URL: {}", config.service_url);
    info!("  Backend RPC: {}", config.rpc_url);
    info!("  Spool directory: {}", config.temp_dir.display());
    info!(
        "  Max upload size: {} MB",
        config.max_upload_size / 1024 / 1024
    );

    prepare_spool_dir(&config)?;

    let rpc = Arc::new(RpcClient::new(config.rpc_url.clone()));
    let state = Arc::new(AppState {
        access: rpc.clone(),
        quota: rpc.clone(),
        repo: rpc.clone(),
        store: rpc,
        progress: Arc::new(ProgressRegistry::new()),
        service_url: config.service_url.clone(),
        spool_dir: config.temp_dir.clone(),
        max_upload_size: config.max_upload_size,
    });

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("Listening on {}", config.listen_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// The repository backend reads staged files from the spool directory by
/// path, so the directory must exist and be reachable for it.
fn prepare_spool_dir(config: &Config) -> std::io::Result<()> {
    std::fs::create_dir_all(&config.temp_dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&config.temp_dir, std::fs::Permissions::from_mode(0o777))?;
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown signal received");
}
