use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use gatehouse_session::Client;
use gatehouse_web::cache::{RedisUserCache, UserCache};
use gatehouse_web::config::{init_logging, WebConfig};
use gatehouse_web::routes::{router, AppState};
use gatehouse_web::service::Portal;

/// Read deadline for pooled backend streams.
const RPC_READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "gatehouse-web", about = "HTTP frontend for the account service")]
struct Args {
    /// Path to the web configuration file.
    #[arg(long, default_value = "web.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = WebConfig::load(&args.config).context("load configuration")?;
    init_logging(&config.log).context("initialize logging")?;

    let client = Client::new(
        &config.backend.host,
        config.backend.port,
        config.backend.max_connections,
        RPC_READ_TIMEOUT,
    );
    let cache: Arc<dyn UserCache> = Arc::new(
        RedisUserCache::connect(&config.cache.host, config.cache.port)
            .await
            .context("connect cache store")?,
    );
    let portal = Arc::new(Portal::new(client, cache));
    let state = AppState {
        portal,
        document_root: PathBuf::from(&config.http.document_root),
    };

    let listener = tokio::net::TcpListener::bind((config.http.host.as_str(), config.http.port))
        .await
        .context("bind http endpoint")?;
    let addr = listener.local_addr().context("read local addr")?;
    info!(%addr, "web server listening");
    axum::serve(listener, router(state))
        .await
        .context("serve http")?;
    Ok(())
}
