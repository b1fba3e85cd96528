use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use gatehouse_backend::config::{init_logging, BackendConfig};
use gatehouse_backend::handlers::build_dispatcher;
use gatehouse_backend::store::{MemoryStore, PgUserStore, UserStore};
use gatehouse_session::Server;
use gatehouse_token::TokenIssuer;

/// How long a connection may sit idle between requests.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "gatehouse-backend", about = "User-account RPC backend")]
struct Args {
    /// Path to the backend configuration file.
    #[arg(long, default_value = "backend.toml")]
    config: PathBuf,

    /// Serve from an in-memory store seeded with a demo user instead of
    /// the configured database. Development only.
    #[arg(long)]
    seed_demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = BackendConfig::load(&args.config).context("load configuration")?;
    init_logging(&config.log).context("initialize logging")?;

    let store: Arc<dyn UserStore> = if args.seed_demo {
        let store = MemoryStore::new();
        store.seed_login("demo", "password", "Demo", "/demo.png");
        info!("serving from a seeded in-memory store");
        Arc::new(store)
    } else {
        Arc::new(
            PgUserStore::connect(&config.database.url, config.database.max_connections)
                .await
                .context("open user database")?,
        )
    };

    let tokens = Arc::new(TokenIssuer::new(
        config.token.secret.as_bytes(),
        Duration::from_secs(config.token.expiry * 60),
    ));

    let dispatcher = build_dispatcher(store, tokens).context("register handlers")?;
    let server = Server::bind(
        &config.listen.host,
        config.listen.port,
        dispatcher,
        READ_TIMEOUT,
    )
    .await
    .context("bind listen endpoint")?;

    server.run().await;
    Ok(())
}
