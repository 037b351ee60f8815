use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use hubspot_bridge::config::TokenStoreKind;
use hubspot_bridge::store::{Database, FileTokenStore, Ledger, PgTokenStore, TokenStore};
use hubspot_bridge::{api, AppState, Config, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hubspot_bridge=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("hubspot-bridge v{}", env!("CARGO_PKG_VERSION"));

    let database = match &config.database_url {
        Some(url) => {
            let db = Database::connect(url).await?;
            db.migrate().await?;
            info!("Database connected and migrated");
            Some(db)
        }
        None => {
            warn!("DATABASE_URL not set; ledger and delivery callbacks are disabled");
            None
        }
    };

    let store: Arc<dyn TokenStore> = match (&config.token_store, &database) {
        (TokenStoreKind::File(path), _) => Arc::new(FileTokenStore::new(path.clone())),
        (TokenStoreKind::Postgres, Some(db)) => Arc::new(PgTokenStore::new(db.pool().clone())),
        (TokenStoreKind::Postgres, None) => {
            anyhow::bail!("TOKEN_STORE=postgres requires DATABASE_URL")
        }
    };
    info!(store = store.name(), "Token store ready");

    let addr = config.listen_addr();
    let state: SharedState = Arc::new(AppState::new(config, store, Ledger::new(database))?);

    match state.gate.status().await {
        Ok(status) => info!(state = ?status.state, expires_at = ?status.expires_at, "HubSpot token"),
        Err(e) => warn!("Could not read token store: {e}"),
    }
    if state.whatsapp.is_none() {
        warn!("WhatsApp gateway not configured; /sendwa/sendwa will fail");
    }

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
