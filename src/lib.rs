pub mod api;
pub mod config;
pub mod crm;
pub mod crypto;
pub mod error;
pub mod providers;
pub mod store;
pub mod token;
pub mod webhooks;
pub mod whatsapp;

pub use config::Config;
pub use error::{BridgeError, TokenError};
pub use token::TokenGate;

use std::sync::Arc;

use crypto::StateSigner;
use crm::CrmClient;
use providers::HubSpotProvider;
use store::{Ledger, TokenStore};
use whatsapp::WhatsAppClient;

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub config: Config,
    pub gate: TokenGate,
    pub crm: CrmClient,
    pub whatsapp: Option<WhatsAppClient>,
    pub ledger: Ledger,
    pub state_signer: Option<StateSigner>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the HubSpot provider, token gate and outbound clients from config.
    pub fn new(
        config: Config,
        store: Arc<dyn TokenStore>,
        ledger: Ledger,
    ) -> Result<Self, BridgeError> {
        let http = reqwest::Client::new();

        let provider = HubSpotProvider::new(
            config.hubspot_client_id.clone(),
            config.hubspot_client_secret.clone(),
            config.hubspot_redirect_uri.clone(),
        )
        .with_api_url(config.hubspot_api_url.clone())
        .with_authorize_url(config.hubspot_authorize_url.clone())
        .with_scopes(config.hubspot_scopes.clone())
        .with_timeout(config.token_refresh_timeout)
        .with_client(http.clone());

        let state_signer = config
            .state_secret
            .as_deref()
            .map(StateSigner::new)
            .transpose()
            .map_err(|e| BridgeError::NotConfigured(format!("STATE_SECRET: {e}")))?;

        Ok(Self {
            gate: TokenGate::new(store, Arc::new(provider)),
            crm: CrmClient::new(http.clone()).with_api_url(config.hubspot_api_url.clone()),
            whatsapp: config
                .whatsapp
                .clone()
                .map(|wa| WhatsAppClient::new(http, wa)),
            ledger,
            state_signer,
            config,
        })
    }
}
