#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use hubspot_bridge::config::{TokenStoreKind, WhatsAppConfig};
use hubspot_bridge::store::{Ledger, MemoryTokenStore};
use hubspot_bridge::token::TokenRecord;
use hubspot_bridge::{AppState, Config, SharedState};

/// Config pointing every upstream at `upstream` (a wiremock server URI).
pub fn config(upstream: &str) -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        base_url: "http://bridge.test".into(),
        hubspot_client_id: "client-id".into(),
        hubspot_client_secret: "client-secret".into(),
        hubspot_redirect_uri: "http://bridge.test/oauth/callback".into(),
        hubspot_api_url: upstream.to_string(),
        hubspot_authorize_url: "https://app.hubspot.test/oauth/authorize".into(),
        hubspot_scopes: vec!["tickets".into(), "oauth".into()],
        token_refresh_timeout: Duration::from_secs(2),
        token_store: TokenStoreKind::File("unused.json".into()),
        database_url: None,
        state_secret: None,
        whatsapp: Some(WhatsAppConfig {
            api_url: format!("{upstream}/whatsapp/template"),
            authorization: "Basic test-key".into(),
            template_name: "outbound_reply".into(),
            template_namespace: "ns-1".into(),
            language: "en_US".into(),
        }),
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A record issued a minute ago, valid for half an hour.
pub fn fresh_record(access: &str) -> TokenRecord {
    TokenRecord {
        access_token: access.into(),
        refresh_token: Some("R1".into()),
        obtained_at: now_ms() - 60_000,
        expires_in: 1800,
    }
}

/// A record that expired an hour ago.
pub fn expired_record(access: &str) -> TokenRecord {
    TokenRecord {
        access_token: access.into(),
        refresh_token: Some("R1".into()),
        obtained_at: now_ms() - 2 * 3_600_000,
        expires_in: 1800,
    }
}

pub fn state_with(config: Config, store: Arc<MemoryTokenStore>) -> SharedState {
    Arc::new(AppState::new(config, store, Ledger::disabled()).unwrap())
}
