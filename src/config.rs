use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::providers::{DEFAULT_API_URL, DEFAULT_AUTHORIZE_URL, DEFAULT_SCOPES};

/// Where the token record lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenStoreKind {
    File(PathBuf),
    Postgres,
}

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,
    pub base_url: String,

    // ── HubSpot ─────────────────────────────────────────────────────────
    pub hubspot_client_id: String,
    pub hubspot_client_secret: String,
    pub hubspot_redirect_uri: String,
    pub hubspot_api_url: String,
    pub hubspot_authorize_url: String,
    pub hubspot_scopes: Vec<String>,
    /// Upper bound on one refresh call against the token endpoint.
    pub token_refresh_timeout: Duration,

    // ── Persistence ─────────────────────────────────────────────────────
    pub token_store: TokenStoreKind,
    /// Postgres (Supabase) connection string. Without it the ledger is off.
    pub database_url: Option<String>,

    // ── OAuth state signing ─────────────────────────────────────────────
    /// HMAC key for the `state` parameter; unsigned install links when unset.
    pub state_secret: Option<String>,

    // ── WhatsApp gateway ────────────────────────────────────────────────
    pub whatsapp: Option<WhatsAppConfig>,
}

#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    /// Template send endpoint of the gateway.
    pub api_url: String,
    /// Value of the `Authorization` header, scheme included.
    pub authorization: String,
    pub template_name: String,
    pub template_namespace: String,
    pub language: String,
}

pub const DEFAULT_TEMPLATE_NAME: &str = "ucanstore_outbound_customer_response";
pub const DEFAULT_TEMPLATE_NAMESPACE: &str = "96c9e4e2_bffd_4ccd_ab74_49de11c2f417";
pub const DEFAULT_TEMPLATE_LANGUAGE: &str = "en_US";

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset and empty values are
    /// both treated as "not configured".
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_opt = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let env_or = |key: &str, default: &str| env_opt(key).unwrap_or_else(|| default.to_string());

        let port: u16 = env_or("PORT", "3000").parse().context("Invalid PORT")?;
        let base_url = env_or("BASE_URL", &format!("http://localhost:{port}"));
        let base_url = base_url.trim_end_matches('/').to_string();

        let database_url = env_opt("DATABASE_URL");
        let token_store = match env_or("TOKEN_STORE", "file").as_str() {
            "file" => TokenStoreKind::File(PathBuf::from(env_or("TOKEN_PATH", "./tokens.json"))),
            "postgres" => {
                if database_url.is_none() {
                    bail!("TOKEN_STORE=postgres requires DATABASE_URL");
                }
                TokenStoreKind::Postgres
            }
            other => bail!("Invalid TOKEN_STORE '{other}' (expected 'file' or 'postgres')"),
        };

        let token_refresh_timeout = Duration::from_secs(
            env_or("TOKEN_REFRESH_TIMEOUT_SECS", "10")
                .parse()
                .context("Invalid TOKEN_REFRESH_TIMEOUT_SECS")?,
        );

        let hubspot_scopes: Vec<String> = env_opt("HUBSPOT_SCOPES")
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_else(|| DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect());

        let whatsapp = match (env_opt("WHATSAPP_API_URL"), env_opt("WHATSAPP_AUTHORIZATION")) {
            (Some(api_url), Some(authorization)) => Some(WhatsAppConfig {
                api_url,
                authorization,
                template_name: env_or("WHATSAPP_TEMPLATE_NAME", DEFAULT_TEMPLATE_NAME),
                template_namespace: env_or(
                    "WHATSAPP_TEMPLATE_NAMESPACE",
                    DEFAULT_TEMPLATE_NAMESPACE,
                ),
                language: env_or("WHATSAPP_LANGUAGE", DEFAULT_TEMPLATE_LANGUAGE),
            }),
            (None, None) => None,
            _ => bail!("WHATSAPP_API_URL and WHATSAPP_AUTHORIZATION must be set together"),
        };

        Ok(Config {
            host: env_or("HOST", "0.0.0.0"),
            port,
            hubspot_client_id: env_opt("HUBSPOT_CLIENT_ID")
                .context("HUBSPOT_CLIENT_ID is required")?,
            hubspot_client_secret: env_opt("HUBSPOT_CLIENT_SECRET")
                .context("HUBSPOT_CLIENT_SECRET is required")?,
            hubspot_redirect_uri: env_or("HUBSPOT_REDIRECT_URI", &format!("{base_url}/oauth/callback")),
            hubspot_api_url: env_or("HUBSPOT_API_URL", DEFAULT_API_URL),
            hubspot_authorize_url: env_or("HUBSPOT_AUTHORIZE_URL", DEFAULT_AUTHORIZE_URL),
            hubspot_scopes,
            token_refresh_timeout,
            token_store,
            database_url,
            state_secret: env_opt("STATE_SECRET"),
            whatsapp,
            base_url,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
