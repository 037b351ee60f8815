use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::traits::{OAuthProvider, TokenSet};
use crate::error::ProviderError;

pub const DEFAULT_API_URL: &str = "https://api.hubapi.com";
pub const DEFAULT_AUTHORIZE_URL: &str = "https://app.hubspot.com/oauth/authorize";
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Scopes requested by the install link.
pub const DEFAULT_SCOPES: &[&str] = &[
    "conversations.read",
    "conversations.write",
    "crm.objects.contacts.read",
    "crm.objects.contacts.write",
    "tickets",
    "oauth",
];

/// HubSpot OAuth 2.0 provider.
///
/// Quirks:
/// - The token endpoint is `POST /oauth/v1/token` with a form-encoded body.
/// - Access tokens live 30 minutes (`expires_in: 1800`).
/// - Refresh responses echo a refresh token; it is normally the same one.
pub struct HubSpotProvider {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: Vec<String>,
    api_url: String,
    authorize_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct HubSpotTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    token_type: Option<String>,
    expires_in: u64,
}

impl HubSpotProvider {
    pub fn new(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            api_url: DEFAULT_API_URL.to_string(),
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            timeout: DEFAULT_REFRESH_TIMEOUT,
            http: reqwest::Client::new(),
        }
    }

    /// Point the token endpoint at another host (tests, proxies).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_authorize_url(mut self, authorize_url: impl Into<String>) -> Self {
        self.authorize_url = authorize_url.into();
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Upper bound on a single token endpoint call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    fn token_endpoint(&self) -> String {
        format!("{}/oauth/v1/token", self.api_url)
    }

    async fn post_token_form(&self, form: &[(&str, &str)]) -> Result<TokenSet, ProviderError> {
        let resp = self
            .http
            .post(self.token_endpoint())
            .timeout(self.timeout)
            .form(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::transport(format!(
                        "token endpoint timed out after {:?}",
                        self.timeout
                    ))
                } else {
                    ProviderError::transport(format!("token request failed: {e}"))
                }
            })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ProviderError::transport(format!("failed to read token response: {e}")))?;

        if !status.is_success() {
            return Err(ProviderError::rejected(status.as_u16(), body));
        }

        let token_resp: HubSpotTokenResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::rejected(status.as_u16(), format!("malformed token response: {e}"))
        })?;

        Ok(TokenSet {
            access_token: token_resp.access_token,
            refresh_token: token_resp.refresh_token,
            token_type: token_resp.token_type,
            expires_in: token_resp.expires_in,
        })
    }
}

#[async_trait]
impl OAuthProvider for HubSpotProvider {
    fn id(&self) -> &str {
        "hubspot"
    }

    fn display_name(&self) -> &str {
        "HubSpot"
    }

    fn authorize_url(&self, state: Option<&str>) -> String {
        let mut url = format!(
            "{base}?client_id={client_id}&redirect_uri={redirect_uri}&scope={scope}&response_type=code",
            base = self.authorize_url,
            client_id = urlencoding(&self.client_id),
            redirect_uri = urlencoding(&self.redirect_uri),
            scope = urlencoding(&self.scopes.join(" ")),
        );
        if let Some(state) = state {
            url.push_str("&state=");
            url.push_str(&urlencoding(state));
        }
        url
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ProviderError> {
        self.post_token_form(&[
            ("grant_type", "authorization_code"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("redirect_uri", &self.redirect_uri),
            ("code", code),
        ])
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, ProviderError> {
        self.post_token_form(&[
            ("grant_type", "refresh_token"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}

fn urlencoding(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
