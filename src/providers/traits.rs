use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Tokens returned from an OAuth provider after code exchange or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    /// Present on the authorization-code grant; on refresh only when the
    /// provider rotates refresh tokens.
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    /// Validity window in seconds.
    pub expires_in: u64,
}

/// An OAuth 2.0 token endpoint the gate can refresh against.
///
/// Redirect URI and scopes are part of the provider's own configuration: the
/// bridge talks to exactly one installation.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Unique provider identifier (e.g., "hubspot").
    fn id(&self) -> &str;

    /// Human-readable display name.
    fn display_name(&self) -> &str;

    /// Consent page URL the installing user is redirected to.
    fn authorize_url(&self, state: Option<&str>) -> String;

    /// Exchange an authorization code for the first token set.
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ProviderError>;

    /// Exchange a refresh token for a new access token. Called once per
    /// refresh; implementations must not retry.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, ProviderError>;
}
