use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::TokenSet;

/// The persisted token pair for the single HubSpot installation.
///
/// Field names match the `tokens.json` layout, so a file written by an earlier
/// deployment loads unchanged. Missing numeric fields default to zero, which
/// reads as "already expired" and sends the caller down the refresh path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(default)]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Issuance time of `access_token`, epoch milliseconds.
    #[serde(default)]
    pub obtained_at: i64,
    /// Validity window in seconds, as declared by the provider.
    #[serde(default)]
    pub expires_in: i64,
}

impl TokenRecord {
    /// Build the first record from an authorization-code exchange.
    pub fn issued(tokens: &TokenSet, now_ms: i64) -> Self {
        Self {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone().filter(|t| !t.is_empty()),
            obtained_at: now_ms,
            expires_in: i64::try_from(tokens.expires_in).unwrap_or(i64::MAX),
        }
    }

    /// Record produced by a successful refresh.
    ///
    /// A refresh token present in the response replaces the stored one; when
    /// the provider omits it, the stored refresh token is kept.
    pub fn refreshed(&self, tokens: &TokenSet, now_ms: i64) -> Self {
        let refresh_token = match tokens.refresh_token.as_deref() {
            Some(rotated) if !rotated.is_empty() => Some(rotated.to_string()),
            _ => self.refresh_token.clone(),
        };
        Self {
            access_token: tokens.access_token.clone(),
            refresh_token,
            obtained_at: now_ms,
            expires_in: i64::try_from(tokens.expires_in).unwrap_or(i64::MAX),
        }
    }

    /// `obtained_at + expires_in * 1000`, in epoch milliseconds.
    pub fn expiry_millis(&self) -> i64 {
        self.obtained_at
            .saturating_add(self.expires_in.saturating_mul(1000))
    }

    /// Valid strictly before the expiry instant.
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        !self.access_token.is_empty() && now_ms < self.expiry_millis()
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.expiry_millis()).single()
    }
}
