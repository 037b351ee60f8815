use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Failures of the token gate.
///
/// `Clone` so that a single refresh outcome can be handed to every caller
/// waiting on the same flight.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// No refresh token was ever stored. Needs the authorization flow again.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No access token present (store empty or corrupt).
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The refresh call failed: transport error, timeout or provider rejection.
    /// `status` is `None` when no HTTP response was received.
    #[error("Token refresh failed ({}): {body}", describe_status(.status))]
    TokenRefresh { status: Option<u16>, body: String },

    #[error("Token store error: {0}")]
    Store(String),
}

fn describe_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("HTTP {code}"),
        None => "no response".to_string(),
    }
}

impl TokenError {
    pub fn no_access_token() -> Self {
        TokenError::Authentication("no access token found".into())
    }

    pub fn no_refresh_token() -> Self {
        TokenError::Configuration("no refresh token available".into())
    }
}

/// Failures of a [`TokenStore`](crate::store::TokenStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("Corrupt token record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn io(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<StoreError> for TokenError {
    fn from(e: StoreError) -> Self {
        TokenError::Store(e.to_string())
    }
}

/// Failure reported by an OAuth token endpoint.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    /// HTTP status of the provider response, `None` for transport failures.
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: body.into(),
        }
    }
}

/// Unified error type for the bridge's HTTP surface.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    // ── Request Errors ──────────────────────────────────────────────────
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    // ── Token Gate ──────────────────────────────────────────────────────
    #[error(transparent)]
    Token(#[from] TokenError),

    // ── Upstream Errors ─────────────────────────────────────────────────
    #[error("{service} request failed ({}): {body}", describe_status(.status))]
    Upstream {
        service: &'static str,
        status: Option<u16>,
        body: String,
    },

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    pub fn hubspot(status: Option<u16>, body: impl Into<String>) -> Self {
        BridgeError::Upstream {
            service: "HubSpot",
            status,
            body: body.into(),
        }
    }

    pub fn whatsapp(status: Option<u16>, body: impl Into<String>) -> Self {
        BridgeError::Upstream {
            service: "WhatsApp gateway",
            status,
            body: body.into(),
        }
    }

    /// Upstream HTTP status, if this error came from an upstream response.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            BridgeError::Upstream { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<sqlx::Error> for BridgeError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {e}");
        BridgeError::Database(e.to_string())
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            BridgeError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            BridgeError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            BridgeError::Token(TokenError::Store(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "token_store_error",
                self.to_string(),
            ),
            BridgeError::Token(_) => (
                StatusCode::UNAUTHORIZED,
                "authentication_required",
                "authentication required; reconnect".to_string(),
            ),
            BridgeError::Upstream { .. } => (StatusCode::BAD_GATEWAY, "upstream_error", self.to_string()),
            BridgeError::NotConfigured(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "not_configured",
                self.to_string(),
            ),
            BridgeError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "database_error",
                self.to_string(),
            ),
            BridgeError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                self.to_string(),
            ),
        };

        if status.is_server_error() || status == StatusCode::UNAUTHORIZED {
            tracing::warn!(code, "{self}");
        }

        let mut error = json!({
            "code": code,
            "message": message,
        });
        if let Some(upstream) = self.upstream_status() {
            error["upstream_status"] = json!(upstream);
        }

        (status, axum::Json(json!({ "error": error }))).into_response()
    }
}
