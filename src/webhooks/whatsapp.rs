//! WhatsApp delivery-status callback.
//!
//! The gateway (360dialog) posts `{wa_id, status, timestamp}` whenever an
//! outbound message changes state. Matching `messages_log` rows are updated.

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::BridgeError;
use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub wa_id: Option<String>,
    pub status: Option<String>,
    /// Unix seconds, sent as a string by some gateways and a number by others.
    pub timestamp: Option<Value>,
}

impl StatusUpdate {
    /// Validated `(wa_id, status, timestamp)`.
    fn fields(&self) -> Result<(&str, &str, String), BridgeError> {
        let wa_id = self.wa_id.as_deref().filter(|s| !s.is_empty());
        let status = self.status.as_deref().filter(|s| !s.is_empty());
        let timestamp = match &self.timestamp {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        match (wa_id, status, timestamp) {
            (Some(wa_id), Some(status), Some(timestamp)) => Ok((wa_id, status, timestamp)),
            _ => Err(BridgeError::BadRequest(
                "Missing required fields: wa_id, status, timestamp".into(),
            )),
        }
    }
}

/// POST /wastatus/status
pub async fn status_callback(
    State(state): State<SharedState>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<Value>, BridgeError> {
    let (wa_id, status, timestamp) = update.fields().inspect_err(|_| {
        warn!(?update, "Status update missing fields");
    })?;

    let db = state
        .ledger
        .database()
        .ok_or_else(|| BridgeError::NotConfigured("DATABASE_URL is not set".into()))?;

    let updated = db.update_message_status(wa_id, status, &timestamp).await?;
    if updated == 0 {
        warn!(wa_id, status, "Status update matched no logged message");
    } else {
        info!(wa_id, status, updated, "Message status updated");
    }

    Ok(Json(json!({ "success": true })))
}
