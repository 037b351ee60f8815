//! Outbound WhatsApp template messages through the Botforce gateway.

use serde_json::{json, Value};
use tracing::info;

use crate::config::WhatsAppConfig;
use crate::error::BridgeError;

/// A quick-reply template message to one recipient.
#[derive(Debug, Clone)]
pub struct TemplateMessage<'a> {
    pub phone_number: &'a str,
    /// Text substituted into the template body.
    pub text: &'a str,
    /// Flow identifier; the quick-reply button posts back `flow_<id>`.
    pub flow_postback: &'a str,
}

pub struct WhatsAppClient {
    http: reqwest::Client,
    config: WhatsAppConfig,
}

impl WhatsAppClient {
    pub fn new(http: reqwest::Client, config: WhatsAppConfig) -> Self {
        Self { http, config }
    }

    pub fn payload(&self, msg: &TemplateMessage<'_>) -> Value {
        json!({
            "payload": {
                "name": self.config.template_name,
                "components": [
                    {
                        "type": "body",
                        "parameters": [{ "type": "text", "text": msg.text }]
                    },
                    {
                        "index": 0,
                        "parameters": [{
                            "payload": format!("flow_{}", msg.flow_postback),
                            "type": "payload"
                        }],
                        "sub_type": "quick_reply",
                        "type": "button"
                    }
                ],
                "language": {
                    "code": self.config.language,
                    "policy": "deterministic"
                },
                "namespace": self.config.template_namespace
            },
            "phoneNumber": msg.phone_number
        })
    }

    /// Send the template. Returns the gateway's message id when it reports one.
    pub async fn send_template(
        &self,
        msg: &TemplateMessage<'_>,
    ) -> Result<Option<String>, BridgeError> {
        let resp = self
            .http
            .post(&self.config.api_url)
            .header(reqwest::header::AUTHORIZATION, &self.config.authorization)
            .json(&self.payload(msg))
            .send()
            .await
            .map_err(|e| BridgeError::whatsapp(None, format!("request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| BridgeError::whatsapp(None, format!("failed to read response: {e}")))?;
        if !status.is_success() {
            return Err(BridgeError::whatsapp(Some(status.as_u16()), body));
        }

        let wa_id = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| message_id(&v));
        info!(wa_id = wa_id.as_deref().unwrap_or("-"), "WhatsApp template sent");
        Ok(wa_id)
    }
}

/// Gateways differ in where they put the id: `messages[0].id`, `wa_id` or `id`.
fn message_id(response: &Value) -> Option<String> {
    response
        .pointer("/messages/0/id")
        .or_else(|| response.get("wa_id"))
        .or_else(|| response.get("id"))
        .and_then(Value::as_str)
        .map(String::from)
}
