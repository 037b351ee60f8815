//! `POST /automate`: resolve a ticket (directly or through a contact name),
//! attach a note to it and mirror the result into the ledger.

use axum::{extract::State, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::crm::CrmObject;
use crate::error::BridgeError;
use crate::store::db::{ContactRow, TicketAssociation};
use crate::SharedState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomateRequest {
    pub contact_name: Option<String>,
    /// Accepts either a string or a numeric id.
    #[serde(default, deserialize_with = "optional_id")]
    pub ticket_id: Option<String>,
    pub note_message: Option<String>,
}

/// The contact resolved from `contactName`, as echoed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedContact {
    pub hubspot_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl From<&CrmObject> for ResolvedContact {
    fn from(obj: &CrmObject) -> Self {
        let name = [obj.property("firstname"), obj.property("lastname")]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            hubspot_id: obj.id.clone(),
            name: (!name.is_empty()).then_some(name),
            email: obj.property("email").map(String::from),
            phone: obj.property("phone").map(String::from),
        }
    }
}

impl From<&ResolvedContact> for ContactRow {
    fn from(c: &ResolvedContact) -> Self {
        ContactRow {
            hubspot_id: c.hubspot_id.clone(),
            name: c.name.clone(),
            email: c.email.clone(),
            phone: c.phone.clone(),
        }
    }
}

/// Note text used when the caller supplies none.
pub fn default_note(ticket_id: &str, contact: Option<&ResolvedContact>) -> String {
    let mut body = format!("Ticket #{ticket_id} (single-contact mode).");
    if let Some(c) = contact {
        body.push_str(&format!(
            " Contact: {} - {}",
            c.name.as_deref().unwrap_or("(none)"),
            c.email.as_deref().unwrap_or_default()
        ));
    }
    body
}

pub async fn automate(
    State(state): State<SharedState>,
    Json(req): Json<AutomateRequest>,
) -> Result<Json<Value>, BridgeError> {
    let ledger = &state.ledger;
    ledger
        .log_event(
            "automation_invoked",
            json!({
                "contactName": req.contact_name,
                "ticketId": req.ticket_id,
                "hasNote": req.note_message.is_some(),
            }),
        )
        .await;

    let token = state.gate.get_valid_access_token().await?;

    let mut ticket_id = req.ticket_id.filter(|id| !id.is_empty());
    let mut contact: Option<ResolvedContact> = None;

    let contact_name = req
        .contact_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    if let Some(name) = contact_name.filter(|_| ticket_id.is_none()) {
        let found = state
            .crm
            .find_contact_by_name(&token, name)
            .await?
            .ok_or_else(|| BridgeError::NotFound(format!("No contact found for \"{name}\"")))?;
        let resolved = ResolvedContact::from(&found);

        let tickets = state
            .crm
            .associations(&token, "contacts", &resolved.hubspot_id, "tickets")
            .await?;
        let first = tickets.first_id().ok_or_else(|| {
            BridgeError::NotFound(format!("No tickets associated with \"{name}\""))
        })?;
        info!(contact_id = %resolved.hubspot_id, ticket_id = first, "Resolved ticket from contact");

        ticket_id = Some(first.to_string());
        contact = Some(resolved);
    }

    let ticket_id = ticket_id.ok_or_else(|| {
        BridgeError::BadRequest("Must provide either contactName or a valid ticketId".into())
    })?;

    let note_body = match req.note_message {
        Some(msg) if !msg.trim().is_empty() => msg,
        _ => default_note(&ticket_id, contact.as_ref()),
    };

    let note_id = state.crm.create_note(&token, &note_body, Utc::now()).await?;
    state
        .crm
        .associate_note_ticket(&token, &note_id, &ticket_id)
        .await?;

    if let Some(c) = &contact {
        ledger.contact(&ContactRow::from(c)).await;
        ledger.ticket(&ticket_id, &c.hubspot_id).await;
    }
    ledger.note(&ticket_id, &note_id, &note_body).await;
    if let Some(c) = &contact {
        ledger
            .association(TicketAssociation::Contact {
                ticket_id: &ticket_id,
                contact_id: &c.hubspot_id,
            })
            .await;
    }
    ledger
        .association(TicketAssociation::Note {
            ticket_id: &ticket_id,
            note_id: &note_id,
        })
        .await;

    ledger
        .log_event(
            "automation_complete",
            json!({ "ticketId": ticket_id, "noteId": note_id }),
        )
        .await;

    Ok(Json(json!({
        "success": true,
        "ticketId": ticket_id,
        "noteId": note_id,
        "contact": contact,
    })))
}

fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
