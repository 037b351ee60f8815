//! Route handlers for the bridge.
//!
//! All handlers receive `SharedState` via Axum state extraction and obtain
//! their HubSpot bearer token from the token gate.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::automate;
use crate::crm::{search, ContactOutcome, NewContact};
use crate::error::BridgeError;
use crate::store::db::OutboundMessage;
use crate::webhooks::whatsapp as wa_webhooks;
use crate::whatsapp::TemplateMessage;
use crate::SharedState;

pub fn bridge_router(state: SharedState) -> Router {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/status", get(status))
        // ── OAuth ────────────────────────────────────────────────────────
        .route("/oauth/start", get(oauth_start))
        .route("/oauth/callback", get(oauth_callback))
        .route("/oauth/refresh", post(oauth_refresh))
        // ── CRM ──────────────────────────────────────────────────────────
        .route("/contacts/lookup-contact", post(lookup_contact))
        .route("/contacts/create-contact", post(create_contact))
        .route("/contacts/create-contact-with-auth", post(create_contact))
        .route("/contacts/create-ticket", post(create_ticket))
        .route("/tickets/fetch-ticket", get(fetch_tickets))
        .route("/notes/fetch-notes", get(fetch_notes))
        .route("/conversations", get(conversations))
        .route("/automate", post(automate::automate))
        // ── WhatsApp ─────────────────────────────────────────────────────
        .route("/sendwa/sendwa", post(send_whatsapp))
        .route("/wastatus/status", post(wa_webhooks::status_callback))
        .with_state(state)
}

/// Reject the request if any of the named fields is absent or blank.
pub(crate) fn require(fields: &[(&str, Option<&str>)]) -> Result<(), BridgeError> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, v)| v.map_or(true, |s| s.trim().is_empty()))
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(BridgeError::BadRequest(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )))
    }
}

// =============================================================================
// Health
// =============================================================================

async fn status(State(state): State<SharedState>) -> Result<Json<Value>, BridgeError> {
    let token = state.gate.status().await?;
    Ok(Json(json!({
        "status": "ok",
        "service": "hubspot-bridge",
        "version": env!("CARGO_PKG_VERSION"),
        "token": token,
        "ledger": state.ledger.database().is_some(),
        "whatsapp": state.whatsapp.is_some(),
    })))
}

// =============================================================================
// OAuth
// =============================================================================

async fn oauth_start(State(state): State<SharedState>) -> impl IntoResponse {
    let signed = state
        .state_signer
        .as_ref()
        .map(|signer| signer.sign(Utc::now().timestamp_millis()));
    let provider = state.gate.provider();
    let url = provider.authorize_url(signed.as_deref());
    info!(provider = provider.display_name(), signed = signed.is_some(), "Redirecting to consent page");
    Redirect::temporary(&url)
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn oauth_callback(
    State(state): State<SharedState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<Value>, BridgeError> {
    if let Some(error) = query.error {
        warn!(%error, "HubSpot authorization denied");
        return Err(BridgeError::BadRequest(format!("Authorization failed: {error}")));
    }

    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| BridgeError::BadRequest("Authorization code not found.".into()))?;

    if let Some(signer) = &state.state_signer {
        let presented = query.state.as_deref().unwrap_or_default();
        signer
            .verify(presented, Utc::now().timestamp_millis())
            .map_err(|e| BridgeError::BadRequest(format!("Invalid state: {e}")))?;
    }

    let tokens = state
        .gate
        .provider()
        .exchange_code(&code)
        .await
        .map_err(|e| BridgeError::hubspot(e.status, e.message))?;

    let record = state.gate.install(&tokens).await?;
    state
        .ledger
        .log_event("oauth_connected", json!({ "expires_in": record.expires_in }))
        .await;

    Ok(Json(json!({
        "success": true,
        "expires_in": record.expires_in,
    })))
}

async fn oauth_refresh(State(state): State<SharedState>) -> Result<Json<Value>, BridgeError> {
    state.gate.refresh_access_token().await?;
    let token = state.gate.status().await?;
    Ok(Json(json!({ "success": true, "token": token })))
}

// =============================================================================
// Contacts
// =============================================================================

#[derive(Deserialize)]
struct LookupRequest {
    firstname: Option<String>,
    lastname: Option<String>,
}

async fn lookup_contact(
    State(state): State<SharedState>,
    Json(req): Json<LookupRequest>,
) -> Result<Json<Value>, BridgeError> {
    require(&[
        ("firstname", req.firstname.as_deref()),
        ("lastname", req.lastname.as_deref()),
    ])?;
    let (firstname, lastname) = (
        req.firstname.unwrap_or_default(),
        req.lastname.unwrap_or_default(),
    );

    let token = state.gate.get_valid_access_token().await?;
    let found = state
        .crm
        .search_contacts(&token, &search::full_name_search(&firstname, &lastname))
        .await?;

    Ok(Json(json!(found)))
}

#[derive(Deserialize)]
struct CreateContactRequest {
    firstname: Option<String>,
    lastname: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    branch_forms: Option<String>,
}

async fn create_contact(
    State(state): State<SharedState>,
    Json(req): Json<CreateContactRequest>,
) -> Result<Json<Value>, BridgeError> {
    require(&[
        ("firstname", req.firstname.as_deref()),
        ("lastname", req.lastname.as_deref()),
        ("email", req.email.as_deref()),
        ("phone", req.phone.as_deref()),
    ])?;
    let contact = NewContact {
        firstname: req.firstname.unwrap_or_default(),
        lastname: req.lastname.unwrap_or_default(),
        email: req.email.unwrap_or_default(),
        phone: req.phone.unwrap_or_default(),
        branch_forms: req.branch_forms.filter(|b| !b.is_empty()),
    };

    let token = state.gate.get_valid_access_token().await?;
    let outcome = state.crm.create_or_find_contact(&token, &contact).await?;

    let message = match outcome {
        ContactOutcome::Created(_) => "Contact created successfully.",
        ContactOutcome::Existing(_) => "Contact already exists",
    };
    state
        .ledger
        .log_event(
            "contact_created",
            json!({ "contactId": outcome.id(), "existing": matches!(outcome, ContactOutcome::Existing(_)) }),
        )
        .await;

    Ok(Json(json!({
        "success": true,
        "message": message,
        "contactId": outcome.id(),
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTicketRequest {
    subject: Option<String>,
    content: Option<String>,
    contact_id: Option<String>,
}

async fn create_ticket(
    State(state): State<SharedState>,
    Json(req): Json<CreateTicketRequest>,
) -> Result<Json<Value>, BridgeError> {
    require(&[
        ("subject", req.subject.as_deref()),
        ("content", req.content.as_deref()),
        ("contactId", req.contact_id.as_deref()),
    ])?;
    let (subject, content, contact_id) = (
        req.subject.unwrap_or_default(),
        req.content.unwrap_or_default(),
        req.contact_id.unwrap_or_default(),
    );

    let token = state.gate.get_valid_access_token().await?;
    let ticket_id = state.crm.create_ticket(&token, &subject, &content).await?;
    state
        .crm
        .associate_ticket_contact(&token, &ticket_id, &contact_id)
        .await?;

    state.ledger.ticket(&ticket_id, &contact_id).await;
    state
        .ledger
        .log_event(
            "ticket_created",
            json!({ "ticketId": ticket_id, "contactId": contact_id }),
        )
        .await;

    Ok(Json(json!({
        "message": "Ticket created and associated with contact successfully.",
        "ticketId": ticket_id,
        "contactId": contact_id,
    })))
}

// =============================================================================
// Tickets, notes & conversations
// =============================================================================

#[derive(Deserialize)]
struct ContactQuery {
    contact_id: Option<String>,
}

async fn fetch_tickets(
    State(state): State<SharedState>,
    Query(query): Query<ContactQuery>,
) -> Result<Json<Value>, BridgeError> {
    require(&[("contact_id", query.contact_id.as_deref())])?;
    let contact_id = query.contact_id.unwrap_or_default();

    let token = state.gate.get_valid_access_token().await?;
    let tickets = state
        .crm
        .associations(&token, "contacts", &contact_id, "tickets")
        .await?;
    Ok(Json(json!(tickets)))
}

#[derive(Deserialize)]
struct TicketQuery {
    ticket_id: Option<String>,
}

async fn fetch_notes(
    State(state): State<SharedState>,
    Query(query): Query<TicketQuery>,
) -> Result<Json<Value>, BridgeError> {
    require(&[("ticket_id", query.ticket_id.as_deref())])?;
    let ticket_id = query.ticket_id.unwrap_or_default();

    let token = state.gate.get_valid_access_token().await?;
    let notes = state
        .crm
        .associations(&token, "tickets", &ticket_id, "notes")
        .await?;
    Ok(Json(json!(notes)))
}

#[derive(Deserialize)]
struct ConversationQuery {
    inbox_id: Option<String>,
    start: Option<i64>,
    end: Option<i64>,
}

async fn conversations(
    State(state): State<SharedState>,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<Value>, BridgeError> {
    require(&[("inbox_id", query.inbox_id.as_deref())])?;
    let inbox_id = query.inbox_id.unwrap_or_default();
    let start = query.start.unwrap_or(0);
    let end = query.end.unwrap_or(i64::MAX);
    if start > end {
        return Err(BridgeError::BadRequest("start must not be after end".into()));
    }

    let token = state.gate.get_valid_access_token().await?;
    let threads = state
        .crm
        .threads_between(&token, &inbox_id, start, end)
        .await?;

    Ok(Json(json!({
        "total": threads.len(),
        "results": threads,
    })))
}

// =============================================================================
// WhatsApp
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendWhatsAppRequest {
    phone_number: Option<String>,
    message: Option<String>,
    flow_postback: Option<String>,
}

async fn send_whatsapp(
    State(state): State<SharedState>,
    Json(req): Json<SendWhatsAppRequest>,
) -> Result<impl IntoResponse, BridgeError> {
    require(&[
        ("phoneNumber", req.phone_number.as_deref()),
        ("message", req.message.as_deref()),
        ("flowPostback", req.flow_postback.as_deref()),
    ])?;
    let client = state
        .whatsapp
        .as_ref()
        .ok_or_else(|| BridgeError::NotConfigured("WhatsApp gateway is not configured".into()))?;

    let (phone_number, message, flow_postback) = (
        req.phone_number.unwrap_or_default(),
        req.message.unwrap_or_default(),
        req.flow_postback.unwrap_or_default(),
    );

    let wa_id = client
        .send_template(&TemplateMessage {
            phone_number: &phone_number,
            text: &message,
            flow_postback: &flow_postback,
        })
        .await?;

    state
        .ledger
        .outbound_message(&OutboundMessage {
            wa_id,
            phone_number,
            message,
            flow_postback: Some(flow_postback),
        })
        .await;

    Ok((
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "WhatsApp message sent successfully.",
        })),
    ))
}
