//! PostgreSQL bookkeeping for CRM activity and WhatsApp messages.
//!
//! Tables:
//! - `hubspot_tokens`: the single token row used by [`PgTokenStore`](super::PgTokenStore)
//! - `contacts`, `hubspot_tickets`, `ticket_notes`, `ticket_associations`: mirror of
//!   what the automation route did in HubSpot
//! - `messages_log`: outbound WhatsApp messages and their delivery status
//! - `bridge_events`: event log

use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::BridgeError;

/// Postgres connection pool plus the bookkeeping queries.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(db_url: &str) -> Result<Self, BridgeError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(db_url)
            .await
            .map_err(|e| BridgeError::Database(format!("Failed to connect to PostgreSQL: {e}")))?;

        Ok(Self { pool })
    }

    /// Run schema migrations. Every statement is idempotent.
    pub async fn migrate(&self) -> Result<(), BridgeError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hubspot_tokens (
                id              SMALLINT PRIMARY KEY CHECK (id = 1),
                access_token    TEXT NOT NULL,
                refresh_token   TEXT,
                obtained_at     BIGINT NOT NULL,
                expires_in      BIGINT NOT NULL,
                updated_at      TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                hubspot_id  TEXT PRIMARY KEY,
                name        TEXT,
                email       TEXT,
                phone       TEXT,
                updated_at  TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hubspot_tickets (
                ticket_id   TEXT NOT NULL,
                contact_id  TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'open',
                created_at  TIMESTAMPTZ DEFAULT NOW(),
                UNIQUE(ticket_id, contact_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ticket_notes (
                id          BIGSERIAL PRIMARY KEY,
                ticket_id   TEXT NOT NULL,
                note_id     TEXT NOT NULL,
                note_body   TEXT NOT NULL,
                created_at  TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ticket_associations (
                id                BIGSERIAL PRIMARY KEY,
                ticket_id         TEXT NOT NULL,
                contact_id        TEXT,
                note_id           TEXT,
                association_type  TEXT NOT NULL,
                created_at        TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Partial unique indexes: a row links a ticket to either a contact or a note.
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_ticket_assoc_contact \
             ON ticket_associations(ticket_id, contact_id, association_type) WHERE note_id IS NULL",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_ticket_assoc_note \
             ON ticket_associations(ticket_id, note_id, association_type) WHERE contact_id IS NULL",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages_log (
                id                BIGSERIAL PRIMARY KEY,
                wa_id             TEXT,
                phone_number      TEXT NOT NULL,
                message           TEXT NOT NULL,
                flow_postback     TEXT,
                status            TEXT NOT NULL DEFAULT 'sent',
                status_timestamp  TEXT,
                created_at        TIMESTAMPTZ DEFAULT NOW(),
                updated_at        TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_log_wa_id ON messages_log(wa_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bridge_events (
                id          BIGSERIAL PRIMARY KEY,
                event       TEXT NOT NULL,
                details     JSONB DEFAULT '{}',
                created_at  TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Upsert a CRM contact keyed by its HubSpot id.
    pub async fn upsert_contact(&self, contact: &ContactRow) -> Result<(), BridgeError> {
        sqlx::query(
            r#"
            INSERT INTO contacts (hubspot_id, name, email, phone)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (hubspot_id)
            DO UPDATE SET
                name = EXCLUDED.name,
                email = EXCLUDED.email,
                phone = EXCLUDED.phone,
                updated_at = NOW()
            "#,
        )
        .bind(&contact.hubspot_id)
        .bind(&contact.name)
        .bind(&contact.email)
        .bind(&contact.phone)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record that a ticket belongs to a contact. Status defaults to `open`.
    pub async fn upsert_ticket(&self, ticket_id: &str, contact_id: &str) -> Result<(), BridgeError> {
        sqlx::query(
            r#"
            INSERT INTO hubspot_tickets (ticket_id, contact_id)
            VALUES ($1, $2)
            ON CONFLICT (ticket_id, contact_id) DO NOTHING
            "#,
        )
        .bind(ticket_id)
        .bind(contact_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_note(
        &self,
        ticket_id: &str,
        note_id: &str,
        note_body: &str,
    ) -> Result<(), BridgeError> {
        sqlx::query("INSERT INTO ticket_notes (ticket_id, note_id, note_body) VALUES ($1, $2, $3)")
            .bind(ticket_id)
            .bind(note_id)
            .bind(note_body)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn upsert_association(&self, assoc: &TicketAssociation<'_>) -> Result<(), BridgeError> {
        let query = match assoc {
            TicketAssociation::Contact { .. } => {
                r#"
                INSERT INTO ticket_associations (ticket_id, contact_id, association_type)
                VALUES ($1, $2, 'ticket_to_contact')
                ON CONFLICT (ticket_id, contact_id, association_type) WHERE note_id IS NULL
                DO NOTHING
                "#
            }
            TicketAssociation::Note { .. } => {
                r#"
                INSERT INTO ticket_associations (ticket_id, note_id, association_type)
                VALUES ($1, $2, 'ticket_to_note')
                ON CONFLICT (ticket_id, note_id, association_type) WHERE contact_id IS NULL
                DO NOTHING
                "#
            }
        };
        let (ticket_id, other_id) = assoc.ids();
        sqlx::query(query)
            .bind(ticket_id)
            .bind(other_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Log an outbound WhatsApp message.
    pub async fn insert_outbound_message(&self, msg: &OutboundMessage) -> Result<(), BridgeError> {
        sqlx::query(
            r#"
            INSERT INTO messages_log (wa_id, phone_number, message, flow_postback, status)
            VALUES ($1, $2, $3, $4, 'sent')
            "#,
        )
        .bind(&msg.wa_id)
        .bind(&msg.phone_number)
        .bind(&msg.message)
        .bind(&msg.flow_postback)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Apply a delivery-status callback. Returns the number of rows updated.
    pub async fn update_message_status(
        &self,
        wa_id: &str,
        status: &str,
        timestamp: &str,
    ) -> Result<u64, BridgeError> {
        let affected = sqlx::query(
            r#"
            UPDATE messages_log
            SET status = $1, status_timestamp = $2, updated_at = NOW()
            WHERE wa_id = $3
            "#,
        )
        .bind(status)
        .bind(timestamp)
        .bind(wa_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    pub async fn insert_event(&self, event: &str, details: &Value) -> Result<(), BridgeError> {
        sqlx::query("INSERT INTO bridge_events (event, details) VALUES ($1, $2)")
            .bind(event)
            .bind(details)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Best-effort bookkeeping front for the request handlers.
///
/// Writes never fail a request: errors are logged and dropped. With no
/// database configured every write is a no-op and events only reach tracing.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    db: Option<Database>,
}

impl Ledger {
    pub fn new(db: Option<Database>) -> Self {
        Self { db }
    }

    pub fn disabled() -> Self {
        Self { db: None }
    }

    pub fn database(&self) -> Option<&Database> {
        self.db.as_ref()
    }

    /// Emit an event to tracing and, if configured, to `bridge_events`.
    pub async fn log_event(&self, event: &str, details: Value) {
        info!(event, %details, "bridge event");
        if let Some(db) = &self.db {
            if let Err(e) = db.insert_event(event, &details).await {
                warn!(event, "Failed to persist event: {e}");
            }
        }
    }

    pub async fn contact(&self, contact: &ContactRow) {
        if let Some(db) = &self.db {
            report("contact upsert", db.upsert_contact(contact).await);
        }
    }

    pub async fn ticket(&self, ticket_id: &str, contact_id: &str) {
        if let Some(db) = &self.db {
            report("ticket upsert", db.upsert_ticket(ticket_id, contact_id).await);
        }
    }

    pub async fn note(&self, ticket_id: &str, note_id: &str, note_body: &str) {
        if let Some(db) = &self.db {
            report("note insert", db.insert_note(ticket_id, note_id, note_body).await);
        }
    }

    pub async fn association(&self, assoc: TicketAssociation<'_>) {
        if let Some(db) = &self.db {
            report("association upsert", db.upsert_association(&assoc).await);
        }
    }

    pub async fn outbound_message(&self, msg: &OutboundMessage) {
        if let Some(db) = &self.db {
            report("message log insert", db.insert_outbound_message(msg).await);
        }
    }
}

fn report(what: &str, result: Result<(), BridgeError>) {
    if let Err(e) = result {
        warn!("Ledger {what} failed: {e}");
    }
}

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactRow {
    pub hubspot_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub enum TicketAssociation<'a> {
    Contact { ticket_id: &'a str, contact_id: &'a str },
    Note { ticket_id: &'a str, note_id: &'a str },
}

impl<'a> TicketAssociation<'a> {
    fn ids(&self) -> (&'a str, &'a str) {
        match *self {
            TicketAssociation::Contact {
                ticket_id,
                contact_id,
            } => (ticket_id, contact_id),
            TicketAssociation::Note { ticket_id, note_id } => (ticket_id, note_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub wa_id: Option<String>,
    pub phone_number: String,
    pub message: String,
    pub flow_postback: Option<String>,
}
