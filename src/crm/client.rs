use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::models::{
    AssociationList, CreatedObject, CrmObject, NewContact, SearchRequest, SearchResponse,
    ThreadPage,
};
use super::search;
use crate::error::BridgeError;
use crate::providers::DEFAULT_API_URL;

const THREAD_PAGE_LIMIT: u32 = 100;
const UNPARSEABLE_TOKEN: &str = "ConversationsApiError.UNPARSEABLE_TOKEN";

/// Outcome of a contact create that tolerates duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactOutcome {
    Created(String),
    Existing(String),
}

impl ContactOutcome {
    pub fn id(&self) -> &str {
        match self {
            ContactOutcome::Created(id) | ContactOutcome::Existing(id) => id,
        }
    }
}

/// Thin client over the HubSpot CRM v3 and Conversations v3 APIs.
///
/// Every call takes the bearer token explicitly; obtaining it is the token
/// gate's job.
#[derive(Clone)]
pub struct CrmClient {
    http: reqwest::Client,
    api_url: String,
}

impl CrmClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    // ========================================================================
    // Contacts
    // ========================================================================

    pub async fn search_contacts(
        &self,
        token: &str,
        request: &SearchRequest,
    ) -> Result<SearchResponse, BridgeError> {
        self.send(
            self.http
                .post(self.url("/crm/v3/objects/contacts/search"))
                .bearer_auth(token)
                .json(request),
        )
        .await
    }

    /// First contact matching a free-form name, if any.
    pub async fn find_contact_by_name(
        &self,
        token: &str,
        name: &str,
    ) -> Result<Option<CrmObject>, BridgeError> {
        let Some(request) = search::name_search(name) else {
            return Ok(None);
        };
        let found = self.search_contacts(token, &request).await?;
        Ok(found.results.into_iter().next())
    }

    pub async fn create_contact(
        &self,
        token: &str,
        contact: &NewContact,
    ) -> Result<String, BridgeError> {
        let created: CreatedObject = self
            .send(
                self.http
                    .post(self.url("/crm/v3/objects/contacts"))
                    .bearer_auth(token)
                    .json(&json!({ "properties": contact })),
            )
            .await?;
        info!(contact_id = %created.id, "Contact created");
        Ok(created.id)
    }

    /// Create a contact, falling back to the existing one with the same email
    /// when HubSpot reports a conflict.
    pub async fn create_or_find_contact(
        &self,
        token: &str,
        contact: &NewContact,
    ) -> Result<ContactOutcome, BridgeError> {
        match self.create_contact(token, contact).await {
            Ok(id) => Ok(ContactOutcome::Created(id)),
            Err(err) if err.upstream_status() == Some(409) => {
                let found = self
                    .search_contacts(token, &search::email_search(&contact.email))
                    .await?;
                match found.results.into_iter().next() {
                    Some(existing) => {
                        info!(contact_id = %existing.id, "Contact already exists");
                        Ok(ContactOutcome::Existing(existing.id))
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    // ========================================================================
    // Tickets & notes
    // ========================================================================

    pub async fn create_ticket(
        &self,
        token: &str,
        subject: &str,
        content: &str,
    ) -> Result<String, BridgeError> {
        let created: CreatedObject = self
            .send(
                self.http
                    .post(self.url("/crm/v3/objects/tickets"))
                    .bearer_auth(token)
                    .json(&json!({
                        "properties": {
                            "subject": subject,
                            "content": content,
                            "hs_pipeline": "default",
                            "hs_pipeline_stage": "1",
                        }
                    })),
            )
            .await?;
        info!(ticket_id = %created.id, "Ticket created");
        Ok(created.id)
    }

    pub async fn associate_ticket_contact(
        &self,
        token: &str,
        ticket_id: &str,
        contact_id: &str,
    ) -> Result<(), BridgeError> {
        let _: Value = self
            .send(
                self.http
                    .put(self.url("/crm/v3/associations/tickets/contacts/batch/create"))
                    .bearer_auth(token)
                    .json(&json!({
                        "inputs": [{
                            "from": { "id": ticket_id },
                            "to": { "id": contact_id },
                            "type": "ticket_to_contact",
                        }]
                    })),
            )
            .await?;
        Ok(())
    }

    /// Create a note stamped with `timestamp`.
    pub async fn create_note(
        &self,
        token: &str,
        body: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<String, BridgeError> {
        let created: CreatedObject = self
            .send(
                self.http
                    .post(self.url("/crm/v3/objects/notes"))
                    .bearer_auth(token)
                    .json(&json!({
                        "properties": {
                            "hs_note_body": body,
                            "hs_timestamp": timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                        }
                    })),
            )
            .await?;
        info!(note_id = %created.id, "Note created");
        Ok(created.id)
    }

    pub async fn associate_note_ticket(
        &self,
        token: &str,
        note_id: &str,
        ticket_id: &str,
    ) -> Result<(), BridgeError> {
        let path = format!("/crm/v3/objects/notes/{note_id}/associations/tickets/{ticket_id}/note_to_ticket");
        let _: Value = self
            .send(
                self.http
                    .put(self.url(&path))
                    .bearer_auth(token)
                    .json(&json!({})),
            )
            .await?;
        Ok(())
    }

    /// Objects of type `to` associated with `from`/`id`, e.g.
    /// `("contacts", "51", "tickets")`.
    pub async fn associations(
        &self,
        token: &str,
        from: &str,
        id: &str,
        to: &str,
    ) -> Result<AssociationList, BridgeError> {
        let path = format!("/crm/v3/objects/{from}/{id}/associations/{to}");
        self.send(self.http.get(self.url(&path)).bearer_auth(token))
            .await
    }

    // ========================================================================
    // Conversations
    // ========================================================================

    pub async fn thread_page(
        &self,
        token: &str,
        inbox_id: &str,
        after: Option<&str>,
    ) -> Result<ThreadPage, BridgeError> {
        let limit = THREAD_PAGE_LIMIT.to_string();
        let mut query = vec![("inboxId", inbox_id), ("limit", limit.as_str())];
        if let Some(after) = after {
            query.push(("after", after));
        }

        self.send(
            self.http
                .get(self.url("/conversations/v3/conversations/threads"))
                .bearer_auth(token)
                .query(&query),
        )
        .await
    }

    /// Every thread of `inbox_id` whose latest message falls in
    /// `[start_ms, end_ms]`, following pagination to the end.
    ///
    /// HubSpot answers a stale `after` cursor with `UNPARSEABLE_TOKEN`; that is
    /// treated as the last page.
    pub async fn threads_between(
        &self,
        token: &str,
        inbox_id: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Value>, BridgeError> {
        let mut matched = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let page = match self.thread_page(token, inbox_id, after.as_deref()).await {
                Ok(page) => page,
                Err(BridgeError::Upstream { ref body, .. }) if body.contains(UNPARSEABLE_TOKEN) => {
                    debug!(inbox_id, "Pagination cursor rejected, stopping");
                    break;
                }
                Err(e) => return Err(e),
            };

            let fetched = page.results.len();
            let next = page.next_after().map(String::from);
            matched.extend(page.results.into_iter().filter(|thread| {
                latest_message_millis(thread).is_some_and(|ts| ts >= start_ms && ts <= end_ms)
            }));
            debug!(inbox_id, fetched, total = matched.len(), "Fetched thread page");

            match next {
                Some(cursor) if after.as_deref() != Some(cursor.as_str()) => after = Some(cursor),
                Some(_) => {
                    warn!(inbox_id, "Pagination cursor repeated, stopping");
                    break;
                }
                None => break,
            }
        }

        Ok(matched)
    }

    /// Send a request and decode a successful JSON body. Non-2xx responses
    /// become `BridgeError::Upstream` carrying status and body.
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, BridgeError> {
        let resp = request
            .send()
            .await
            .map_err(|e| BridgeError::hubspot(None, format!("request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| BridgeError::hubspot(None, format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(BridgeError::hubspot(Some(status.as_u16()), body));
        }

        // Association and some PUT endpoints answer with an empty body.
        let body = if body.trim().is_empty() { "null" } else { &body };
        serde_json::from_str(body).map_err(|e| {
            BridgeError::hubspot(Some(status.as_u16()), format!("unexpected response: {e}"))
        })
    }
}

/// `latestMessageTimestamp` is an ISO-8601 string; epoch millis are accepted too.
fn latest_message_millis(thread: &Value) -> Option<i64> {
    match thread.get("latestMessageTimestamp")? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> CrmClient {
        CrmClient::new(reqwest::Client::new()).with_api_url(server.uri())
    }

    fn contact() -> NewContact {
        NewContact {
            firstname: "Ada".into(),
            lastname: "Lovelace".into(),
            email: "ada@example.com".into(),
            phone: "+27110000000".into(),
            branch_forms: None,
        }
    }

    #[test]
    fn timestamps_parse_from_iso_and_millis() {
        let iso = json!({ "latestMessageTimestamp": "2025-02-20T10:00:00.000Z" });
        assert_eq!(latest_message_millis(&iso), Some(1_740_045_600_000));
        let ms = json!({ "latestMessageTimestamp": 5 });
        assert_eq!(latest_message_millis(&ms), Some(5));
        assert_eq!(latest_message_millis(&json!({})), None);
    }

    #[tokio::test]
    async fn search_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crm/v3/objects/contacts/search"))
            .and(header("authorization", "Bearer T1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 1,
                "results": [{ "id": "51", "properties": { "firstname": "Ada" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let found = client(&server)
            .find_contact_by_name("T1", "Ada")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "51");
    }

    #[tokio::test]
    async fn blank_name_skips_the_search() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        assert!(client(&server)
            .find_contact_by_name("T1", "   ")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn conflict_falls_back_to_email_search() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crm/v3/objects/contacts"))
            .respond_with(ResponseTemplate::new(409).set_body_string(r#"{"message":"Contact already exists"}"#))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/crm/v3/objects/contacts/search"))
            .and(body_partial_json(json!({
                "filterGroups": [{ "filters": [{ "propertyName": "email", "value": "ada@example.com" }] }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "id": "77", "properties": {} }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client(&server)
            .create_or_find_contact("T1", &contact())
            .await
            .unwrap();
        assert_eq!(outcome, ContactOutcome::Existing("77".into()));
    }

    #[tokio::test]
    async fn other_create_failures_propagate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crm/v3/objects/contacts"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad email"))
            .mount(&server)
            .await;

        let err = client(&server)
            .create_or_find_contact("T1", &contact())
            .await
            .unwrap_err();
        assert_eq!(err.upstream_status(), Some(400));
    }

    #[tokio::test]
    async fn ticket_goes_to_default_pipeline() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crm/v3/objects/tickets"))
            .and(body_json(json!({
                "properties": {
                    "subject": "Broken",
                    "content": "Screen cracked",
                    "hs_pipeline": "default",
                    "hs_pipeline_stage": "1"
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "900" })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server)
            .create_ticket("T1", "Broken", "Screen cracked")
            .await
            .unwrap();
        assert_eq!(id, "900");
    }

    #[tokio::test]
    async fn note_association_tolerates_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/crm/v3/objects/notes/5/associations/tickets/9/note_to_ticket"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .associate_note_ticket("T1", "5", "9")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn threads_follow_pagination_and_filter_by_time() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations/v3/conversations/threads"))
            .and(query_param("inboxId", "42"))
            .and(query_param("after", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "id": "3", "latestMessageTimestamp": "2025-02-21T12:00:00Z" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/conversations/v3/conversations/threads"))
            .and(query_param("inboxId", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "id": "1", "latestMessageTimestamp": "2025-02-20T12:00:00Z" },
                    { "id": "2", "latestMessageTimestamp": "2025-03-01T12:00:00Z" }
                ],
                "paging": { "next": { "after": "page2" } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let threads = client(&server)
            .threads_between("T1", "42", 1_740_009_600_000, 1_740_182_399_000)
            .await
            .unwrap();
        let ids: Vec<&str> = threads.iter().filter_map(|t| t["id"].as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn unparseable_cursor_ends_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations/v3/conversations/threads"))
            .and(query_param("after", "stale"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "status": "error",
                "subCategory": "ConversationsApiError.UNPARSEABLE_TOKEN"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/conversations/v3/conversations/threads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "id": "1", "latestMessageTimestamp": 10 }],
                "paging": { "next": { "after": "stale" } }
            })))
            .mount(&server)
            .await;

        let threads = client(&server)
            .threads_between("T1", "42", 0, 100)
            .await
            .unwrap();
        assert_eq!(threads.len(), 1);
    }

    #[tokio::test]
    async fn repeated_cursor_ends_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations/v3/conversations/threads"))
            .and(query_param("after", "same"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "id": "2", "latestMessageTimestamp": 20 }],
                "paging": { "next": { "after": "same" } }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/conversations/v3/conversations/threads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "id": "1", "latestMessageTimestamp": 10 }],
                "paging": { "next": { "after": "same" } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let threads = client(&server)
            .threads_between("T1", "42", 0, 100)
            .await
            .unwrap();
        let ids: Vec<&str> = threads.iter().filter_map(|t| t["id"].as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn truncated_body_is_an_upstream_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 64\r\n\r\n{\"res")
                .await
                .unwrap();
            let _ = socket.shutdown().await;
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        });

        let err = CrmClient::new(reqwest::Client::new())
            .with_api_url(format!("http://{addr}"))
            .associations("T1", "contacts", "51", "tickets")
            .await
            .unwrap_err();
        match err {
            BridgeError::Upstream { status, body, .. } => {
                assert_eq!(status, None);
                assert!(body.contains("failed to read response"), "{body}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
