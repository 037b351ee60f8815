use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Body of `POST /crm/v3/objects/{type}/search`.
///
/// Filters inside a group are ANDed; groups are ORed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub filter_groups: Vec<FilterGroup>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterGroup {
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub property_name: String,
    pub operator: String,
    pub value: String,
}

impl Filter {
    pub fn eq(property: &str, value: &str) -> Self {
        Self {
            property_name: property.to_string(),
            operator: "EQ".to_string(),
            value: value.to_string(),
        }
    }
}

/// A CRM object as returned by the v3 object and search endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmObject {
    pub id: String,
    #[serde(default)]
    pub properties: HashMap<String, Option<String>>,
}

impl CrmObject {
    /// Non-empty property value.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .get(name)
            .and_then(|v| v.as_deref())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub results: Vec<CrmObject>,
}

/// Properties for a new contact.
#[derive(Debug, Clone, Serialize)]
pub struct NewContact {
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub phone: String,
    #[serde(rename = "branch__forms_", skip_serializing_if = "Option::is_none")]
    pub branch_forms: Option<String>,
}

/// One entry of an association listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociatedObject {
    #[serde(alias = "toObjectId", deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub association_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssociationList {
    #[serde(default)]
    pub results: Vec<AssociatedObject>,
}

impl AssociationList {
    pub fn first_id(&self) -> Option<&str> {
        self.results.first().map(|r| r.id.as_str())
    }
}

/// HubSpot returns association ids as strings on some endpoints and as
/// numbers on others.
fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CreatedObject {
    pub id: String,
}

/// One page of `GET /conversations/v3/conversations/threads`.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadPage {
    #[serde(default)]
    pub results: Vec<serde_json::Value>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

impl ThreadPage {
    pub fn next_after(&self) -> Option<&str> {
        self.paging
            .as_ref()
            .and_then(|p| p.next.as_ref())
            .map(|n| n.after.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Paging {
    pub next: Option<NextPage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NextPage {
    pub after: String,
}
