//! Builders for contact search payloads.

use super::models::{Filter, FilterGroup, SearchRequest};

/// Properties requested back from every contact search.
pub const CONTACT_PROPERTIES: &[&str] = &["firstname", "lastname", "email", "phone"];

/// Search for a contact by free-form name, as typed by an operator.
///
/// A single word matches either first or last name; otherwise the first word
/// is the first name and the last word the last name. Returns `None` for a
/// blank name.
pub fn name_search(name: &str) -> Option<SearchRequest> {
    let words: Vec<&str> = name.split_whitespace().collect();

    let filter_groups = match words.as_slice() {
        [] => return None,
        [single] => vec![
            FilterGroup {
                filters: vec![Filter::eq("firstname", single)],
            },
            FilterGroup {
                filters: vec![Filter::eq("lastname", single)],
            },
        ],
        [first, .., last] => vec![FilterGroup {
            filters: vec![Filter::eq("firstname", first), Filter::eq("lastname", last)],
        }],
    };

    Some(SearchRequest {
        filter_groups,
        properties: CONTACT_PROPERTIES.iter().map(|p| p.to_string()).collect(),
        limit: Some(1),
    })
}

/// Exact first and last name match.
pub fn full_name_search(firstname: &str, lastname: &str) -> SearchRequest {
    SearchRequest {
        filter_groups: vec![FilterGroup {
            filters: vec![
                Filter::eq("firstname", firstname),
                Filter::eq("lastname", lastname),
            ],
        }],
        properties: Vec::new(),
        limit: None,
    }
}

pub fn email_search(email: &str) -> SearchRequest {
    SearchRequest {
        filter_groups: vec![FilterGroup {
            filters: vec![Filter::eq("email", email)],
        }],
        properties: Vec::new(),
        limit: Some(1),
    }
}
