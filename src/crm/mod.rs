//! HubSpot CRM and Conversations calls used by the bridge routes.

mod client;
pub mod models;
pub mod search;

pub use client::{ContactOutcome, CrmClient};
pub use models::{AssociationList, CrmObject, NewContact, SearchRequest, SearchResponse};
