//! HTTP surface of the bridge.
//!
//! - `/status`: health and token state
//! - `/oauth/*`: HubSpot install flow and forced refresh
//! - `/contacts`, `/tickets`, `/notes`, `/conversations`: CRM passthroughs
//! - `/automate`: ticket note automation
//! - `/sendwa`, `/wastatus`: WhatsApp send and delivery callbacks

mod automate;
pub mod routes;

use crate::SharedState;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::bridge_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
