mod hubspot;
mod traits;

pub use hubspot::{HubSpotProvider, DEFAULT_API_URL, DEFAULT_AUTHORIZE_URL, DEFAULT_SCOPES};
pub use traits::{OAuthProvider, TokenSet};
