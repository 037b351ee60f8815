//! HubSpot access-token lifecycle: the persisted record, the clock used for
//! expiry, and the refreshing gate every CRM call goes through.

mod clock;
mod gate;
mod record;

pub use clock::{Clock, ManualClock, SystemClock};
pub use gate::{TokenGate, TokenState, TokenStatus};
pub use record::TokenRecord;
