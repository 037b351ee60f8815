mod state;

pub use state::{StateError, StateSigner, STATE_MAX_AGE};
