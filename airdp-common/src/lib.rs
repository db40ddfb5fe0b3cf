mod backoff;
pub use backoff::{Backoff, ExponentialBackoff};

mod gate;
pub use gate::{PauseChannel, PauseGate};
