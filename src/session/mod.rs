mod controller;
mod sampler;
mod state;

pub use controller::Session;
pub use state::{SampleDecision, SessionState, SessionStatus};
