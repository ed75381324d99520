mod adapter;
mod config;
mod connectivity;
mod delivery;
mod error;
mod identifiers;
mod models;
mod queue;
mod sensor;
mod session;
mod utils;

pub use adapter::{PlayerAdapter, PlayerSample};
pub use config::SensorConfig;
pub use connectivity::{AlwaysReachable, ConnectivityMonitor};
pub use delivery::transport::{CollectorTransport, HttpCollectorTransport, TransportError};
pub use error::{SensorError, SensorResult};
pub use identifiers::{truncated_sha256, IdentifierHasher, DEFAULT_TOKEN_LEN};
pub use models::{Event, EventKind, EventPayload};
pub use queue::{EventQueue, QueueEntry};
pub use sensor::Sensor;
pub use session::{SampleDecision, Session, SessionState, SessionStatus};
