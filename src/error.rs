use thiserror::Error;

pub type SensorResult<T> = Result<T, SensorError>;

/// Errors surfaced to the host for misuse of the public lifecycle API.
///
/// Transient delivery failures never appear here; they are absorbed and
/// retried inside the background delivery path.
#[derive(Error, Debug)]
pub enum SensorError {
    /// `Sensor::init` was called a second time.
    #[error("sensor is already initialized")]
    AlreadyInitialized,

    /// `Sensor::instance` was called before `Sensor::init`.
    #[error("sensor has not been initialized")]
    NotInitialized,

    /// `track` was called after `unload`.
    #[error("sensor has been unloaded")]
    AlreadyUnloaded,

    /// Stream attributes did not contain a non-empty `name` key.
    #[error("stream attributes must contain a non-empty 'name'")]
    MissingName,

    /// The sensor configuration is unusable (e.g. empty collector endpoint).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The durable queue could not be opened or recovered.
    #[error("storage error: {0}")]
    Storage(String),
}
