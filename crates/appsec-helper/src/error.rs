//! Helper error types.

use appsec_engine::EngineError;
use appsec_proto::{DecodeError, ProtocolError};
use thiserror::Error;

/// Errors raised while receiving a request.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The peer closed the connection between messages.
    #[error("Peer disconnected")]
    Disconnected,

    /// Fewer bytes arrived than the frame promised, before the deadline or EOF.
    #[error("Length error: expected {expected} bytes, received {received}")]
    Length { expected: usize, received: usize },

    /// The frame header did not carry the protocol magic.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// The declared body exceeded the size ceiling and was discarded.
    #[error("Message body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    /// The body was read in full but is not a valid request.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A response could not be serialised.
    #[error("Encode error: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    /// Whether the stream is still framed after this error, so the session
    /// may answer with an `error` response and carry on.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::BodyTooLarge { .. } | Self::Decode(_))
    }
}

impl From<ProtocolError> for BrokerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidHeader(msg) => Self::InvalidHeader(msg),
            ProtocolError::MessageTooLarge { size, max } => Self::BodyTooLarge { size, max },
            ProtocolError::Decode(e) => Self::Decode(e),
            ProtocolError::Io(e) => Self::Io(e),
            ProtocolError::Serialisation(msg) => Self::Encode(msg),
        }
    }
}

/// Errors raised while building a service.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

impl ServiceError {
    /// Whether the failure comes from the environment (missing file) rather
    /// than the rules document.
    #[must_use]
    pub const fn is_runtime(&self) -> bool {
        match self {
            Self::Engine(e) => e.is_runtime(),
        }
    }
}

/// Errors that turn a request into an `error` response.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("{0} before client_init")]
    NotInitialized(&'static str),

    #[error("client_init on an initialised session")]
    AlreadyInitialized,

    #[error("{0} without an open request")]
    NoRequestScope(&'static str),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
}

/// Errors raised while reading remote configuration files.
#[derive(Error, Debug)]
pub enum RcError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The directory file is malformed.
    #[error("Invalid remote config directory: {0}")]
    Directory(String),

    /// A configuration file is not valid JSON.
    #[error("Invalid remote config file {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by the socket server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Another helper holds the lock file.
    #[error("Another helper instance holds the lock at {0}")]
    AlreadyRunning(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for helper operations.
pub type Result<T, E = ServerError> = std::result::Result<T, E>;
