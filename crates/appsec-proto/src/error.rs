//! Error types for the protocol.

use thiserror::Error;

/// Protocol errors raised while framing or encoding messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The frame header did not carry the expected magic.
    #[error("invalid frame header: {0}")]
    InvalidHeader(String),

    /// Message too large.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// The body could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while decoding a message body.
///
/// Every variant is a per-message fault: the frame has been consumed in full,
/// so the stream stays usable for the next message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The byte sequence ended in the middle of a value.
    #[error("truncated MessagePack data")]
    Truncated,

    /// Bytes remained after the top-level value.
    #[error("{0} trailing bytes after top-level value")]
    TrailingBytes(usize),

    /// Reserved marker byte.
    #[error("invalid MessagePack marker 0x{0:02x}")]
    InvalidMarker(u8),

    /// A type that is never valid in a request (bin, ext).
    #[error("unsupported MessagePack type: {0}")]
    UnsupportedType(&'static str),

    /// String longer than the configured ceiling.
    #[error("string of {len} bytes exceeds limit of {max}")]
    StringTooLong { len: usize, max: usize },

    /// Array with more elements than the configured ceiling.
    #[error("array of {len} elements exceeds limit of {max}")]
    ArrayTooLarge { len: usize, max: usize },

    /// Map with more entries than the configured ceiling.
    #[error("map of {len} entries exceeds limit of {max}")]
    MapTooLarge { len: usize, max: usize },

    /// Containers nested deeper than the configured ceiling.
    #[error("nesting exceeds maximum depth of {max}")]
    TooDeep { max: usize },

    /// String data that is not UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    /// Map key of a type other than string.
    #[error("map key must be a string")]
    NonStringKey,

    /// Top-level value is not `[method, payload]`.
    #[error("invalid request shape: {0}")]
    InvalidShape(String),

    /// Method name not recognised.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// Payload arity or field types do not match the method.
    #[error("invalid {method} payload: {reason}")]
    InvalidPayload {
        method: &'static str,
        reason: String,
    },
}

impl DecodeError {
    pub(crate) fn payload(method: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            method,
            reason: reason.into(),
        }
    }
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_display() {
        let err = DecodeError::StringTooLong { len: 4097, max: 4096 };
        assert_eq!(err.to_string(), "string of 4097 bytes exceeds limit of 4096");

        let err = DecodeError::payload("client_init", "expected 6 elements");
        assert_eq!(err.to_string(), "invalid client_init payload: expected 6 elements");
    }

    #[test]
    fn decode_error_converts_to_protocol_error() {
        let err: ProtocolError = DecodeError::UnknownMethod("nope".into()).into();
        assert!(matches!(err, ProtocolError::Decode(DecodeError::UnknownMethod(_))));
        assert_eq!(err.to_string(), "unknown method: nope");
    }
}
