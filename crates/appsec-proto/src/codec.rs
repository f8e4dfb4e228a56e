//! Frame encoding and decoding utilities.

use crate::error::{DecodeError, ProtocolError};
use crate::request::Request;
use crate::response::Response;
use crate::value::{self, Value};

/// Frame header size in bytes.
pub const HEADER_SIZE: usize = 8;

/// Magic bytes opening every frame: `"dds"` padded with a NUL.
pub const MAGIC: [u8; 4] = *b"dds\0";

/// Decode ceilings enforced by the broker.
///
/// Both peers must agree on these; a payload that one side accepts may be
/// rejected by a peer built with tighter limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Largest accepted frame body, in bytes.
    pub max_body_size: usize,
    /// Deepest accepted container nesting.
    pub max_depth: usize,
    /// Longest accepted string, in bytes.
    pub max_string_length: usize,
    /// Largest accepted array.
    pub max_array_size: usize,
    /// Largest accepted map.
    pub max_map_size: usize,
}

impl Limits {
    /// Limits shared with the extension side of the protocol.
    pub const DEFAULT: Self = Self {
        max_body_size: 65536,
        max_depth: 32,
        max_string_length: 4096,
        max_array_size: 256,
        max_map_size: 256,
    };
}

impl Default for Limits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Frame header for protocol messages.
///
/// Wire format (8 bytes):
/// - Bytes 0-3: magic `"dds\0"`
/// - Bytes 4-7: body length (u32, little-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Length of the body in bytes.
    pub body_size: u32,
}

impl Header {
    /// Creates a new frame header.
    #[must_use]
    pub const fn new(body_size: u32) -> Self {
        Self { body_size }
    }

    /// Encodes the frame header to bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&self.body_size.to_le_bytes());
        buf
    }

    /// Decodes a frame header from bytes.
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self, ProtocolError> {
        if bytes[0..4] != MAGIC {
            return Err(ProtocolError::InvalidHeader(format!(
                "bad magic {:02x?}",
                &bytes[0..4]
            )));
        }
        let body_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Ok(Self { body_size })
    }

    /// Validates the body length against `limits`.
    pub fn validate_body_size(&self, limits: &Limits) -> Result<(), ProtocolError> {
        let size = self.body_size as usize;
        if size > limits.max_body_size {
            return Err(ProtocolError::MessageTooLarge {
                size,
                max: limits.max_body_size,
            });
        }
        Ok(())
    }
}

/// Codec for encoding and decoding protocol messages.
#[derive(Debug, Default)]
pub struct Codec {
    /// Reusable buffer for encoding.
    buffer: Vec<u8>,
    limits: Limits,
}

impl Codec {
    /// Creates a new codec with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a codec with pre-allocated buffer capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            limits: Limits::DEFAULT,
        }
    }

    /// Replaces the decode limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Returns the decode limits in force.
    #[must_use]
    pub const fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Encodes a batch of responses to a frame (header + body).
    ///
    /// The body is `[[type_name, payload], ...]`.
    pub fn encode(&mut self, responses: &[Response]) -> Result<&[u8], ProtocolError> {
        let batch = Value::Array(responses.iter().map(Response::to_envelope).collect());
        self.encode_value(&batch)
    }

    /// Encodes a single request to a frame. Used by peers that drive the helper.
    pub fn encode_request(&mut self, request: &Request) -> Result<&[u8], ProtocolError> {
        self.encode_value(&request.to_value())
    }

    /// Frames an arbitrary value.
    pub fn encode_value(&mut self, value: &Value) -> Result<&[u8], ProtocolError> {
        self.buffer.clear();
        self.buffer.extend_from_slice(&[0u8; HEADER_SIZE]);
        value::encode(value, &mut self.buffer)?;

        let body_len = self.buffer.len() - HEADER_SIZE;
        let body_size = u32::try_from(body_len).map_err(|_| ProtocolError::MessageTooLarge {
            size: body_len,
            max: u32::MAX as usize,
        })?;
        self.buffer[..HEADER_SIZE].copy_from_slice(&Header::new(body_size).encode());

        Ok(&self.buffer)
    }

    /// Decodes a request body. The bytes must NOT include the frame header.
    pub fn decode(&self, body: &[u8]) -> Result<Request, DecodeError> {
        let value = value::decode(body, &self.limits)?;
        Request::from_value(value)
    }

    /// Decodes a response batch body. The bytes must NOT include the frame header.
    pub fn decode_responses(&self, body: &[u8]) -> Result<Vec<Response>, DecodeError> {
        let value = value::decode(body, &self.limits)?;
        Response::decode_batch(value)
    }

    /// Returns the internal buffer for inspection.
    #[must_use]
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }
}
