//! Wire protocol types for the AppSec helper.
//!
//! The extension and the helper exchange length-framed MessagePack messages
//! over a local stream socket. This crate provides:
//!
//! - Frame header encoding and the limit-enforcing MessagePack decoder
//! - Typed requests (`client_init`, `request_init`, `request_exec`,
//!   `request_shutdown`, `config_sync`) and their payload decoders
//! - Typed responses and their encoders
//! - Engine and remote configuration settings
//!
//! # Wire Format
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                Frame Header (8 bytes, fixed)             │
//! ├────────────────────────────┬─────────────────────────────┤
//! │   Magic "dds\0" (4)        │  Body Length (4, LE u32)    │
//! ├────────────────────────────┴─────────────────────────────┤
//! │                 MessagePack-encoded body                 │
//! │   request:  [method, payload]                            │
//! │   response: [[type, payload], ...]                       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use appsec_proto::{Codec, ConfigSync, Request, HEADER_SIZE};
//!
//! let mut codec = Codec::new();
//! let frame = codec
//!     .encode_request(&Request::ConfigSync(ConfigSync::default()))
//!     .unwrap()
//!     .to_vec();
//!
//! let request = codec.decode(&frame[HEADER_SIZE..]).unwrap();
//! assert_eq!(request.method(), "config_sync");
//! ```

pub mod codec;
mod error;
mod request;
mod response;
mod settings;
pub mod value;

pub use codec::{Codec, Header, Limits, HEADER_SIZE, MAGIC};
pub use error::{DecodeError, ProtocolError, Result};
pub use request::{
    ClientInit, ConfigSync, Request, RequestExec, RequestId, RequestInit, RequestShutdown,
};
pub use response::{
    Action, ClientInitResponse, InitStatus, RequestResponse, RequestShutdownResponse, Response,
    Verdict,
};
pub use settings::{
    EngineSettings, RemoteConfigSettings, SchemaExtraction, ServiceIdentity,
    DEFAULT_SAMPLE_RATE, DEFAULT_TRACE_RATE_LIMIT, DEFAULT_WAF_TIMEOUT_US,
};
pub use value::Value;
