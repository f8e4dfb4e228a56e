//! Out-of-process AppSec helper.
//!
//! The extension running inside the language runtime connects over a Unix
//! socket and exchanges `dds` framed MessagePack messages with a [`Client`]
//! session. Sessions share rule engines through the [`ServiceCache`].

pub mod broker;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod limiter;
pub mod rc;
pub mod sampler;
pub mod server;
pub mod service;
pub mod transport;

pub use broker::Broker;
pub use client::Client;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, HelperConfig};
pub use error::{BrokerError, DispatchError, RcError, Result, ServerError, ServiceError};
pub use limiter::RateLimiter;
pub use sampler::SchemaSampler;
pub use server::{run, Server};
pub use service::{AsmStatus, Service, ServiceCache, ServiceConfig, ServiceHandle, ServiceOptions};
pub use transport::{StreamTransport, Transport};

/// Helper version reported in `client_init` responses.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
