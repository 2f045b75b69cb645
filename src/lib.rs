//! crabsoup: a blocking session bridge over an SFU client SDK
//!
//! The SDK negotiates transports asynchronously: while a producer or consumer
//! is being created it calls back on its own threads and waits for answers
//! that only the remote signaling server can give. The frontend that talks to
//! that server can only make short, non-blocking calls. crabsoup sits in
//! between and turns the whole exchange into a handful of string-in,
//! string-out operations.
//!
//! # Features
//! - Session lifecycle: device, send/receive transports, producers, consumers
//! - Handshake bridge parking SDK callbacks until the frontend answers
//! - Lock-guarded audio/video mailboxes with 10 ms audio chunking
//! - Host audio conversion from planar u8/s16/s32/float to 16-bit wire format
//! - SDK log forwarding into the `log` facade
//! - Loopback SDK for offline testing
//!
//! # Usage
//! ```toml
//! [dependencies]
//! crabsoup = "0.1"
//! ```
//!
//! ```rust,ignore
//! use crabsoup::{Connector, ConnectorConfig};
//!
//! let connector = Connector::new(my_sdk, ConnectorConfig::load_or_default())?;
//! let source = connector.attach_source();
//!
//! let reply = source.invoke("load_device", &router_capabilities);
//! let reply = source.invoke("create_send_transport", &transport_params);
//! let reply = source.invoke("create_video_producer", "");
//! // reply.output carries {"connect_params": ...}; send it to the server,
//! // then hand the server's answer back:
//! let reply = source.invoke("connect_result", "true");
//! ```
pub mod audio;
pub mod commands;
pub mod config;
pub mod connector;
pub mod errors;
pub mod factory;
pub mod handshake;
pub mod invariants;
pub mod mailbox;
pub mod sdk;
pub mod session;
pub mod types;
pub mod video;

// Testing utilities - loopback SDK and synthetic media
pub mod testing;

// Re-exports for convenience
pub use commands::{CommandResponse, Operation};
pub use config::ConnectorConfig;
pub use connector::{Connector, ConnectorSource};
pub use errors::{ConnectorError, ConnectorErrorKind};
pub use handshake::{HandshakeBridge, HandshakeKind};
pub use sdk::{MediaSdk, SdkError};
pub use session::{HandshakeStep, Session};
pub use types::{ConnectionState, ConsumerParams, MediaKind, ProduceHints, TransportParams};

/// Initialize logging for the connector
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabsoup=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        operations: Operation::ALL.iter().map(|op| op.name().to_string()).collect(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub operations: Vec<String>,
}
