//! # RustShark Sync
//!
//! Real-time state sync client for the RustShark packet-capture engine.
//!
//! ## Features
//!
//! - **Push first**: one WebSocket connection with a bounded reconnect cycle
//! - **Typed events**: compile-time checked channels between components
//! - **Pull fallback**: REST polling while the push side is down
//! - **Throttled view**: at most one surfaced update per kind per window
//!
//! ## Modules
//!
//! - [`protocol`]: Wire messages and frame decoding
//! - [`connection`]: Connection manager and transports
//! - [`dispatch`]: Typed publish/subscribe dispatcher
//! - [`coordinator`]: Fallback & throttle coordinator ([`SyncClient`])
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rustshark_sync::{callback, Config, Snapshot, StatusSnapshot, SyncClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let client = SyncClient::from_config(&config)?;
//!
//!     let on_status = callback(|s: &Snapshot<StatusSnapshot>| {
//!         println!("running={} packets={}", s.value.running, s.value.packet_count);
//!     });
//!     client.on_status().add(&on_status);
//!
//!     client.connect();
//!     tokio::signal::ctrl_c().await?;
//!     client.disconnect();
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod dispatch;
pub mod protocol;

#[cfg(test)]
mod testing;

// Re-export top-level types for convenience
pub use config::{generate_default_config, Config, ConfigError, LoggingConfig};

pub use connection::{
    CloseInfo, ConnectionManager, ConnectionOptions, ConnectionState, Connector, SendError,
    TransportError, WsConnector,
};

pub use coordinator::{
    CoordinatorOptions, HttpPullSource, PullError, PullFailure, PullSource, RefreshMode, Snapshot,
    SnapshotKind, SnapshotSource, SyncClient, SyncView,
};

pub use dispatch::{callback, Callback, ChannelKind, DispatchReport, Dispatcher};

pub use protocol::{decode, ClientRequest, DecodeError, StatsSnapshot, StatusSnapshot, WireMessage};
