//! Event Dispatcher
//!
//! Fans decoded push messages and connection lifecycle events out to
//! independent subscriber groups.
//!
//! ## Channels
//!
//! | Channel | Payload |
//! |---------|---------|
//! | [`SnapshotStats`] | [`StatsSnapshot`](crate::protocol::StatsSnapshot) |
//! | [`SnapshotStatus`] | [`StatusSnapshot`](crate::protocol::StatusSnapshot) |
//! | [`LifecycleOpen`] | `()` |
//! | [`LifecycleClose`] | [`CloseInfo`](crate::connection::CloseInfo) |
//! | [`LifecycleError`] | [`TransportError`](crate::connection::TransportError) |
//!
//! ## Example
//!
//! ```rust
//! use rustshark_sync::dispatch::{Dispatcher, SnapshotStatus};
//! use rustshark_sync::protocol::StatusSnapshot;
//!
//! let dispatcher = Dispatcher::new();
//! let handle = dispatcher.subscribe::<SnapshotStatus, _>(|status| {
//!     println!("running={} packets={}", status.running, status.packet_count);
//! });
//!
//! dispatcher.dispatch::<SnapshotStatus>(&StatusSnapshot { running: true, packet_count: 42 });
//! dispatcher.off::<SnapshotStatus>(&handle);
//! ```

mod dispatcher;
mod subscribers;

pub use dispatcher::{
    Channel, ChannelKind, Dispatcher, LifecycleClose, LifecycleError, LifecycleOpen,
    SnapshotStats, SnapshotStatus,
};
pub use subscribers::{callback, Callback, DeliveryError, DispatchReport, SubscriberSet};
