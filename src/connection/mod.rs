//! Push connection to the capture engine
//!
//! [`ConnectionManager`] keeps one logical connection alive through a
//! bounded reconnect cycle and feeds decoded frames and lifecycle events
//! into the [`Dispatcher`](crate::dispatch::Dispatcher).

mod manager;
mod state;
mod transport;

pub use manager::{ConnectionManager, ConnectionOptions, SendError};
pub use state::{ConnectionState, ReconnectPolicy};
pub use transport::{CloseInfo, Connector, TransportError, TransportEvent, TransportLink, WsConnector};
