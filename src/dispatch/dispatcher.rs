//! Event Dispatcher
//!
//! Typed publish/subscribe registry between the connection manager and
//! whoever consumes its events. Each channel is a marker type carrying its
//! payload type, so the payload is fixed at registration time.

use std::fmt;

use super::subscribers::{callback, Callback, DispatchReport, SubscriberSet};
use crate::connection::{CloseInfo, TransportError};
use crate::protocol::{StatsSnapshot, StatusSnapshot};

/// Closed set of subscriber groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    SnapshotStats,
    SnapshotStatus,
    LifecycleOpen,
    LifecycleClose,
    LifecycleError,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 5] = [
        ChannelKind::SnapshotStats,
        ChannelKind::SnapshotStatus,
        ChannelKind::LifecycleOpen,
        ChannelKind::LifecycleClose,
        ChannelKind::LifecycleError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::SnapshotStats => "snapshot_stats",
            ChannelKind::SnapshotStatus => "snapshot_status",
            ChannelKind::LifecycleOpen => "lifecycle_open",
            ChannelKind::LifecycleClose => "lifecycle_close",
            ChannelKind::LifecycleError => "lifecycle_error",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A channel key with its payload type
pub trait Channel: sealed::Sealed + 'static {
    const KIND: ChannelKind;
    type Payload: Send + Sync + 'static;

    #[doc(hidden)]
    fn subscribers(dispatcher: &Dispatcher) -> &SubscriberSet<Self::Payload>;
}

macro_rules! channel {
    ($(#[$doc:meta])* $name:ident, $kind:ident, $payload:ty, $field:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl sealed::Sealed for $name {}

        impl Channel for $name {
            const KIND: ChannelKind = ChannelKind::$kind;
            type Payload = $payload;

            fn subscribers(dispatcher: &Dispatcher) -> &SubscriberSet<$payload> {
                &dispatcher.$field
            }
        }
    };
}

channel!(
    /// Pushed stats snapshots
    SnapshotStats, SnapshotStats, StatsSnapshot, stats
);
channel!(
    /// Pushed status snapshots
    SnapshotStatus, SnapshotStatus, StatusSnapshot, status
);
channel!(
    /// The push connection opened; no payload
    LifecycleOpen, LifecycleOpen, (), open
);
channel!(
    /// The push connection closed
    LifecycleClose, LifecycleClose, CloseInfo, close
);
channel!(
    /// The push transport failed; always followed by a close
    LifecycleError, LifecycleError, TransportError, error
);

/// Registry of subscribers for every [`ChannelKind`]
#[derive(Default)]
pub struct Dispatcher {
    stats: SubscriberSet<StatsSnapshot>,
    status: SubscriberSet<StatusSnapshot>,
    open: SubscriberSet<()>,
    close: SubscriberSet<CloseInfo>,
    error: SubscriberSet<TransportError>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback on channel `C`. Registering the same callback
    /// twice is a no-op; returns whether it was newly added.
    pub fn on<C: Channel>(&self, callback: &Callback<C::Payload>) -> bool {
        let added = C::subscribers(self).add(callback);
        if added {
            tracing::debug!(channel = %C::KIND, "Subscriber registered");
        }
        added
    }

    /// Unregister a callback from channel `C`. Unknown callbacks are ignored.
    pub fn off<C: Channel>(&self, callback: &Callback<C::Payload>) -> bool {
        let removed = C::subscribers(self).remove(callback);
        if removed {
            tracing::debug!(channel = %C::KIND, "Subscriber unregistered");
        }
        removed
    }

    /// Wrap `f`, register it on `C`, and return the handle needed for [`off`](Self::off)
    pub fn subscribe<C, F>(&self, f: F) -> Callback<C::Payload>
    where
        C: Channel,
        F: Fn(&C::Payload) + Send + Sync + 'static,
    {
        let cb = callback(f);
        self.on::<C>(&cb);
        cb
    }

    /// Deliver `payload` to every subscriber of `C` exactly once
    pub fn dispatch<C: Channel>(&self, payload: &C::Payload) -> DispatchReport {
        C::subscribers(self).deliver(C::KIND.as_str(), payload)
    }

    pub fn subscriber_count(&self, kind: ChannelKind) -> usize {
        match kind {
            ChannelKind::SnapshotStats => self.stats.len(),
            ChannelKind::SnapshotStatus => self.status.len(),
            ChannelKind::LifecycleOpen => self.open.len(),
            ChannelKind::LifecycleClose => self.close.len(),
            ChannelKind::LifecycleError => self.error.len(),
        }
    }

    /// Drop every subscriber on every channel
    pub fn clear(&self) {
        self.stats.clear();
        self.status.clear();
        self.open.clear();
        self.close.clear();
        self.error.clear();
    }
}
