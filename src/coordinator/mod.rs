//! Fallback & Throttle Coordinator
//!
//! [`SyncClient`] owns the dispatcher and connection manager and exposes the
//! combined view. Push snapshots are throttled per kind; while the push side
//! is down the same snapshots are pulled from a [`PullSource`], one request
//! per kind at a time.

mod client;
mod pull;
mod throttle;

pub use client::{CoordinatorOptions, RefreshMode, SyncClient, SyncView};
pub use pull::{HttpPullSource, PullError, PullFailure, PullSource};
pub use throttle::{
    LastKnownGood, Snapshot, SnapshotKind, SnapshotSource, ThrottleWindow, Verdict,
};
