//! Throttle window and last-known-good snapshots

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Where a surfaced snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotSource {
    Push,
    Pull,
}

impl fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotSource::Push => f.write_str("push"),
            SnapshotSource::Pull => f.write_str("pull"),
        }
    }
}

/// Which of the two tracked values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotKind {
    Stats,
    Status,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Stats => "stats",
            SnapshotKind::Status => "status",
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An accepted value with its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub value: T,
    pub source: SnapshotSource,
    pub received_at: DateTime<Utc>,
}

/// Minimum spacing between surfaced updates of one kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleWindow(Duration);

impl ThrottleWindow {
    pub fn new(window: Duration) -> Self {
        Self(window)
    }

    pub fn duration(&self) -> Duration {
        self.0
    }

    /// Whether enough time has passed since `last` to surface another update
    pub fn admits(&self, last: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last) >= self.0
    }
}

/// Outcome of offering a candidate snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    /// Inside the throttle window of the current value
    Throttled,
    /// Requested before the current value was accepted
    Stale,
}

/// The most recently accepted snapshot of one kind
///
/// Never cleared once set; only replaced by a newer accepted value.
#[derive(Debug, Clone)]
pub struct LastKnownGood<T> {
    window: ThrottleWindow,
    current: Option<(Snapshot<T>, Instant)>,
}

impl<T: Clone> LastKnownGood<T> {
    pub fn new(window: ThrottleWindow) -> Self {
        Self {
            window,
            current: None,
        }
    }

    pub fn get(&self) -> Option<&Snapshot<T>> {
        self.current.as_ref().map(|(snapshot, _)| snapshot)
    }

    pub fn accepted_at(&self) -> Option<Instant> {
        self.current.as_ref().map(|(_, at)| *at)
    }

    /// Offer a candidate. `requested_at` is when a pull for it was issued;
    /// pushes pass `None`.
    pub fn offer(
        &mut self,
        value: T,
        source: SnapshotSource,
        now: Instant,
        requested_at: Option<Instant>,
    ) -> Verdict {
        if let Some((_, accepted_at)) = &self.current {
            if matches!(requested_at, Some(requested) if requested < *accepted_at) {
                return Verdict::Stale;
            }
            if !self.window.admits(*accepted_at, now) {
                return Verdict::Throttled;
            }
        }

        self.current = Some((
            Snapshot {
                value,
                source,
                received_at: Utc::now(),
            },
            now,
        ));
        Verdict::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lkg() -> LastKnownGood<u64> {
        LastKnownGood::new(ThrottleWindow::new(Duration::from_millis(1000)))
    }

    #[test]
    fn test_first_value_always_accepted() {
        let mut slot = lkg();
        let now = Instant::now();

        assert!(slot.get().is_none());
        assert_eq!(slot.offer(1, SnapshotSource::Push, now, None), Verdict::Accepted);
        assert_eq!(slot.get().map(|s| s.value), Some(1));
        assert_eq!(slot.accepted_at(), Some(now));
    }

    #[test]
    fn test_window_drops_regardless_of_value() {
        let mut slot = lkg();
        let start = Instant::now();

        slot.offer(1, SnapshotSource::Push, start, None);
        let soon = start + Duration::from_millis(400);
        assert_eq!(slot.offer(2, SnapshotSource::Push, soon, None), Verdict::Throttled);
        assert_eq!(slot.offer(1, SnapshotSource::Push, soon, None), Verdict::Throttled);
        assert_eq!(slot.get().map(|s| s.value), Some(1));

        let later = start + Duration::from_millis(1000);
        assert_eq!(slot.offer(3, SnapshotSource::Push, later, None), Verdict::Accepted);
        assert_eq!(slot.get().map(|s| s.value), Some(3));
    }

    #[test]
    fn test_stale_pull_is_discarded() {
        let mut slot = lkg();
        let requested = Instant::now();
        let pushed = requested + Duration::from_millis(10);

        slot.offer(7, SnapshotSource::Push, pushed, None);
        let answered = pushed + Duration::from_secs(5);
        assert_eq!(
            slot.offer(0, SnapshotSource::Pull, answered, Some(requested)),
            Verdict::Stale
        );

        let snapshot = slot.get().unwrap();
        assert_eq!(snapshot.value, 7);
        assert_eq!(snapshot.source, SnapshotSource::Push);
    }

    #[test]
    fn test_fresh_pull_is_accepted() {
        let mut slot = lkg();
        let start = Instant::now();

        slot.offer(1, SnapshotSource::Pull, start, Some(start));
        let requested = start + Duration::from_secs(5);
        let answered = requested + Duration::from_millis(50);
        assert_eq!(
            slot.offer(2, SnapshotSource::Pull, answered, Some(requested)),
            Verdict::Accepted
        );
        assert_eq!(slot.get().unwrap().source, SnapshotSource::Pull);
    }

    #[test]
    fn test_zero_window_admits_everything() {
        let mut slot = LastKnownGood::new(ThrottleWindow::new(Duration::ZERO));
        let now = Instant::now();

        assert_eq!(slot.offer(1u64, SnapshotSource::Push, now, None), Verdict::Accepted);
        assert_eq!(slot.offer(2u64, SnapshotSource::Push, now, None), Verdict::Accepted);
    }
}
