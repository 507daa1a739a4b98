//! Sync Client
//!
//! Presents one rate-limited view of {live, stats, status} regardless of
//! whether the push connection is up. Push snapshots arrive through the
//! dispatcher; while the connection is down past the fallback timeout, the
//! same snapshots are pulled on an interval instead.

use futures_util::future::BoxFuture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::pull::{HttpPullSource, PullError, PullFailure, PullSource};
use super::throttle::{LastKnownGood, Snapshot, SnapshotKind, SnapshotSource, ThrottleWindow, Verdict};
use crate::config::Config;
use crate::connection::{
    CloseInfo, ConnectionManager, ConnectionOptions, ConnectionState, Connector, TransportError,
    WsConnector,
};
use crate::dispatch::{
    Callback, Dispatcher, LifecycleClose, LifecycleError, LifecycleOpen, SnapshotStats,
    SnapshotStatus, SubscriberSet,
};
use crate::protocol::{ClientRequest, StatsSnapshot, StatusSnapshot};

/// Throttle and fallback timing
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Minimum spacing between surfaced updates of one kind
    pub throttle_window: Duration,
    /// How long to wait for the push side after `connect()` before pulling
    pub fallback_timeout: Duration,
    /// Pull cadence while not live
    pub fallback_poll_interval: Duration,
    /// Restart an exhausted connection on this cadence
    pub probe_interval: Option<Duration>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            throttle_window: Duration::from_millis(1000),
            fallback_timeout: Duration::from_secs(5),
            fallback_poll_interval: Duration::from_secs(5),
            probe_interval: None,
        }
    }
}

/// How `refresh()` asked for fresh data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Requested over the open push connection
    Push,
    /// Pulled; `issued` counts kinds not already in flight
    Pull { issued: usize },
}

/// Point-in-time copy of everything the client tracks
#[derive(Debug, Clone)]
pub struct SyncView {
    pub live: bool,
    pub connection: ConnectionState,
    pub stats: Option<Snapshot<StatsSnapshot>>,
    pub status: Option<Snapshot<StatusSnapshot>>,
}

/// Outward signals
#[derive(Default)]
struct Signals {
    stats: SubscriberSet<Snapshot<StatsSnapshot>>,
    status: SubscriberSet<Snapshot<StatusSnapshot>>,
    live: SubscriberSet<bool>,
    pull_error: SubscriberSet<PullFailure>,
}

struct Track<T> {
    lkg: LastKnownGood<T>,
    in_flight: bool,
    pull: Option<JoinHandle<()>>,
}

impl<T: Clone> Track<T> {
    fn new(window: ThrottleWindow) -> Self {
        Self {
            lkg: LastKnownGood::new(window),
            in_flight: false,
            pull: None,
        }
    }

    fn cancel(&mut self) {
        if let Some(pull) = self.pull.take() {
            pull.abort();
        }
        self.in_flight = false;
    }
}

struct CoordinatorState {
    live: bool,
    /// Bumped on teardown so late pull results are ignored
    epoch: u64,
    stats: Track<StatsSnapshot>,
    status: Track<StatusSnapshot>,
}

/// A snapshot type the coordinator tracks
trait Tracked: Clone + Send + Sync + 'static {
    const KIND: SnapshotKind;

    fn track(state: &mut CoordinatorState) -> &mut Track<Self>;

    fn signal(signals: &Signals) -> &SubscriberSet<Snapshot<Self>>;

    fn fetch(source: Arc<dyn PullSource>) -> BoxFuture<'static, Result<Self, PullError>>;
}

impl Tracked for StatsSnapshot {
    const KIND: SnapshotKind = SnapshotKind::Stats;

    fn track(state: &mut CoordinatorState) -> &mut Track<Self> {
        &mut state.stats
    }

    fn signal(signals: &Signals) -> &SubscriberSet<Snapshot<Self>> {
        &signals.stats
    }

    fn fetch(source: Arc<dyn PullSource>) -> BoxFuture<'static, Result<Self, PullError>> {
        Box::pin(async move { source.fetch_stats().await })
    }
}

impl Tracked for StatusSnapshot {
    const KIND: SnapshotKind = SnapshotKind::Status;

    fn track(state: &mut CoordinatorState) -> &mut Track<Self> {
        &mut state.status
    }

    fn signal(signals: &Signals) -> &SubscriberSet<Snapshot<Self>> {
        &signals.status
    }

    fn fetch(source: Arc<dyn PullSource>) -> BoxFuture<'static, Result<Self, PullError>> {
        Box::pin(async move { source.fetch_status().await })
    }
}

struct Core {
    pull_source: Arc<dyn PullSource>,
    options: CoordinatorOptions,
    state: Mutex<CoordinatorState>,
    signals: Signals,
}

impl Core {
    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_live(&self) -> bool {
        self.lock().live
    }

    fn current<T: Tracked>(&self) -> Option<Snapshot<T>> {
        T::track(&mut self.lock()).lkg.get().cloned()
    }

    fn set_live(&self, live: bool) {
        let changed = {
            let mut state = self.lock();
            let changed = state.live != live;
            state.live = live;
            changed
        };

        if changed {
            tracing::info!(live, "Liveness changed");
            self.signals.live.deliver("live", &live);
        }
    }

    fn accept_push<T: Tracked>(&self, value: &T) {
        let accepted = {
            let mut state = self.lock();
            let track = T::track(&mut state);
            match track
                .lkg
                .offer(value.clone(), SnapshotSource::Push, Instant::now(), None)
            {
                Verdict::Accepted => track.lkg.get().cloned(),
                verdict => {
                    tracing::trace!(kind = %T::KIND, ?verdict, "Push snapshot dropped");
                    None
                }
            }
        };

        if let Some(snapshot) = accepted {
            T::signal(&self.signals).deliver(T::KIND.as_str(), &snapshot);
        }
    }

    /// Issue a pull for `T` unless one is already outstanding
    fn request_pull<T: Tracked>(self: &Arc<Self>) -> bool {
        let mut state = self.lock();
        let epoch = state.epoch;
        let track = T::track(&mut state);

        if track.in_flight {
            tracing::debug!(kind = %T::KIND, "Pull already in flight; skipping");
            return false;
        }
        track.in_flight = true;

        let requested_at = Instant::now();
        let source = Arc::clone(&self.pull_source);
        let core = Arc::downgrade(self);

        tracing::debug!(kind = %T::KIND, "Pulling snapshot");
        track.pull = Some(tokio::spawn(async move {
            let result = T::fetch(source).await;
            if let Some(core) = core.upgrade() {
                core.complete_pull::<T>(epoch, requested_at, result);
            }
        }));
        true
    }

    fn complete_pull<T: Tracked>(
        &self,
        epoch: u64,
        requested_at: Instant,
        result: Result<T, PullError>,
    ) {
        let mut state = self.lock();
        if state.epoch != epoch {
            return;
        }
        let track = T::track(&mut state);
        track.in_flight = false;
        track.pull = None;

        match result {
            Ok(value) => {
                let verdict =
                    track
                        .lkg
                        .offer(value, SnapshotSource::Pull, Instant::now(), Some(requested_at));
                let accepted = match verdict {
                    Verdict::Accepted => track.lkg.get().cloned(),
                    verdict => {
                        tracing::debug!(kind = %T::KIND, ?verdict, "Pull result discarded");
                        None
                    }
                };
                drop(state);

                if let Some(snapshot) = accepted {
                    T::signal(&self.signals).deliver(T::KIND.as_str(), &snapshot);
                }
            }
            Err(error) => {
                drop(state);
                tracing::warn!(kind = %T::KIND, error = %error, "Pull failed; keeping last known value");
                self.signals.pull_error.deliver(
                    "pull_error",
                    &PullFailure {
                        kind: T::KIND,
                        error,
                    },
                );
            }
        }
    }

    fn pull_all(self: &Arc<Self>) -> usize {
        let stats = self.request_pull::<StatsSnapshot>();
        let status = self.request_pull::<StatusSnapshot>();
        usize::from(stats) + usize::from(status)
    }

    /// Cancel outstanding pulls and drop any late results
    fn cancel_pulls(&self) {
        let mut state = self.lock();
        state.epoch += 1;
        state.stats.cancel();
        state.status.cancel();
    }
}

struct Registrations {
    stats: Callback<StatsSnapshot>,
    status: Callback<StatusSnapshot>,
    open: Callback<()>,
    close: Callback<CloseInfo>,
    error: Callback<TransportError>,
}

impl Registrations {
    fn register(dispatcher: &Dispatcher, core: &Arc<Core>) -> Self {
        let weak = Arc::downgrade(core);
        let stats = dispatcher.subscribe::<SnapshotStats, _>(move |stats| {
            if let Some(core) = weak.upgrade() {
                core.accept_push(stats);
            }
        });

        let weak = Arc::downgrade(core);
        let status = dispatcher.subscribe::<SnapshotStatus, _>(move |status| {
            if let Some(core) = weak.upgrade() {
                core.accept_push(status);
            }
        });

        let weak = Arc::downgrade(core);
        let open = dispatcher.subscribe::<LifecycleOpen, _>(move |_| {
            if let Some(core) = weak.upgrade() {
                core.set_live(true);
            }
        });

        let weak = Arc::downgrade(core);
        let close = dispatcher.subscribe::<LifecycleClose, _>(move |_| {
            if let Some(core) = weak.upgrade() {
                core.set_live(false);
            }
        });

        let error = dispatcher.subscribe::<LifecycleError, _>(|error| {
            tracing::debug!(error = %error, "Push transport error observed");
        });

        Self {
            stats,
            status,
            open,
            close,
            error,
        }
    }

    fn unregister(&self, dispatcher: &Dispatcher) {
        dispatcher.off::<SnapshotStats>(&self.stats);
        dispatcher.off::<SnapshotStatus>(&self.status);
        dispatcher.off::<LifecycleOpen>(&self.open);
        dispatcher.off::<LifecycleClose>(&self.close);
        dispatcher.off::<LifecycleError>(&self.error);
    }
}

/// Real-time view of the capture engine's state
pub struct SyncClient {
    dispatcher: Arc<Dispatcher>,
    manager: Arc<ConnectionManager>,
    core: Arc<Core>,
    registrations: Registrations,
    fallback: Mutex<Option<JoinHandle<()>>>,
}

impl SyncClient {
    /// Build a client with timing taken from `config`
    pub fn new(
        config: &Config,
        connector: Arc<dyn Connector>,
        pull_source: Arc<dyn PullSource>,
    ) -> Self {
        Self::with_options(
            config.connection_options(),
            config.coordinator_options(),
            connector,
            pull_source,
        )
    }

    pub fn with_options(
        connection: ConnectionOptions,
        options: CoordinatorOptions,
        connector: Arc<dyn Connector>,
        pull_source: Arc<dyn PullSource>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new());
        let manager = Arc::new(ConnectionManager::new(
            connector,
            Arc::clone(&dispatcher),
            connection,
        ));

        let window = ThrottleWindow::new(options.throttle_window);
        let core = Arc::new(Core {
            pull_source,
            options,
            state: Mutex::new(CoordinatorState {
                live: false,
                epoch: 0,
                stats: Track::new(window),
                status: Track::new(window),
            }),
            signals: Signals::default(),
        });

        let registrations = Registrations::register(&dispatcher, &core);

        Self {
            dispatcher,
            manager,
            core,
            registrations,
            fallback: Mutex::new(None),
        }
    }

    /// Client against the engine described by `config`
    pub fn from_config(config: &Config) -> Result<Self, PullError> {
        let connector = Arc::new(WsConnector::new(config.engine.ws_url()));
        let pull_source = Arc::new(HttpPullSource::new(
            &config.engine.base_url,
            &config.engine.status_path,
            &config.engine.stats_path,
            config.sync.request_timeout(),
        )?);

        Ok(Self::new(config, connector, pull_source))
    }

    /// Start the push connection and arm the fallback loop
    pub fn connect(&self) {
        self.manager.connect();

        let mut fallback = self.fallback.lock().unwrap_or_else(PoisonError::into_inner);
        if fallback.as_ref().map_or(true, |task| task.is_finished()) {
            *fallback = Some(tokio::spawn(fallback_loop(
                Arc::downgrade(&self.core),
                Arc::downgrade(&self.manager),
                self.core.options.clone(),
            )));
        }
    }

    /// Stop everything; no callback or timer fires afterwards
    pub fn disconnect(&self) {
        self.stop_fallback();
        self.core.cancel_pulls();
        self.manager.disconnect();
        self.core.set_live(false);
    }

    /// Ask for fresh data over whichever side is available
    pub fn refresh(&self) -> RefreshMode {
        if self.is_live()
            && self.manager.request(ClientRequest::Stats).is_ok()
            && self.manager.request(ClientRequest::Status).is_ok()
        {
            return RefreshMode::Push;
        }

        RefreshMode::Pull {
            issued: self.core.pull_all(),
        }
    }

    /// True only while the push connection is open
    pub fn is_live(&self) -> bool {
        self.core.is_live() && self.manager.is_open()
    }

    pub fn current_stats(&self) -> Option<Snapshot<StatsSnapshot>> {
        self.core.current::<StatsSnapshot>()
    }

    pub fn current_status(&self) -> Option<Snapshot<StatusSnapshot>> {
        self.core.current::<StatusSnapshot>()
    }

    pub fn view(&self) -> SyncView {
        SyncView {
            live: self.is_live(),
            connection: self.connection_state(),
            stats: self.current_stats(),
            status: self.current_status(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    /// Accepted stats snapshots
    pub fn on_stats(&self) -> &SubscriberSet<Snapshot<StatsSnapshot>> {
        &self.core.signals.stats
    }

    /// Accepted status snapshots
    pub fn on_status(&self) -> &SubscriberSet<Snapshot<StatusSnapshot>> {
        &self.core.signals.status
    }

    /// Liveness transitions
    pub fn on_live_change(&self) -> &SubscriberSet<bool> {
        &self.core.signals.live
    }

    /// Failed pulls; the last known value is kept
    pub fn on_pull_error(&self) -> &SubscriberSet<PullFailure> {
        &self.core.signals.pull_error
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    fn stop_fallback(&self) {
        if let Some(task) = self
            .fallback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.registrations.unregister(&self.dispatcher);
        self.stop_fallback();
        self.core.cancel_pulls();
        self.manager.disconnect();
    }
}

async fn fallback_loop(
    core: Weak<Core>,
    manager: Weak<ConnectionManager>,
    options: CoordinatorOptions,
) {
    // interval_at rejects a zero period
    let floor = Duration::from_millis(1);
    let start = Instant::now();
    let mut poll = tokio::time::interval_at(
        start + options.fallback_timeout,
        options.fallback_poll_interval.max(floor),
    );
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut probe = options.probe_interval.map(|every| {
        let every = every.max(floor);
        let mut probe = tokio::time::interval_at(start + every, every);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
        probe
    });

    loop {
        tokio::select! {
            _ = poll.tick() => {
                let Some(core) = core.upgrade() else { break };
                if !core.is_live() {
                    core.pull_all();
                }
            }
            _ = next_probe(&mut probe) => {
                let Some(manager) = manager.upgrade() else { break };
                if manager.state() == ConnectionState::Exhausted {
                    tracing::info!(endpoint = %manager.endpoint(), "Probing exhausted connection");
                    manager.connect();
                }
            }
        }
    }
}

async fn next_probe(probe: &mut Option<Interval>) {
    match probe {
        Some(probe) => {
            probe.tick().await;
        }
        None => std::future::pending().await,
    }
}
