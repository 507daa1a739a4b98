//! Test doubles for the transport and pull seams

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::connection::{CloseInfo, Connector, TransportError, TransportEvent, TransportLink};
use crate::coordinator::{PullError, PullSource};
use crate::protocol::{StatsSnapshot, StatusSnapshot};

/// What the next `open()` does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Accept,
    Fail,
    /// Never resolves
    Hang,
}

/// Connector whose outcomes are scripted by the test
pub struct MockConnector {
    fallback: Plan,
    queue: Mutex<VecDeque<Plan>>,
    opens: AtomicUsize,
    remotes_tx: mpsc::UnboundedSender<MockRemote>,
    remotes_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockRemote>>,
}

impl MockConnector {
    /// `fallback` applies once the scripted queue is empty
    pub fn new(fallback: Plan) -> Arc<Self> {
        let (remotes_tx, remotes_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            fallback,
            queue: Mutex::new(VecDeque::new()),
            opens: AtomicUsize::new(0),
            remotes_tx,
            remotes_rx: tokio::sync::Mutex::new(remotes_rx),
        })
    }

    pub fn plan(&self, plans: impl IntoIterator<Item = Plan>) {
        self.queue.lock().unwrap().extend(plans);
    }

    /// Number of `open()` calls so far
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Server end of the next accepted link
    pub async fn next_remote(&self) -> MockRemote {
        self.remotes_rx
            .lock()
            .await
            .recv()
            .await
            .expect("connector dropped")
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn endpoint(&self) -> &str {
        "mock://engine/ws"
    }

    async fn open(&self) -> Result<TransportLink, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let plan = self.queue.lock().unwrap().pop_front().unwrap_or(self.fallback);

        match plan {
            Plan::Accept => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                let _ = self.remotes_tx.send(MockRemote {
                    events: inbound_tx,
                    sent: outbound_rx,
                });
                Ok(TransportLink {
                    outbound: outbound_tx,
                    inbound: inbound_rx,
                })
            }
            Plan::Fail => Err(TransportError::Connect {
                endpoint: self.endpoint().to_string(),
                reason: "connection refused".to_string(),
            }),
            Plan::Hang => std::future::pending().await,
        }
    }
}

/// Server side of a mock link
pub struct MockRemote {
    events: mpsc::UnboundedSender<TransportEvent>,
    sent: mpsc::UnboundedReceiver<String>,
}

impl MockRemote {
    pub fn push(&self, frame: &str) {
        let _ = self.events.send(TransportEvent::Frame(frame.to_string()));
    }

    pub fn close(&self) {
        let _ = self.events.send(TransportEvent::Closed(CloseInfo {
            code: Some(1000),
            reason: "normal closure".to_string(),
            clean: true,
        }));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self
            .events
            .send(TransportEvent::Failed(TransportError::Io(reason.to_string())));
    }

    /// Next text the client sent, or `None` once the link is dropped
    pub async fn next_sent(&mut self) -> Option<String> {
        self.sent.recv().await
    }
}

/// What the next pull of one kind does
#[derive(Debug, Clone)]
pub enum PullPlan<T> {
    Reply(T),
    /// Reply after a delay
    Slow(Duration, T),
    Fail,
    Hang,
}

impl<T: Clone> PullPlan<T> {
    async fn run(self) -> Result<T, PullError> {
        match self {
            PullPlan::Reply(value) => Ok(value),
            PullPlan::Slow(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            PullPlan::Fail => Err(PullError::Unavailable),
            PullPlan::Hang => std::future::pending().await,
        }
    }
}

struct Script<T> {
    fallback: PullPlan<T>,
    queue: VecDeque<PullPlan<T>>,
}

impl<T: Clone> Script<T> {
    fn next(&mut self) -> PullPlan<T> {
        self.queue
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Pull source with scripted replies and call counters
pub struct MockPullSource {
    stats: Mutex<Script<StatsSnapshot>>,
    status: Mutex<Script<StatusSnapshot>>,
    stats_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl MockPullSource {
    pub fn new(stats: PullPlan<StatsSnapshot>, status: PullPlan<StatusSnapshot>) -> Arc<Self> {
        Arc::new(Self {
            stats: Mutex::new(Script {
                fallback: stats,
                queue: VecDeque::new(),
            }),
            status: Mutex::new(Script {
                fallback: status,
                queue: VecDeque::new(),
            }),
            stats_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        })
    }

    /// Always answers with default stats and a stopped status
    pub fn idle() -> Arc<Self> {
        Self::new(
            PullPlan::Reply(StatsSnapshot::default()),
            PullPlan::Reply(StatusSnapshot::default()),
        )
    }

    pub fn plan_status(&self, plans: impl IntoIterator<Item = PullPlan<StatusSnapshot>>) {
        self.status.lock().unwrap().queue.extend(plans);
    }

    pub fn stats_calls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PullSource for MockPullSource {
    async fn fetch_stats(&self) -> Result<StatsSnapshot, PullError> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        let plan = self.stats.lock().unwrap().next();
        plan.run().await
    }

    async fn fetch_status(&self) -> Result<StatusSnapshot, PullError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let plan = self.status.lock().unwrap().next();
        plan.run().await
    }
}
