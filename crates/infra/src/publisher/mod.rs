//! Best-effort asynchronous fan-out of committed facts.
//!
//! The publisher sits between the coordinator and the broker. The commit
//! path hands facts over without waiting: `publish()` is a non-blocking
//! enqueue onto a **bounded** buffer drained by a background worker thread.
//! A full buffer, a stopped worker or an unreachable broker all end the same
//! way — the fact is dropped with a logged warning. At-most-once from the
//! producer side; downstream consumers de-duplicate by event identity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use equiptrack_events::{DomainEvent, EventMessage};

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::InMemoryBrokerLink;
#[cfg(feature = "redis")]
pub use redis::RedisBrokerLink;

/// Connection state of the broker link, as tracked by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Ready,
}

#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Transport to the broker. Implementations bound each call by `deadline`
/// so a hung broker cannot stall the worker past its budget.
pub trait BrokerLink: Send {
    /// Establish (or re-establish) the connection.
    fn connect(&mut self, deadline: Duration) -> Result<(), LinkError>;

    /// Deliver one message over an established connection.
    fn send(&mut self, message: &EventMessage, deadline: Duration) -> Result<(), LinkError>;
}

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Bounded best-effort buffer between the commit path and the worker.
    pub queue_capacity: usize,
    /// Budget for each connect/send attempt.
    pub send_deadline: Duration,
    /// Worker thread name, for logs.
    pub name: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            send_deadline: Duration::from_secs(3),
            name: "event-publisher".to_string(),
        }
    }
}

enum WorkerMessage {
    Publish(EventMessage),
    Shutdown,
}

/// Cloneable producer handle. Held by the coordinator and the
/// reconciliation checker.
#[derive(Clone)]
pub struct EventPublisher {
    tx: mpsc::SyncSender<WorkerMessage>,
    dropped: Arc<AtomicU64>,
}

impl EventPublisher {
    /// Non-blocking handoff of a committed fact. Never fails the caller.
    pub fn publish(&self, event: DomainEvent) {
        let topic = event.topic();
        let message = match EventMessage::from_event(&event) {
            Ok(m) => m,
            Err(e) => {
                warn!(topic, error = %e, "failed to encode fact, dropping");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        match self.tx.try_send(WorkerMessage::Publish(message)) {
            Ok(()) => {}
            Err(mpsc::TrySendError::Full(_)) => {
                warn!(topic, "publish queue full, dropping fact");
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::TrySendError::Disconnected(_)) => {
                warn!(topic, "event publisher stopped, dropping fact");
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Facts dropped so far (queue full, encode failure, broker down).
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Handle to the worker thread.
pub struct PublisherHandle {
    tx: mpsc::SyncSender<WorkerMessage>,
    join: Option<thread::JoinHandle<()>>,
}

impl PublisherHandle {
    /// Graceful shutdown: facts already queued ahead of the marker are still
    /// delivered (or dropped on broker failure), then the worker exits.
    pub fn shutdown(mut self) {
        let _ = self.tx.send(WorkerMessage::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Spawn the publisher worker over the given broker link.
pub fn spawn<L>(link: L, config: PublisherConfig) -> (EventPublisher, PublisherHandle)
where
    L: BrokerLink + 'static,
{
    let (tx, rx) = mpsc::sync_channel(config.queue_capacity);
    let dropped = Arc::new(AtomicU64::new(0));

    let worker_dropped = Arc::clone(&dropped);
    let join = thread::Builder::new()
        .name(config.name.clone())
        .spawn(move || worker_loop(link, rx, config, worker_dropped))
        .expect("failed to spawn event publisher thread");

    (
        EventPublisher {
            tx: tx.clone(),
            dropped,
        },
        PublisherHandle {
            tx,
            join: Some(join),
        },
    )
}

fn worker_loop<L: BrokerLink>(
    mut link: L,
    rx: mpsc::Receiver<WorkerMessage>,
    config: PublisherConfig,
    dropped: Arc<AtomicU64>,
) {
    info!(publisher = %config.name, "event publisher started");
    let mut state = LinkState::Disconnected;

    loop {
        match rx.recv() {
            Ok(WorkerMessage::Publish(message)) => {
                state = deliver(&mut link, state, &message, &config, &dropped);
            }
            Ok(WorkerMessage::Shutdown) | Err(_) => break,
        }
    }

    info!(publisher = %config.name, "event publisher stopped");
}

fn deliver<L: BrokerLink>(
    link: &mut L,
    state: LinkState,
    message: &EventMessage,
    config: &PublisherConfig,
    dropped: &AtomicU64,
) -> LinkState {
    let mut state = state;

    if state != LinkState::Ready {
        state = LinkState::Connecting;
        debug!(publisher = %config.name, state = ?state, "connecting to broker");
        if let Err(e) = link.connect(config.send_deadline) {
            warn!(topic = %message.topic, error = %e, "broker unreachable, dropping fact");
            dropped.fetch_add(1, Ordering::Relaxed);
            return LinkState::Disconnected;
        }
        state = LinkState::Ready;
        debug!(publisher = %config.name, "broker link ready");
    }
    debug_assert_eq!(state, LinkState::Ready);

    match link.send(message, config.send_deadline) {
        Ok(()) => LinkState::Ready,
        Err(first) => {
            // One reconnect per message; still failing means the broker is
            // down and the fact is forfeited.
            debug!(topic = %message.topic, error = %first, "send failed, reconnecting");
            let retried = link
                .connect(config.send_deadline)
                .and_then(|_| link.send(message, config.send_deadline));
            match retried {
                Ok(()) => LinkState::Ready,
                Err(e) => {
                    warn!(topic = %message.topic, error = %e, "broker lost, dropping fact");
                    dropped.fetch_add(1, Ordering::Relaxed);
                    LinkState::Disconnected
                }
            }
        }
    }
}
