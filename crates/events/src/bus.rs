//! Pub/sub abstraction for distributing committed facts to consumers.
//!
//! The bus is the transport seam between the publisher and in-process
//! consumers (e.g. the notification projection). It is intentionally
//! lightweight:
//!
//! - **Transport-agnostic**: in-memory channels here, a broker in production.
//! - **No persistence**: the ledger and stock stores are the source of truth;
//!   the bus only distributes facts that are already committed.
//! - **Best-effort fan-out**: combined with the publisher's at-most-once
//!   semantics, consumers must tolerate loss and de-duplicate by event
//!   identity.

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

/// A subscription to a fact stream. Each subscription receives a copy of
/// every message published while it is alive (broadcast semantics).
///
/// Designed for single-threaded consumption: hand each subscription to one
/// consumer loop.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Domain-agnostic event bus.
///
/// `publish()` may fail (bus closed, transport error); callers on the commit
/// path never propagate that failure upward — facts describe state that is
/// already durable, so a lost publish costs a notification, not consistency.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
