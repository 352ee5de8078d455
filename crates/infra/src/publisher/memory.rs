//! In-process broker link for tests/dev.
//!
//! Forwards facts straight onto an in-memory bus, so in-process consumers
//! (e.g. the notification projection) see exactly what a broker consumer
//! would.

use std::sync::Arc;
use std::time::Duration;

use equiptrack_events::{EventBus, EventMessage, InMemoryEventBus};

use super::{BrokerLink, LinkError};

#[derive(Debug)]
pub struct InMemoryBrokerLink {
    bus: Arc<InMemoryEventBus<EventMessage>>,
}

impl InMemoryBrokerLink {
    pub fn new(bus: Arc<InMemoryEventBus<EventMessage>>) -> Self {
        Self { bus }
    }
}

impl BrokerLink for InMemoryBrokerLink {
    fn connect(&mut self, _deadline: Duration) -> Result<(), LinkError> {
        Ok(())
    }

    fn send(&mut self, message: &EventMessage, _deadline: Duration) -> Result<(), LinkError> {
        self.bus
            .publish(message.clone())
            .map_err(|e| LinkError::Unavailable(format!("{e:?}")))
    }
}
