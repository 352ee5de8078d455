//! `equiptrack-events` — domain facts and their distribution seam.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use event::{
    topics, DocumentationRequired, DomainEvent, EquipmentCreated, EventMessage,
    TransactionCommitted,
};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
