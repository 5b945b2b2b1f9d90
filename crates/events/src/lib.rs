//! Domain events, their envelope, and the fire-and-forget publication path.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod sink;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use sink::{BusEventSink, EventSink, NoopEventSink};
