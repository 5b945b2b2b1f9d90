//! Fire-and-forget event sink used by the ledger services.
//!
//! Services emit only after a successful commit. Emission cannot fail from
//! the caller's point of view: a transport error is logged and dropped.

use std::marker::PhantomData;

use crate::bus::EventBus;
use crate::envelope::EventEnvelope;
use crate::event::Event;

/// Destination for committed domain events.
pub trait EventSink<E: Event>: Send + Sync {
    fn emit(&self, event: E);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl<E: Event> EventSink<E> for NoopEventSink {
    fn emit(&self, _event: E) {}
}

/// Sink that wraps each event in an [`EventEnvelope`] and publishes it.
#[derive(Debug)]
pub struct BusEventSink<B, E> {
    bus: B,
    _event: PhantomData<fn(E)>,
}

impl<B, E> BusEventSink<B, E> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            _event: PhantomData,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<B, E> EventSink<E> for BusEventSink<B, E>
where
    E: Event,
    B: EventBus<EventEnvelope<E>>,
{
    fn emit(&self, event: E) {
        let envelope = EventEnvelope::wrap(event);
        let event_type = envelope.event_type().to_string();
        let subject = envelope.subject().to_string();

        if let Err(err) = self.bus.publish(envelope) {
            tracing::warn!(
                event_type = %event_type,
                subject = %subject,
                error = ?err,
                "failed to publish ledger event"
            );
        }
    }
}
