//! Outbound event bus.
//!
//! Built on [`tokio::sync::broadcast`]: every subscriber receives every event
//! on its topic and a slow subscriber never blocks the control loop.
//!
//! | Topic | Traffic |
//! |---|---|
//! | [`Topic::Sequencer`] | pick/place phase transitions |
//! | [`Topic::Orders`] | order phase, part results, quality checks, submissions |
//! | [`Topic::Session`] | overall session outcome |
//! | [`Topic::Faults`] | failed service calls and other anomalies |
//!
//! Publishing with nobody listening is normal and returns `0`.

use kitcell_types::{Event, EventPayload};
use tokio::sync::broadcast;
use tracing::{trace, warn};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Sequencer,
    Orders,
    Session,
    Faults,
}

impl Topic {
    /// Lane a payload is routed to by [`EventBus::publish`].
    pub fn of(payload: &EventPayload) -> Topic {
        match payload {
            EventPayload::SequencerPhase(_) => Topic::Sequencer,
            EventPayload::OrderPhase { .. }
            | EventPayload::PartPlaced { .. }
            | EventPayload::QualityChecked { .. }
            | EventPayload::OrderSubmitted { .. }
            | EventPayload::OrderDiscarded { .. } => Topic::Orders,
            EventPayload::SessionFinished { .. } => Topic::Session,
            EventPayload::Fault { .. } => Topic::Faults,
        }
    }
}

/// Cheap to clone; clones share the same channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    sequencer: broadcast::Sender<Event>,
    orders: broadcast::Sender<Event>,
    session: broadcast::Sender<Event>,
    faults: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` applies to each topic independently.
    pub fn new(capacity: usize) -> Self {
        Self {
            sequencer: broadcast::channel(capacity).0,
            orders: broadcast::channel(capacity).0,
            session: broadcast::channel(capacity).0,
            faults: broadcast::channel(capacity).0,
        }
    }

    /// Route `event` by its payload and return the number of receivers that
    /// got it.
    pub fn publish(&self, event: Event) -> usize {
        let topic = Topic::of(&event.payload);
        match self.sender(topic).send(event) {
            Ok(n) => n,
            Err(_) => {
                trace!(?topic, "no subscribers");
                0
            }
        }
    }

    /// Build the envelope and publish it.
    pub fn emit(&self, source: &str, payload: EventPayload) -> usize {
        self.publish(Event::new(source, payload))
    }

    pub fn subscribe(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.sender(topic).subscribe(),
        }
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Sequencer => &self.sequencer,
            Topic::Orders => &self.orders,
            Topic::Session => &self.session,
            Topic::Faults => &self.faults,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiver bound to one [`Topic`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Next event on this topic, skipping over lag. `None` once the bus is
    /// gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(topic = ?self.topic, lagged_by = n, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant used to drain a topic after the fact.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}
