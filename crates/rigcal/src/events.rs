use std::collections::BTreeMap;

use rigcal_core::SensorId;
use rigcal_match::{Correspondence, SensorPair};
use rigcal_sync::SyncSetId;

/// Progress notifications published by the workflow.
///
/// Events carry owned snapshots, subscribers never observe later mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Event<P> {
    /// Human readable progress or warning message.
    TextProgress(String),
    /// Primitives extracted from the observation of a sensor in a set.
    PrimitivesReady {
        /// Source sensor.
        sensor: SensorId,
        /// Sync set of the observation.
        set: SyncSetId,
        /// Primitives in the sensor frame.
        primitives: Vec<P>,
    },
    /// Correspondences computed for one set.
    CorrespondencesReady {
        /// The matched set.
        set: SyncSetId,
        /// Correspondences of the set per sensor pair.
        correspondences: BTreeMap<SensorPair, Vec<Correspondence>>,
    },
}

impl<P> Event<P> {
    /// The kind of the event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::TextProgress(_) => EventKind::TextProgress,
            Event::PrimitivesReady { .. } => EventKind::PrimitivesReady,
            Event::CorrespondencesReady { .. } => EventKind::CorrespondencesReady,
        }
    }
}

/// Discriminant of [`Event`] used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`Event::TextProgress`].
    TextProgress,
    /// [`Event::PrimitivesReady`].
    PrimitivesReady,
    /// [`Event::CorrespondencesReady`].
    CorrespondencesReady,
}

/// Handle returned by [`EventChannel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Callback<P> = Box<dyn FnMut(&Event<P>) + Send>;

struct Subscription<P> {
    id: SubscriptionId,
    kind: EventKind,
    callback: Callback<P>,
}

/// Synchronous publish/subscribe channel.
///
/// Subscribers of the event kind are invoked on the publishing call stack,
/// exactly once per event and in subscription order.
pub struct EventChannel<P> {
    next_id: u64,
    subscriptions: Vec<Subscription<P>>,
}

impl<P> Default for EventChannel<P> {
    fn default() -> Self {
        Self {
            next_id: 0,
            subscriptions: Vec::new(),
        }
    }
}

impl<P> std::fmt::Debug for EventChannel<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl<P> EventChannel<P> {
    /// Creates a channel without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for one kind of event.
    pub fn subscribe<F>(&mut self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: FnMut(&Event<P>) + Send + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription {
            id,
            kind,
            callback: Box::new(callback),
        });
        id
    }

    /// Removes a subscription. Returns false if the id is unknown.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    /// Delivers an event to every subscriber of its kind.
    pub fn publish(&mut self, event: &Event<P>) {
        let kind = event.kind();
        for subscription in self.subscriptions.iter_mut().filter(|s| s.kind == kind) {
            (subscription.callback)(event);
        }
    }

    /// Check if an event kind has at least one subscriber.
    pub fn has_subscribers(&self, kind: EventKind) -> bool {
        self.subscriptions.iter().any(|s| s.kind == kind)
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Check if there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
