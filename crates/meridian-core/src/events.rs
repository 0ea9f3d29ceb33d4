//! Synchronous publish/subscribe for working-copy mutations.
//!
//! Delivery is same-thread and happens during the mutating call itself;
//! there is no queue and no ordering guarantee across distinct event names.
//! Subscribing and unsubscribing are idempotent, and publishing to an event
//! with no listeners is a no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// The kind of working-copy mutation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureEventKind {
    /// A feature was inserted into the working copy.
    Added,
    /// A feature was deleted from the working copy.
    Deleted,
    /// A feature's properties or geometry were updated.
    Updated,
}

impl FeatureEventKind {
    /// Returns the specific event name this kind publishes under.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Added => "feature:added",
            Self::Deleted => "feature:deleted",
            Self::Updated => "feature:updated",
        }
    }
}

impl fmt::Display for FeatureEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Payload delivered to listeners on every successful mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureEvent {
    /// What happened.
    pub kind: FeatureEventKind,
    /// The encoded ID of the affected feature.
    pub eid: String,
    /// The dataset the feature belongs to.
    pub dataset: String,
}

/// The union event name every mutation also publishes under.
pub const FEATURE_EVENT: &str = "feature";

type Listener = Box<dyn Fn(&FeatureEvent) + Send + Sync>;

/// A synchronous event bus keyed by event name.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<String, Vec<(String, Listener)>>>,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` under (`event`, `id`).
    ///
    /// Subscribing the same id twice replaces the previous callback rather
    /// than doubling delivery.
    pub fn subscribe(
        &self,
        event: &str,
        id: &str,
        callback: impl Fn(&FeatureEvent) + Send + Sync + 'static,
    ) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let slot = listeners.entry(event.to_string()).or_default();
        slot.retain(|(existing, _)| existing != id);
        slot.push((id.to_string(), Box::new(callback)));
    }

    /// Removes the listener registered under (`event`, `id`), if any.
    pub fn unsubscribe(&self, event: &str, id: &str) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = listeners.get_mut(event) {
            slot.retain(|(existing, _)| existing != id);
            if slot.is_empty() {
                listeners.remove(event);
            }
        }
    }

    /// Delivers `payload` to every listener of `event`, synchronously.
    pub fn publish(&self, event: &str, payload: &FeatureEvent) {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = listeners.get(event) {
            for (_, callback) in slot {
                callback(payload);
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        let counts: HashMap<&str, usize> = listeners
            .iter()
            .map(|(k, v)| (k.as_str(), v.len()))
            .collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}
