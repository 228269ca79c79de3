//! Lightweight event bus for GUI and notification subscribers.
//!
//! The manager publishes state changes here; subscribers register callbacks
//! and are invoked serially from the analysis path. Callbacks must return
//! quickly and must not call back into the manager.

use crate::detector::{ThreatInfo, ThreatLevel};
use parking_lot::RwLock;
use std::sync::Arc;

/// Observational events published by the manager.
///
/// Subscribers are never required for correctness; the kill switch behaves
/// identically with zero listeners.
#[derive(Debug, Clone)]
pub enum KillSwitchEvent {
    EnabledChanged(bool),
    TriggeredChanged(bool),
    ThreatLevelChanged(ThreatLevel),
    ThreatDetected(ThreatInfo),
    SyncPaused(String),
    SyncResumed,
    BackupCreated(String),
}

type Subscriber = Box<dyn Fn(&KillSwitchEvent) + Send + Sync>;

/// Shared publish/subscribe hub. Cheap to clone; clones share subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for all future events.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&KillSwitchEvent) + Send + Sync + 'static,
    {
        self.subscribers.write().push(Box::new(callback));
    }

    /// Deliver `event` to every subscriber, in registration order.
    pub fn publish(&self, event: &KillSwitchEvent) {
        for subscriber in self.subscribers.read().iter() {
            subscriber(event);
        }
    }
}
