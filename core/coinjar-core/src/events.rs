//! In-process publish/subscribe for jar changes.
//!
//! Hosts (UI layers, the CLI, the FFI facade) register listeners per
//! `EventKind` or for every event. Listeners run synchronously on the emitting
//! thread, after the emitting store has finished its mutation.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::archive::Archive;
use crate::settings::Settings;

/// Aggregates over sealed archives plus the open jar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, uniffi::Record)]
pub struct Totals {
    pub coins: u64,
    pub tasks: u64,
}

#[derive(Debug, Clone, PartialEq, uniffi::Enum)]
pub enum JarEvent {
    CoinsChanged { count: u32 },
    JarFilled { archive: Archive, overflow: u32 },
    ArchivesUpdated { archives: Vec<Archive> },
    CapacityChanged { capacity: u32 },
    TotalsChanged { totals: Totals },
    SettingsChanged { settings: Settings },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    CoinsChanged,
    JarFilled,
    ArchivesUpdated,
    CapacityChanged,
    TotalsChanged,
    SettingsChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CoinsChanged => "coinsChanged",
            EventKind::JarFilled => "jarFilled",
            EventKind::ArchivesUpdated => "archivesUpdated",
            EventKind::CapacityChanged => "capacityChanged",
            EventKind::TotalsChanged => "totalsChanged",
            EventKind::SettingsChanged => "settingsChanged",
        }
    }
}

impl JarEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            JarEvent::CoinsChanged { .. } => EventKind::CoinsChanged,
            JarEvent::JarFilled { .. } => EventKind::JarFilled,
            JarEvent::ArchivesUpdated { .. } => EventKind::ArchivesUpdated,
            JarEvent::CapacityChanged { .. } => EventKind::CapacityChanged,
            JarEvent::TotalsChanged { .. } => EventKind::TotalsChanged,
            JarEvent::SettingsChanged { .. } => EventKind::SettingsChanged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Handler = Arc<dyn Fn(&JarEvent) + Send + Sync>;

struct Listener {
    filter: Option<EventKind>,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: BTreeMap<ListenerId, Listener>,
}

/// Cloneable handle; clones share one registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&JarEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    pub fn on_any<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&JarEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    /// Buffers every event into a channel. Dropping the receiver does not
    /// unregister the listener; call `off` for that.
    pub fn channel(&self) -> (ListenerId, Receiver<JarEvent>) {
        let (tx, rx) = mpsc::channel();
        let id = self.on_any(move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    /// Returns false if the listener was already removed.
    pub fn off(&self, id: ListenerId) -> bool {
        self.lock().listeners.remove(&id).is_some()
    }

    pub fn emit(&self, event: &JarEvent) {
        let kind = event.kind();
        // Handlers are collected first so a handler may call on/off.
        let handlers: Vec<Handler> = self
            .lock()
            .listeners
            .values()
            .filter(|listener| listener.filter.map_or(true, |filter| filter == kind))
            .map(|listener| Arc::clone(&listener.handler))
            .collect();
        tracing::trace!(event = kind.as_str(), listeners = handlers.len(), "emit");
        for handler in handlers {
            handler(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn register(&self, filter: Option<EventKind>, handler: Handler) -> ListenerId {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry.listeners.insert(id, Listener { filter, handler });
        id
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn kind_filter_only_sees_matching_events() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        bus.on(EventKind::CapacityChanged, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&JarEvent::CoinsChanged { count: 1 });
        bus.emit(&JarEvent::CapacityChanged { capacity: 40 });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_stops_delivery() {
        let bus = EventBus::new();
        let (id, rx) = bus.channel();
        bus.emit(&JarEvent::CoinsChanged { count: 2 });
        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit(&JarEvent::CoinsChanged { count: 3 });

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received, vec![JarEvent::CoinsChanged { count: 2 }]);
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let inner_bus = bus.clone();
        let inner_slot = Arc::clone(&slot);
        let id = bus.on_any(move |_| {
            if let Some(id) = *inner_slot.lock().unwrap() {
                inner_bus.off(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        bus.emit(&JarEvent::TotalsChanged { totals: Totals::default() });
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn clones_share_listeners() {
        let bus = EventBus::new();
        let (_, rx) = bus.clone().channel();
        bus.emit(&JarEvent::CapacityChanged { capacity: 20 });
        assert_eq!(rx.try_recv().unwrap().kind(), EventKind::CapacityChanged);
    }
}
