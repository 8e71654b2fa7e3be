//! Keyed collections with change events and batch handlers.
//!
//! A [`Collection`] holds the current row for every key. Applying a batch
//! of changes diffs each row against the stored value and emits an
//! [`Event`] only for rows that were added, removed, or actually changed.
//! Registered batch handlers receive every non-empty event batch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

/// A change to one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<T> {
    Add(T),
    Update { old: T, new: T },
    Delete(T),
}

impl<T> Event<T> {
    /// The most recent value: the new row, or the removed one.
    pub fn latest(&self) -> &T {
        match self {
            Event::Add(row) | Event::Delete(row) => row,
            Event::Update { new, .. } => new,
        }
    }
}

type BatchHandler<T> = Arc<dyn Fn(&[Event<T>]) + Send + Sync>;

struct Registered<T> {
    handler: BatchHandler<T>,
    synced: Arc<AtomicBool>,
}

/// Handle returned by [`Collection::register_batch`].
#[derive(Debug, Clone)]
pub struct HandlerRegistration {
    synced: Arc<AtomicBool>,
}

impl HandlerRegistration {
    /// Whether the handler has observed the collection's initial state.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

/// Current rows keyed by `K`, with change notification.
pub struct Collection<K, T> {
    name: &'static str,
    rows: RwLock<BTreeMap<K, T>>,
    handlers: RwLock<Vec<Registered<T>>>,
    synced: AtomicBool,
}

impl<K, T> Collection<K, T>
where
    K: Ord + Clone,
    T: Clone + PartialEq,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            rows: RwLock::new(BTreeMap::new()),
            handlers: RwLock::new(Vec::new()),
            synced: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self, key: &K) -> Option<T> {
        let rows = self.rows.read().expect("collection lock");
        rows.get(key).cloned()
    }

    /// All rows in key order.
    pub fn list(&self) -> Vec<T> {
        let rows = self.rows.read().expect("collection lock");
        rows.values().cloned().collect()
    }

    /// All keys in order.
    pub fn keys(&self) -> Vec<K> {
        let rows = self.rows.read().expect("collection lock");
        rows.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.read().expect("collection lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a handler for change batches.
    ///
    /// With `run_initial`, the handler first receives every current row as
    /// an `Add` event.
    pub fn register_batch<F>(&self, handler: F, run_initial: bool) -> HandlerRegistration
    where
        F: Fn(&[Event<T>]) + Send + Sync + 'static,
    {
        let handler: BatchHandler<T> = Arc::new(handler);
        if run_initial {
            let initial: Vec<Event<T>> = self.list().into_iter().map(Event::Add).collect();
            if !initial.is_empty() {
                handler(&initial);
            }
        }

        let synced = Arc::new(AtomicBool::new(self.has_synced()));
        let mut handlers = self.handlers.write().expect("collection handlers lock");
        handlers.push(Registered {
            handler,
            synced: Arc::clone(&synced),
        });
        HandlerRegistration { synced }
    }

    /// Apply upserts (`Some`) and deletes (`None`), then notify handlers of
    /// the effective changes. Returns the emitted events.
    pub fn apply(&self, changes: Vec<(K, Option<T>)>) -> Vec<Event<T>> {
        let events = self.apply_deferred(changes);
        self.notify(&events);
        events
    }

    /// Apply changes without running handlers. The caller passes the
    /// returned events to [`Collection::notify`] once it holds no locks that
    /// a handler might need.
    pub fn apply_deferred(&self, changes: Vec<(K, Option<T>)>) -> Vec<Event<T>> {
        let mut rows = self.rows.write().expect("collection lock");
        let mut events = Vec::new();
        for (key, row) in changes {
            match row {
                Some(new) => match rows.insert(key, new.clone()) {
                    None => events.push(Event::Add(new)),
                    Some(old) if old != new => events.push(Event::Update { old, new }),
                    Some(_) => {}
                },
                None => {
                    if let Some(old) = rows.remove(&key) {
                        events.push(Event::Delete(old));
                    }
                }
            }
        }
        events
    }

    /// Run every registered handler over `events`. Empty batches are skipped.
    pub fn notify(&self, events: &[Event<T>]) {
        if events.is_empty() {
            return;
        }
        debug!(collection = self.name, events = events.len(), "collection changed");
        let handlers: Vec<BatchHandler<T>> = {
            let handlers = self.handlers.read().expect("collection handlers lock");
            handlers.iter().map(|r| Arc::clone(&r.handler)).collect()
        };
        for handler in handlers {
            handler(events);
        }
    }

    /// Mark the collection and its registered handlers as synced.
    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
        let handlers = self.handlers.read().expect("collection handlers lock");
        for registered in handlers.iter() {
            registered.synced.store(true, Ordering::Release);
        }
    }

    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}
