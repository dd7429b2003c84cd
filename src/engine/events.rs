//! Renderer events and subscription management
//!
//! Both backends report through the same event surface. Subscription is
//! explicitly idempotent: a listener is keyed by `(EventKind, ListenerId)`
//! and re-registering the same pair is a no-op, so a higher-level binding
//! can safely re-attach its handlers without double delivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::location::{Location, Selection};
use super::types::{LoadingStage, TocItem};

/// Event emitted by a renderer
#[derive(Debug, Clone)]
pub enum RendererEvent {
    /// Fired after every completed navigation or relocation; `progress` is
    /// always in `[0, 1]`.
    LocationChanged { location: Location, progress: f32 },
    /// Live selection changed; `None` clears it.
    Selected(Option<Selection>),
    /// A content section finished loading.
    SectionLoaded {
        chapter_index: usize,
        chapter_title: String,
    },
    /// Table of contents is available.
    TocReady(Vec<TocItem>),
    /// Open progress notification.
    Loading(LoadingStage),
    /// Load failure. The single failure channel crossing the renderer
    /// boundary; best-effort failures never appear here.
    Failed(String),
}

impl RendererEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RendererEvent::LocationChanged { .. } => EventKind::LocationChanged,
            RendererEvent::Selected(_) => EventKind::Selected,
            RendererEvent::SectionLoaded { .. } => EventKind::SectionLoaded,
            RendererEvent::TocReady(_) => EventKind::TocReady,
            RendererEvent::Loading(_) => EventKind::Loading,
            RendererEvent::Failed(_) => EventKind::Failed,
        }
    }
}

/// Event discriminant used for subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    LocationChanged,
    Selected,
    SectionLoaded,
    TocReady,
    Loading,
    Failed,
}

/// Opaque listener token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    /// Allocate a fresh process-unique token.
    pub fn next() -> Self {
        ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type Callback = Arc<dyn Fn(&RendererEvent) + Send + Sync>;

struct Entry {
    kind: EventKind,
    id: ListenerId,
    callback: Callback,
}

/// Listener registry shared by both renderer backends
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Entry>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register `callback` for `kind` under `id`. Registering an already
    /// present `(kind, id)` pair is a no-op.
    pub fn on<F>(&self, kind: EventKind, id: ListenerId, callback: F)
    where
        F: Fn(&RendererEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|e| e.kind == kind && e.id == id) {
            trace!(?kind, ?id, "listener already registered");
            return;
        }
        listeners.push(Entry {
            kind,
            id,
            callback: Arc::new(callback),
        });
    }

    /// Convenience: register under a freshly allocated token.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&RendererEvent) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        self.on(kind, id, callback);
        id
    }

    /// Remove exactly the `(kind, id)` registration, if present.
    pub fn off(&self, kind: EventKind, id: ListenerId) {
        self.listeners
            .write()
            .retain(|e| !(e.kind == kind && e.id == id));
    }

    /// Deliver an event to every listener registered for its kind.
    pub fn emit(&self, event: &RendererEvent) {
        // Snapshot under the lock so a callback may re-subscribe.
        let callbacks: Vec<Callback> = self
            .listeners
            .read()
            .iter()
            .filter(|e| e.kind == event.kind())
            .map(|e| e.callback.clone())
            .collect();
        trace!(kind = ?event.kind(), listeners = callbacks.len(), "emit");
        for cb in callbacks {
            cb(event);
        }
    }

    /// Drop every registration. Called from `destroy()`.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counted(counter: Arc<AtomicUsize>) -> impl Fn(&RendererEvent) + Send + Sync {
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn duplicate_registration_is_noop() {
        let emitter = EventEmitter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = ListenerId::next();

        emitter.on(EventKind::Loading, id, counted(hits.clone()));
        emitter.on(EventKind::Loading, id, counted(hits.clone()));
        assert_eq!(emitter.listener_count(), 1);

        emitter.emit(&RendererEvent::Loading(LoadingStage::Parsing));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_removes_exactly_one_pair() {
        let emitter = EventEmitter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let a = ListenerId::next();
        let b = ListenerId::next();
        emitter.on(EventKind::Failed, a, counted(hits.clone()));
        emitter.on(EventKind::Failed, b, counted(hits.clone()));

        emitter.off(EventKind::Failed, a);
        emitter.emit(&RendererEvent::Failed("boom".into()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn events_route_by_kind() {
        let emitter = EventEmitter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        emitter.subscribe(EventKind::Selected, counted(hits.clone()));

        emitter.emit(&RendererEvent::Loading(LoadingStage::Ready));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        emitter.emit(&RendererEvent::Selected(None));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_silences_everything() {
        let emitter = EventEmitter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        emitter.subscribe(EventKind::Failed, counted(hits.clone()));
        emitter.clear();
        emitter.emit(&RendererEvent::Failed("late".into()));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
