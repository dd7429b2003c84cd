//! Unified renderer abstraction
//!
//! Format-agnostic types, events and the contract every renderer backend
//! implements.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    reader shell                         │
//! │        (consumes BookRenderer + RendererEvents)         │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                  RendererFactory                        │
//! │      (BookFormat → lazily built renderer backend)       │
//! └─────────────────────────────────────────────────────────┘
//!             │                              │
//!             ▼                              ▼
//!   ┌───────────────────┐          ┌───────────────────┐
//!   │ ReflowableRenderer│          │FixedRasterRenderer│
//!   │  (ReflowEngine)   │          │  (PageRasterizer) │
//!   └───────────────────┘          └───────────────────┘
//! ```
//!
//! The two backends are fundamentally different state machines unified only
//! by [`BookRenderer`]; format-specific addressing never leaks past the
//! [`Location`] tag.

mod cache;
mod error;
mod events;
mod location;
mod progress;
mod traits;
mod types;

pub use cache::{BlobCache, DEFAULT_BLOB_CAPACITY};
pub use error::{RenderError, Result};
pub use events::{EventEmitter, EventKind, ListenerId, RendererEvent};
pub use location::{InvalidLocationString, Location, PersistedLocation, Selection};
pub use progress::{ProgressSink, ProgressTracker};
pub use traits::{
    apply_direction, BookRenderer, BookSource, LifecyclePhase, NavTarget, OpenOptions, Viewport,
};
pub use types::{
    AnnotationMark, BookMetadata, HighlightColor, LoadingStage, ParsedBook, ReadingDirection,
    Rect, Rendition, Section, Theme, TocItem, ViewMode, ViewSettings,
};
