//! folio-engine
//!
//! Rendering and pagination engine unifying two kinds of book content
//! behind one renderer contract:
//!
//! - **Reflowable** text (EPUB, FB2, MOBI), addressed by EPUB CFI and laid
//!   out by an embedded [`renderers::ReflowEngine`]
//! - **Fixed-raster** pages (PDF), addressed by page index and drawn by a
//!   [`renderers::PageRasterizer`]
//!
//! The host mounts a renderer built by [`renderers::RendererFactory`],
//! drives it once per frame via `tick`/`resize`, and observes it purely
//! through [`engine::RendererEvent`]s. Navigation, settings, annotations and
//! selection all flow through the [`engine::BookRenderer`] trait, so the
//! host never branches on the book format.
//!
//! ```no_run
//! use std::sync::Arc;
//! use folio_engine::engine::{BookRenderer, BookSource, EventKind, OpenOptions, Viewport};
//! use folio_engine::loader;
//! use folio_engine::renderers::RendererFactory;
//!
//! # async fn run(engine: Arc<dyn folio_engine::renderers::ReflowEngine>) -> folio_engine::engine::Result<()> {
//! let factory = RendererFactory::new(move || engine.clone());
//! let bytes = std::fs::read("book.epub")?;
//! let format = loader::detect_format(&bytes, Some("book.epub"))?;
//!
//! let renderer = factory.create(format)?;
//! renderer.mount(Viewport::default());
//! let id = folio_engine::engine::ListenerId::next();
//! renderer.on(EventKind::LocationChanged, id, Box::new(|_event| {
//!     // persist the reported location string
//! }));
//! renderer.open(BookSource::Bytes(bytes), OpenOptions::default()).await;
//! # Ok(())
//! # }
//! ```

pub mod cfi;
pub mod engine;
pub mod loader;
pub mod paging;
pub mod renderers;
pub mod timing;

pub use engine::{
    BlobCache, BookRenderer, BookSource, EventKind, ListenerId, Location, NavTarget, OpenOptions,
    PersistedLocation, RenderError, RendererEvent, Result, Selection, Viewport,
};
pub use loader::{detect_format, load, BookFormat, LoadedBook, RendererKind};
pub use renderers::{FixedRasterRenderer, ReflowableRenderer, RendererFactory};
