//! Renderer backends and the factory that picks between them
//!
//! The factory maps a detected [`BookFormat`] to a freshly built backend:
//! reflowable formats get a [`ReflowableRenderer`] around a caller-provided
//! [`ReflowEngine`], PDF gets a [`FixedRasterRenderer`] around a
//! [`PageRasterizer`]. The shared [`BlobCache`] sits above both so source
//! bytes survive renderer teardown.

pub mod raster;
pub mod reflowable;

#[cfg(feature = "mupdf-raster")]
pub mod mupdf_backend;

pub use raster::{FixedRasterRenderer, NavKey, PageRasterizer, RasterPage, TextSpan};
pub use reflowable::{
    EnginePosition, EngineSelection, EngineTarget, FrameTransform, OverlayShape, OverlayStyle,
    ReflowEngine, ReflowableRenderer,
};

use std::sync::Arc;

use crate::engine::{BlobCache, BookRenderer, RenderError, Result};
use crate::loader::{BookFormat, LoadedBook, RendererKind};

type ReflowProvider = Arc<dyn Fn() -> Arc<dyn ReflowEngine> + Send + Sync>;
type RasterProvider = Arc<dyn Fn() -> Arc<dyn PageRasterizer> + Send + Sync>;

/// Builds the right renderer backend for a book format
///
/// Each `create` call returns a fresh renderer; renderers are single-use
/// (mount, open, destroy) and never recycled across books.
pub struct RendererFactory {
    reflow: ReflowProvider,
    raster: Option<RasterProvider>,
    blobs: BlobCache,
}

impl RendererFactory {
    pub fn new(reflow: impl Fn() -> Arc<dyn ReflowEngine> + Send + Sync + 'static) -> Self {
        Self {
            reflow: Arc::new(reflow),
            raster: default_raster_provider(),
            blobs: BlobCache::default(),
        }
    }

    /// Override the fixed-raster backend's rasterizer.
    pub fn with_rasterizer(
        mut self,
        raster: impl Fn() -> Arc<dyn PageRasterizer> + Send + Sync + 'static,
    ) -> Self {
        self.raster = Some(Arc::new(raster));
        self
    }

    /// Share an externally owned blob cache.
    pub fn with_blob_cache(mut self, blobs: BlobCache) -> Self {
        self.blobs = blobs;
        self
    }

    pub fn blobs(&self) -> &BlobCache {
        &self.blobs
    }

    /// Build a renderer for a format.
    pub fn create(&self, format: BookFormat) -> Result<Arc<dyn BookRenderer>> {
        match format.renderer_kind() {
            RendererKind::Reflowable => Ok(Arc::new(ReflowableRenderer::new((self.reflow)()))),
            RendererKind::FixedRaster => {
                let raster = self.raster.as_ref().ok_or_else(|| {
                    RenderError::UnsupportedFormat(format!(
                        "{:?}: no rasterizer configured",
                        format
                    ))
                })?;
                Ok(Arc::new(FixedRasterRenderer::new(raster())))
            }
        }
    }

    /// Fetch source bytes through the shared blob cache, then detect and
    /// parse. Reopening a recently closed book skips the read entirely.
    pub fn load_cached(
        &self,
        book_id: &str,
        read: impl FnOnce() -> std::io::Result<Vec<u8>>,
    ) -> Result<LoadedBook> {
        let blob = self
            .blobs
            .get_or_insert_with(book_id, read)
            .map_err(RenderError::Io)?;
        crate::loader::load(&blob, None)
    }

    /// Drop a book's cached source bytes.
    pub fn evict(&self, book_id: &str) {
        self.blobs.remove(book_id);
    }
}

#[cfg(feature = "mupdf-raster")]
fn default_raster_provider() -> Option<RasterProvider> {
    Some(Arc::new(|| {
        Arc::new(mupdf_backend::MupdfRasterizer::new()) as Arc<dyn PageRasterizer>
    }))
}

#[cfg(not(feature = "mupdf-raster"))]
fn default_raster_provider() -> Option<RasterProvider> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ParsedBook, Rect, ViewSettings, Viewport};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullEngine;

    impl ReflowEngine for NullEngine {
        fn load(&self, _book: Arc<ParsedBook>, _viewport: Viewport) -> Result<()> {
            Ok(())
        }
        fn display(&self, _target: &EngineTarget) -> Result<EnginePosition> {
            Ok(EnginePosition {
                cfi: String::new(),
                chapter_index: 0,
            })
        }
        fn next(&self) -> Result<Option<EnginePosition>> {
            Ok(None)
        }
        fn prev(&self) -> Result<Option<EnginePosition>> {
            Ok(None)
        }
        fn current(&self) -> Option<EnginePosition> {
            None
        }
        fn apply_styles(&self, _settings: &ViewSettings) {}
        fn relayout(&self, _viewport: Viewport) -> Result<()> {
            Ok(())
        }
        fn selection(&self) -> Option<EngineSelection> {
            None
        }
        fn locate_rects(&self, _cfi: &str) -> Vec<Rect> {
            Vec::new()
        }
        fn frame_transform(&self) -> FrameTransform {
            FrameTransform::default()
        }
        fn unload(&self) {}
    }

    fn factory() -> RendererFactory {
        RendererFactory::new(|| Arc::new(NullEngine))
    }

    #[test]
    fn reflowable_formats_build_without_a_rasterizer() {
        let factory = factory();
        for format in [
            BookFormat::Epub,
            BookFormat::Fb2,
            BookFormat::Cbz,
            BookFormat::Mobi,
        ] {
            assert!(factory.create(format).is_ok());
        }
    }

    #[cfg(not(feature = "mupdf-raster"))]
    #[test]
    fn pdf_requires_a_configured_rasterizer() {
        assert!(factory().create(BookFormat::Pdf).is_err());
    }

    #[test]
    fn load_cached_reads_the_source_once() {
        let factory = factory();
        let reads = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let reads = reads.clone();
            // Detection fails on these bytes but the blob stays cached.
            let _ = factory.load_cached("book-1", move || {
                reads.fetch_add(1, Ordering::SeqCst);
                Ok(b"not a book".to_vec())
            });
        }
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(factory.blobs().len(), 1);

        factory.evict("book-1");
        assert!(factory.blobs().is_empty());
    }
}
