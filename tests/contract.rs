//! Contract tests: both renderer backends observed purely through the
//! `BookRenderer` trait, with mock engine/rasterizer seams.

use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use folio_engine::engine::{
    BookRenderer, BookSource, EventKind, ListenerId, Location, OpenOptions, ParsedBook,
    PersistedLocation, ProgressTracker, Rect, RendererEvent, Result, ViewSettings, Viewport,
};
use folio_engine::loader::{detect_format, BookFormat};
use folio_engine::renderers::{
    EnginePosition, EngineSelection, EngineTarget, FrameTransform, PageRasterizer, RasterPage,
    ReflowEngine, RendererFactory, TextSpan,
};

/// Route renderer tracing through the test harness. `RUST_LOG` controls
/// verbosity; later calls are no-ops.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Mock seams

#[derive(Default)]
struct MockEngine {
    state: Mutex<MockEngineState>,
}

#[derive(Default)]
struct MockEngineState {
    book: Option<Arc<ParsedBook>>,
    index: usize,
}

impl MockEngine {
    fn position(index: usize) -> EnginePosition {
        EnginePosition {
            cfi: format!("epubcfi(/6/{}!/4/2)", (index + 1) * 2),
            chapter_index: index,
        }
    }
}

impl ReflowEngine for MockEngine {
    fn load(&self, book: Arc<ParsedBook>, _viewport: Viewport) -> Result<()> {
        self.state.lock().book = Some(book);
        Ok(())
    }

    fn display(&self, target: &EngineTarget) -> Result<EnginePosition> {
        let mut state = self.state.lock();
        let total = state.book.as_ref().map_or(0, |b| b.section_count());
        let index = match target {
            EngineTarget::Index(i) => *i,
            EngineTarget::Cfi(cfi) => folio_engine::cfi::Cfi::parse(cfi)
                .ok()
                .and_then(|c| c.spine_index())
                .unwrap_or(0),
            EngineTarget::Href(href) => state
                .book
                .as_ref()
                .and_then(|b| b.section_index_for_href(href))
                .unwrap_or(0),
        };
        state.index = index.min(total.saturating_sub(1));
        Ok(Self::position(state.index))
    }

    fn next(&self) -> Result<Option<EnginePosition>> {
        let mut state = self.state.lock();
        let total = state.book.as_ref().map_or(0, |b| b.section_count());
        if state.index + 1 >= total {
            return Ok(None);
        }
        state.index += 1;
        Ok(Some(Self::position(state.index)))
    }

    fn prev(&self) -> Result<Option<EnginePosition>> {
        let mut state = self.state.lock();
        if state.index == 0 {
            return Ok(None);
        }
        state.index -= 1;
        Ok(Some(Self::position(state.index)))
    }

    fn current(&self) -> Option<EnginePosition> {
        Some(Self::position(self.state.lock().index))
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

struct MockRasterizer {
    pages: usize,
}

impl PageRasterizer for MockRasterizer {
    fn open(&self, _bytes: &[u8]) -> Result<usize> {
        Ok(self.pages)
    }

    fn page_size(&self, _index: usize) -> Result<(f32, f32)> {
        Ok((612.0, 792.0))
    }

    fn rasterize(&self, _index: usize, scale: f32) -> Result<RasterPage> {
        Ok(RasterPage {
            width: (612.0 * scale) as u32,
            height: (792.0 * scale) as u32,
            data: vec![0; 4],
        })
    }

    fn text_spans(&self, _index: usize) -> Result<Vec<TextSpan>> {
        Ok(Vec::new())
    }

    fn close(&self) {}
}

fn factory() -> RendererFactory {
    init_tracing();
    RendererFactory::new(|| Arc::new(MockEngine::default()))
        .with_rasterizer(|| Arc::new(MockRasterizer { pages: 24 }))
}

// Fixtures

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        for (name, data) in entries {
            let options = if *name == "mimetype" {
                zip::write::SimpleFileOptions::default()
                    .compression_method(zip::CompressionMethod::Stored)
            } else {
                zip::write::SimpleFileOptions::default()
            };
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

fn sample_epub() -> Vec<u8> {
    let container = br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;
    let opf = br#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" xmlns:dc="http://purl.org/dc/elements/1.1/" version="3.0">
  <metadata><dc:title>Contract Fixture</dc:title></metadata>
  <manifest>
    <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch2" href="ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch3" href="ch3.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="ch1"/>
    <itemref idref="ch2"/>
    <itemref idref="ch3"/>
  </spine>
</package>"#;
    zip_bytes(&[
        ("mimetype", b"application/epub+zip"),
        ("META-INF/container.xml", container),
        ("OEBPS/content.opf", opf),
        ("OEBPS/ch1.xhtml", b"<html><body>one</body></html>"),
        ("OEBPS/ch2.xhtml", b"<html><body>two</body></html>"),
        ("OEBPS/ch3.xhtml", b"<html><body>three</body></html>"),
    ])
}

fn collect(renderer: &dyn BookRenderer, kind: EventKind) -> Arc<Mutex<Vec<RendererEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    renderer.on(
        kind,
        ListenerId::next(),
        Box::new(move |event| sink.lock().push(event.clone())),
    );
    events
}

async fn open_renderer(
    factory: &RendererFactory,
    format: BookFormat,
    bytes: Vec<u8>,
    options: OpenOptions,
) -> Arc<dyn BookRenderer> {
    let renderer = factory.create(format).unwrap();
    renderer.mount(Viewport::default());
    renderer.open(BookSource::Bytes(bytes), options).await;
    renderer
}

// Tests

#[tokio::test]
async fn reflowable_end_to_end_through_the_trait() {
    let factory = factory();
    let bytes = sample_epub();
    let format = detect_format(&bytes, None).unwrap();
    assert_eq!(format, BookFormat::Epub);

    let renderer = factory.create(format).unwrap();
    renderer.mount(Viewport::default());
    let locations = collect(renderer.as_ref(), EventKind::LocationChanged);
    let tocs = collect(renderer.as_ref(), EventKind::TocReady);
    renderer
        .open(BookSource::Bytes(bytes), OpenOptions::default())
        .await;

    assert_eq!(renderer.total_pages(), 3);
    assert_eq!(tocs.lock().len(), 1);
    assert_eq!(locations.lock().len(), 1);

    renderer.next().await;
    renderer.next().await;
    renderer.next().await; // already at the last section
    assert_eq!(renderer.current_location().unwrap().index(), 2);
    assert_eq!(locations.lock().len(), 3);
    assert!((renderer.progress() - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn reflowable_location_round_trips_through_persistence() {
    let factory = factory();
    let first = open_renderer(
        &factory,
        BookFormat::Epub,
        sample_epub(),
        OpenOptions::default(),
    )
    .await;
    first.go_to_index(1).await;
    let persisted = first.current_location().unwrap().persist();
    assert!(matches!(persisted, PersistedLocation::Cfi(_)));
    first.destroy().await;

    let second = open_renderer(
        &factory,
        BookFormat::Epub,
        sample_epub(),
        OpenOptions {
            initial_location: Some(persisted),
            ..OpenOptions::default()
        },
    )
    .await;
    assert_eq!(second.current_location().unwrap().index(), 1);
}

#[tokio::test]
async fn raster_location_round_trips_through_persistence() {
    let factory = factory();
    let first = open_renderer(
        &factory,
        BookFormat::Pdf,
        vec![0u8; 16],
        OpenOptions::default(),
    )
    .await;
    first.go_to_index(7).await;
    let persisted = first.current_location().unwrap().persist();
    assert_eq!(persisted, PersistedLocation::Page(7));
    assert_eq!(persisted.to_string(), "page-7");
    first.destroy().await;

    let second = open_renderer(
        &factory,
        BookFormat::Pdf,
        vec![0u8; 16],
        OpenOptions {
            initial_location: Some("page-7".parse().unwrap()),
            ..OpenOptions::default()
        },
    )
    .await;
    assert_eq!(second.current_location().unwrap().index(), 7);
}

#[tokio::test]
async fn listener_registration_is_idempotent_across_the_trait() {
    let factory = factory();
    let renderer = open_renderer(
        &factory,
        BookFormat::Pdf,
        vec![0u8; 16],
        OpenOptions::default(),
    )
    .await;

    let hits = Arc::new(AtomicUsize::new(0));
    let id = ListenerId::next();
    for _ in 0..3 {
        let hits = hits.clone();
        renderer.on(
            EventKind::LocationChanged,
            id,
            Box::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }
    renderer.next().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    renderer.off(EventKind::LocationChanged, id);
    renderer.next().await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn destroy_contract_holds_for_both_backends() {
    let factory = factory();
    let reflowable = open_renderer(
        &factory,
        BookFormat::Epub,
        sample_epub(),
        OpenOptions::default(),
    )
    .await;
    let raster = open_renderer(
        &factory,
        BookFormat::Pdf,
        vec![0u8; 16],
        OpenOptions::default(),
    )
    .await;

    for renderer in [reflowable, raster] {
        let locations = collect(renderer.as_ref(), EventKind::LocationChanged);
        renderer.destroy().await;
        renderer.destroy().await;

        renderer.next().await;
        renderer.go_to_index(1).await;
        renderer.handle_click(700.0, 300.0).await;
        renderer.tick(Instant::now()).await;
        renderer.resize(1024.0, 768.0).await;
        assert!(renderer.current_location().is_none());
        assert_eq!(renderer.total_pages(), 0);
        assert!(locations.lock().is_empty());
    }
}

#[tokio::test]
async fn failed_open_emits_exactly_one_failure() {
    let factory = factory();
    let renderer = factory.create(BookFormat::Epub).unwrap();
    renderer.mount(Viewport::default());
    let failures = collect(renderer.as_ref(), EventKind::Failed);

    renderer
        .open(
            BookSource::Bytes(b"PK\x03\x04corrupt".to_vec()),
            OpenOptions::default(),
        )
        .await;
    assert_eq!(failures.lock().len(), 1);
    assert!(renderer.current_location().is_none());
}

#[tokio::test]
async fn progress_persists_once_per_burst_with_final_flush() {
    let factory = factory();
    let renderer = open_renderer(
        &factory,
        BookFormat::Pdf,
        vec![0u8; 16],
        OpenOptions::default(),
    )
    .await;

    let writes = Arc::new(Mutex::new(Vec::new()));
    let sink = writes.clone();
    let tracker = Arc::new(ProgressTracker::new(Arc::new(move |location, progress| {
        sink.lock().push((location.to_string(), progress));
    })));

    let feed = tracker.clone();
    renderer.on(
        EventKind::LocationChanged,
        ListenerId::next(),
        Box::new(move |event| {
            if let RendererEvent::LocationChanged { location, progress } = event {
                feed.record(location.persist(), *progress, Instant::now());
            }
        }),
    );

    for _ in 0..5 {
        renderer.next().await;
    }
    tracker.tick(Instant::now());
    assert!(writes.lock().is_empty());

    tracker.tick(Instant::now() + Duration::from_secs(6));
    {
        let writes = writes.lock();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, "page-5");
    }

    renderer.next().await;
    tracker.flush();
    assert_eq!(writes.lock().last().unwrap().0, "page-6");
}

#[tokio::test]
async fn blob_cache_skips_rereads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.epub");
    std::fs::write(&path, sample_epub()).unwrap();

    let factory = factory();
    let reads = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let reads = reads.clone();
        let path = path.clone();
        let loaded = factory
            .load_cached("fixture", move || {
                reads.fetch_add(1, Ordering::SeqCst);
                std::fs::read(&path)
            })
            .unwrap();
        assert_eq!(loaded.format(), BookFormat::Epub);
    }
    assert_eq!(reads.load(Ordering::SeqCst), 1);

    factory.evict("fixture");
    let reads_now = reads.clone();
    let path = path.clone();
    factory
        .load_cached("fixture", move || {
            reads_now.fetch_add(1, Ordering::SeqCst);
            std::fs::read(&path)
        })
        .unwrap();
    assert_eq!(reads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn raster_page_turns_reach_the_document_edges() {
    let factory = factory();
    let renderer = open_renderer(
        &factory,
        BookFormat::Pdf,
        vec![0u8; 16],
        OpenOptions::default(),
    )
    .await;
    assert_eq!(renderer.total_pages(), 24);

    renderer.prev().await; // clamped at the first page
    assert_eq!(renderer.current_location().unwrap().index(), 0);

    renderer.go_to_index(500).await; // clamped at the last page
    assert_eq!(renderer.current_location().unwrap().index(), 23);
    renderer.next().await;
    assert_eq!(renderer.current_location().unwrap().index(), 23);

    let location = renderer.current_location().unwrap();
    assert_eq!(location, Location::page(23));
}
