//! Document loader and format detection
//!
//! Detects the concrete book format from file bytes, container signature
//! first, extension fallback second, and dispatches to the matching parser
//! to produce the generic [`ParsedBook`] consumed by the reflowable
//! renderer. PDF is identified here but parsed by the fixed-raster
//! backend's rasterizer.

mod cbz;
mod epub;
mod fb2;
mod mobi;

pub use epub::parse_epub;
pub use cbz::parse_cbz;
pub use fb2::{parse_fb2, parse_fbz};
pub use mobi::parse_mobi;

use std::io::Cursor;

use serde::{Deserialize, Serialize};
use tracing::debug;
use zip::ZipArchive;

use crate::engine::{ParsedBook, RenderError, Result};

/// ZIP local-file-header signature
const ZIP_MAGIC: &[u8] = &[0x50, 0x4B, 0x03, 0x04];

/// PDF signature `%PDF-`
const PDF_MAGIC: &[u8] = &[0x25, 0x50, 0x44, 0x46, 0x2D];

/// Supported book formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    Epub,
    Pdf,
    Mobi,
    Azw,
    Azw3,
    Cbz,
    Fb2,
    Fbz,
}

/// Which renderer backend handles a format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererKind {
    Reflowable,
    FixedRaster,
}

impl BookFormat {
    pub fn renderer_kind(&self) -> RendererKind {
        match self {
            BookFormat::Pdf => RendererKind::FixedRaster,
            _ => RendererKind::Reflowable,
        }
    }

    /// Detect format from a file extension (the fallback path).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "epub" => Some(Self::Epub),
            "pdf" => Some(Self::Pdf),
            "mobi" => Some(Self::Mobi),
            "azw" => Some(Self::Azw),
            "azw3" => Some(Self::Azw3),
            "cbz" => Some(Self::Cbz),
            "fb2" => Some(Self::Fb2),
            "fbz" | "fb2.zip" => Some(Self::Fbz),
            _ => None,
        }
    }
}

/// Detect the book format, container signature first, extension second.
pub fn detect_format(bytes: &[u8], filename: Option<&str>) -> Result<BookFormat> {
    if let Some(format) = sniff_container(bytes) {
        return Ok(format);
    }
    let by_extension = filename.and_then(|name| {
        let lower = name.to_lowercase();
        // Double extension first: rsplit would only see "zip".
        if lower.ends_with(".fb2.zip") {
            return Some(BookFormat::Fbz);
        }
        lower.rsplit('.').next().and_then(BookFormat::from_extension)
    });
    if let Some(format) = by_extension {
        debug!(?format, "format resolved by extension fallback");
        return Ok(format);
    }
    Err(RenderError::UnsupportedFormat(
        filename.unwrap_or("<bytes>").to_string(),
    ))
}

/// Container-signature detection. Returns `None` when no signature matches
/// unambiguously, leaving the decision to the extension fallback.
fn sniff_container(bytes: &[u8]) -> Option<BookFormat> {
    if bytes.starts_with(PDF_MAGIC) {
        return Some(BookFormat::Pdf);
    }

    if bytes.starts_with(ZIP_MAGIC) {
        return sniff_zip(bytes);
    }

    // PalmDB: type/creator at offset 60.
    if bytes.len() >= 68 {
        let type_creator = &bytes[60..68];
        if type_creator == b"BOOKMOBI" || type_creator == b"TEXtREAd" {
            return Some(BookFormat::Mobi);
        }
        if &type_creator[..3] == b"TPZ" {
            return Some(BookFormat::Azw3);
        }
    }

    // Bare FB2 is plain XML with a FictionBook root.
    let head = &bytes[..bytes.len().min(512)];
    if head.starts_with(b"<?xml") || head.starts_with(&[0xEF, 0xBB, 0xBF]) {
        if let Ok(s) = std::str::from_utf8(head) {
            if s.contains("<FictionBook") {
                return Some(BookFormat::Fb2);
            }
        }
    }

    None
}

/// Distinguish the ZIP-based containers by inspecting entries.
fn sniff_zip(bytes: &[u8]) -> Option<BookFormat> {
    // Fast path: EPUB stores an uncompressed `mimetype` entry first, so the
    // media type is visible in the leading bytes.
    if let Ok(head) = std::str::from_utf8(&bytes[..bytes.len().min(128)]) {
        if head.contains("application/epub+zip") {
            return Some(BookFormat::Epub);
        }
    }

    let mut archive = ZipArchive::new(Cursor::new(bytes)).ok()?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();

    if names.iter().any(|n| n == "mimetype") {
        if let Ok(mut entry) = archive.by_name("mimetype") {
            let mut mime = String::new();
            use std::io::Read;
            if entry.read_to_string(&mut mime).is_ok() && mime.contains("epub") {
                return Some(BookFormat::Epub);
            }
        }
    }
    if names.iter().any(|n| n.ends_with("container.xml")) {
        return Some(BookFormat::Epub);
    }
    if names.iter().any(|n| n.to_lowercase().ends_with(".fb2")) {
        return Some(BookFormat::Fbz);
    }
    let images = names.iter().filter(|n| is_image_name(n)).count();
    if images > 0 && images == names.iter().filter(|n| !n.ends_with('/')).count() {
        return Some(BookFormat::Cbz);
    }
    None
}

pub(crate) fn is_image_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    [".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

/// A loaded document, routed to its renderer backend
pub enum LoadedBook {
    /// Parsed book object for the reflowable renderer
    Reflowable {
        format: BookFormat,
        book: Box<ParsedBook>,
    },
    /// Raw container bytes for the fixed-raster renderer
    FixedRaster {
        format: BookFormat,
        bytes: Vec<u8>,
    },
}

impl LoadedBook {
    pub fn format(&self) -> BookFormat {
        match self {
            LoadedBook::Reflowable { format, .. } => *format,
            LoadedBook::FixedRaster { format, .. } => *format,
        }
    }
}

/// Detect the format and dispatch to the matching parser.
pub fn load(bytes: &[u8], filename: Option<&str>) -> Result<LoadedBook> {
    let format = detect_format(bytes, filename)?;
    debug!(?format, len = bytes.len(), "loading document");
    let book = match format {
        BookFormat::Pdf => {
            return Ok(LoadedBook::FixedRaster {
                format,
                bytes: bytes.to_vec(),
            })
        }
        BookFormat::Epub => parse_epub(bytes)?,
        BookFormat::Cbz => parse_cbz(bytes)?,
        BookFormat::Fb2 => parse_fb2(bytes)?,
        BookFormat::Fbz => parse_fbz(bytes)?,
        BookFormat::Mobi | BookFormat::Azw | BookFormat::Azw3 => parse_mobi(bytes)?,
    };
    Ok(LoadedBook::Reflowable {
        format,
        book: Box::new(book),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    pub(crate) fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            for (name, data) in entries {
                let options = if *name == "mimetype" {
                    SimpleFileOptions::default()
                        .compression_method(zip::CompressionMethod::Stored)
                } else {
                    SimpleFileOptions::default()
                };
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn detects_pdf_by_signature() {
        let bytes = b"%PDF-1.7\n...".to_vec();
        assert_eq!(detect_format(&bytes, None).unwrap(), BookFormat::Pdf);
    }

    #[test]
    fn detects_epub_by_mimetype_entry() {
        let bytes = zip_bytes(&[("mimetype", b"application/epub+zip")]);
        assert_eq!(detect_format(&bytes, None).unwrap(), BookFormat::Epub);
    }

    #[test]
    fn detects_cbz_by_image_entries() {
        let bytes = zip_bytes(&[("001.jpg", b"x"), ("002.png", b"y")]);
        assert_eq!(detect_format(&bytes, None).unwrap(), BookFormat::Cbz);
    }

    #[test]
    fn detects_zipped_fb2() {
        let bytes = zip_bytes(&[("book.fb2", b"<FictionBook/>")]);
        assert_eq!(detect_format(&bytes, None).unwrap(), BookFormat::Fbz);
    }

    #[test]
    fn detects_bare_fb2_by_root_element() {
        let bytes = b"<?xml version=\"1.0\"?>\n<FictionBook>".to_vec();
        assert_eq!(detect_format(&bytes, None).unwrap(), BookFormat::Fb2);
    }

    #[test]
    fn detects_mobi_by_palm_header() {
        let mut bytes = vec![0u8; 80];
        bytes[60..68].copy_from_slice(b"BOOKMOBI");
        assert_eq!(detect_format(&bytes, None).unwrap(), BookFormat::Mobi);
    }

    #[test]
    fn detects_topaz_by_palm_header() {
        // Topaz databases carry a bare "TPZ" type, some a versioned "TPZ3".
        for type_creator in [b"TPZ\0\0\0\0\0", b"TPZ3\0\0\0\0"] {
            let mut bytes = vec![0u8; 80];
            bytes[60..68].copy_from_slice(type_creator);
            assert_eq!(detect_format(&bytes, None).unwrap(), BookFormat::Azw3);
        }
    }

    #[test]
    fn extension_fallback_when_no_signature() {
        let bytes = vec![0u8; 16];
        assert_eq!(
            detect_format(&bytes, Some("book.azw3")).unwrap(),
            BookFormat::Azw3
        );
        assert_eq!(
            detect_format(&bytes, Some("book.fb2.zip")).unwrap(),
            BookFormat::Fbz
        );
        assert_eq!(
            detect_format(&bytes, Some("BOOK.FB2.ZIP")).unwrap(),
            BookFormat::Fbz
        );
        assert!(detect_format(&bytes, Some("book.txt")).is_err());
        assert!(detect_format(&bytes, None).is_err());
    }

    #[test]
    fn signature_wins_over_extension() {
        let bytes = b"%PDF-1.4".to_vec();
        assert_eq!(
            detect_format(&bytes, Some("mislabeled.epub")).unwrap(),
            BookFormat::Pdf
        );
    }

    #[test]
    fn renderer_kinds() {
        assert_eq!(BookFormat::Pdf.renderer_kind(), RendererKind::FixedRaster);
        for f in [
            BookFormat::Epub,
            BookFormat::Mobi,
            BookFormat::Azw,
            BookFormat::Azw3,
            BookFormat::Cbz,
            BookFormat::Fb2,
            BookFormat::Fbz,
        ] {
            assert_eq!(f.renderer_kind(), RendererKind::Reflowable);
        }
    }
}
