//! MuPDF-backed page rasterizer
//!
//! Default [`PageRasterizer`] for the fixed-raster renderer, enabled by the
//! `mupdf-raster` feature. A document is reopened from the retained source
//! bytes per call; MuPDF contexts are not shared across threads and the
//! renderer invokes this seam from the blocking pool.

use mupdf::{Colorspace, Document, Matrix, TextPageOptions};
use parking_lot::Mutex;
use tracing::debug;

use super::raster::{PageRasterizer, RasterPage, TextSpan};
use crate::engine::{Rect, RenderError, Result};

pub struct MupdfRasterizer {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MupdfRasterizer {
    pub fn new() -> Self {
        Self {
            bytes: Mutex::new(None),
        }
    }

    fn document(&self) -> Result<Document> {
        let guard = self.bytes.lock();
        let bytes = guard
            .as_ref()
            .ok_or(RenderError::NotReady("no document open"))?;
        Document::from_bytes(bytes, "application/pdf")
            .map_err(|e| RenderError::RenderError(format!("mupdf open: {}", e)))
    }
}

impl Default for MupdfRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PageRasterizer for MupdfRasterizer {
    fn open(&self, bytes: &[u8]) -> Result<usize> {
        let document = Document::from_bytes(bytes, "application/pdf")
            .map_err(|e| RenderError::ParseError(format!("mupdf open: {}", e)))?;
        let count = document
            .page_count()
            .map_err(|e| RenderError::ParseError(format!("mupdf page count: {}", e)))?;
        if count <= 0 {
            return Err(RenderError::ParseError("document has no pages".into()));
        }
        *self.bytes.lock() = Some(bytes.to_vec());
        debug!(pages = count, "pdf document opened");
        Ok(count as usize)
    }

    fn page_size(&self, index: usize) -> Result<(f32, f32)> {
        let document = self.document()?;
        let page = document
            .load_page(index as i32)
            .map_err(|_| RenderError::ItemNotFound(index))?;
        let bounds = page
            .bounds()
            .map_err(|e| RenderError::RenderError(format!("page bounds: {}", e)))?;
        Ok((bounds.x1 - bounds.x0, bounds.y1 - bounds.y0))
    }

    fn rasterize(&self, index: usize, scale: f32) -> Result<RasterPage> {
        let document = self.document()?;
        let page = document
            .load_page(index as i32)
            .map_err(|_| RenderError::ItemNotFound(index))?;
        let matrix = Matrix::new_scale(scale, scale);
        let pixmap = page
            .to_pixmap(&matrix, &Colorspace::device_rgb(), 0.0, true)
            .map_err(|e| RenderError::RenderError(format!("rasterize page {}: {}", index, e)))?;

        let width = pixmap.width();
        let height = pixmap.height();
        let image = image::RgbImage::from_raw(width, height, pixmap.samples().to_vec())
            .ok_or_else(|| {
                RenderError::RenderError(format!("pixmap buffer mismatch on page {}", index))
            })?;
        let mut data = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut data), image::ImageFormat::Png)
            .map_err(|e| RenderError::RenderError(format!("encode page {}: {}", index, e)))?;

        Ok(RasterPage {
            width,
            height,
            data,
        })
    }

    fn text_spans(&self, index: usize) -> Result<Vec<TextSpan>> {
        let document = self.document()?;
        let page = document
            .load_page(index as i32)
            .map_err(|_| RenderError::ItemNotFound(index))?;
        let text_page = page
            .to_text_page(TextPageOptions::PRESERVE_WHITESPACE)
            .map_err(|e| RenderError::RenderError(format!("text page {}: {}", index, e)))?;

        // One span per text line, bounded by the union of its char quads.
        let mut spans = Vec::new();
        for block in text_page.blocks() {
            for line in block.lines() {
                let mut text = String::new();
                let (mut x0, mut y0) = (f32::MAX, f32::MAX);
                let (mut x1, mut y1) = (f32::MIN, f32::MIN);
                for ch in line.chars() {
                    if let Some(c) = ch.char() {
                        let quad = ch.quad();
                        x0 = x0.min(quad.ul.x.min(quad.ll.x));
                        y0 = y0.min(quad.ul.y.min(quad.ur.y));
                        x1 = x1.max(quad.ur.x.max(quad.lr.x));
                        y1 = y1.max(quad.ll.y.max(quad.lr.y));
                        text.push(c);
                    }
                }
                if !text.trim().is_empty() && x1 > x0 {
                    spans.push(TextSpan {
                        text,
                        rect: Rect::new(x0, y0, x1 - x0, y1 - y0),
                    });
                }
            }
        }
        Ok(spans)
    }

    fn close(&self) {
        *self.bytes.lock() = None;
    }
}
