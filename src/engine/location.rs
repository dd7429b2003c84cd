//! Location and selection model
//!
//! Unifies the two addressing schemes behind one tagged type: CFI-based
//! addresses for reflowable content and page-coordinate addresses for
//! fixed-raster content. A `Location` produced by one renderer is never fed
//! to the other; the tag makes a mismatch detectable at the seam.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::types::Rect;

/// A position inside an open book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Location {
    /// Reflowable content, addressed by CFI
    #[serde(rename_all = "camelCase")]
    Cfi { cfi: String, chapter_index: usize },
    /// Fixed-raster content, addressed by page index and optional rect
    #[serde(rename_all = "camelCase")]
    PageCoord {
        page_index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        rect: Option<Rect>,
    },
}

impl Location {
    pub fn cfi(cfi: impl Into<String>, chapter_index: usize) -> Self {
        Location::Cfi {
            cfi: cfi.into(),
            chapter_index,
        }
    }

    pub fn page(page_index: usize) -> Self {
        Location::PageCoord {
            page_index,
            rect: None,
        }
    }

    /// Flat section/page index regardless of addressing scheme.
    pub fn index(&self) -> usize {
        match self {
            Location::Cfi { chapter_index, .. } => *chapter_index,
            Location::PageCoord { page_index, .. } => *page_index,
        }
    }

    /// Renderer-agnostic persisted string for this location.
    pub fn persist(&self) -> PersistedLocation {
        match self {
            Location::Cfi { cfi, chapter_index } => {
                if cfi.is_empty() {
                    PersistedLocation::Spine(*chapter_index)
                } else {
                    PersistedLocation::Cfi(cfi.clone())
                }
            }
            Location::PageCoord { page_index, .. } => PersistedLocation::Page(*page_index),
        }
    }
}

/// A captured text selection
///
/// Rects are always expressed in container space. `text` is non-empty and
/// trimmed; a collapsed native selection never produces one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub text: String,
    pub start: Location,
    pub end: Location,
    pub rects: Vec<Rect>,
}

impl Selection {
    /// Build a selection from raw captured text, rejecting collapsed or
    /// whitespace-only captures.
    pub fn from_capture(
        text: &str,
        start: Location,
        end: Location,
        rects: Vec<Rect>,
    ) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self {
            text: trimmed.to_string(),
            start,
            end,
            rects,
        })
    }
}

/// Renderer-agnostic persisted location string
///
/// Written by the caller on every `LocationChanged` and supplied back as the
/// initial location on the next open: a CFI string for reflowable content,
/// `page-{N}` for fixed-raster, `spine-{N}` as a last-resort fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PersistedLocation {
    Cfi(String),
    Page(usize),
    Spine(usize),
}

impl fmt::Display for PersistedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistedLocation::Cfi(cfi) => write!(f, "{}", cfi),
            PersistedLocation::Page(n) => write!(f, "page-{}", n),
            PersistedLocation::Spine(n) => write!(f, "spine-{}", n),
        }
    }
}

impl FromStr for PersistedLocation {
    type Err = InvalidLocationString;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(InvalidLocationString(s.to_string()));
        }
        if let Some(n) = s.strip_prefix("page-") {
            return n
                .parse()
                .map(PersistedLocation::Page)
                .map_err(|_| InvalidLocationString(s.to_string()));
        }
        if let Some(n) = s.strip_prefix("spine-") {
            return n
                .parse()
                .map(PersistedLocation::Spine)
                .map_err(|_| InvalidLocationString(s.to_string()));
        }
        if s.starts_with("epubcfi(") && s.ends_with(')') {
            return Ok(PersistedLocation::Cfi(s.to_string()));
        }
        Err(InvalidLocationString(s.to_string()))
    }
}

/// Error for unparseable persisted location strings
#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid persisted location: {0:?}")]
pub struct InvalidLocationString(pub String);

impl From<PersistedLocation> for String {
    fn from(loc: PersistedLocation) -> Self {
        loc.to_string()
    }
}

impl TryFrom<String> for PersistedLocation {
    type Error = InvalidLocationString;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_serde_tags() {
        let loc = Location::cfi("epubcfi(/6/4!/4/2)", 1);
        let json = serde_json::to_string(&loc).unwrap();
        assert!(json.contains("\"type\":\"cfi\""));
        assert!(json.contains("\"chapterIndex\":1"));

        let loc = Location::page(7);
        let json = serde_json::to_string(&loc).unwrap();
        assert!(json.contains("\"type\":\"page-coord\""));
        assert!(json.contains("\"pageIndex\":7"));
        assert!(!json.contains("rect"));
    }

    #[test]
    fn selection_rejects_collapsed() {
        assert!(Selection::from_capture("", Location::page(0), Location::page(0), vec![]).is_none());
        assert!(
            Selection::from_capture("   \n", Location::page(0), Location::page(0), vec![])
                .is_none()
        );
        let sel =
            Selection::from_capture("  hello  ", Location::page(0), Location::page(0), vec![])
                .unwrap();
        assert_eq!(sel.text, "hello");
    }

    #[test]
    fn persisted_round_trip() {
        for s in ["epubcfi(/6/4!/4/2/1:42)", "page-12", "spine-3"] {
            let parsed: PersistedLocation = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
    }

    #[test]
    fn persisted_rejects_garbage() {
        assert!("".parse::<PersistedLocation>().is_err());
        assert!("page-".parse::<PersistedLocation>().is_err());
        assert!("chapter-3".parse::<PersistedLocation>().is_err());
        assert!("epubcfi(".parse::<PersistedLocation>().is_err());
    }

    #[test]
    fn persist_falls_back_to_spine() {
        let loc = Location::cfi("", 4);
        assert_eq!(loc.persist(), PersistedLocation::Spine(4));
        let loc = Location::cfi("epubcfi(/6/10)", 4);
        assert_eq!(loc.persist(), PersistedLocation::Cfi("epubcfi(/6/10)".into()));
        assert_eq!(Location::page(9).persist(), PersistedLocation::Page(9));
    }
}
