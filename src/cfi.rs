//! EPUB Canonical Fragment Identifiers
//!
//! Minimal CFI support for the renderer surface: parsing persisted
//! `epubcfi(...)` strings, extracting the spine index for chapter
//! navigation, rendering back to string form, and document-order comparison
//! for sorting annotations.
//!
//! Format: `epubcfi(/6/4[chap01ref]!/4/2/1:42)`: element steps, an
//! indirection into the content document, and an optional character offset.
//! Assertions in brackets are accepted and preserved on element steps; the
//! temporal/spatial extensions of the full grammar are not needed here.
//!
//! Reference: <https://idpf.org/epub/linking/cfi/epub-cfi.html>

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One step in a CFI path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CfiStep {
    /// `/N`, optionally with an `[id]` assertion
    Element { index: u32, id: Option<String> },
    /// `!` steps into the referenced content document
    Indirection,
}

/// A parsed CFI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cfi {
    pub steps: Vec<CfiStep>,
    /// Trailing `:N` character offset
    pub character_offset: Option<u32>,
}

/// CFI parsing errors
#[derive(Debug, Error)]
pub enum CfiParseError {
    #[error("Empty CFI string")]
    Empty,

    #[error("CFI must be wrapped in epubcfi(...)")]
    MissingWrapper,

    #[error("Expected number at position {0}")]
    ExpectedNumber(usize),

    #[error("Unclosed bracket at position {0}")]
    UnclosedBracket(usize),

    #[error("Unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
}

impl Cfi {
    /// Parse an `epubcfi(...)` string. Range CFIs are accepted by reading
    /// the parent path and ignoring the range parts.
    pub fn parse(input: &str) -> Result<Self, CfiParseError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(CfiParseError::Empty);
        }
        let body = input
            .strip_prefix("epubcfi(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or(CfiParseError::MissingWrapper)?;
        // Range form: parent,start,end; the parent path is enough for
        // navigation and ordering.
        let path = body.split(',').next().unwrap_or(body);

        let mut steps = Vec::new();
        let mut character_offset = None;
        let bytes = path.as_bytes();
        let mut pos = 0;

        while pos < bytes.len() {
            match bytes[pos] {
                b'/' => {
                    pos += 1;
                    let start = pos;
                    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                        pos += 1;
                    }
                    if pos == start {
                        return Err(CfiParseError::ExpectedNumber(start));
                    }
                    let index: u32 = path[start..pos]
                        .parse()
                        .map_err(|_| CfiParseError::ExpectedNumber(start))?;
                    let id = if pos < bytes.len() && bytes[pos] == b'[' {
                        let close = path[pos..]
                            .find(']')
                            .ok_or(CfiParseError::UnclosedBracket(pos))?;
                        let id = path[pos + 1..pos + close].to_string();
                        pos += close + 1;
                        Some(id)
                    } else {
                        None
                    };
                    steps.push(CfiStep::Element { index, id });
                }
                b'!' => {
                    pos += 1;
                    steps.push(CfiStep::Indirection);
                }
                b':' => {
                    pos += 1;
                    let start = pos;
                    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                        pos += 1;
                    }
                    if pos == start {
                        return Err(CfiParseError::ExpectedNumber(start));
                    }
                    character_offset = Some(
                        path[start..pos]
                            .parse()
                            .map_err(|_| CfiParseError::ExpectedNumber(start))?,
                    );
                    // Trailing text assertion after the offset is ignored.
                    break;
                }
                other => return Err(CfiParseError::UnexpectedChar(other as char, pos)),
            }
        }

        if steps.is_empty() {
            return Err(CfiParseError::Empty);
        }
        Ok(Self {
            steps,
            character_offset,
        })
    }

    /// Spine index referenced by this CFI, when it follows the standard
    /// `/6/N` package form. CFI uses 1-based even child numbering, so
    /// `/6/4` is spine index 1.
    pub fn spine_index(&self) -> Option<usize> {
        match (self.steps.first(), self.steps.get(1)) {
            (
                Some(CfiStep::Element { index: 6, .. }),
                Some(CfiStep::Element { index: n, .. }),
            ) => Some((*n as usize / 2).saturating_sub(1)),
            _ => None,
        }
    }
}

impl fmt::Display for Cfi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epubcfi(")?;
        for step in &self.steps {
            match step {
                CfiStep::Element { index, id } => {
                    write!(f, "/{}", index)?;
                    if let Some(id) = id {
                        write!(f, "[{}]", id)?;
                    }
                }
                CfiStep::Indirection => write!(f, "!")?,
            }
        }
        if let Some(offset) = self.character_offset {
            write!(f, ":{}", offset)?;
        }
        write!(f, ")")
    }
}

impl FromStr for Cfi {
    type Err = CfiParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Ord for Cfi {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.steps.iter().zip(other.steps.iter()) {
            let step_cmp = match (a, b) {
                (CfiStep::Indirection, CfiStep::Indirection) => Ordering::Equal,
                (CfiStep::Element { index: a, .. }, CfiStep::Element { index: b, .. }) => a.cmp(b),
                // Indirection marks a document boundary; it sorts before
                // sibling element steps.
                (CfiStep::Indirection, CfiStep::Element { .. }) => Ordering::Less,
                (CfiStep::Element { .. }, CfiStep::Indirection) => Ordering::Greater,
            };
            if step_cmp != Ordering::Equal {
                return step_cmp;
            }
        }
        self.steps
            .len()
            .cmp(&other.steps.len())
            .then_with(|| self.character_offset.cmp(&other.character_offset))
    }
}

impl PartialOrd for Cfi {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Reading-order comparison of two CFI strings. Unparseable inputs sort as
/// equal so callers can feed persisted strings without prevalidation.
pub fn compare_cfi_strings(a: &str, b: &str) -> Ordering {
    match (Cfi::parse(a), Cfi::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => Ordering::Equal,
    }
}
