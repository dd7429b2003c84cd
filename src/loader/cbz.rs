//! Comic book archive (CBZ) parser
//!
//! A CBZ is a ZIP of page images. Entries are ordered by name with
//! numeric-aware comparison so `page2` sorts before `page10`, and each
//! image becomes one section with a flat "Page N" table of contents.

use std::cmp::Ordering;
use std::io::{Cursor, Read};

use tracing::debug;
use uuid::Uuid;
use zip::ZipArchive;

use crate::engine::{
    BookMetadata, ParsedBook, ReadingDirection, RenderError, Result, Section, TocItem,
};
use crate::loader::is_image_name;

/// Parse a comic archive into one image section per page.
pub fn parse_cbz(bytes: &[u8]) -> Result<ParsedBook> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| !n.ends_with('/') && is_image_name(n))
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return Err(RenderError::InvalidContainer(
            "archive contains no page images".into(),
        ));
    }
    names.sort_by(|a, b| numeric_aware_cmp(a, b));

    let mut sections = Vec::with_capacity(names.len());
    let mut toc = Vec::with_capacity(names.len());
    for (index, name) in names.iter().enumerate() {
        let mut entry = archive.by_name(name)?;
        let mut content = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut content)?;
        let media_type = mime_guess::from_path(name)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string();
        sections.push(Section {
            href: name.clone(),
            media_type,
            content,
        });
        toc.push(TocItem {
            id: Uuid::new_v4().to_string(),
            title: format!("Page {}", index + 1),
            level: 0,
            href: Some(name.clone()),
            index: Some(index),
            subitems: vec![],
        });
    }

    debug!(pages = sections.len(), "cbz parsed");
    Ok(ParsedBook {
        metadata: BookMetadata {
            title: "Untitled".to_string(),
            ..BookMetadata::default()
        },
        rendition: None,
        dir: ReadingDirection::Ltr,
        toc,
        sections,
    })
}

/// Compare names so embedded numbers order numerically.
fn numeric_aware_cmp(a: &str, b: &str) -> Ordering {
    let mut a_chars = a.chars().peekable();
    let mut b_chars = b.chars().peekable();
    loop {
        match (a_chars.peek().copied(), b_chars.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) => {
                if ca.is_ascii_digit() && cb.is_ascii_digit() {
                    let na = take_number(&mut a_chars);
                    let nb = take_number(&mut b_chars);
                    match na.cmp(&nb) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                a_chars.next();
                b_chars.next();
                match ca.cmp(&cb) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
        }
    }
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> u64 {
    let mut value: u64 = 0;
    while let Some(c) = chars.peek().copied() {
        let Some(digit) = c.to_digit(10) else { break };
        value = value.saturating_mul(10).saturating_add(digit as u64);
        chars.next();
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::zip_bytes;

    #[test]
    fn pages_sorted_numerically() {
        let bytes = zip_bytes(&[
            ("page10.jpg", b"j"),
            ("page2.jpg", b"i"),
            ("page1.jpg", b"h"),
            ("thumbs/ignore.txt", b"t"),
        ]);
        let book = parse_cbz(&bytes).unwrap();
        assert_eq!(book.sections.len(), 3);
        assert_eq!(book.sections[0].href, "page1.jpg");
        assert_eq!(book.sections[1].href, "page2.jpg");
        assert_eq!(book.sections[2].href, "page10.jpg");
        assert_eq!(book.sections[0].media_type, "image/jpeg");
    }

    #[test]
    fn toc_is_one_entry_per_page() {
        let bytes = zip_bytes(&[("a.png", b"x"), ("b.png", b"y")]);
        let book = parse_cbz(&bytes).unwrap();
        assert_eq!(book.toc.len(), 2);
        assert_eq!(book.toc[0].title, "Page 1");
        assert_eq!(book.toc[1].index, Some(1));
    }

    #[test]
    fn no_images_is_a_load_failure() {
        let bytes = zip_bytes(&[("readme.txt", b"hi")]);
        assert!(parse_cbz(&bytes).unwrap_err().is_load_failure());
    }
}
