//! FictionBook (FB2) parser
//!
//! FB2 is a single XML document: `<description>` carries metadata,
//! `<body>` holds the sections. Metadata is deserialized; sections are
//! captured as raw XML slices so the reflowable engine can lay them out
//! without a second parse here.

use std::io::{Cursor, Read};

use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;
use zip::ZipArchive;

use crate::engine::{
    BookMetadata, ParsedBook, ReadingDirection, RenderError, Result, Section, TocItem,
};

const FB2_SECTION_MEDIA_TYPE: &str = "application/x-fictionbook+xml";

/// Parse a bare FB2 document.
pub fn parse_fb2(bytes: &[u8]) -> Result<ParsedBook> {
    let text = String::from_utf8_lossy(bytes);
    if !text.contains("<FictionBook") {
        return Err(RenderError::ParseError("not a FictionBook document".into()));
    }

    let metadata = parse_description(&text);
    let raw_sections = collect_sections(&text)?;
    if raw_sections.is_empty() {
        return Err(RenderError::ParseError("document body has no sections".into()));
    }

    let mut toc = Vec::with_capacity(raw_sections.len());
    let mut sections = Vec::with_capacity(raw_sections.len());
    for (index, raw) in raw_sections.iter().enumerate() {
        let href = format!("section-{}", index);
        let title = section_title(raw).unwrap_or_else(|| format!("Chapter {}", index + 1));
        toc.push(TocItem {
            id: Uuid::new_v4().to_string(),
            title,
            level: 0,
            href: Some(href.clone()),
            index: Some(index),
            subitems: vec![],
        });
        sections.push(Section {
            href,
            media_type: FB2_SECTION_MEDIA_TYPE.to_string(),
            content: raw.as_bytes().to_vec(),
        });
    }

    debug!(sections = sections.len(), title = %metadata.title, "fb2 parsed");
    Ok(ParsedBook {
        metadata,
        rendition: None,
        dir: ReadingDirection::Ltr,
        toc,
        sections,
    })
}

/// Parse a zipped FB2 (`.fbz` / `.fb2.zip`): unwrap the archive's first
/// `.fb2` entry and parse it as a bare document.
pub fn parse_fbz(bytes: &[u8]) -> Result<ParsedBook> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let name = archive
        .file_names()
        .find(|n| n.to_lowercase().ends_with(".fb2"))
        .map(str::to_string)
        .ok_or_else(|| RenderError::InvalidContainer("archive contains no .fb2 entry".into()))?;
    let mut entry = archive.by_name(&name)?;
    let mut inner = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut inner)?;
    parse_fb2(&inner)
}

fn parse_description(text: &str) -> BookMetadata {
    let book: FictionBook = match from_str(text) {
        Ok(book) => book,
        Err(err) => {
            warn!(%err, "description unreadable, using empty metadata");
            FictionBook { description: None }
        }
    };
    let Some(info) = book.description.and_then(|d| d.title_info) else {
        return BookMetadata {
            title: "Untitled".to_string(),
            ..BookMetadata::default()
        };
    };

    BookMetadata {
        title: info
            .book_title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string()),
        creators: info.author.iter().filter_map(Author::full_name).collect(),
        publisher: None,
        language: info.lang.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()),
        identifier: None,
        description: None,
        subjects: info
            .genre
            .into_iter()
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect(),
    }
}

/// Raw XML of each top-level `<section>` in the main `<body>`. Named bodies
/// (footnotes, comments) are skipped.
fn collect_sections(text: &str) -> Result<Vec<&str>> {
    let mut reader = Reader::from_str(text);
    let mut sections = Vec::new();
    let mut in_main_body = false;
    let mut depth_in_body: usize = 0;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"body" && !in_main_body => {
                let named = e
                    .attributes()
                    .flatten()
                    .any(|a| a.key.as_ref() == b"name");
                if named {
                    reader.read_to_end(e.name()).map_err(parse_err)?;
                } else {
                    in_main_body = true;
                    depth_in_body = 0;
                }
            }
            Ok(Event::Start(e)) if in_main_body => {
                if e.local_name().as_ref() == b"section" && depth_in_body == 0 {
                    // Inner XML of the section, nested subsections included.
                    let span = reader.read_to_end(e.name()).map_err(parse_err)?;
                    sections.push(&text[span]);
                } else {
                    depth_in_body += 1;
                }
            }
            Ok(Event::End(e)) if in_main_body => {
                if e.local_name().as_ref() == b"body" {
                    break;
                }
                depth_in_body = depth_in_body.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(parse_err(err)),
            _ => {}
        }
    }
    Ok(sections)
}

fn parse_err(err: quick_xml::Error) -> RenderError {
    RenderError::ParseError(format!("malformed FictionBook XML: {}", err))
}

/// First `<title>` text inside a section's raw XML, paragraphs joined with
/// spaces.
fn section_title(raw: &str) -> Option<String> {
    let mut reader = Reader::from_str(raw);
    reader.trim_text(true);
    let mut in_title = false;
    let mut parts: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"title" => in_title = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"title" && in_title => break,
            Ok(Event::Start(e)) if !in_title && e.local_name().as_ref() == b"section" => {
                // Titles of nested subsections don't name the parent.
                reader.read_to_end(e.name()).ok()?;
            }
            Ok(Event::Text(t)) if in_title => {
                if let Ok(text) = t.unescape() {
                    let text = text.trim().to_string();
                    if !text.is_empty() {
                        parts.push(text);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }
    let title = parts.join(" ");
    (!title.is_empty()).then_some(title)
}

// Description structures; the body is ignored by the deserializer.

#[derive(Debug, Deserialize)]
struct FictionBook {
    #[serde(default)]
    description: Option<Description>,
}

#[derive(Debug, Deserialize)]
struct Description {
    #[serde(rename = "title-info", default)]
    title_info: Option<TitleInfo>,
}

#[derive(Debug, Deserialize)]
struct TitleInfo {
    #[serde(rename = "book-title", default)]
    book_title: Option<String>,
    #[serde(default)]
    author: Vec<Author>,
    #[serde(default)]
    genre: Vec<String>,
    #[serde(default)]
    lang: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Author {
    #[serde(rename = "first-name", default)]
    first_name: Option<String>,
    #[serde(rename = "middle-name", default)]
    middle_name: Option<String>,
    #[serde(rename = "last-name", default)]
    last_name: Option<String>,
    #[serde(default)]
    nickname: Option<String>,
}

impl Author {
    fn full_name(&self) -> Option<String> {
        let name = [&self.first_name, &self.middle_name, &self.last_name]
            .into_iter()
            .flatten()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !name.is_empty() {
            return Some(name);
        }
        self.nickname
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::zip_bytes;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<FictionBook xmlns="http://www.gribuser.ru/xml/fictionbook/2.0">
  <description>
    <title-info>
      <genre>sf</genre>
      <author>
        <first-name>Arkady</first-name>
        <last-name>Strugatsky</last-name>
      </author>
      <author>
        <nickname>anon42</nickname>
      </author>
      <book-title>Roadside Picnic</book-title>
      <lang>en</lang>
    </title-info>
  </description>
  <body>
    <title><p>Roadside Picnic</p></title>
    <section>
      <title><p>Chapter</p><p>One</p></title>
      <p>First paragraph.</p>
      <section><title><p>Nested</p></title><p>inner</p></section>
    </section>
    <section>
      <p>No title here.</p>
    </section>
  </body>
  <body name="notes">
    <section><p>footnote</p></section>
  </body>
</FictionBook>"#;

    #[test]
    fn parses_title_info() {
        let book = parse_fb2(SAMPLE.as_bytes()).unwrap();
        assert_eq!(book.metadata.title, "Roadside Picnic");
        assert_eq!(
            book.metadata.creators,
            vec!["Arkady Strugatsky", "anon42"]
        );
        assert_eq!(book.metadata.language.as_deref(), Some("en"));
        assert_eq!(book.metadata.subjects, vec!["sf"]);
    }

    #[test]
    fn sections_come_from_main_body_only() {
        let book = parse_fb2(SAMPLE.as_bytes()).unwrap();
        assert_eq!(book.sections.len(), 2);
        let first = std::str::from_utf8(&book.sections[0].content).unwrap();
        assert!(first.contains("First paragraph."));
        assert!(first.contains("<section>"));
        assert!(!first.contains("footnote"));
    }

    #[test]
    fn toc_titles_with_fallback() {
        let book = parse_fb2(SAMPLE.as_bytes()).unwrap();
        assert_eq!(book.toc[0].title, "Chapter One");
        assert_eq!(book.toc[1].title, "Chapter 2");
        assert_eq!(book.toc[1].index, Some(1));
    }

    #[test]
    fn zipped_fb2_unwraps() {
        let bytes = zip_bytes(&[("cover.png", b"img"), ("book.fb2", SAMPLE.as_bytes())]);
        let book = parse_fbz(&bytes).unwrap();
        assert_eq!(book.metadata.title, "Roadside Picnic");
    }

    #[test]
    fn empty_body_is_a_load_failure() {
        let doc = r#"<FictionBook><body></body></FictionBook>"#;
        let err = parse_fb2(doc.as_bytes()).unwrap_err();
        assert!(err.is_load_failure());
    }
}
