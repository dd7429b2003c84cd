//! EPUB container parser
//!
//! Walks `META-INF/container.xml` to the package document, deserializes the
//! OPF (Dublin Core metadata, manifest, spine, rendition metas), resolves
//! the spine to ordered sections, and extracts the table of contents from
//! the EPUB 3 nav document or the EPUB 2 NCX.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;
use zip::ZipArchive;

use crate::engine::{
    BookMetadata, ParsedBook, ReadingDirection, RenderError, Rendition, Result, Section, TocItem,
};

/// Parse an EPUB container into the generic parsed-book object.
pub fn parse_epub(bytes: &[u8]) -> Result<ParsedBook> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let container = read_entry_str(&mut archive, "META-INF/container.xml")?;
    let container: Container = from_str(&container)
        .map_err(|e| RenderError::ParseError(format!("container.xml: {}", e)))?;
    let opf_path = container
        .rootfiles
        .rootfile
        .first()
        .map(|r| r.full_path.clone())
        .ok_or_else(|| RenderError::ParseError("container.xml has no rootfile".into()))?;

    let opf_xml = read_entry_str(&mut archive, &opf_path)?;
    let package: Package =
        from_str(&opf_xml).map_err(|e| RenderError::ParseError(format!("{}: {}", opf_path, e)))?;

    // Hrefs in the OPF are relative to the OPF's own directory.
    let opf_dir = opf_path
        .rsplit_once('/')
        .map(|(dir, _)| format!("{}/", dir))
        .unwrap_or_default();

    let metadata = convert_metadata(&package.metadata);
    let rendition = convert_rendition(&package.metadata);

    let manifest: HashMap<String, &ManifestItem> = package
        .manifest
        .item
        .iter()
        .filter_map(|item| item.id.as_ref().map(|id| (id.clone(), item)))
        .collect();

    let dir = match package.spine.page_progression_direction.as_deref() {
        Some("rtl") => ReadingDirection::Rtl,
        _ => ReadingDirection::Ltr,
    };

    let mut sections = Vec::new();
    for itemref in &package.spine.itemref {
        let Some(item) = manifest.get(&itemref.idref) else {
            warn!(idref = %itemref.idref, "spine references missing manifest item");
            continue;
        };
        let Some(href) = item.href.as_deref() else {
            continue;
        };
        let resolved = resolve_href(&opf_dir, href);
        let content = match read_entry_bytes(&mut archive, &resolved) {
            Ok(content) => content,
            Err(err) => {
                warn!(href = %resolved, %err, "spine item unreadable, skipping");
                continue;
            }
        };
        let media_type = item
            .media_type
            .clone()
            .unwrap_or_else(|| guess_media_type(&resolved));
        sections.push(Section {
            href: resolved,
            media_type,
            content,
        });
    }
    if sections.is_empty() {
        return Err(RenderError::ParseError("spine resolved to no sections".into()));
    }

    let toc = extract_toc(&mut archive, &opf_dir, &package, &manifest, &sections);
    debug!(
        sections = sections.len(),
        toc = toc.len(),
        title = %metadata.title,
        "epub parsed"
    );

    Ok(ParsedBook {
        metadata,
        rendition,
        dir,
        toc,
        sections,
    })
}

fn convert_metadata(metadata: &Metadata) -> BookMetadata {
    BookMetadata {
        title: metadata
            .title
            .as_ref()
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string()),
        creators: metadata
            .creator
            .iter()
            .filter_map(|c| c.content.as_ref())
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect(),
        publisher: metadata.publisher.as_ref().map(|p| p.content.clone()),
        language: metadata.language.as_ref().map(|l| l.content.clone()),
        identifier: metadata
            .identifier
            .iter()
            .find_map(|i| i.content.clone()),
        description: metadata.description.as_ref().map(|d| d.content.clone()),
        subjects: metadata.subject.iter().map(|s| s.content.clone()).collect(),
    }
}

fn convert_rendition(metadata: &Metadata) -> Option<Rendition> {
    let mut rendition = Rendition::default();
    let mut any = false;
    for meta in &metadata.meta {
        let Some(property) = meta.property.as_deref() else {
            continue;
        };
        let value = meta.text.clone().filter(|t| !t.is_empty());
        match property {
            "rendition:layout" => {
                rendition.layout = value;
                any = true;
            }
            "rendition:spread" => {
                rendition.spread = value;
                any = true;
            }
            "rendition:viewport" => {
                rendition.viewport = value;
                any = true;
            }
            _ => {}
        }
    }
    any.then_some(rendition)
}

fn extract_toc<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    opf_dir: &str,
    package: &Package,
    manifest: &HashMap<String, &ManifestItem>,
    sections: &[Section],
) -> Vec<TocItem> {
    // EPUB 3: manifest item with the "nav" property.
    let nav_item = package.manifest.item.iter().find(|item| {
        item.properties
            .as_deref()
            .map_or(false, |p| p.split_whitespace().any(|p| p == "nav"))
    });
    if let Some(href) = nav_item.and_then(|i| i.href.as_deref()) {
        let resolved = resolve_href(opf_dir, href);
        if let Ok(xml) = read_entry_str(archive, &resolved) {
            let toc = parse_nav_doc(&xml, sections);
            if !toc.is_empty() {
                return toc;
            }
        }
    }

    // EPUB 2: NCX referenced by the spine's toc attribute.
    let ncx_href = package
        .spine
        .toc
        .as_ref()
        .and_then(|id| manifest.get(id))
        .and_then(|item| item.href.as_deref());
    if let Some(href) = ncx_href {
        let resolved = resolve_href(opf_dir, href);
        if let Ok(xml) = read_entry_str(archive, &resolved) {
            match from_str::<Ncx>(&xml) {
                Ok(ncx) => return convert_nav_points(&ncx.nav_map.nav_point, 0, sections),
                Err(err) => warn!(href = %resolved, %err, "ncx parse failed"),
            }
        }
    }

    // Fallback: one synthetic entry per spine section.
    sections
        .iter()
        .enumerate()
        .map(|(index, section)| TocItem {
            id: Uuid::new_v4().to_string(),
            title: format!("Chapter {}", index + 1),
            level: 0,
            href: Some(section.href.clone()),
            index: Some(index),
            subitems: vec![],
        })
        .collect()
}

fn convert_nav_points(points: &[NavPoint], level: usize, sections: &[Section]) -> Vec<TocItem> {
    points
        .iter()
        .enumerate()
        .map(|(n, point)| {
            let href = point
                .content
                .as_ref()
                .map(|c| decode_href(&c.src));
            let index = href
                .as_deref()
                .and_then(|h| section_index(sections, h));
            let title = point
                .nav_label
                .as_ref()
                .map(|l| l.text.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| format!("Chapter {}", n + 1));
            TocItem {
                id: point
                    .id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                title,
                level,
                href,
                index,
                subitems: convert_nav_points(&point.nav_point, level + 1, sections),
            }
        })
        .collect()
}

/// Parse the EPUB 3 nav document: the `<nav>` whose `epub:type` includes
/// "toc" wins; when none is marked, the first nav with entries is used.
/// Nested `<ol>`/`<li>` structure maps onto TOC levels.
fn parse_nav_doc(xml: &str, sections: &[Section]) -> Vec<TocItem> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut in_nav = false;
    let mut nav_is_toc = false;
    let mut fallback: Option<Vec<TocItem>> = None;
    let mut depth: isize = -1;
    let mut items: Vec<TocItem> = Vec::new();
    // Path of indices into the tree being built, one per open <li>.
    let mut stack: Vec<usize> = Vec::new();
    let mut current_href: Option<String> = None;
    let mut text_buf = String::new();
    let mut in_anchor = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"nav" if !in_nav => {
                    in_nav = true;
                    nav_is_toc = e.attributes().flatten().any(|a| {
                        a.key.as_ref().ends_with(b"type")
                            && a.unescape_value()
                                .map_or(false, |v| v.split_whitespace().any(|t| t == "toc"))
                    });
                    depth = -1;
                    items.clear();
                    stack.clear();
                }
                b"ol" if in_nav => depth += 1,
                b"li" if in_nav && depth >= 0 => {
                    let level = depth as usize;
                    let node = TocItem {
                        id: Uuid::new_v4().to_string(),
                        title: String::new(),
                        level,
                        href: None,
                        index: None,
                        subitems: vec![],
                    };
                    let siblings = subitems_at(&mut items, &stack);
                    siblings.push(node);
                    let pos = siblings.len() - 1;
                    stack.push(pos);
                }
                b"a" if in_nav && !stack.is_empty() => {
                    in_anchor = true;
                    text_buf.clear();
                    current_href = e.attributes().flatten().find_map(|a| {
                        (a.key.as_ref() == b"href")
                            .then(|| a.unescape_value().ok())
                            .flatten()
                            .map(|v| decode_href(&v))
                    });
                }
                _ => {}
            },
            Ok(Event::Text(t)) if in_anchor => {
                if let Ok(text) = t.unescape() {
                    text_buf.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"nav" if in_nav => {
                    in_nav = false;
                    if nav_is_toc && !items.is_empty() {
                        return items;
                    }
                    if fallback.is_none() && !items.is_empty() {
                        fallback = Some(std::mem::take(&mut items));
                    }
                    items.clear();
                }
                b"ol" if in_nav => depth -= 1,
                b"li" if in_nav => {
                    stack.pop();
                }
                b"a" if in_anchor => {
                    in_anchor = false;
                    let total = count_items(&items);
                    if let Some(item) = item_at(&mut items, &stack) {
                        let title = text_buf.trim();
                        item.title = if title.is_empty() {
                            format!("Chapter {}", total)
                        } else {
                            title.to_string()
                        };
                        item.href = current_href.take();
                        item.index = item
                            .href
                            .as_deref()
                            .and_then(|h| section_index(sections, h));
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => {
                warn!(%err, "nav document parse aborted");
                break;
            }
            _ => {}
        }
    }
    fallback.unwrap_or_default()
}

/// The sibling list addressed by a path of open-`<li>` indices.
fn subitems_at<'a>(items: &'a mut Vec<TocItem>, stack: &[usize]) -> &'a mut Vec<TocItem> {
    let mut current = items;
    for &index in stack {
        current = &mut current[index].subitems;
    }
    current
}

fn item_at<'a>(items: &'a mut Vec<TocItem>, stack: &[usize]) -> Option<&'a mut TocItem> {
    let (&last, parents) = stack.split_last()?;
    subitems_at(items, parents).get_mut(last)
}

fn count_items(items: &[TocItem]) -> usize {
    items
        .iter()
        .map(|i| 1 + count_items(&i.subitems))
        .sum()
}

fn section_index(sections: &[Section], href: &str) -> Option<usize> {
    let target = href.split('#').next().unwrap_or(href);
    let target = target.trim_start_matches("../");
    sections
        .iter()
        .position(|s| s.href == target || s.href.ends_with(target))
}

fn resolve_href(opf_dir: &str, href: &str) -> String {
    let href = decode_href(href);
    let href = href.trim_start_matches("./");
    if href.starts_with('/') {
        href.trim_start_matches('/').to_string()
    } else {
        format!("{}{}", opf_dir, href)
    }
}

fn decode_href(href: &str) -> String {
    urlencoding::decode(href)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| href.to_string())
}

fn guess_media_type(href: &str) -> String {
    mime_guess::from_path(href)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

fn read_entry_bytes<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>> {
    // Fuzzy fallback: containers in the wild disagree about leading
    // directories, so fall back to a suffix match.
    let exact = archive.by_name(name).map(|mut entry| {
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes).map(|_| bytes)
    });
    match exact {
        Ok(result) => Ok(result?),
        Err(_) => {
            let candidate = archive
                .file_names()
                .find(|n| n.ends_with(name))
                .map(str::to_string)
                .ok_or_else(|| RenderError::InvalidContainer(format!("missing entry {}", name)))?;
            let mut entry = archive.by_name(&candidate)?;
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            Ok(bytes)
        }
    }
}

fn read_entry_str<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<String> {
    let bytes = read_entry_bytes(archive, name)?;
    String::from_utf8(bytes)
        .map_err(|_| RenderError::ParseError(format!("{} is not valid UTF-8", name)))
}

// OPF XML structures for deserialization

#[derive(Debug, Deserialize)]
struct Container {
    rootfiles: RootFiles,
}

#[derive(Debug, Deserialize)]
struct RootFiles {
    #[serde(rename = "rootfile", default)]
    rootfile: Vec<RootFile>,
}

#[derive(Debug, Deserialize)]
struct RootFile {
    #[serde(rename = "@full-path")]
    full_path: String,
}

#[derive(Debug, Deserialize)]
struct Package {
    metadata: Metadata,
    manifest: Manifest,
    spine: Spine,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(rename = "title", default)]
    title: Option<DcText>,
    #[serde(rename = "creator", default)]
    creator: Vec<DcCreator>,
    #[serde(rename = "publisher", default)]
    publisher: Option<DcText>,
    #[serde(rename = "language", default)]
    language: Option<DcText>,
    #[serde(rename = "description", default)]
    description: Option<DcText>,
    #[serde(rename = "subject", default)]
    subject: Vec<DcText>,
    #[serde(rename = "identifier", default)]
    identifier: Vec<DcIdentifier>,
    #[serde(rename = "meta", default)]
    meta: Vec<Meta>,
}

#[derive(Debug, Deserialize)]
struct DcText {
    #[serde(rename = "$text", default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct DcCreator {
    #[serde(rename = "$text", default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DcIdentifier {
    #[serde(rename = "$text", default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    #[serde(rename = "@property", default)]
    property: Option<String>,
    #[serde(rename = "$text", default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(rename = "item", default)]
    item: Vec<ManifestItem>,
}

#[derive(Debug, Deserialize)]
struct ManifestItem {
    #[serde(rename = "@id", default)]
    id: Option<String>,
    #[serde(rename = "@href", default)]
    href: Option<String>,
    #[serde(rename = "@media-type", default)]
    media_type: Option<String>,
    #[serde(rename = "@properties", default)]
    properties: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Spine {
    #[serde(rename = "@toc", default)]
    toc: Option<String>,
    #[serde(rename = "@page-progression-direction", default)]
    page_progression_direction: Option<String>,
    #[serde(rename = "itemref", default)]
    itemref: Vec<ItemRef>,
}

#[derive(Debug, Deserialize)]
struct ItemRef {
    #[serde(rename = "@idref")]
    idref: String,
}

// NCX structures (EPUB 2 table of contents)

#[derive(Debug, Deserialize)]
struct Ncx {
    #[serde(rename = "navMap")]
    nav_map: NavMap,
}

#[derive(Debug, Deserialize)]
struct NavMap {
    #[serde(rename = "navPoint", default)]
    nav_point: Vec<NavPoint>,
}

#[derive(Debug, Deserialize)]
struct NavPoint {
    #[serde(rename = "@id", default)]
    id: Option<String>,
    #[serde(rename = "navLabel", default)]
    nav_label: Option<NavLabel>,
    #[serde(rename = "content", default)]
    content: Option<NavContent>,
    #[serde(rename = "navPoint", default)]
    nav_point: Vec<NavPoint>,
}

#[derive(Debug, Deserialize, Default)]
struct NavLabel {
    #[serde(rename = "text", default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct NavContent {
    #[serde(rename = "@src")]
    src: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::zip_bytes;

    const CONTAINER: &[u8] = br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    const OPF: &[u8] = br#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" xmlns:dc="http://purl.org/dc/elements/1.1/" version="3.0">
  <metadata>
    <dc:title>A Test Book</dc:title>
    <dc:creator>Jane Doe</dc:creator>
    <dc:language>en</dc:language>
    <dc:identifier>urn:uuid:1234</dc:identifier>
    <meta property="rendition:layout">pre-paginated</meta>
  </metadata>
  <manifest>
    <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch2" href="ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="ch1"/>
    <itemref idref="ch2"/>
  </spine>
</package>"#;

    const NCX: &[u8] = br#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="np1">
      <navLabel><text>One</text></navLabel>
      <content src="ch1.xhtml"/>
      <navPoint id="np1a">
        <navLabel><text>One A</text></navLabel>
        <content src="ch1.xhtml#a"/>
      </navPoint>
    </navPoint>
    <navPoint id="np2">
      <navLabel><text/></navLabel>
      <content src="ch2.xhtml"/>
    </navPoint>
  </navMap>
</ncx>"#;

    fn sample_epub() -> Vec<u8> {
        zip_bytes(&[
            ("mimetype", b"application/epub+zip"),
            ("META-INF/container.xml", CONTAINER),
            ("OEBPS/content.opf", OPF),
            ("OEBPS/toc.ncx", NCX),
            ("OEBPS/ch1.xhtml", b"<html><body>one</body></html>"),
            ("OEBPS/ch2.xhtml", b"<html><body>two</body></html>"),
        ])
    }

    #[test]
    fn parses_metadata_spine_and_rendition() {
        let book = parse_epub(&sample_epub()).unwrap();
        assert_eq!(book.metadata.title, "A Test Book");
        assert_eq!(book.metadata.creators, vec!["Jane Doe"]);
        assert_eq!(book.metadata.language.as_deref(), Some("en"));
        assert_eq!(book.sections.len(), 2);
        assert_eq!(book.sections[0].href, "OEBPS/ch1.xhtml");
        assert_eq!(book.sections[0].media_type, "application/xhtml+xml");
        assert!(book.rendition.as_ref().unwrap().is_fixed_layout());
        assert_eq!(book.dir, ReadingDirection::Ltr);
    }

    #[test]
    fn toc_from_ncx_with_nesting_and_default_titles() {
        let book = parse_epub(&sample_epub()).unwrap();
        assert_eq!(book.toc.len(), 2);
        assert_eq!(book.toc[0].title, "One");
        assert_eq!(book.toc[0].level, 0);
        assert_eq!(book.toc[0].index, Some(0));
        assert_eq!(book.toc[0].subitems.len(), 1);
        assert_eq!(book.toc[0].subitems[0].level, 1);
        assert_eq!(book.toc[0].subitems[0].index, Some(0));
        // Empty navLabel falls back to a numbered chapter title.
        assert_eq!(book.toc[1].title, "Chapter 2");
        assert_eq!(book.toc[1].index, Some(1));
    }

    #[test]
    fn nav_doc_preferred_over_ncx() {
        let opf = br#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata><dc:title xmlns:dc="http://purl.org/dc/elements/1.1/">Nav Book</dc:title></metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ch1" href="ch1.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine><itemref idref="ch1"/></spine>
</package>"#;
        let nav = br#"<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<body>
  <nav epub:type="toc">
    <ol>
      <li><a href="ch1.xhtml">First Chapter</a>
        <ol><li><a href="ch1.xhtml#s1">Sub Section</a></li></ol>
      </li>
    </ol>
  </nav>
</body>
</html>"#;
        let bytes = zip_bytes(&[
            ("mimetype", b"application/epub+zip"),
            ("META-INF/container.xml", CONTAINER),
            (
                "OEBPS/content.opf",
                std::str::from_utf8(opf).unwrap().as_bytes(),
            ),
            ("OEBPS/nav.xhtml", nav),
            ("OEBPS/ch1.xhtml", b"<html/>"),
        ]);
        let book = parse_epub(&bytes).unwrap();
        assert_eq!(book.toc.len(), 1);
        assert_eq!(book.toc[0].title, "First Chapter");
        assert_eq!(book.toc[0].index, Some(0));
        assert_eq!(book.toc[0].subitems.len(), 1);
        assert_eq!(book.toc[0].subitems[0].title, "Sub Section");
        assert_eq!(book.toc[0].subitems[0].level, 1);
    }

    #[test]
    fn toc_nav_wins_over_preceding_landmarks() {
        let nav = r#"<html xmlns:epub="http://www.idpf.org/2007/ops"><body>
  <nav epub:type="landmarks"><ol><li><a href="cover.xhtml">Cover</a></li></ol></nav>
  <nav epub:type="toc"><ol><li><a href="ch1.xhtml">First</a></li></ol></nav>
</body></html>"#;
        let toc = parse_nav_doc(nav, &[]);
        assert_eq!(toc.len(), 1);
        assert_eq!(toc[0].title, "First");
    }

    #[test]
    fn missing_spine_section_is_skipped_not_fatal() {
        let bytes = zip_bytes(&[
            ("mimetype", b"application/epub+zip"),
            ("META-INF/container.xml", CONTAINER),
            ("OEBPS/content.opf", OPF),
            ("OEBPS/ch1.xhtml", b"<html/>"),
            // ch2.xhtml deliberately absent.
        ]);
        let book = parse_epub(&bytes).unwrap();
        assert_eq!(book.sections.len(), 1);
    }

    #[test]
    fn corrupt_container_is_a_load_failure() {
        let err = parse_epub(b"PK\x03\x04garbage").unwrap_err();
        assert!(err.is_load_failure());
    }
}
