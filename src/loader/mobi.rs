//! MOBI / AZW container parser
//!
//! Minimal PalmDB walk: the database header names the book and indexes the
//! records; record 0 carries the PalmDOC and MOBI headers, the following
//! `record_count` records hold the text stream. Records are exposed as raw
//! sections; the reflowable engine owns decompression and markup handling.

use tracing::debug;
use uuid::Uuid;

use crate::engine::{
    BookMetadata, ParsedBook, ReadingDirection, RenderError, Result, Section, TocItem,
};

const PALM_HEADER_LEN: usize = 78;
const RECORD_ENTRY_LEN: usize = 8;

/// Parse a MOBI/AZW PalmDB container.
pub fn parse_mobi(bytes: &[u8]) -> Result<ParsedBook> {
    if bytes.len() < PALM_HEADER_LEN {
        return Err(RenderError::InvalidContainer("truncated PalmDB header".into()));
    }
    let type_creator = &bytes[60..68];
    let known = type_creator == b"BOOKMOBI"
        || type_creator == b"TEXtREAd"
        || &type_creator[..3] == b"TPZ";
    if !known {
        return Err(RenderError::InvalidContainer(
            "not a PalmDB book database".into(),
        ));
    }

    let num_records = read_u16(bytes, 76)? as usize;
    if num_records == 0 {
        return Err(RenderError::InvalidContainer("database has no records".into()));
    }
    let mut offsets = Vec::with_capacity(num_records);
    for i in 0..num_records {
        let entry = PALM_HEADER_LEN + i * RECORD_ENTRY_LEN;
        offsets.push(read_u32(bytes, entry)? as usize);
    }

    let record = |index: usize| -> Result<&[u8]> {
        let start = offsets[index];
        let end = offsets.get(index + 1).copied().unwrap_or(bytes.len());
        if start > end || end > bytes.len() {
            return Err(RenderError::InvalidContainer(format!(
                "record {} out of bounds",
                index
            )));
        }
        Ok(&bytes[start..end])
    };

    let record0 = record(0)?;
    if record0.len() < 12 {
        return Err(RenderError::InvalidContainer("truncated PalmDOC header".into()));
    }
    let text_record_count = read_u16(record0, 8)? as usize;

    let title = mobi_full_name(record0)
        .or_else(|| palm_name(&bytes[..32]))
        .unwrap_or_else(|| "Untitled".to_string());

    // Text records are 1..=count; raw, still PalmDOC/HUFF compressed.
    let last = text_record_count.min(num_records.saturating_sub(1));
    let mut sections = Vec::with_capacity(last);
    for index in 1..=last {
        sections.push(Section {
            href: format!("record-{}", index),
            media_type: "application/x-mobipocket-ebook".to_string(),
            content: record(index)?.to_vec(),
        });
    }
    if sections.is_empty() {
        return Err(RenderError::ParseError("database has no text records".into()));
    }

    debug!(records = sections.len(), title = %title, "mobi parsed");
    Ok(ParsedBook {
        metadata: BookMetadata {
            title: title.clone(),
            ..BookMetadata::default()
        },
        rendition: None,
        dir: ReadingDirection::Ltr,
        toc: vec![TocItem {
            id: Uuid::new_v4().to_string(),
            title,
            level: 0,
            href: Some("record-1".to_string()),
            index: Some(0),
            subitems: vec![],
        }],
        sections,
    })
}

/// Full book name from the MOBI header, when present. Offsets in the header
/// are relative to the start of record 0.
fn mobi_full_name(record0: &[u8]) -> Option<String> {
    if record0.get(16..20)? != b"MOBI" {
        return None;
    }
    let offset = read_u32(record0, 84).ok()? as usize;
    let length = read_u32(record0, 88).ok()? as usize;
    let name = record0.get(offset..offset.checked_add(length)?)?;
    let name = String::from_utf8_lossy(name).trim().to_string();
    (!name.is_empty()).then_some(name)
}

/// NUL-terminated database name from the PalmDB header.
fn palm_name(field: &[u8]) -> Option<String> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let name = String::from_utf8_lossy(&field[..end]).trim().to_string();
    (!name.is_empty()).then_some(name)
}

fn read_u16(bytes: &[u8], offset: usize) -> Result<u16> {
    bytes
        .get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| RenderError::InvalidContainer(format!("short read at {}", offset)))
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| RenderError::InvalidContainer(format!("short read at {}", offset)))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal two-text-record BOOKMOBI database.
    fn sample_mobi(full_name: Option<&str>) -> Vec<u8> {
        let num_records = 3u16;
        let entries_end = PALM_HEADER_LEN + num_records as usize * RECORD_ENTRY_LEN;

        let mut record0 = vec![0u8; 96];
        record0[8..10].copy_from_slice(&2u16.to_be_bytes()); // text records
        if let Some(name) = full_name {
            record0[16..20].copy_from_slice(b"MOBI");
            let offset = 96u32;
            record0[84..88].copy_from_slice(&offset.to_be_bytes());
            record0[88..92].copy_from_slice(&(name.len() as u32).to_be_bytes());
            record0.extend_from_slice(name.as_bytes());
        }

        let r0_start = entries_end;
        let r1_start = r0_start + record0.len();
        let r2_start = r1_start + 5;

        let mut bytes = vec![0u8; PALM_HEADER_LEN];
        bytes[..4].copy_from_slice(b"Test");
        bytes[60..68].copy_from_slice(b"BOOKMOBI");
        bytes[76..78].copy_from_slice(&num_records.to_be_bytes());
        for (i, start) in [r0_start, r1_start, r2_start].iter().enumerate() {
            let mut entry = [0u8; RECORD_ENTRY_LEN];
            entry[..4].copy_from_slice(&(*start as u32).to_be_bytes());
            entry[7] = i as u8;
            bytes.extend_from_slice(&entry);
        }
        bytes.extend_from_slice(&record0);
        bytes.extend_from_slice(b"text1");
        bytes.extend_from_slice(b"text2!");
        bytes
    }

    #[test]
    fn parses_records_and_full_name() {
        let book = parse_mobi(&sample_mobi(Some("A Long Mobi Title"))).unwrap();
        assert_eq!(book.metadata.title, "A Long Mobi Title");
        assert_eq!(book.sections.len(), 2);
        assert_eq!(book.sections[0].content, b"text1");
        assert_eq!(book.sections[1].content, b"text2!");
        assert_eq!(book.toc.len(), 1);
    }

    #[test]
    fn falls_back_to_palm_database_name() {
        let book = parse_mobi(&sample_mobi(None)).unwrap();
        assert_eq!(book.metadata.title, "Test");
    }

    #[test]
    fn accepts_topaz_type_code() {
        let mut bytes = sample_mobi(None);
        bytes[60..68].copy_from_slice(b"TPZ\0\0\0\0\0");
        let book = parse_mobi(&bytes).unwrap();
        assert_eq!(book.metadata.title, "Test");
    }

    #[test]
    fn rejects_non_palm_bytes() {
        assert!(parse_mobi(b"not a mobi").unwrap_err().is_load_failure());
        let mut bytes = vec![0u8; 80];
        bytes[60..68].copy_from_slice(b"XXXXYYYY");
        assert!(parse_mobi(&bytes).is_err());
    }
}
