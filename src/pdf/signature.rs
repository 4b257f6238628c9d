//! Signature dictionaries and their byte-range helpers.

use super::scanner::{rfind, PdfStructure};
use crate::byterange::ByteRange;
use crate::decoders::decode_hex;
use crate::object::{Dict, Object, ObjectRef};
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Kind of a signature dictionary (`/Type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SignatureKind {
    /// `/Type /Sig` (or no type)
    Signature,
    /// `/Type /DocTimeStamp`
    DocTimeStamp,
}

/// A signature dictionary found in the file.
#[derive(Debug, Clone)]
pub struct PdfSignatureDictionary {
    /// Indirect reference of the dictionary
    pub reference: ObjectRef,
    /// Offset of the object definition
    pub offset: usize,
    /// `/T` of the signature field pointing at this dictionary
    pub field_name: Option<String>,
    pub kind: SignatureKind,
    pub filter: Option<String>,
    pub sub_filter: Option<String>,
    pub byte_range: ByteRange,
    /// Decoded `/Contents`
    pub contents: Vec<u8>,
    /// Claimed signing time (`/M`)
    pub signing_time: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub reason: Option<String>,
    pub location: Option<String>,
    pub contact_info: Option<String>,
}

impl PdfSignatureDictionary {
    /// Build from a dictionary; `None` unless it has a usable `/ByteRange`
    /// and a `/Contents` string.
    pub fn from_dict(reference: ObjectRef, offset: usize, dict: &Dict) -> Option<Self> {
        let byte_range = match dict.get("ByteRange").map(ByteRange::from_object) {
            Some(Ok(range)) => range,
            Some(Err(e)) => {
                log::warn!("Signature {} has an invalid /ByteRange: {}", reference, e);
                return None;
            },
            None => return None,
        };
        let contents = dict.get("Contents")?.as_string()?.to_vec();

        let kind = match dict.get("Type").and_then(Object::as_name) {
            Some("DocTimeStamp") => SignatureKind::DocTimeStamp,
            _ => SignatureKind::Signature,
        };
        let name = |key: &str| dict.get(key).and_then(Object::as_name).map(str::to_string);
        let text = |key: &str| dict.get(key).and_then(Object::as_text);

        Some(Self {
            reference,
            offset,
            field_name: None,
            kind,
            filter: name("Filter"),
            sub_filter: name("SubFilter"),
            byte_range,
            contents,
            signing_time: text("M").as_deref().and_then(parse_pdf_date),
            name: text("Name"),
            reason: text("Reason"),
            location: text("Location"),
            contact_info: text("ContactInfo"),
        })
    }

    /// Whether this is a document timestamp (`ETSI.RFC3161`).
    pub fn is_timestamp(&self) -> bool {
        self.kind == SignatureKind::DocTimeStamp
            || self.sub_filter.as_deref() == Some("ETSI.RFC3161")
    }

    /// Label used in diagnostics: the field name, or the object reference.
    pub fn label(&self) -> String {
        self.field_name
            .clone()
            .unwrap_or_else(|| format!("{} {}", self.reference.id, self.reference.gen))
    }
}

/// Every signature dictionary of the file, ordered by the end of its byte range.
///
/// A dictionary redefined in a later revision is reported once, with its
/// latest definition.
pub fn find_signatures(structure: &PdfStructure) -> Vec<PdfSignatureDictionary> {
    let mut fields: HashMap<ObjectRef, String> = HashMap::new();
    for indexed in structure.objects() {
        let object = &indexed.object;
        if object.get("FT").and_then(Object::as_name) != Some("Sig") {
            continue;
        }
        if let (Some(value), Some(name)) = (
            object.get("V").and_then(Object::as_reference),
            object.get("T").and_then(Object::as_text),
        ) {
            fields.insert(value, name);
        }
    }

    let mut latest: HashMap<ObjectRef, PdfSignatureDictionary> = HashMap::new();
    for indexed in structure.objects() {
        let Some(dict) = indexed.object.as_dict() else {
            continue;
        };
        if !dict.contains_key("ByteRange") {
            continue;
        }
        let Some(mut signature) = PdfSignatureDictionary::from_dict(indexed.reference, indexed.offset, dict) else {
            continue;
        };
        signature.field_name = fields.get(&indexed.reference).cloned();

        let newer = latest
            .get(&indexed.reference)
            .map_or(true, |existing| existing.offset <= indexed.offset);
        if newer {
            latest.insert(indexed.reference, signature);
        }
    }

    let mut signatures: Vec<_> = latest.into_values().collect();
    signatures.sort_by_key(|s| (s.byte_range.end(), s.offset));
    log::debug!("Found {} signature dictionaries", signatures.len());
    signatures
}

/// Check that the byte-range gap holds exactly the `/Contents` hex string.
///
/// The gap must start with `<`, end with `>`, contain only hex digits (or
/// whitespace) in between, and decode to `contents`.
pub fn check_contents_gap(data: &[u8], range: &ByteRange, contents: &[u8]) -> Result<(), String> {
    let (start, end) = range.gap();
    let (Ok(start), Ok(end)) = (usize::try_from(start), usize::try_from(end)) else {
        return Err("gap offsets exceed addressable memory".to_string());
    };
    let Some(gap) = data.get(start..end) else {
        return Err(format!("gap [{}, {}) lies outside the file", start, end));
    };

    if gap.len() < 2 || gap[0] != b'<' || gap[gap.len() - 1] != b'>' {
        return Err("gap is not delimited by '<' and '>'".to_string());
    }
    let body = &gap[1..gap.len() - 1];
    if let Some(pos) = body.iter().position(|c| !c.is_ascii_hexdigit() && !c.is_ascii_whitespace()) {
        return Err(format!("non-hex byte 0x{:02x} at gap offset {}", body[pos], pos + 1));
    }

    let decoded = decode_hex(body).map_err(|e| e.to_string())?;
    if decoded != contents {
        return Err("gap content differs from /Contents".to_string());
    }
    Ok(())
}

/// Hex-decoded signature value found between the two byte-range parts.
///
/// Returns an empty vector when the gap is too small or not hex.
pub fn signature_value(data: &[u8], range: &ByteRange) -> Vec<u8> {
    let start = range.start1().saturating_add(range.len1()).saturating_add(1);
    let end = range.start2().saturating_sub(1);
    if end <= start {
        return Vec::new();
    }
    let (Ok(start), Ok(end)) = (usize::try_from(start), usize::try_from(end)) else {
        return Vec::new();
    };
    match data.get(start..end.min(data.len())) {
        Some(hex) => decode_hex(hex).unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Bytes from the start of the first part up to the end of the second part.
pub fn revision_content(data: &[u8], range: &ByteRange) -> Vec<u8> {
    let start = usize::try_from(range.start1()).unwrap_or(usize::MAX).min(data.len());
    let end = usize::try_from(range.end()).unwrap_or(usize::MAX).min(data.len());
    data[start..end.max(start)].to_vec()
}

/// The revision preceding a signature: the first byte-range part, cut after
/// its last `%%EOF` marker and line break.
///
/// `None` when the first part holds no complete revision.
pub fn retrieve_previous_revision(data: &[u8], range: &ByteRange) -> Option<Vec<u8>> {
    let first_end = usize::try_from(range.start1().saturating_add(range.len1()))
        .unwrap_or(usize::MAX)
        .min(data.len());
    let signed = &data[..first_end];

    let mut end = rfind(signed, b"%%EOF")? + 5;
    if signed.get(end) == Some(&b'\r') {
        end += 1;
    }
    if signed.get(end) == Some(&b'\n') {
        end += 1;
    }
    Some(signed[..end].to_vec())
}

/// Signed bytes of `range` taken from an extracted revision: the first part,
/// then the second part after skipping the gap.
///
/// `revision` is expected to start at `start1`, as returned by [`revision_content`].
pub fn signed_content_from_revision(revision: &[u8], range: &ByteRange) -> Vec<u8> {
    let relative = ByteRange::new(0, range.len1(), range.start2().saturating_sub(range.start1()), range.len2());
    relative.map(|r| r.extract(revision)).unwrap_or_default()
}

/// Parse a PDF date string (`D:YYYYMMDDHHmmSSOHH'mm'`).
///
/// Missing trailing fields default to their minimum; a missing offset means UTC.
pub fn parse_pdf_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    let text = text.strip_prefix("D:").unwrap_or(text);
    let digits: String = text.chars().take_while(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return None;
    }

    let field = |from: usize, len: usize, default: u32| -> Option<u32> {
        match digits.get(from..from + len) {
            Some(s) => s.parse().ok(),
            None => Some(default),
        }
    };
    let year: i32 = digits.get(0..4)?.parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, field(4, 2, 1)?, field(6, 2, 1)?)?;
    let naive = date.and_hms_opt(field(8, 2, 0)?, field(10, 2, 0)?, field(12, 2, 0)?)?;

    let rest = &text[digits.len()..];
    let offset_seconds = match rest.chars().next() {
        Some(sign @ ('+' | '-')) => {
            let parts: Vec<i32> = rest[1..]
                .split(|c: char| !c.is_ascii_digit())
                .filter(|p| !p.is_empty())
                .filter_map(|p| p.parse().ok())
                .collect();
            let hours = parts.first().copied().unwrap_or(0);
            let minutes = parts.get(1).copied().unwrap_or(0);
            if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
                return None;
            }
            let seconds = hours * 3600 + minutes * 60;
            if sign == '-' {
                -seconds
            } else {
                seconds
            }
        },
        _ => 0,
    };

    FixedOffset::east_opt(offset_seconds)?
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf(name: &str) -> Vec<u8> {
        std::fs::read(format!("{}/tests/fixtures/pdf/{}", env!("CARGO_MANIFEST_DIR"), name)).unwrap()
    }

    #[test]
    fn test_find_single_signature() {
        let data = pdf("signed_single.pdf");
        let structure = PdfStructure::scan(&data, 100);
        let signatures = find_signatures(&structure);
        assert_eq!(signatures.len(), 1);

        let sig = &signatures[0];
        assert_eq!(sig.field_name.as_deref(), Some("Signature1"));
        assert_eq!(sig.kind, SignatureKind::Signature);
        assert_eq!(sig.sub_filter.as_deref(), Some("adbe.pkcs7.detached"));
        assert_eq!(sig.reason.as_deref(), Some("Approval"));
        assert_eq!(sig.location.as_deref(), Some("Luxembourg"));
        assert_eq!(sig.signing_time.map(|t| t.to_rfc3339()).as_deref(), Some("2024-03-01T12:00:00+00:00"));
        assert!(sig.byte_range.spans_document(data.len() as u64));
        assert_eq!(sig.contents.first(), Some(&0x30));
    }

    #[test]
    fn test_signatures_ordered_by_range_end() {
        let data = pdf("signed_three_revisions.pdf");
        let signatures = find_signatures(&PdfStructure::scan(&data, 100));
        let labels: Vec<String> = signatures.iter().map(PdfSignatureDictionary::label).collect();
        assert_eq!(labels, ["Signature1", "Signature2", "Timestamp1"]);
        assert!(signatures[2].is_timestamp());
        assert!(!signatures[0].is_timestamp());
    }

    #[test]
    fn test_contents_gap() {
        let data = pdf("signed_single.pdf");
        let signatures = find_signatures(&PdfStructure::scan(&data, 100));
        let sig = &signatures[0];
        assert!(check_contents_gap(&data, &sig.byte_range, &sig.contents).is_ok());
        assert!(check_contents_gap(&data, &sig.byte_range, b"other").is_err());

        let shifted = ByteRange::new(0, sig.byte_range.len1() - 1, sig.byte_range.start2(), sig.byte_range.len2()).unwrap();
        assert!(check_contents_gap(&data, &shifted, &sig.contents).is_err());
    }

    #[test]
    fn test_signature_value_matches_contents() {
        let data = pdf("signed_single.pdf");
        let signatures = find_signatures(&PdfStructure::scan(&data, 100));
        let sig = &signatures[0];
        assert_eq!(signature_value(&data, &sig.byte_range), sig.contents);

        let no_gap = ByteRange::new(0, 10, 11, 5).unwrap();
        assert!(signature_value(&data, &no_gap).is_empty());
    }

    #[test]
    fn test_previous_revision() {
        let data = pdf("signed_three_revisions.pdf");
        let signatures = find_signatures(&PdfStructure::scan(&data, 100));

        let first = retrieve_previous_revision(&data, &signatures[0].byte_range).unwrap();
        assert!(first.ends_with(b"%%EOF\n"));
        assert!(first.len() < 760);

        let second = retrieve_previous_revision(&data, &signatures[1].byte_range).unwrap();
        assert!(second.len() > first.len());
        assert!(second.starts_with(&first));

        let content = revision_content(&data, &signatures[0].byte_range);
        assert_eq!(content.len() as u64, signatures[0].byte_range.end());
        assert_eq!(
            signed_content_from_revision(&content, &signatures[0].byte_range),
            signatures[0].byte_range.extract(&data)
        );
    }

    #[test]
    fn test_parse_pdf_date() {
        let parse = |s| parse_pdf_date(s).map(|d| d.to_rfc3339());
        assert_eq!(parse("D:20240301120000Z").as_deref(), Some("2024-03-01T12:00:00+00:00"));
        assert_eq!(parse("D:20240301120000+02'00'").as_deref(), Some("2024-03-01T10:00:00+00:00"));
        assert_eq!(parse("D:2024").as_deref(), Some("2024-01-01T00:00:00+00:00"));
        assert_eq!(parse("20240301").as_deref(), Some("2024-03-01T00:00:00+00:00"));
        assert!(parse_pdf_date("D:20241301").is_none());
        assert!(parse_pdf_date("yesterday").is_none());
    }

    #[test]
    fn test_parse_pdf_date_rejects_offset_out_of_range() {
        assert!(parse_pdf_date("D:20240301120000+999999'00'").is_none());
        assert!(parse_pdf_date("D:20240301120000-24'00'").is_none());
        assert!(parse_pdf_date("D:20240301120000+05'75'").is_none());
        assert!(parse_pdf_date("D:20240301120000-23'59'").is_some());
    }

    #[test]
    fn test_signed_content_with_oversized_range() {
        let range = ByteRange::new(0, 1, 2, 1 << 63).unwrap();
        assert_eq!(signed_content_from_revision(b"abc", &range), b"ac");
    }
}
