//! Object indexing by scanning.
//!
//! Signature validation must see every revision of an incrementally updated
//! file, including object definitions later superseded. Instead of following
//! the cross-reference chain, the whole file is scanned for `N G obj`
//! headers, and revisions are delimited by `%%EOF` markers. Objects inside
//! object streams (`/Type /ObjStm`) are indexed at the offset of their
//! containing stream.

use crate::object::{Dict, Object, ObjectRef};
use crate::parser::{parse_indirect_object, parse_object_with_limit};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::bytes::Regex;

lazy_static! {
    static ref RE_OBJ_HEADER: Option<Regex> = Regex::new(r"(\d+)\s+(\d+)\s+obj\b").ok();
    static ref RE_TRAILER: Option<Regex> = Regex::new(r"trailer\s*<<").ok();
}

const EOF_MARKER: &[u8] = b"%%EOF";
const MAX_REFERENCE_DEPTH: usize = 32;

/// One object definition found in the file.
#[derive(Debug, Clone)]
pub struct IndexedObject {
    /// Object number and generation
    pub reference: ObjectRef,
    /// Offset of the `N G obj` header (or of the containing object stream)
    pub offset: usize,
    /// Parsed object
    pub object: Object,
    /// Containing object stream, for compressed objects
    pub compressed_in: Option<ObjectRef>,
}

/// One incremental revision.
#[derive(Debug, Clone)]
pub struct Revision {
    /// 1-based revision number
    pub number: usize,
    /// Offset just past the `%%EOF` marker and its line break
    pub end: usize,
    /// Trailer dictionary (or cross-reference stream dictionary)
    pub trailer: Option<Dict>,
}

/// Index of every object definition and revision of a PDF file.
#[derive(Debug, Default)]
pub struct PdfStructure {
    size: usize,
    objects: Vec<IndexedObject>,
    by_ref: IndexMap<ObjectRef, Vec<usize>>,
    revisions: Vec<Revision>,
}

impl PdfStructure {
    /// Scan `data`. Unparseable object definitions are skipped.
    pub fn scan(data: &[u8], max_nesting: usize) -> Self {
        let mut structure = Self {
            size: data.len(),
            ..Self::default()
        };

        if let Some(re) = RE_OBJ_HEADER.as_ref() {
            for found in re.find_iter(data) {
                let offset = found.start();
                if offset > 0 && data[offset - 1].is_ascii_digit() {
                    continue;
                }
                match parse_indirect_object(&data[offset..], max_nesting) {
                    Ok((_, (reference, object))) => structure.push(IndexedObject {
                        reference,
                        offset,
                        object,
                        compressed_in: None,
                    }),
                    Err(_) => log::debug!("Skipping unparseable object header at byte {}", offset),
                }
            }
        }

        structure.index_object_streams(max_nesting);
        structure.revisions = find_revisions(data, max_nesting, &structure);

        log::debug!(
            "Scanned {} bytes: {} object definitions, {} revisions",
            data.len(),
            structure.objects.len(),
            structure.revisions.len()
        );
        structure
    }

    fn push(&mut self, object: IndexedObject) {
        let index = self.objects.len();
        self.by_ref.entry(object.reference).or_default().push(index);
        self.objects.push(object);
    }

    fn index_object_streams(&mut self, max_nesting: usize) {
        let streams: Vec<(ObjectRef, usize, Object)> = self
            .objects
            .iter()
            .filter(|o| o.object.get("Type").and_then(Object::as_name) == Some("ObjStm"))
            .map(|o| (o.reference, o.offset, o.object.clone()))
            .collect();

        for (reference, offset, stream) in streams {
            match parse_object_stream(&stream, max_nesting) {
                Ok(members) => {
                    for (number, object) in members {
                        self.push(IndexedObject {
                            reference: ObjectRef::new(number, 0),
                            offset,
                            object,
                            compressed_in: Some(reference),
                        });
                    }
                },
                Err(reason) => log::warn!("Object stream {} not indexed: {}", reference, reason),
            }
        }
    }

    /// Size of the scanned file.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Every definition, in file order (compressed objects last).
    pub fn objects(&self) -> &[IndexedObject] {
        &self.objects
    }

    /// Revisions in file order.
    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    /// Revision whose `%%EOF` closes the data at `offset`.
    pub fn revision_at(&self, offset: usize) -> Option<&Revision> {
        self.revisions.iter().find(|r| offset < r.end)
    }

    /// Latest definition of `reference`.
    pub fn resolve(&self, reference: ObjectRef) -> Option<&Object> {
        self.resolve_before(reference, usize::MAX)
    }

    /// Latest definition of `reference` starting before `limit`.
    pub fn resolve_before(&self, reference: ObjectRef, limit: usize) -> Option<&Object> {
        self.by_ref
            .get(&reference)?
            .iter()
            .map(|&i| &self.objects[i])
            .filter(|o| o.offset < limit)
            .max_by_key(|o| o.offset)
            .map(|o| &o.object)
    }

    /// Follow references from `object`, as visible before `limit`.
    pub fn deref_before<'a>(&'a self, object: &'a Object, limit: usize) -> Option<&'a Object> {
        let mut current = object;
        for _ in 0..MAX_REFERENCE_DEPTH {
            match current {
                Object::Reference(r) => current = self.resolve_before(*r, limit)?,
                other => return Some(other),
            }
        }
        log::warn!("Reference chain longer than {} links", MAX_REFERENCE_DEPTH);
        None
    }

    /// Document catalog as visible before `limit`.
    ///
    /// Uses the `/Root` of the last trailer before `limit`, falling back to
    /// the latest `/Type /Catalog` object.
    pub fn catalog_before(&self, limit: usize) -> Option<&Dict> {
        let from_trailer = self
            .revisions
            .iter()
            .filter(|r| r.end <= limit)
            .filter_map(|r| r.trailer.as_ref()?.get("Root")?.as_reference())
            .last()
            .and_then(|root| self.resolve_before(root, limit))
            .and_then(Object::as_dict);

        from_trailer.or_else(|| {
            self.objects
                .iter()
                .filter(|o| o.offset < limit)
                .filter(|o| o.object.get("Type").and_then(Object::as_name) == Some("Catalog"))
                .max_by_key(|o| o.offset)
                .and_then(|o| o.object.as_dict())
        })
    }
}

fn find_revisions(data: &[u8], max_nesting: usize, structure: &PdfStructure) -> Vec<Revision> {
    let mut revisions = Vec::new();
    let mut start = 0;
    let mut search = 0;

    while let Some(pos) = find(&data[search..], EOF_MARKER).map(|p| p + search) {
        let mut end = pos + EOF_MARKER.len();
        if data.get(end) == Some(&b'\r') {
            end += 1;
        }
        if data.get(end) == Some(&b'\n') {
            end += 1;
        }

        let trailer = trailer_in(&data[start..pos], max_nesting).or_else(|| {
            structure
                .objects
                .iter()
                .filter(|o| o.offset >= start && o.offset < pos && o.compressed_in.is_none())
                .filter(|o| o.object.get("Type").and_then(Object::as_name) == Some("XRef"))
                .last()
                .and_then(|o| o.object.as_dict().cloned())
        });

        revisions.push(Revision {
            number: revisions.len() + 1,
            end,
            trailer,
        });
        start = end;
        search = end;
    }
    revisions
}

fn trailer_in(region: &[u8], max_nesting: usize) -> Option<Dict> {
    let found = RE_TRAILER.as_ref()?.find_iter(region).last()?;
    let dict_start = found.end() - 2;
    let (_, object) = parse_object_with_limit(&region[dict_start..], max_nesting).ok()?;
    object.as_dict().cloned()
}

/// Offset of the first occurrence of `needle` in `haystack`.
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Offset of the last occurrence of `needle` in `haystack`.
pub(crate) fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

fn parse_object_stream(stream: &Object, max_nesting: usize) -> Result<Vec<(u32, Object)>, String> {
    let n = stream
        .get("N")
        .and_then(Object::as_integer)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or("missing /N")?;
    let first = stream
        .get("First")
        .and_then(Object::as_integer)
        .and_then(|f| usize::try_from(f).ok())
        .ok_or("missing /First")?;

    let decoded = stream.decode_stream_data().map_err(|e| e.to_string())?;
    if decoded.len() < first {
        return Err(format!("decoded data shorter than /First ({} < {})", decoded.len(), first));
    }

    let header = String::from_utf8_lossy(&decoded[..first]);
    let numbers: Vec<usize> = header.split_ascii_whitespace().filter_map(|t| t.parse().ok()).collect();
    let body = &decoded[first..];

    let mut members = Vec::new();
    for pair in numbers.chunks_exact(2).take(n) {
        let (number, offset) = (pair[0], pair[1]);
        let Ok(number) = u32::try_from(number) else {
            continue;
        };
        let Some(slice) = body.get(offset..) else {
            log::warn!("Compressed object {} offset {} beyond stream data", number, offset);
            continue;
        };
        match parse_object_with_limit(slice, max_nesting) {
            Ok((_, object)) => members.push((number, object)),
            Err(_) => log::warn!("Compressed object {} could not be parsed", number),
        }
    }
    Ok(members)
}
