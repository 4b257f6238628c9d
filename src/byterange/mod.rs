//! Signed byte ranges.
//!
//! A PDF signature covers the file through a `/ByteRange` array of four
//! integers `[start1 length1 start2 length2]`. The gap between the two
//! intervals holds the hex-encoded CMS value itself.
//!
//! [`ByteRangeInputStream`] filters any reader down to those intervals and
//! [`PdfByteRangeDocument`] exposes the filtered view as a document of its
//! own, so ranges can be stacked on top of each other.

mod document;
mod stream;

pub use document::PdfByteRangeDocument;
pub use stream::ByteRangeInputStream;

use crate::error::{Error, Result};
use crate::object::Object;
use serde::Serialize;
use std::fmt;

/// One contiguous interval, as `(start, length)`.
pub type Segment = (u64, u64);

/// Two disjoint intervals of a source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ByteRange {
    start1: u64,
    len1: u64,
    start2: u64,
    len2: u64,
}

impl ByteRange {
    /// Build a range, rejecting overlapping intervals.
    pub fn new(start1: u64, len1: u64, start2: u64, len2: u64) -> Result<Self> {
        let first_end = start1.checked_add(len1).ok_or_else(|| overflow(start1, len1))?;
        start2.checked_add(len2).ok_or_else(|| overflow(start2, len2))?;

        if start2 < first_end {
            return Err(Error::ParseError {
                offset: 0,
                reason: format!(
                    "ByteRange intervals overlap: second start {} < first end {}",
                    start2, first_end
                ),
            });
        }

        Ok(Self {
            start1,
            len1,
            start2,
            len2,
        })
    }

    /// Parse from integer values as found in a `/ByteRange` array.
    pub fn from_values(values: &[i64]) -> Result<Self> {
        let [s1, l1, s2, l2] = values else {
            return Err(Error::ParseError {
                offset: 0,
                reason: format!("ByteRange needs 4 integers, found {}", values.len()),
            });
        };

        let mut parts = [0u64; 4];
        for (slot, &value) in parts.iter_mut().zip([s1, l1, s2, l2]) {
            *slot = u64::try_from(value).map_err(|_| Error::ParseError {
                offset: 0,
                reason: format!("negative ByteRange value {}", value),
            })?;
        }

        Self::new(parts[0], parts[1], parts[2], parts[3])
    }

    /// Parse from a `/ByteRange` array object.
    pub fn from_object(object: &Object) -> Result<Self> {
        let items = object.as_array().ok_or_else(|| Error::ParseError {
            offset: 0,
            reason: format!("ByteRange must be an array, found {}", object.type_name()),
        })?;

        let values = items
            .iter()
            .map(|item| {
                item.as_integer().ok_or_else(|| Error::ParseError {
                    offset: 0,
                    reason: format!("ByteRange element is {}", item.type_name()),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_values(&values)
    }

    /// Start of the first interval.
    pub fn start1(&self) -> u64 {
        self.start1
    }

    /// Length of the first interval.
    pub fn len1(&self) -> u64 {
        self.len1
    }

    /// Start of the second interval.
    pub fn start2(&self) -> u64 {
        self.start2
    }

    /// Length of the second interval.
    pub fn len2(&self) -> u64 {
        self.len2
    }

    /// Number of bytes selected, before clamping.
    pub fn signed_length(&self) -> u64 {
        self.len1 + self.len2
    }

    /// Offset one past the last selected byte.
    pub fn end(&self) -> u64 {
        self.start2 + self.len2
    }

    /// The excluded gap, as `(start, end)`.
    pub fn gap(&self) -> (u64, u64) {
        (self.start1 + self.len1, self.start2)
    }

    /// Both intervals as `(start, length)` pairs.
    pub fn segments(&self) -> [Segment; 2] {
        [(self.start1, self.len1), (self.start2, self.len2)]
    }

    /// Whether `other` lies entirely inside this range's first interval.
    ///
    /// An incremental-update signature covers every revision whose range ends
    /// before its own `/Contents` gap.
    pub fn covers(&self, other: &ByteRange) -> bool {
        self.start1 <= other.start1 && other.end() <= self.start1 + self.len1
    }

    /// Whether the range starts at 0 and ends exactly at `file_size`.
    pub fn spans_document(&self, file_size: u64) -> bool {
        self.start1 == 0 && self.end() == file_size
    }

    /// Copy the selected bytes out of `data`, clamping to its length.
    pub fn extract(&self, data: &[u8]) -> Vec<u8> {
        let bounds = self.segments().map(|(start, len)| {
            let from = clamp_offset(start, data.len());
            let to = clamp_offset(start.saturating_add(len), data.len());
            (from, to.max(from))
        });
        let mut out = Vec::with_capacity(bounds.iter().map(|(from, to)| to - from).sum());
        for (from, to) in bounds {
            out.extend_from_slice(&data[from..to]);
        }
        out
    }
}

fn clamp_offset(offset: u64, len: usize) -> usize {
    usize::try_from(offset).map_or(len, |o| o.min(len))
}

fn overflow(start: u64, len: u64) -> Error {
    Error::ParseError {
        offset: 0,
        reason: format!("ByteRange interval {}+{} overflows", start, len),
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {} {} {}]", self.start1, self.len1, self.start2, self.len2)
    }
}

/// Absolute intervals selected by a stack of ranges.
///
/// `ranges[0]` applies to the source document, each following range to the
/// output of the one before it. Empty intervals are dropped.
pub fn flatten(ranges: &[ByteRange]) -> Vec<Segment> {
    let mut current: Option<Vec<Segment>> = None;

    for range in ranges {
        let next = match &current {
            None => range.segments().to_vec(),
            Some(parent) => range
                .segments()
                .iter()
                .flat_map(|&(start, len)| project(parent, start, len))
                .collect(),
        };
        current = Some(next.into_iter().filter(|&(_, len)| len > 0).collect());
    }

    current.unwrap_or_default()
}

/// Map `[start, start+len)` of the logical stream described by `parent`
/// back to absolute intervals.
fn project(parent: &[Segment], start: u64, len: u64) -> Vec<Segment> {
    let mut out = Vec::new();
    let end = start.saturating_add(len);
    let mut logical = 0u64;

    for &(abs_start, seg_len) in parent {
        let seg_end = logical + seg_len;
        let lo = start.max(logical);
        let hi = end.min(seg_end);
        if lo < hi {
            out.push((abs_start + (lo - logical), hi - lo));
        }
        logical = seg_end;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_overlap() {
        assert!(ByteRange::new(0, 100, 50, 10).is_err());
        assert!(ByteRange::new(0, 100, 100, 10).is_ok());
    }

    #[test]
    fn test_from_values() {
        let range = ByteRange::from_values(&[0, 755, 17141, 262]).unwrap();
        assert_eq!(range.end(), 17403);
        assert_eq!(range.gap(), (755, 17141));
        assert_eq!(range.signed_length(), 1017);
        assert!(ByteRange::from_values(&[0, -1, 10, 1]).is_err());
        assert!(ByteRange::from_values(&[0, 1, 10]).is_err());
    }

    #[test]
    fn test_from_object() {
        let obj = Object::Array(vec![
            Object::Integer(0),
            Object::Integer(4),
            Object::Integer(10),
            Object::Integer(5),
        ]);
        assert_eq!(ByteRange::from_object(&obj).unwrap(), ByteRange::new(0, 4, 10, 5).unwrap());
        assert!(ByteRange::from_object(&Object::Integer(0)).is_err());
    }

    #[test]
    fn test_extract_clamps() {
        let data = b"AAABBBCCC";
        assert_eq!(ByteRange::new(0, 3, 6, 3).unwrap().extract(data), b"AAACCC");
        assert_eq!(ByteRange::new(0, 3, 6, 30).unwrap().extract(data), b"AAACCC");
        assert_eq!(ByteRange::new(20, 3, 30, 3).unwrap().extract(data), b"");
    }

    #[test]
    fn test_extract_huge_length_is_clamped() {
        let range = ByteRange::new(0, 1, 2, 1 << 63).unwrap();
        assert_eq!(range.extract(b"abc"), b"ac");
        let range = ByteRange::new(0, u64::MAX / 2, u64::MAX / 2, u64::MAX / 2).unwrap();
        assert_eq!(range.extract(b"abc"), b"abc");
    }

    #[test]
    fn test_covers() {
        let first = ByteRange::new(0, 760, 17146, 262).unwrap();
        let second = ByteRange::new(0, 17707, 34093, 264).unwrap();
        assert!(second.covers(&first));
        assert!(!first.covers(&second));
        assert!(!first.covers(&first));
    }

    #[test]
    fn test_spans_document() {
        let range = ByteRange::new(0, 755, 17141, 262).unwrap();
        assert!(range.spans_document(17403));
        assert!(!range.spans_document(17664));
    }

    #[test]
    fn test_flatten_nested() {
        let outer = ByteRange::new(0, 10, 20, 10).unwrap();
        // Logical stream of `outer` is bytes 0..10 then 20..30
        let inner = ByteRange::new(5, 10, 18, 2).unwrap();
        assert_eq!(flatten(&[outer, inner]), vec![(5, 5), (20, 5), (28, 2)]);
    }

    #[test]
    fn test_display() {
        assert_eq!(ByteRange::new(0, 4, 10, 5).unwrap().to_string(), "[0 4 10 5]");
    }
}
