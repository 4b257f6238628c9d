use super::{ByteRange, ByteRangeInputStream};
use crate::document::{DocumentId, DssDocument};
use crate::error::Result;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::Read;
use std::sync::Arc;

/// The bytes of `source` selected by a [`ByteRange`], as a document.
///
/// Two views are equal when they wrap the same source identity with the same
/// range; their contents are never compared. Since a view is itself a
/// [`DssDocument`], a range can be applied to the output of another range.
#[derive(Clone)]
pub struct PdfByteRangeDocument {
    source: Arc<dyn DssDocument>,
    range: ByteRange,
    id: DocumentId,
}

impl PdfByteRangeDocument {
    /// View `source` through `range`.
    pub fn new(source: Arc<dyn DssDocument>, range: ByteRange) -> Self {
        let id = DocumentId::derived(source.identity(), &range);
        Self { source, range, id }
    }

    /// Apply `range` to the output of this view.
    pub fn nested(&self, range: ByteRange) -> Self {
        Self::new(Arc::new(self.clone()), range)
    }

    /// The applied range.
    pub fn byte_range(&self) -> ByteRange {
        self.range
    }

    /// The wrapped document.
    pub fn source(&self) -> &Arc<dyn DssDocument> {
        &self.source
    }
}

impl DssDocument for PdfByteRangeDocument {
    fn open_stream(&self) -> Result<Box<dyn Read + '_>> {
        let inner = self.source.open_stream()?;
        Ok(Box::new(ByteRangeInputStream::new(inner, self.range)))
    }

    fn identity(&self) -> DocumentId {
        self.id
    }

    fn name(&self) -> Option<&str> {
        self.source.name()
    }
}

impl PartialEq for PdfByteRangeDocument {
    fn eq(&self, other: &Self) -> bool {
        self.source.identity() == other.source.identity() && self.range == other.range
    }
}

impl Eq for PdfByteRangeDocument {}

impl Hash for PdfByteRangeDocument {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.identity().hash(state);
        self.range.hash(state);
    }
}

impl fmt::Debug for PdfByteRangeDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfByteRangeDocument")
            .field("source", &self.source.identity())
            .field("range", &self.range)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::InMemoryDocument;
    use std::collections::HashSet;

    fn alphabet() -> Arc<dyn DssDocument> {
        Arc::new(InMemoryDocument::new(b"0123456789abcdefghijklmnopqrstuvwxyz".to_vec()))
    }

    #[test]
    fn test_view_bytes() {
        let view = PdfByteRangeDocument::new(alphabet(), ByteRange::new(0, 4, 10, 5).unwrap());
        assert_eq!(view.to_bytes().unwrap(), b"0123abcde");
    }

    #[test]
    fn test_nested_view_offsets_are_relative() {
        let outer = PdfByteRangeDocument::new(alphabet(), ByteRange::new(0, 10, 20, 10).unwrap());
        // outer yields "0123456789klmnopqrst"
        let inner = outer.nested(ByteRange::new(8, 4, 16, 2).unwrap());
        assert_eq!(inner.to_bytes().unwrap(), b"89klqr");
    }

    #[test]
    fn test_equality_by_identity_and_range() {
        let source = alphabet();
        let range = ByteRange::new(0, 4, 10, 5).unwrap();
        let a = PdfByteRangeDocument::new(source.clone(), range);
        let b = PdfByteRangeDocument::new(source.clone(), range);
        let other_source = PdfByteRangeDocument::new(alphabet(), range);
        let other_range = PdfByteRangeDocument::new(source, ByteRange::new(0, 4, 10, 6).unwrap());

        assert_eq!(a, b);
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a, other_source);
        assert_ne!(a, other_range);

        let set: HashSet<_> = [a, b, other_source, other_range].into_iter().collect();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_nested_views_compare_equal() {
        let outer = PdfByteRangeDocument::new(alphabet(), ByteRange::new(0, 10, 20, 10).unwrap());
        let range = ByteRange::new(1, 2, 5, 1).unwrap();
        assert_eq!(outer.nested(range), outer.nested(range));
    }
}
