//! Byte sources that can be validated.
//!
//! A [`DssDocument`] is anything that can hand out a fresh reader over its
//! bytes. Each instance carries a process-unique [`DocumentId`] so that
//! derived views (see [`crate::byterange::PdfByteRangeDocument`]) can be
//! compared by identity instead of by content.

use crate::byterange::ByteRange;
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Process-unique identity of a document instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Allocate a fresh identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic identity of a byte-range view over `parent`.
    pub fn derived(parent: DocumentId, range: &ByteRange) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(parent.0.as_bytes());
        for value in [range.start1(), range.len1(), range.start2(), range.len2()] {
            hasher.update(value.to_be_bytes());
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A readable document.
pub trait DssDocument: Send + Sync {
    /// Open a new reader positioned at the first byte.
    fn open_stream(&self) -> Result<Box<dyn Read + '_>>;

    /// Identity used for equality of derived views.
    fn identity(&self) -> DocumentId;

    /// Human-readable name, if any.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Read the whole document into memory.
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.open_stream()?.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Document held in memory.
#[derive(Clone)]
pub struct InMemoryDocument {
    id: DocumentId,
    bytes: Arc<[u8]>,
    name: Option<String>,
}

impl InMemoryDocument {
    /// Wrap `bytes` under a new identity.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            id: DocumentId::new(),
            bytes: Arc::from(bytes.into()),
            name: None,
        }
    }

    /// Attach a display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Borrow the raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for InMemoryDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryDocument")
            .field("id", &self.id)
            .field("len", &self.bytes.len())
            .field("name", &self.name)
            .finish()
    }
}

impl DssDocument for InMemoryDocument {
    fn open_stream(&self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(Cursor::new(&self.bytes[..])))
    }

    fn identity(&self) -> DocumentId {
        self.id
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.bytes.to_vec())
    }
}

/// Document backed by a file on disk; every stream reopens the file.
#[derive(Debug, Clone)]
pub struct FileDocument {
    id: DocumentId,
    path: PathBuf,
    name: Option<String>,
}

impl FileDocument {
    /// Refer to the file at `path`. The file is not opened until read.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        Self {
            id: DocumentId::new(),
            path,
            name,
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DssDocument for FileDocument {
    fn open_stream(&self) -> Result<Box<dyn Read + '_>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn identity(&self) -> DocumentId {
        self.id
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_in_memory_document() {
        let doc = InMemoryDocument::new(b"%PDF-1.7".to_vec()).with_name("mem.pdf");
        assert_eq!(doc.to_bytes().unwrap(), b"%PDF-1.7");
        assert_eq!(doc.name(), Some("mem.pdf"));
    }

    #[test]
    fn test_identities_are_distinct() {
        let a = InMemoryDocument::new(b"same".to_vec());
        let b = InMemoryDocument::new(b"same".to_vec());
        assert_ne!(a.identity(), b.identity());
        assert_eq!(a.clone().identity(), a.identity());
    }

    #[test]
    fn test_file_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"%PDF-1.4\nbody").unwrap();
        let doc = FileDocument::new(file.path());
        let mut buf = String::new();
        doc.open_stream().unwrap().read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "%PDF-1.4\nbody");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let doc = FileDocument::new("/nonexistent/definitely/missing.pdf");
        assert!(matches!(doc.open_stream(), Err(crate::Error::Io(_))));
    }
}
