//! Document Security Store.
//!
//! Each incremental revision may rewrite the catalog's `/DSS`. Every
//! revision's store is read as it was visible at that revision, and only
//! entries not seen in an earlier revision are recorded for it, so the
//! material visible at any point of the file is the union of all revisions
//! ending before that point.

use super::scanner::PdfStructure;
use crate::object::Object;

/// Entries introduced by one revision's DSS.
#[derive(Debug, Clone, Default)]
pub struct DssRevision {
    /// Revision number (1-based)
    pub revision: usize,
    /// Offset just past the revision's `%%EOF`
    pub end: usize,
    pub certificates: Vec<Vec<u8>>,
    pub crls: Vec<Vec<u8>>,
    pub ocsps: Vec<Vec<u8>>,
}

impl DssRevision {
    fn is_empty(&self) -> bool {
        self.certificates.is_empty() && self.crls.is_empty() && self.ocsps.is_empty()
    }
}

/// Merged view of DSS content.
#[derive(Debug, Clone, Default)]
pub struct DssContent {
    pub certificates: Vec<Vec<u8>>,
    pub crls: Vec<Vec<u8>>,
    pub ocsps: Vec<Vec<u8>>,
}

impl DssContent {
    fn merge(&mut self, revision: &DssRevision) {
        extend_unique(&mut self.certificates, &revision.certificates);
        extend_unique(&mut self.crls, &revision.crls);
        extend_unique(&mut self.ocsps, &revision.ocsps);
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty() && self.crls.is_empty() && self.ocsps.is_empty()
    }
}

/// All DSS revisions of a document.
#[derive(Debug, Clone, Default)]
pub struct DocumentSecurityStore {
    revisions: Vec<DssRevision>,
}

impl DocumentSecurityStore {
    /// Read the DSS of every revision.
    pub fn extract(structure: &PdfStructure) -> Self {
        let mut seen = DssContent::default();
        let mut revisions = Vec::new();

        for revision in structure.revisions() {
            let Some(dss) = structure
                .catalog_before(revision.end)
                .and_then(|catalog| catalog.get("DSS"))
                .and_then(|dss| structure.deref_before(dss, revision.end))
            else {
                continue;
            };

            let read = |key: &str| collect_streams(structure, dss.get(key), revision.end);
            let mut introduced = DssRevision {
                revision: revision.number,
                end: revision.end,
                certificates: read("Certs"),
                crls: read("CRLs"),
                ocsps: read("OCSPs"),
            };
            introduced.certificates.retain(|c| !seen.certificates.contains(c));
            introduced.crls.retain(|c| !seen.crls.contains(c));
            introduced.ocsps.retain(|c| !seen.ocsps.contains(c));

            if introduced.is_empty() {
                continue;
            }
            log::debug!(
                "Revision {} DSS: {} certificates, {} CRLs, {} OCSP responses",
                introduced.revision,
                introduced.certificates.len(),
                introduced.crls.len(),
                introduced.ocsps.len()
            );
            seen.merge(&introduced);
            revisions.push(introduced);
        }

        Self { revisions }
    }

    /// Revisions that introduced DSS entries.
    pub fn revisions(&self) -> &[DssRevision] {
        &self.revisions
    }

    /// Whether no revision carries a DSS.
    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Revisions ending at or before `offset`.
    pub fn revisions_before(&self, offset: usize) -> impl Iterator<Item = &DssRevision> {
        self.revisions.iter().filter(move |r| r.end <= offset)
    }

    /// Union of the revisions ending at or before `offset`.
    pub fn visible_at(&self, offset: usize) -> DssContent {
        let mut content = DssContent::default();
        for revision in self.revisions_before(offset) {
            content.merge(revision);
        }
        content
    }

    /// Union of every revision.
    pub fn merged(&self) -> DssContent {
        self.visible_at(usize::MAX)
    }
}

fn collect_streams(structure: &PdfStructure, array: Option<&Object>, limit: usize) -> Vec<Vec<u8>> {
    let Some(items) = array
        .and_then(|a| structure.deref_before(a, limit))
        .and_then(Object::as_array)
    else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for item in items {
        let Some(stream) = structure.deref_before(item, limit) else {
            log::warn!("Dangling DSS entry {:?}", item);
            continue;
        };
        match stream.decode_stream_data() {
            Ok(data) => extend_unique(&mut out, std::slice::from_ref(&data)),
            Err(e) => log::warn!("DSS stream could not be decoded: {}", e),
        }
    }
    out
}

fn extend_unique(target: &mut Vec<Vec<u8>>, items: &[Vec<u8>]) {
    for item in items {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}
