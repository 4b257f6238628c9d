//! PAdES validation of a whole PDF file.

use super::dss::{DocumentSecurityStore, DssContent};
use super::scanner::{find, PdfStructure};
use super::signature::{check_contents_gap, find_signatures, PdfSignatureDictionary};
use crate::byterange::{ByteRange, PdfByteRangeDocument};
use crate::cms::CmsSignedData;
use crate::config::ValidationConfig;
use crate::diagnostic::{DiagnosticData, DssReport, SignatureReport, SignatureReportKind};
use crate::digest::DigestAlgorithm;
use crate::document::DssDocument;
use crate::error::{Error, Result};
use crate::validation::{SignerCheck, SignerInput};
use crate::verifier::CertificateVerifier;
use chrono::{DateTime, Utc};
use std::io::Read;
use std::sync::Arc;

const PDF_MAGIC: &[u8] = b"%PDF-";
const HEADER_SEARCH_WINDOW: u64 = 1024;

/// An intact document timestamp, usable as proof of existence.
struct ProvenTimestamp {
    id: String,
    range: ByteRange,
    gen_time: DateTime<Utc>,
}

/// Validates every signature and document timestamp of a PDF.
///
/// # Example
///
/// ```ignore
/// use pades_trust::{CertificatePool, CertificateVerifier, FileDocument, PdfSignatureValidator};
/// use std::sync::Arc;
///
/// let pool = Arc::new(CertificatePool::new());
/// let verifier = Arc::new(CertificateVerifier::new(pool));
/// let validator = PdfSignatureValidator::new(Arc::new(FileDocument::new("signed.pdf")))
///     .with_certificate_verifier(verifier);
/// let diagnostic = validator.validate()?;
/// for signature in &diagnostic.signatures {
///     println!("{}: intact={}", signature.id, signature.intact);
/// }
/// ```
pub struct PdfSignatureValidator {
    document: Arc<dyn DssDocument>,
    verifier: Option<Arc<CertificateVerifier>>,
    config: ValidationConfig,
}

impl PdfSignatureValidator {
    /// Validator for `document`, with default configuration.
    pub fn new(document: Arc<dyn DssDocument>) -> Self {
        Self {
            document,
            verifier: None,
            config: ValidationConfig::default(),
        }
    }

    /// Set the certificate verifier (required before [`validate`](Self::validate)).
    pub fn with_certificate_verifier(mut self, verifier: Arc<CertificateVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_config(mut self, config: ValidationConfig) -> Self {
        self.config = config;
        self
    }

    /// Whether `document` starts like a PDF (`%PDF-` within its first KiB).
    pub fn is_supported(document: &dyn DssDocument) -> bool {
        let mut head = Vec::new();
        let read = document
            .open_stream()
            .and_then(|stream| Ok(stream.take(HEADER_SEARCH_WINDOW).read_to_end(&mut head)?));
        read.is_ok() && find(&head, PDF_MAGIC).is_some()
    }

    fn load(&self) -> Result<Vec<u8>> {
        let data = self.document.to_bytes()?;
        if self.config.max_file_size > 0 && data.len() > self.config.max_file_size {
            return Err(Error::Unsupported(format!(
                "document of {} bytes exceeds the {} byte limit",
                data.len(),
                self.config.max_file_size
            )));
        }
        let window = data.len().min(HEADER_SEARCH_WINDOW as usize);
        if find(&data[..window], PDF_MAGIC).is_none() {
            return Err(Error::InvalidHeader("missing '%PDF-' header".to_string()));
        }
        Ok(data)
    }

    /// Signature dictionaries of the document, ordered by byte-range end.
    ///
    /// A damaged PDF yields an empty list; only a missing `%PDF-` header is an error.
    pub fn signatures(&self) -> Result<Vec<PdfSignatureDictionary>> {
        let data = self.load()?;
        Ok(find_signatures(&PdfStructure::scan(&data, self.config.max_nesting)))
    }

    /// Run the full validation.
    ///
    /// Fails only when no certificate verifier is configured, when the
    /// document is not a PDF, or when it cannot be read.
    pub fn validate(&self) -> Result<DiagnosticData> {
        let verifier = self
            .verifier
            .as_ref()
            .ok_or_else(|| Error::Configuration("no certificate verifier configured".to_string()))?;
        let data = self.load()?;

        let validation_time = self.config.resolved_validation_time();
        let config = self.config.clone().with_validation_time(validation_time);
        let structure = PdfStructure::scan(&data, config.max_nesting);
        let signatures = find_signatures(&structure);
        let dss = DocumentSecurityStore::extract(&structure);
        let size = data.len() as u64;

        let mut diagnostic = DiagnosticData::new(self.document.name().map(str::to_string), size, validation_time);
        diagnostic.dss = dss
            .revisions()
            .iter()
            .map(|r| DssReport {
                revision: r.revision,
                certificates: r.certificates.len(),
                crls: r.crls.len(),
                ocsps: r.ocsps.len(),
            })
            .collect();

        let check = SignerCheck {
            verifier,
            config: &config,
        };

        // Latest first, so covering timestamps are settled before what they cover.
        let mut reports: Vec<Option<SignatureReport>> = vec![None; signatures.len()];
        let mut proven: Vec<ProvenTimestamp> = Vec::new();
        for (index, signature) in signatures.iter().enumerate().rev() {
            let mut report = self.describe(signature, &signatures, &data, &structure, &dss);

            let covering: Vec<&ProvenTimestamp> =
                proven.iter().filter(|t| t.range.covers(&signature.byte_range)).collect();
            let proven_at = covering.iter().map(|t| t.gen_time).min();
            if let Some(outer) = covering.first() {
                report.nested_digest_consistent = Some(self.nested_view_consistent(&outer.range, &signature.byte_range)?);
                if report.nested_digest_consistent == Some(false) {
                    report.finding(format!("bytes seen through '{}' differ from the direct view", outer.id));
                }
            }

            match CmsSignedData::from_der(&signature.contents) {
                Ok(cms) => {
                    if signature.is_timestamp() != cms.is_timestamp() {
                        report.finding(format!(
                            "dictionary type {:?} does not match CMS content type {}",
                            signature.kind,
                            cms.content_type()
                        ));
                    }
                    let view = PdfByteRangeDocument::new(self.document.clone(), signature.byte_range);
                    let material = validation_material(&dss, signature);
                    let involved = check.run(
                        SignerInput {
                            cms: &cms,
                            signed: &view,
                            extra_certificates: &material.certificates,
                            extra_crls: &material.crls,
                            extra_ocsps: &material.ocsps,
                            proven_at,
                        },
                        &mut report,
                    )?;
                    for token in involved {
                        diagnostic.add_certificate(&token);
                    }

                    if signature.is_timestamp() && report.intact && report.signature_valid == Some(true) {
                        if let Some(gen_time) = report.timestamp_time {
                            proven.push(ProvenTimestamp {
                                id: report.id.clone(),
                                range: signature.byte_range,
                                gen_time,
                            });
                        }
                    }
                },
                Err(e) => report.finding(format!("CMS SignedData could not be decoded: {}", e)),
            }

            reports[index] = Some(report);
        }
        diagnostic.signatures = reports.into_iter().flatten().collect();

        check_ordering(&signatures, &mut diagnostic);
        check_unsigned_updates(&signatures, &structure, &mut diagnostic);

        log::info!(
            "Validated {}: {} signatures, {} valid, {} certificates",
            diagnostic.document_name.as_deref().unwrap_or("document"),
            diagnostic.signatures.len(),
            diagnostic.signatures.iter().filter(|s| s.is_valid()).count(),
            diagnostic.certificates.len()
        );
        Ok(diagnostic)
    }

    /// Report fields that need no cryptography.
    fn describe(
        &self,
        signature: &PdfSignatureDictionary,
        all: &[PdfSignatureDictionary],
        data: &[u8],
        structure: &PdfStructure,
        dss: &DocumentSecurityStore,
    ) -> SignatureReport {
        let kind = if signature.is_timestamp() {
            SignatureReportKind::DocumentTimestamp
        } else {
            SignatureReportKind::PdfSignature
        };
        let range = signature.byte_range;
        let mut report = SignatureReport::new(signature.label(), kind);
        report.sub_filter = signature.sub_filter.clone();
        report.byte_range = Some(range);
        report.claimed_signing_time = signature.signing_time;
        report.revision = usize::try_from(range.end())
            .ok()
            .and_then(|end| structure.revision_at(end.saturating_sub(1)))
            .map(|r| r.number);
        report.covers_whole_document = Some(range.spans_document(data.len() as u64));
        let gap_start = usize::try_from(range.start1() + range.len1()).unwrap_or(usize::MAX);
        report.covered_dss_revisions = dss.revisions_before(gap_start).map(|r| r.revision).collect();

        match check_contents_gap(data, &range, &signature.contents) {
            Ok(()) => report.contents_gap_valid = Some(true),
            Err(reason) => {
                report.contents_gap_valid = Some(false);
                report.finding(format!("ByteRange gap does not hold /Contents: {}", reason));
            },
        }

        report.covered_by = all
            .iter()
            .filter(|other| other.is_timestamp() && other.reference != signature.reference)
            .filter(|other| other.byte_range.covers(&range))
            .map(PdfSignatureDictionary::label)
            .collect();
        report
    }

    /// Digest `inner` once directly and once through the view of `outer`.
    fn nested_view_consistent(&self, outer: &ByteRange, inner: &ByteRange) -> Result<bool> {
        let shift = outer.start1();
        let relative = ByteRange::new(
            inner.start1() - shift,
            inner.len1(),
            inner.start2() - shift,
            inner.len2(),
        )?;
        let direct = PdfByteRangeDocument::new(self.document.clone(), *inner);
        let nested = PdfByteRangeDocument::new(self.document.clone(), *outer).nested(relative);

        let algorithm = DigestAlgorithm::Sha256;
        let mut direct_stream = direct.open_stream()?;
        let direct_digest = algorithm.digest_reader(&mut direct_stream)?;
        let mut nested_stream = nested.open_stream()?;
        let nested_digest = algorithm.digest_reader(&mut nested_stream)?;
        Ok(direct_digest == nested_digest)
    }
}

/// DSS content a signature is validated with.
///
/// Signatures see every revision, since long-term material is appended after
/// signing. A document timestamp only sees the revisions ending before its own.
fn validation_material(dss: &DocumentSecurityStore, signature: &PdfSignatureDictionary) -> DssContent {
    if signature.is_timestamp() {
        dss.visible_at(usize::try_from(signature.byte_range.end()).unwrap_or(usize::MAX))
    } else {
        dss.merged()
    }
}

/// Coverage must grow with each revision, and a timestamp may only cover
/// what was written before it.
fn check_ordering(signatures: &[PdfSignatureDictionary], diagnostic: &mut DiagnosticData) {
    for pair in signatures.windows(2) {
        let (earlier, later) = (&pair[0], &pair[1]);
        if earlier.byte_range == later.byte_range {
            diagnostic.finding(format!(
                "'{}' and '{}' sign the same byte range",
                earlier.label(),
                later.label()
            ));
        } else if earlier.byte_range.end() >= later.byte_range.end() {
            diagnostic.finding(format!(
                "coverage does not increase from '{}' to '{}'",
                earlier.label(),
                later.label()
            ));
        }
    }

    for outer in signatures.iter().filter(|s| s.is_timestamp()) {
        if u64::try_from(outer.offset).map_or(true, |offset| offset >= outer.byte_range.end()) {
            diagnostic.finding(format!("'{}' lies outside its own signed range", outer.label()));
        }
        for inner in signatures.iter().filter(|s| s.reference != outer.reference) {
            if outer.byte_range.covers(&inner.byte_range) && outer.offset < inner.offset {
                diagnostic.finding(format!(
                    "'{}' covers '{}' although it was written before it",
                    outer.label(),
                    inner.label()
                ));
            }
        }
    }
}

fn check_unsigned_updates(
    signatures: &[PdfSignatureDictionary],
    structure: &PdfStructure,
    diagnostic: &mut DiagnosticData,
) {
    if signatures.is_empty() {
        diagnostic.finding("document holds no signature");
        return;
    }
    let signed_end = signatures.iter().map(|s| s.byte_range.end()).max().unwrap_or(0);
    let unsigned = structure
        .revisions()
        .iter()
        .filter(|r| r.end as u64 > signed_end)
        .count();
    if unsigned > 0 {
        diagnostic.finding(format!(
            "{} incremental update(s) after byte {} are not covered by any signature",
            unsigned, signed_end
        ));
    } else if (structure.size() as u64) > signed_end {
        diagnostic.finding(format!(
            "{} trailing bytes are not covered by any signature",
            structure.size() as u64 - signed_end
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::InMemoryDocument;
    use crate::x509::CertificatePool;

    fn pdf(name: &str) -> Arc<dyn DssDocument> {
        let bytes = std::fs::read(format!("{}/tests/fixtures/pdf/{}", env!("CARGO_MANIFEST_DIR"), name)).unwrap();
        Arc::new(InMemoryDocument::new(bytes).with_name(name))
    }

    fn verifier() -> Arc<CertificateVerifier> {
        Arc::new(CertificateVerifier::new(Arc::new(CertificatePool::new())))
    }

    #[test]
    fn test_is_supported() {
        assert!(PdfSignatureValidator::is_supported(pdf("unsigned.pdf").as_ref()));
        assert!(!PdfSignatureValidator::is_supported(&InMemoryDocument::new(b"PK\x03\x04".to_vec())));
    }

    #[test]
    fn test_missing_verifier_is_fatal() {
        let err = PdfSignatureValidator::new(pdf("signed_single.pdf")).validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_not_a_pdf_is_rejected() {
        let validator = PdfSignatureValidator::new(Arc::new(InMemoryDocument::new(b"\x30\x03\x02\x01\x00".to_vec())))
            .with_certificate_verifier(verifier());
        assert!(matches!(validator.validate(), Err(Error::InvalidHeader(_))));
        assert!(matches!(validator.signatures(), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn test_size_limit() {
        let validator = PdfSignatureValidator::new(pdf("unsigned.pdf"))
            .with_config(ValidationConfig::new().with_max_file_size(16));
        assert!(matches!(validator.signatures(), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_malformed_pdf_has_no_signatures() {
        let validator =
            PdfSignatureValidator::new(Arc::new(InMemoryDocument::new(b"%PDF-1.7\n1 0 obj << /ByteRange [".to_vec())));
        assert!(validator.signatures().unwrap().is_empty());
    }

    #[test]
    fn test_unsigned_document_finding() {
        let diagnostic = PdfSignatureValidator::new(pdf("unsigned.pdf"))
            .with_certificate_verifier(verifier())
            .validate()
            .unwrap();
        assert!(diagnostic.signatures.is_empty());
        assert!(diagnostic.findings.iter().any(|f| f.contains("no signature")));
    }

    #[test]
    fn test_nested_view_consistency() {
        let validator = PdfSignatureValidator::new(pdf("signed_three_revisions.pdf"));
        let signatures = validator.signatures().unwrap();
        let outer = signatures[2].byte_range;
        assert!(validator
            .nested_view_consistent(&outer, &signatures[0].byte_range)
            .unwrap());
        assert!(validator
            .nested_view_consistent(&outer, &signatures[1].byte_range)
            .unwrap());
    }

    #[test]
    fn test_timestamp_ignores_later_dss() {
        let document = pdf("signed_ocsp_dss.pdf");
        let data = document.to_bytes().unwrap();
        let structure = PdfStructure::scan(&data, 100);
        let dss = DocumentSecurityStore::extract(&structure);
        let signatures = find_signatures(&structure);
        assert_eq!(signatures.len(), 2);
        assert_eq!(dss.revisions().len(), 1);

        let signature = validation_material(&dss, &signatures[0]);
        assert_eq!(signature.certificates.len(), 1);
        assert_eq!(signature.ocsps.len(), 1);

        assert!(signatures[1].is_timestamp());
        assert!(validation_material(&dss, &signatures[1]).is_empty());
    }

    #[test]
    fn test_timestamp_sees_earlier_dss() {
        let document = pdf("signed_three_revisions.pdf");
        let data = document.to_bytes().unwrap();
        let structure = PdfStructure::scan(&data, 100);
        let dss = DocumentSecurityStore::extract(&structure);
        let signatures = find_signatures(&structure);
        let material = validation_material(&dss, &signatures[2]);
        assert_eq!(material.certificates.len(), 2);
        assert_eq!(material.crls.len(), 1);
    }
}
