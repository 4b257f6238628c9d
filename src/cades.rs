//! CAdES: detached or enveloping CMS signatures outside PDF.

use crate::cms::CmsSignedData;
use crate::config::ValidationConfig;
use crate::diagnostic::{DiagnosticData, SignatureReport, SignatureReportKind};
use crate::document::{DssDocument, InMemoryDocument};
use crate::error::{Error, Result};
use crate::validation::{SignerCheck, SignerInput};
use crate::verifier::CertificateVerifier;
use std::io::Read;
use std::sync::Arc;

/// Validates a CMS SignedData blob against its content.
pub struct CmsDocumentValidator {
    signature: Arc<dyn DssDocument>,
    detached_contents: Vec<Arc<dyn DssDocument>>,
    verifier: Option<Arc<CertificateVerifier>>,
    config: ValidationConfig,
}

impl CmsDocumentValidator {
    /// Validator for the CMS held by `signature`.
    pub fn new(signature: Arc<dyn DssDocument>) -> Self {
        Self {
            signature,
            detached_contents: Vec::new(),
            verifier: None,
            config: ValidationConfig::default(),
        }
    }

    /// Add a candidate for the detached signed content.
    pub fn with_detached_content(mut self, content: Arc<dyn DssDocument>) -> Self {
        self.detached_contents.push(content);
        self
    }

    pub fn with_certificate_verifier(mut self, verifier: Arc<CertificateVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_config(mut self, config: ValidationConfig) -> Self {
        self.config = config;
        self
    }

    /// Whether `document` looks like DER: a leading SEQUENCE tag.
    pub fn is_supported(document: &dyn DssDocument) -> bool {
        let mut first = [0u8; 1];
        document
            .open_stream()
            .and_then(|mut stream| Ok(stream.read_exact(&mut first)?))
            .is_ok()
            && first[0] == 0x30
    }

    /// Run the validation.
    pub fn validate(&self) -> Result<DiagnosticData> {
        let verifier = self
            .verifier
            .as_ref()
            .ok_or_else(|| Error::Configuration("no certificate verifier configured".to_string()))?;
        let bytes = self.signature.to_bytes()?;
        if bytes.first() != Some(&0x30) {
            return Err(Error::InvalidHeader("CMS signature is not DER encoded".to_string()));
        }
        let cms = CmsSignedData::from_der(&bytes)?;

        let validation_time = self.config.resolved_validation_time();
        let config = self.config.clone().with_validation_time(validation_time);
        let name = self.signature.name().map(str::to_string);
        let mut diagnostic = DiagnosticData::new(name.clone(), bytes.len() as u64, validation_time);
        let mut report = SignatureReport::new(name.unwrap_or_else(|| "signature".to_string()), SignatureReportKind::CmsSignature);

        let content: Arc<dyn DssDocument> = match (cms.encapsulated_content(), self.detached_contents.as_slice()) {
            (Some(enveloped), _) => Arc::new(InMemoryDocument::new(enveloped.to_vec())),
            (None, []) => {
                report.finding("detached content is missing");
                diagnostic.signatures.push(report);
                return Ok(diagnostic);
            },
            (None, [only]) => only.clone(),
            (None, candidates) => self.pick_content(&cms, candidates)?,
        };

        let check = SignerCheck {
            verifier,
            config: &config,
        };
        let involved = check.run(
            SignerInput {
                cms: &cms,
                signed: content.as_ref(),
                extra_certificates: &[],
                extra_crls: &[],
                extra_ocsps: &[],
                proven_at: None,
            },
            &mut report,
        )?;
        for token in involved {
            diagnostic.add_certificate(&token);
        }

        log::info!("Validated CMS signature '{}': valid: {}", report.id, report.is_valid());
        diagnostic.signatures.push(report);
        Ok(diagnostic)
    }

    /// The candidate whose digest matches the messageDigest, or the first one.
    fn pick_content(&self, cms: &CmsSignedData, candidates: &[Arc<dyn DssDocument>]) -> Result<Arc<dyn DssDocument>> {
        if let Some(signer) = cms.signer() {
            if let Some(algorithm) = signer.digest_algorithm {
                for candidate in candidates {
                    let digest = algorithm.digest_reader(&mut candidate.open_stream()?)?;
                    if signer.check_message_digest(&digest) == Some(true) {
                        return Ok(candidate.clone());
                    }
                }
            }
        }
        log::debug!("No detached content matches the messageDigest, using the first");
        Ok(candidates[0].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x509::CertificatePool;

    fn cms_fixture(name: &str) -> Arc<dyn DssDocument> {
        let bytes = std::fs::read(format!("{}/tests/fixtures/cms/{}", env!("CARGO_MANIFEST_DIR"), name)).unwrap();
        Arc::new(InMemoryDocument::new(bytes).with_name(name))
    }

    fn verifier() -> Arc<CertificateVerifier> {
        Arc::new(CertificateVerifier::new(Arc::new(CertificatePool::new())))
    }

    #[test]
    fn test_is_supported() {
        assert!(CmsDocumentValidator::is_supported(cms_fixture("payload.p7s").as_ref()));
        assert!(!CmsDocumentValidator::is_supported(cms_fixture("payload.txt").as_ref()));
        assert!(!CmsDocumentValidator::is_supported(&InMemoryDocument::new(Vec::new())));
    }

    #[test]
    fn test_missing_detached_content() {
        let diagnostic = CmsDocumentValidator::new(cms_fixture("payload.p7s"))
            .with_certificate_verifier(verifier())
            .validate()
            .unwrap();
        assert_eq!(diagnostic.signatures.len(), 1);
        assert!(!diagnostic.signatures[0].intact);
        assert!(diagnostic.signatures[0].findings[0].contains("missing"));
    }

    #[test]
    fn test_picks_matching_content() {
        let wrong: Arc<dyn DssDocument> = Arc::new(InMemoryDocument::new(b"something else".to_vec()));
        let diagnostic = CmsDocumentValidator::new(cms_fixture("payload.p7s"))
            .with_detached_content(wrong)
            .with_detached_content(cms_fixture("payload.txt"))
            .with_certificate_verifier(verifier())
            .validate()
            .unwrap();
        let report = &diagnostic.signatures[0];
        assert!(report.intact);
        assert_eq!(report.signature_valid, Some(true));
    }

    #[test]
    fn test_rejects_non_der() {
        let err = CmsDocumentValidator::new(cms_fixture("payload.txt"))
            .with_certificate_verifier(verifier())
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHeader(_)));
    }
}
