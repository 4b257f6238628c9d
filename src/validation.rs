//! Signer-level checks shared by the PDF and CMS validators.

use crate::cms::CmsSignedData;
use crate::config::ValidationConfig;
use crate::diagnostic::SignatureReport;
use crate::digest::to_hex;
use crate::document::DssDocument;
use crate::error::Result;
use crate::verifier::CertificateVerifier;
use crate::x509::{CertificateSourceType, CertificateToken, ChainResolver, OfflineCrlSource, OfflineOcspSource};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// What a signer check works on.
pub(crate) struct SignerInput<'a> {
    /// Decoded CMS
    pub cms: &'a CmsSignedData,
    /// The bytes the CMS signs (or, for timestamps, imprints)
    pub signed: &'a dyn DssDocument,
    /// Certificates found next to the signature (DSS)
    pub extra_certificates: &'a [Vec<u8>],
    /// CRLs found next to the signature (DSS)
    pub extra_crls: &'a [Vec<u8>],
    /// Encoded OCSP responses found next to the signature (DSS)
    pub extra_ocsps: &'a [Vec<u8>],
    /// genTime of intact timestamps covering this signature
    pub proven_at: Option<DateTime<Utc>>,
}

/// Runs digest, signature and chain checks for one SignerInfo.
pub(crate) struct SignerCheck<'a> {
    pub verifier: &'a CertificateVerifier,
    pub config: &'a ValidationConfig,
}

impl SignerCheck<'_> {
    /// Fill `report` and return every certificate involved.
    ///
    /// Only I/O failures on `input.signed` and misconfiguration are errors;
    /// everything else lands in the report.
    pub(crate) fn run(&self, input: SignerInput<'_>, report: &mut SignatureReport) -> Result<Vec<Arc<CertificateToken>>> {
        let pool = self.verifier.pool();
        let own_source = if input.cms.is_timestamp() {
            CertificateSourceType::Timestamp
        } else {
            CertificateSourceType::Signature
        };

        let mut involved = Vec::new();
        for (der, source) in input
            .cms
            .certificates()
            .iter()
            .map(|der| (der, own_source))
            .chain(input.extra_certificates.iter().map(|der| (der, CertificateSourceType::Dss)))
        {
            match pool.get_instance(der, source) {
                Ok(token) => involved.push(token),
                Err(e) => report.finding(format!("certificate rejected: {}", e)),
            }
        }

        let Some(signer) = input.cms.signer() else {
            report.finding("CMS SignedData holds no SignerInfo");
            return Ok(involved);
        };
        if input.cms.signers().len() > 1 {
            report.finding(format!(
                "{} SignerInfos present, only the first is validated",
                input.cms.signers().len()
            ));
        }
        let Some(signer_algorithm) = signer.digest_algorithm else {
            report.finding(format!("unsupported digest algorithm {}", signer.digest_algorithm_oid));
            return Ok(involved);
        };

        // Digest of the signed bytes and what the signature itself covers.
        let mut content_ok = true;
        let mut content = Vec::new();
        match input.cms.tst_info() {
            Some(tst) => {
                report.timestamp_time = Some(tst.gen_time);
                match tst.imprint_algorithm {
                    Some(algorithm) => {
                        let digest = algorithm.digest_reader(&mut input.signed.open_stream()?)?;
                        report.digest_algorithm = Some(algorithm);
                        report.intact = digest == tst.hashed_message;
                        report.signed_digest = Some(to_hex(&digest));
                        if !report.intact {
                            report.finding("timestamp message imprint does not match the covered bytes");
                        }
                    },
                    None => report.finding(format!(
                        "unsupported message imprint algorithm {}",
                        tst.imprint_algorithm_oid
                    )),
                }
                content = input.cms.encapsulated_content().unwrap_or_default().to_vec();
                if signer.check_message_digest(&signer_algorithm.digest(&content)) == Some(false) {
                    report.finding("timestamp messageDigest does not match the TSTInfo");
                    content_ok = false;
                }
            },
            None => {
                let digest = signer_algorithm.digest_reader(&mut input.signed.open_stream()?)?;
                report.digest_algorithm = Some(signer_algorithm);
                report.signed_digest = Some(to_hex(&digest));
                match signer.check_message_digest(&digest) {
                    Some(true) => report.intact = true,
                    Some(false) => report.finding("digest of the signed bytes does not match messageDigest"),
                    None => content = input.signed.to_bytes()?,
                }
            },
        }

        let signing_certificate = signer
            .find_certificate(&involved)
            .or_else(|| signer.find_certificate(&pool.certificates()));
        let Some(certificate) = signing_certificate else {
            report.finding("signing certificate not found");
            return Ok(involved);
        };
        report.signing_certificate = Some(certificate.id());
        if !involved.iter().any(|t| t.id() == certificate.id()) {
            involved.push(certificate.clone());
        }

        let verified = match signer.verify_signature(&certificate, &content) {
            Ok(()) => true,
            Err(reason) => {
                report.finding(format!("signature value does not verify: {}", reason));
                false
            },
        };
        report.signature_valid = Some(verified && content_ok);
        if signer.signed_attrs_der.is_none() && !input.cms.is_timestamp() {
            report.intact = verified;
        }
        if input.cms.is_timestamp() && !certificate.extensions().time_stamping {
            report.finding(format!("'{}' is not certified for time-stamping", certificate.subject()));
        }
        if report.claimed_signing_time.is_none() {
            report.claimed_signing_time = signer.signing_time;
        }

        for timestamp in &signer.timestamps {
            for der in timestamp.signed_data.certificates() {
                if let Ok(token) = pool.get_instance(der, CertificateSourceType::Timestamp) {
                    involved.push(token);
                }
            }
            if timestamp.tst_info.matches(&signer.signature) {
                report.signature_timestamps.push(timestamp.gen_time());
            } else {
                report.finding("signature timestamp imprint does not match the signature value");
            }
        }

        let best_signature_time = input
            .proven_at
            .into_iter()
            .chain(report.signature_timestamps.iter().copied())
            .min();
        report.best_signature_time = best_signature_time;

        let mut crls = OfflineCrlSource::new();
        for crl in input.cms.crls().iter().chain(input.extra_crls) {
            crls.add_crl(crl.clone());
        }
        let mut ocsps = OfflineOcspSource::new(pool.clone());
        let known = pool.certificates();
        for response in input.cms.ocsp_responses().iter().chain(input.extra_ocsps) {
            if let Err(e) = ocsps.add_encoded(response, &known) {
                report.finding(format!("OCSP response not usable: {}", e));
            }
        }
        let resolver = ChainResolver::new(pool.clone(), self.config.clone())?
            .with_revocation_source(self.verifier.revocation_source_with(crls, ocsps));
        let chain = resolver.resolve(&certificate, best_signature_time);

        report.chain = chain.elements().iter().map(|e| e.certificate.id()).collect();
        report.trust_anchor = chain.trust_anchor().map(|t| t.id());
        report.chain_trusted = chain.is_trusted();
        report.signer_revoked = chain.elements().first().and_then(|e| e.revoked);
        for finding in chain.findings() {
            report.finding(finding.clone());
        }
        involved.extend(chain.elements().iter().map(|e| e.certificate.clone()));

        Ok(involved)
    }
}
