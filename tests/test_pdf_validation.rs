//! End-to-end validation of signed PDF fixtures.

use chrono::{TimeZone, Utc};
use pades_trust::pdf::{find_signatures, retrieve_previous_revision, revision_content, PdfStructure};
use pades_trust::x509::{
    CertificatePool, CertificateSourceType, CommonCertificateSource, OfflineCrlSource, RevocationKind, RevocationReason,
};
use pades_trust::{
    CertificateVerifier, DiagnosticData, DigestAlgorithm, DssDocument, FileDocument, InMemoryDocument,
    PdfSignatureValidator, SignatureReportKind, ValidationConfig,
};
use std::sync::Arc;

fn fixture(path: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), path)
}

fn expected() -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(fixture("expected.json")).unwrap()).unwrap()
}

fn byte_range_values(value: &serde_json::Value) -> Vec<u64> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_u64().unwrap())
        .collect()
}

fn config() -> ValidationConfig {
    ValidationConfig::new().with_validation_time(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
}

/// Verifier trusting the fixture trust store, optionally with the intermediate CRL.
fn verifier(with_crl: bool) -> Arc<CertificateVerifier> {
    let _ = env_logger::builder().is_test(true).try_init();
    let pool = Arc::new(CertificatePool::new());
    let mut store = CommonCertificateSource::new(pool.clone(), CertificateSourceType::TrustedStore);
    store.add_file(fixture("pki/trust_store.pem")).unwrap();

    let mut verifier = CertificateVerifier::new(pool).with_trusted_source(Arc::new(store)).unwrap();
    if with_crl {
        let mut crls = OfflineCrlSource::new();
        crls.add_crl(std::fs::read(fixture("pki/intermediate.crl")).unwrap());
        verifier.add_revocation_source(Arc::new(crls));
    }
    Arc::new(verifier)
}

fn validate(name: &str, with_crl: bool) -> DiagnosticData {
    let document = FileDocument::new(fixture(&format!("pdf/{}", name)));
    PdfSignatureValidator::new(Arc::new(document))
        .with_certificate_verifier(verifier(with_crl))
        .with_config(config())
        .validate()
        .unwrap()
}

#[test]
fn test_single_signature_is_valid() {
    let diagnostic = validate("signed_single.pdf", false);
    let expected = &expected()["signed_single"];

    assert_eq!(diagnostic.document_size, expected["size"].as_u64().unwrap());
    assert_eq!(diagnostic.signatures.len(), 1);
    let report = diagnostic.signature("Signature1").unwrap();

    assert_eq!(report.kind, SignatureReportKind::PdfSignature);
    assert_eq!(report.sub_filter.as_deref(), Some("adbe.pkcs7.detached"));
    let range = report.byte_range.unwrap();
    assert_eq!(
        vec![range.start1(), range.len1(), range.start2(), range.len2()],
        byte_range_values(&expected["byte_range"])
    );
    assert_eq!(report.digest_algorithm, Some(DigestAlgorithm::Sha256));
    assert_eq!(
        report.signed_digest.as_deref(),
        expected["signed_digest_sha256"].as_str()
    );
    assert!(report.intact);
    assert_eq!(report.signature_valid, Some(true));
    assert_eq!(report.contents_gap_valid, Some(true));
    assert_eq!(report.covers_whole_document, Some(true));
    assert_eq!(report.revision, Some(2));
    assert_eq!(
        report.claimed_signing_time,
        Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
    );
    assert!(report.chain_trusted);
    assert_eq!(report.chain.len(), 3);
    assert!(report.is_valid());
    assert!(diagnostic.findings.is_empty(), "{:?}", diagnostic.findings);

    let signer = diagnostic.certificate(report.signing_certificate.as_ref().unwrap()).unwrap();
    assert!(signer.subject.contains("Alice Signer"));
    let anchor = diagnostic.certificate(report.trust_anchor.as_ref().unwrap()).unwrap();
    assert!(anchor.trusted);
    assert!(anchor.self_signed);
}

#[test]
fn test_tampered_document_is_not_intact() {
    let diagnostic = validate("signed_tampered.pdf", false);
    let report = &diagnostic.signatures[0];
    assert!(!report.intact);
    assert!(!report.is_valid());
    // The gap itself was not touched.
    assert_eq!(report.contents_gap_valid, Some(true));
}

#[test]
fn test_appended_revision_is_reported() {
    let diagnostic = validate("signed_appended.pdf", false);
    let report = &diagnostic.signatures[0];

    assert_eq!(diagnostic.document_size, expected()["signed_appended"]["size"].as_u64().unwrap());
    assert!(report.intact);
    assert_eq!(report.covers_whole_document, Some(false));
    assert!(diagnostic
        .findings
        .iter()
        .any(|f| f.contains("not covered by any signature")));
}

#[test]
fn test_three_revisions() {
    let diagnostic = validate("signed_three_revisions.pdf", true);
    let expected = &expected()["signed_three_revisions"];
    let revisions = expected["revisions"].as_array().unwrap();

    let ids: Vec<&str> = diagnostic.signatures.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, ["Signature1", "Signature2", "Timestamp1"]);

    let mut previous_end = 0;
    for (report, expected) in diagnostic.signatures.iter().zip(revisions) {
        assert_eq!(report.id, expected["field"].as_str().unwrap());
        let range = report.byte_range.unwrap();
        assert_eq!(
            vec![range.start1(), range.len1(), range.start2(), range.len2()],
            byte_range_values(&expected["byte_range"])
        );
        assert_eq!(report.signed_digest.as_deref(), expected["signed_digest_sha256"].as_str());
        assert!(range.end() > previous_end);
        previous_end = range.end();
        assert!(report.intact, "{} not intact", report.id);
        assert_eq!(report.signature_valid, Some(true), "{}: {:?}", report.id, report.findings);
        assert!(report.chain_trusted, "{}: {:?}", report.id, report.findings);
    }

    let timestamp = diagnostic.signature("Timestamp1").unwrap();
    assert!(timestamp.is_timestamp());
    assert_eq!(timestamp.sub_filter.as_deref(), Some("ETSI.RFC3161"));
    assert_eq!(timestamp.covers_whole_document, Some(true));
    assert_eq!(timestamp.covered_dss_revisions, vec![4]);
    let gen_time = timestamp.timestamp_time.unwrap();

    for id in ["Signature1", "Signature2"] {
        let report = diagnostic.signature(id).unwrap();
        assert_eq!(report.covered_by, vec!["Timestamp1".to_string()]);
        assert_eq!(report.nested_digest_consistent, Some(true));
        assert_eq!(report.best_signature_time, Some(gen_time));
        assert!(report.covered_dss_revisions.is_empty());
        assert_eq!(report.covers_whole_document, Some(false));
    }

    let ecdsa = diagnostic.signature("Signature2").unwrap();
    let signer = diagnostic.certificate(ecdsa.signing_certificate.as_ref().unwrap()).unwrap();
    assert!(signer.subject.contains("Bob Signer"));
    assert_eq!(signer.revoked, Some(false));

    assert_eq!(diagnostic.dss.len(), 1);
    assert_eq!(diagnostic.dss[0].revision, 4);
    assert_eq!(diagnostic.dss[0].certificates, 2);
    assert_eq!(diagnostic.dss[0].crls, 1);
    assert_eq!(diagnostic.timestamps().count(), 1);
    assert!(diagnostic.findings.is_empty(), "{:?}", diagnostic.findings);
}

#[test]
fn test_revoked_signer() {
    let diagnostic = validate("signed_revoked.pdf", true);
    let report = &diagnostic.signatures[0];

    assert!(report.intact);
    assert_eq!(report.signature_valid, Some(true));
    assert!(report.chain_trusted);
    assert_eq!(report.signer_revoked, Some(true));
    assert!(!report.is_valid());

    let signer = diagnostic.certificate(report.signing_certificate.as_ref().unwrap()).unwrap();
    let revocation = diagnostic.revocation(signer.revocation.as_ref().unwrap()).unwrap();
    assert_eq!(revocation.status, Some(false));
    assert!(revocation.revocation_time.is_some());
}

#[test]
fn test_without_trust_anchor() {
    let pool = Arc::new(CertificatePool::new());
    let diagnostic = PdfSignatureValidator::new(Arc::new(FileDocument::new(fixture("pdf/signed_single.pdf"))))
        .with_certificate_verifier(Arc::new(CertificateVerifier::new(pool)))
        .with_config(config())
        .validate()
        .unwrap();

    let report = &diagnostic.signatures[0];
    assert!(report.intact);
    assert_eq!(report.signature_valid, Some(true));
    assert!(!report.chain_trusted);
    assert!(report.trust_anchor.is_none());
    assert!(!report.is_valid());
}

#[test]
fn test_unsigned_document() {
    let diagnostic = validate("unsigned.pdf", false);
    assert!(diagnostic.signatures.is_empty());
    assert!(diagnostic.certificates.is_empty());
    assert_eq!(diagnostic.findings.len(), 1);
}

#[test]
fn test_previous_revision_validates_alone() {
    let data = std::fs::read(fixture("pdf/signed_three_revisions.pdf")).unwrap();
    let signatures = find_signatures(&PdfStructure::scan(&data, 100));
    assert_eq!(signatures.len(), 3);

    let previous = retrieve_previous_revision(&data, &signatures[1].byte_range).unwrap();
    assert_eq!(previous, revision_content(&data, &signatures[0].byte_range));

    let document: Arc<dyn DssDocument> = Arc::new(InMemoryDocument::new(previous).with_name("revision-2.pdf"));
    let diagnostic = PdfSignatureValidator::new(document)
        .with_certificate_verifier(verifier(false))
        .with_config(config())
        .validate()
        .unwrap();

    assert_eq!(diagnostic.document_name.as_deref(), Some("revision-2.pdf"));
    assert_eq!(diagnostic.signatures.len(), 1);
    let report = &diagnostic.signatures[0];
    assert_eq!(report.id, "Signature1");
    assert!(report.is_valid());
    assert_eq!(report.covers_whole_document, Some(true));
}

#[test]
fn test_json_export() {
    let diagnostic = validate("signed_single.pdf", false);
    let value: serde_json::Value = serde_json::from_str(&diagnostic.to_json().unwrap()).unwrap();
    assert_eq!(value["signatures"][0]["id"], "Signature1");
    assert_eq!(value["signatures"][0]["intact"], true);
    assert!(value["certificates"].as_array().unwrap().len() >= 3);
}

#[test]
fn test_ocsp_from_dss_revokes_signer() {
    // No CRL configured: the only revocation data is the OCSP response in the DSS.
    let diagnostic = validate("signed_ocsp_dss.pdf", false);

    assert_eq!(diagnostic.dss.len(), 1);
    assert_eq!(diagnostic.dss[0].certificates, 1);
    assert_eq!(diagnostic.dss[0].ocsps, 1);

    let report = diagnostic.signature("Signature1").unwrap();
    assert!(report.intact);
    assert_eq!(report.signature_valid, Some(true));
    assert!(report.chain_trusted, "{:?}", report.findings);
    assert_eq!(report.signer_revoked, Some(true));
    assert!(!report.is_valid());
    assert!(report.findings.iter().any(|f| f.contains("revoked at")), "{:?}", report.findings);

    let signer = diagnostic.certificate(report.signing_certificate.as_ref().unwrap()).unwrap();
    assert!(signer.subject.contains("Mallory Signer"));
    let revocation = diagnostic.revocation(signer.revocation.as_ref().unwrap()).unwrap();
    assert_eq!(revocation.kind, RevocationKind::Ocsp);
    assert_eq!(revocation.status, Some(false));
    assert_eq!(revocation.reason, Some(RevocationReason::KeyCompromise));
    assert_eq!(
        revocation.revocation_time,
        Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
    );

    // The timestamp was written before the DSS, so it sees none of it.
    let timestamp = diagnostic.signature("Timestamp1").unwrap();
    assert!(timestamp.is_timestamp());
    assert!(timestamp.covered_dss_revisions.is_empty());
}

#[test]
fn test_replayed_signature_is_flagged() {
    let diagnostic = validate("signed_anomalies.pdf", false);

    let ids: Vec<&str> = diagnostic.signatures.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, ["Signature1", "Replay1", "Timestamp1"]);
    assert_eq!(
        diagnostic.signature("Signature1").unwrap().byte_range,
        diagnostic.signature("Replay1").unwrap().byte_range
    );

    let has = |text: &str| diagnostic.findings.iter().any(|f| f.contains(text));
    assert!(has("'Signature1' and 'Replay1' sign the same byte range"), "{:?}", diagnostic.findings);
    assert!(
        has("'Timestamp1' covers 'Replay1' although it was written before it"),
        "{:?}",
        diagnostic.findings
    );
    assert!(!has("covers 'Signature1'"), "{:?}", diagnostic.findings);
    assert!(has("not covered by any signature"));
}

#[test]
fn test_corrupt_signature_next_to_valid_one() {
    let diagnostic = validate("signed_corrupt_neighbor.pdf", false);
    assert_eq!(diagnostic.signatures.len(), 2);

    let good = diagnostic.signature("Signature1").unwrap();
    assert!(good.intact);
    assert_eq!(good.signature_valid, Some(true));
    assert!(good.chain_trusted);

    let broken = diagnostic.signature("Broken1").unwrap();
    assert!(!broken.is_valid());
    assert_eq!(broken.contents_gap_valid, Some(false));
    assert!(
        broken
            .findings
            .iter()
            .any(|f| f.contains("CMS SignedData could not be decoded")),
        "{:?}",
        broken.findings
    );

    assert!(
        diagnostic
            .findings
            .iter()
            .any(|f| f.contains("coverage does not increase from 'Signature1' to 'Broken1'")),
        "{:?}",
        diagnostic.findings
    );
}
