//! Trust-chain resolution with injected trust anchors and revocation data.

use chrono::{DateTime, TimeZone, Utc};
use pades_trust::x509::{
    CertificatePool, CertificateSourceType, ChainResolver, CommonCertificateSource, CompositeRevocationSource,
    OcspCertStatus, OcspResponseData, OfflineCrlSource, OfflineOcspSource, RevocationKind, RevocationReason,
};
use pades_trust::{CertificateVerifier, Error, ValidationConfig};
use std::sync::Arc;

fn pki_path(name: &str) -> String {
    format!("{}/tests/fixtures/pki/{}", env!("CARGO_MANIFEST_DIR"), name)
}

fn pki(name: &str) -> Vec<u8> {
    std::fs::read(pki_path(name)).unwrap()
}

fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

fn config() -> ValidationConfig {
    ValidationConfig::new().with_validation_time(at(2025, 1, 1))
}

/// Pool with the trust store bundle as anchors and the intermediate from a DSS.
fn trusted_pool() -> Arc<CertificatePool> {
    let pool = Arc::new(CertificatePool::new());
    let mut store = CommonCertificateSource::new(pool.clone(), CertificateSourceType::TrustedStore);
    store.add_file(pki_path("trust_store.pem")).unwrap();
    pool.get_instance(&pki("intermediate.der"), CertificateSourceType::Dss).unwrap();
    pool
}

fn ocsp_for(pool: &CertificatePool, cert: &str, status: OcspCertStatus, this_update: DateTime<Utc>) -> OcspResponseData {
    let token = pool.get_instance(&pki(cert), CertificateSourceType::Signature).unwrap();
    OcspResponseData {
        encoded: Vec::new(),
        serial: token.serial_raw().to_vec(),
        issuer_name: token.canonical_issuer().to_string(),
        produced_at: this_update,
        this_update,
        next_update: None,
        status,
        signature_algorithm: "1.2.840.113549.1.1.11".to_string(),
        responder_certificate: None,
    }
}

#[test]
fn test_chain_to_trust_store_anchor() {
    let pool = trusted_pool();
    let leaf = pool.get_instance(&pki("leaf.der"), CertificateSourceType::Signature).unwrap();
    let root = pool.get_instance(&pki("root.der"), CertificateSourceType::Other).unwrap();

    let chain = ChainResolver::new(pool, config()).unwrap().resolve(&leaf, None);
    assert_eq!(chain.len(), 3);
    assert_eq!(chain.trust_anchor().map(|t| t.id()), Some(root.id()));
    assert!(chain.all_valid());
    assert!(!chain.has_revoked_certificate());
    assert!(leaf.issuer_link().is_some());
}

#[test]
fn test_unrelated_anchor_does_not_help() {
    let pool = Arc::new(CertificatePool::new());
    let mut store = CommonCertificateSource::new(pool.clone(), CertificateSourceType::TrustedStore);
    store.add_der(&pki("other_root.der")).unwrap();
    pool.get_instance(&pki("root.der"), CertificateSourceType::Signature).unwrap();
    pool.get_instance(&pki("intermediate.der"), CertificateSourceType::Signature).unwrap();
    let leaf = pool.get_instance(&pki("leaf.der"), CertificateSourceType::Signature).unwrap();

    let chain = ChainResolver::new(pool, config()).unwrap().resolve(&leaf, None);
    assert!(!chain.is_trusted());
    assert_eq!(chain.len(), 3);
}

#[test]
fn test_ocsp_revocation() {
    let pool = trusted_pool();
    let leaf = pool.get_instance(&pki("leaf.der"), CertificateSourceType::Signature).unwrap();
    let mut ocsp = OfflineOcspSource::new(pool.clone());
    ocsp.add_response(ocsp_for(
        &pool,
        "leaf.der",
        OcspCertStatus::Revoked {
            time: at(2024, 6, 1),
            reason: Some(RevocationReason::KeyCompromise),
        },
        at(2024, 12, 30),
    ))
    .unwrap();

    let chain = ChainResolver::new(pool, config())
        .unwrap()
        .with_revocation_source(Arc::new(ocsp))
        .resolve(&leaf, Some(at(2024, 3, 1)));

    let element = &chain.elements()[0];
    assert_eq!(element.revoked, Some(true));
    assert_eq!(element.revocation_fresh, Some(true));
    let token = element.revocation.as_ref().unwrap();
    assert_eq!(token.kind(), RevocationKind::Ocsp);
    assert_eq!(token.reason(), Some(RevocationReason::KeyCompromise));
    assert_eq!(token.revocation_time(), Some(at(2024, 6, 1)));
    assert!(chain.findings().iter().any(|f| f.contains("revoked")));
}

#[test]
fn test_composite_prefers_latest() {
    let pool = trusted_pool();
    let leaf = pool.get_instance(&pki("leaf.der"), CertificateSourceType::Signature).unwrap();
    let mut crls = OfflineCrlSource::new();
    crls.add_crl(pki("intermediate.crl"));
    let mut ocsp = OfflineOcspSource::new(pool.clone());
    ocsp.add_response(ocsp_for(&pool, "leaf.der", OcspCertStatus::Good, at(2029, 1, 1)))
        .unwrap();

    let composite = CompositeRevocationSource::new()
        .with(Arc::new(crls))
        .with(Arc::new(ocsp));
    let chain = ChainResolver::new(pool, config())
        .unwrap()
        .with_revocation_source(Arc::new(composite))
        .resolve(&leaf, None);

    let element = &chain.elements()[0];
    assert_eq!(element.revoked, Some(false));
    assert_eq!(element.revocation.as_ref().map(|t| t.kind()), Some(RevocationKind::Ocsp));
}

#[test]
fn test_revocation_checks_disabled() {
    let pool = trusted_pool();
    let leaf = pool
        .get_instance(&pki("revoked_leaf.der"), CertificateSourceType::Signature)
        .unwrap();
    let mut crls = OfflineCrlSource::new();
    crls.add_crl(pki("intermediate.crl"));

    let chain = ChainResolver::new(pool, config().with_revocation_checks(false))
        .unwrap()
        .with_revocation_source(Arc::new(crls))
        .resolve(&leaf, None);
    assert!(chain.is_trusted());
    assert!(chain.elements().iter().all(|e| e.revoked.is_none()));
}

#[test]
fn test_verifier_rejects_untrusted_source_type() {
    let pool = Arc::new(CertificatePool::new());
    let mut dss = CommonCertificateSource::new(pool.clone(), CertificateSourceType::Dss);
    dss.add_der(&pki("intermediate.der")).unwrap();

    let err = CertificateVerifier::new(pool.clone())
        .with_trusted_source(Arc::new(dss))
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));

    let mut anchors = CommonCertificateSource::new(pool.clone(), CertificateSourceType::TrustedList);
    anchors.add_der(&pki("root.der")).unwrap();
    let verifier = CertificateVerifier::new(pool).with_trusted_source(Arc::new(anchors)).unwrap();
    assert_eq!(verifier.trusted_sources().len(), 1);
}

#[test]
fn test_cross_certified_cycle() {
    let pool = Arc::new(CertificatePool::new());
    let ca_a = pool.get_instance(&pki("cycle_a.der"), CertificateSourceType::Dss).unwrap();
    let ca_b = pool.get_instance(&pki("cycle_b.der"), CertificateSourceType::Dss).unwrap();
    let leaf = pool.get_instance(&pki("cycle_leaf.der"), CertificateSourceType::Signature).unwrap();
    assert!(!ca_a.is_self_signed());
    assert!(!ca_b.is_self_signed());

    assert!(pool.get_trust_anchor(&leaf).is_none());
    assert_eq!(pool.get_issuer(&ca_a).map(|t| t.id()), Some(ca_b.id()));
    assert_eq!(pool.get_issuer(&ca_b).map(|t| t.id()), Some(ca_a.id()));

    let chain = ChainResolver::new(pool, config()).unwrap().resolve(&leaf, None);
    let ids: Vec<_> = chain.elements().iter().map(|e| e.certificate.id()).collect();
    assert_eq!(ids, vec![leaf.id(), ca_a.id(), ca_b.id()]);
    assert!(!chain.is_trusted());
    assert!(
        chain.findings().iter().any(|f| f.contains("issuer cycle at") && f.contains("Cycle CA A")),
        "{:?}",
        chain.findings()
    );
}
