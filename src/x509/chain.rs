//! Trust-chain resolution.
//!
//! [`ChainResolver::resolve`] walks issuers from a leaf through the pool
//! until a trusted entity, a self-signed certificate, a revisited entity or
//! the configured hop bound is reached, then attaches revocation data to
//! every certificate that needs it.

use super::certificate::CertificateToken;
use super::pool::CertificatePool;
use super::revocation::RevocationToken;
use super::revocation_source::RevocationSource;
use crate::config::ValidationConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

/// One certificate of a resolved chain, with its status at validation time.
#[derive(Debug, Clone)]
pub struct ChainElement {
    /// The certificate
    pub certificate: Arc<CertificateToken>,
    /// Its pool entity carries a trusted provenance
    pub trusted: bool,
    /// Validity period contains the validation time
    pub valid_at_validation_time: bool,
    /// Revocation data attached during resolution
    pub revocation: Option<Arc<RevocationToken>>,
    /// `None` when unknown or irrelevant (trusted, self-signed, ocsp-nocheck)
    pub revoked: Option<bool>,
    /// Freshness of the attached revocation data
    pub revocation_fresh: Option<bool>,
}

impl ChainElement {
    fn new(certificate: Arc<CertificateToken>, pool: &CertificatePool, validation_time: &DateTime<Utc>) -> Self {
        Self {
            trusted: pool.is_trusted(&certificate),
            valid_at_validation_time: certificate.is_valid_on(validation_time),
            certificate,
            revocation: None,
            revoked: None,
            revocation_fresh: None,
        }
    }
}

/// Ordered chain from leaf towards the trust anchor.
#[derive(Debug, Clone, Default)]
pub struct CertificateChain {
    elements: Vec<ChainElement>,
    trust_anchor: Option<Arc<CertificateToken>>,
    findings: Vec<String>,
}

impl CertificateChain {
    /// Elements, leaf first.
    pub fn elements(&self) -> &[ChainElement] {
        &self.elements
    }

    /// The leaf certificate.
    pub fn leaf(&self) -> Option<&Arc<CertificateToken>> {
        self.elements.first().map(|e| &e.certificate)
    }

    /// Trusted certificate terminating the chain, if one was reached.
    pub fn trust_anchor(&self) -> Option<&Arc<CertificateToken>> {
        self.trust_anchor.as_ref()
    }

    /// Whether a trust anchor was reached.
    pub fn is_trusted(&self) -> bool {
        self.trust_anchor.is_some()
    }

    /// Whether any certificate is known to be revoked.
    pub fn has_revoked_certificate(&self) -> bool {
        self.elements.iter().any(|e| e.revoked == Some(true))
    }

    /// Whether every non-trusted certificate is within its validity period.
    pub fn all_valid(&self) -> bool {
        self.elements.iter().all(|e| e.trusted || e.valid_at_validation_time)
    }

    /// Anomalies found while resolving.
    pub fn findings(&self) -> &[String] {
        &self.findings
    }

    /// Number of certificates.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the chain holds no certificate.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Builds [`CertificateChain`]s against a shared pool.
pub struct ChainResolver {
    pool: Arc<CertificatePool>,
    revocation: Option<Arc<dyn RevocationSource>>,
    config: ValidationConfig,
}

impl ChainResolver {
    /// Resolver over `pool`; fails on a zero hop bound.
    pub fn new(pool: Arc<CertificatePool>, config: ValidationConfig) -> Result<Self> {
        if config.max_chain_length == 0 {
            return Err(Error::Configuration("max_chain_length must be at least 1".to_string()));
        }
        Ok(Self {
            pool,
            revocation: None,
            config,
        })
    }

    /// Query `source` for revocation data.
    pub fn with_revocation_source(mut self, source: Arc<dyn RevocationSource>) -> Self {
        self.revocation = Some(source);
        self
    }

    /// The pool chains are resolved against.
    pub fn pool(&self) -> &Arc<CertificatePool> {
        &self.pool
    }

    /// Resolve the chain of `leaf`.
    ///
    /// `best_signature_time` is the earliest proven existence time of the
    /// signature (e.g. a covering timestamp's genTime); revocation data
    /// issued after it counts as fresh when no maximum age is configured.
    pub fn resolve(
        &self,
        leaf: &Arc<CertificateToken>,
        best_signature_time: Option<DateTime<Utc>>,
    ) -> CertificateChain {
        let validation_time = self.config.resolved_validation_time();
        let mut chain = CertificateChain::default();
        let mut visited = HashSet::new();
        let mut current = leaf.clone();

        loop {
            if chain.elements.len() >= self.config.max_chain_length {
                chain.findings.push(format!(
                    "chain walk stopped after {} certificates",
                    self.config.max_chain_length
                ));
                break;
            }
            if !visited.insert(current.entity_key()) {
                log::warn!("Issuer cycle detected at '{}'", current.subject());
                chain.findings.push(format!("issuer cycle at '{}'", current.subject()));
                break;
            }

            let element = ChainElement::new(current.clone(), &self.pool, &validation_time);
            if !element.trusted && !element.valid_at_validation_time {
                chain.findings.push(format!(
                    "certificate '{}' is not valid at {} (valid {} to {})",
                    current.subject(),
                    validation_time,
                    current.not_before(),
                    current.not_after()
                ));
            }
            let trusted = element.trusted;
            chain.elements.push(element);

            if trusted {
                chain.trust_anchor = Some(current.clone());
                break;
            }
            if current.is_self_signed() {
                if !current.is_signed_by(&current) {
                    chain
                        .findings
                        .push(format!("self-signed certificate '{}' has an invalid signature", current.subject()));
                }
                chain
                    .findings
                    .push(format!("self-signed certificate '{}' is not trusted", current.subject()));
                break;
            }

            match self.pool.get_issuer(&current) {
                Some(issuer) => current = issuer,
                None => {
                    log::debug!("No issuer found for '{}'", current.subject());
                    chain
                        .findings
                        .push(format!("no issuer found for '{}'", current.subject()));
                    break;
                },
            }
        }

        if self.config.check_revocation {
            self.attach_revocation(&mut chain, validation_time, best_signature_time);
        }

        log::debug!(
            "Resolved chain of '{}': {} certificates, trusted: {}",
            leaf.subject(),
            chain.elements.len(),
            chain.is_trusted()
        );
        chain
    }

    fn attach_revocation(
        &self,
        chain: &mut CertificateChain,
        validation_time: DateTime<Utc>,
        best_signature_time: Option<DateTime<Utc>>,
    ) {
        let Some(source) = &self.revocation else {
            return;
        };

        for index in 0..chain.elements.len() {
            let (head, tail) = chain.elements.split_at_mut(index + 1);
            let element = &mut head[index];
            let cert = &element.certificate;
            if element.trusted || cert.is_self_signed() || cert.has_ocsp_no_check() {
                continue;
            }
            let Some(issuer) = tail.first().map(|e| e.certificate.clone()) else {
                chain
                    .findings
                    .push(format!("revocation of '{}' not checked: issuer unknown", cert.subject()));
                continue;
            };

            let Some(token) = source.get_revocation_token(cert, &issuer) else {
                chain
                    .findings
                    .push(format!("no revocation data found for '{}'", cert.subject()));
                continue;
            };

            cert.set_revocation(token.clone());
            let fresh = token.is_fresh(validation_time, self.config.revocation_freshness, best_signature_time);
            if !fresh {
                chain.findings.push(format!(
                    "revocation data for '{}' issued {} is not fresh",
                    cert.subject(),
                    token.this_update()
                ));
            }
            if token.status() == Some(false) {
                log::warn!("Certificate '{}' is revoked", cert.subject());
                chain.findings.push(format!(
                    "certificate '{}' revoked at {} ({:?})",
                    cert.subject(),
                    token
                        .revocation_time()
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "unknown time".to_string()),
                    token.reason()
                ));
            }

            element.revoked = cert.is_revoked();
            element.revocation_fresh = Some(fresh);
            element.revocation = Some(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x509::revocation_source::OfflineCrlSource;
    use crate::x509::source::CertificateSourceType;
    use chrono::TimeZone;

    fn pki(name: &str) -> Vec<u8> {
        std::fs::read(format!("{}/tests/fixtures/pki/{}", env!("CARGO_MANIFEST_DIR"), name)).unwrap()
    }

    fn config() -> ValidationConfig {
        ValidationConfig::new().with_validation_time(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
    }

    fn pool_with_root(trusted: bool) -> Arc<CertificatePool> {
        let pool = Arc::new(CertificatePool::new());
        let source = if trusted {
            CertificateSourceType::TrustedStore
        } else {
            CertificateSourceType::Other
        };
        pool.get_instance(&pki("root.der"), source).unwrap();
        pool.get_instance(&pki("intermediate.der"), CertificateSourceType::Signature)
            .unwrap();
        pool
    }

    #[test]
    fn test_trusted_chain() {
        let pool = pool_with_root(true);
        let leaf = pool.get_instance(&pki("leaf.der"), CertificateSourceType::Signature).unwrap();
        let chain = ChainResolver::new(pool, config()).unwrap().resolve(&leaf, None);

        assert_eq!(chain.len(), 3);
        assert!(chain.is_trusted());
        assert!(chain.all_valid());
        assert!(chain.elements()[2].trusted);
        assert_eq!(chain.leaf().map(|c| c.id()), Some(leaf.id()));
    }

    #[test]
    fn test_untrusted_root() {
        let pool = pool_with_root(false);
        let leaf = pool.get_instance(&pki("leaf.der"), CertificateSourceType::Signature).unwrap();
        let chain = ChainResolver::new(pool, config()).unwrap().resolve(&leaf, None);

        assert_eq!(chain.len(), 3);
        assert!(!chain.is_trusted());
        assert!(chain.findings().iter().any(|f| f.contains("not trusted")));
    }

    #[test]
    fn test_missing_issuer() {
        let pool = Arc::new(CertificatePool::new());
        let leaf = pool.get_instance(&pki("leaf.der"), CertificateSourceType::Signature).unwrap();
        let chain = ChainResolver::new(pool, config()).unwrap().resolve(&leaf, None);
        assert_eq!(chain.len(), 1);
        assert!(chain.findings().iter().any(|f| f.contains("no issuer")));
    }

    #[test]
    fn test_revoked_leaf() {
        let pool = pool_with_root(true);
        let leaf = pool
            .get_instance(&pki("revoked_leaf.der"), CertificateSourceType::Signature)
            .unwrap();
        let mut crls = OfflineCrlSource::new();
        crls.add_crl(pki("intermediate.crl"));

        let chain = ChainResolver::new(pool, config())
            .unwrap()
            .with_revocation_source(Arc::new(crls))
            .resolve(&leaf, None);

        assert!(chain.is_trusted());
        assert!(chain.has_revoked_certificate());
        assert_eq!(chain.elements()[0].revoked, Some(true));
        assert_eq!(chain.elements()[0].revocation_fresh, Some(true));
        assert_eq!(leaf.is_revoked(), Some(true));
        // Intermediate has no CRL from the root in the source.
        assert!(chain.elements()[1].revocation.is_none());
    }

    #[test]
    fn test_stale_revocation_data() {
        let pool = pool_with_root(true);
        let leaf = pool.get_instance(&pki("leaf.der"), CertificateSourceType::Signature).unwrap();
        let mut crls = OfflineCrlSource::new();
        crls.add_crl(pki("intermediate.crl"));

        let chain = ChainResolver::new(pool, config().with_revocation_freshness(chrono::Duration::days(7)))
            .unwrap()
            .with_revocation_source(Arc::new(crls))
            .resolve(&leaf, None);

        assert_eq!(chain.elements()[0].revoked, Some(false));
        assert_eq!(chain.elements()[0].revocation_fresh, Some(false));
        assert!(chain.findings().iter().any(|f| f.contains("not fresh")));
    }

    #[test]
    fn test_hop_bound() {
        let pool = pool_with_root(true);
        let leaf = pool.get_instance(&pki("leaf.der"), CertificateSourceType::Signature).unwrap();
        let chain = ChainResolver::new(pool, config().with_max_chain_length(2))
            .unwrap()
            .resolve(&leaf, None);
        assert_eq!(chain.len(), 2);
        assert!(!chain.is_trusted());
    }

    #[test]
    fn test_zero_bound_is_configuration_error() {
        let pool = Arc::new(CertificatePool::new());
        assert!(matches!(
            ChainResolver::new(pool, ValidationConfig::new().with_max_chain_length(0)),
            Err(Error::Configuration(_))
        ));
    }
}
