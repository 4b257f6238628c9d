//! Revocation data sources.
//!
//! Only offline sources are provided: CRLs and OCSP responses already at
//! hand (embedded in a signature, a DSS, or supplied by the caller).

use super::certificate::CertificateToken;
use super::pool::CertificatePool;
use super::revocation::{OcspResponseData, RevocationToken};
use super::source::CertificateSourceType;
use crate::error::Result;
use std::sync::Arc;

/// Something able to produce revocation data for a certificate.
pub trait RevocationSource: Send + Sync {
    /// Revocation data for `certificate`, issued by `issuer`, if available.
    fn get_revocation_token(
        &self,
        certificate: &CertificateToken,
        issuer: &CertificateToken,
    ) -> Option<Arc<RevocationToken>>;
}

/// Pick the token with the latest thisUpdate.
fn latest(tokens: impl IntoIterator<Item = RevocationToken>) -> Option<RevocationToken> {
    tokens.into_iter().max_by_key(|t| t.this_update())
}

/// CRLs held in memory.
#[derive(Debug, Default, Clone)]
pub struct OfflineCrlSource {
    crls: Vec<Vec<u8>>,
}

impl OfflineCrlSource {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one DER-encoded CRL; duplicates are ignored.
    pub fn add_crl(&mut self, der: impl Into<Vec<u8>>) {
        let der = der.into();
        if !self.crls.contains(&der) {
            self.crls.push(der);
        }
    }

    /// Number of distinct CRLs.
    pub fn len(&self) -> usize {
        self.crls.len()
    }

    /// Whether the source holds no CRL.
    pub fn is_empty(&self) -> bool {
        self.crls.is_empty()
    }

    /// Encoded CRLs.
    pub fn crls(&self) -> &[Vec<u8>] {
        &self.crls
    }
}

impl RevocationSource for OfflineCrlSource {
    fn get_revocation_token(
        &self,
        certificate: &CertificateToken,
        issuer: &CertificateToken,
    ) -> Option<Arc<RevocationToken>> {
        let candidates = self.crls.iter().filter_map(|der| {
            let token = RevocationToken::from_crl(der, certificate).ok()?;
            if token.is_signed_by(issuer) {
                Some(token)
            } else {
                log::debug!(
                    "Ignoring CRL for '{}' not signed by '{}'",
                    certificate.subject(),
                    issuer.subject()
                );
                None
            }
        });
        latest(candidates).map(Arc::new)
    }
}

/// Decoded OCSP responses held in memory.
///
/// Responder certificates are registered in the pool as
/// [`CertificateSourceType::OcspResponse`]. A response is linked to its
/// responder, or to the certificate's issuer when no responder certificate
/// is embedded.
pub struct OfflineOcspSource {
    pool: Arc<CertificatePool>,
    responses: Vec<OcspResponseData>,
}

impl OfflineOcspSource {
    /// Empty source registering responder certificates into `pool`.
    pub fn new(pool: Arc<CertificatePool>) -> Self {
        Self {
            pool,
            responses: Vec::new(),
        }
    }

    /// Add one decoded response.
    pub fn add_response(&mut self, response: OcspResponseData) -> Result<()> {
        if let Some(der) = &response.responder_certificate {
            self.pool.get_instance(der, CertificateSourceType::OcspResponse)?;
        }
        self.responses.push(response);
        Ok(())
    }

    /// Decode an encoded OCSP response and add every SingleResponse about
    /// one of `certificates`. Returns how many were added.
    pub fn add_encoded(&mut self, der: &[u8], certificates: &[Arc<CertificateToken>]) -> Result<usize> {
        let responses = OcspResponseData::from_der(der, certificates)?;
        let added = responses.len();
        for response in responses {
            self.add_response(response)?;
        }
        Ok(added)
    }

    /// Number of responses.
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    /// Whether the source holds no response.
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    fn responder_link(&self, response: &OcspResponseData, issuer: &CertificateToken, token: &RevocationToken) -> bool {
        let Some(der) = &response.responder_certificate else {
            token.set_issuer(issuer);
            return true;
        };
        let Ok(responder) = self.pool.get_instance(der, CertificateSourceType::OcspResponse) else {
            return false;
        };
        // Delegated responders must be certified by the CA itself.
        if responder.entity_key() == issuer.entity_key() || responder.is_signed_by(issuer) {
            token.set_issuer(&responder);
            true
        } else {
            log::debug!(
                "OCSP responder '{}' is not certified by '{}'",
                responder.subject(),
                issuer.subject()
            );
            false
        }
    }
}

impl RevocationSource for OfflineOcspSource {
    fn get_revocation_token(
        &self,
        certificate: &CertificateToken,
        issuer: &CertificateToken,
    ) -> Option<Arc<RevocationToken>> {
        let candidates = self
            .responses
            .iter()
            .filter(|r| r.serial == certificate.serial_raw() && r.issuer_name == certificate.canonical_issuer())
            .filter_map(|response| {
                let token = RevocationToken::from_ocsp(response.clone());
                self.responder_link(response, issuer, &token).then_some(token)
            });
        latest(candidates).map(Arc::new)
    }
}

/// Several sources queried together, keeping the freshest answer.
#[derive(Default)]
pub struct CompositeRevocationSource {
    sources: Vec<Arc<dyn RevocationSource>>,
}

impl CompositeRevocationSource {
    /// Empty composite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source.
    pub fn push(&mut self, source: Arc<dyn RevocationSource>) {
        self.sources.push(source);
    }

    /// Builder form of [`push`](Self::push).
    pub fn with(mut self, source: Arc<dyn RevocationSource>) -> Self {
        self.push(source);
        self
    }

    /// Number of sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether no source was added.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl RevocationSource for CompositeRevocationSource {
    fn get_revocation_token(
        &self,
        certificate: &CertificateToken,
        issuer: &CertificateToken,
    ) -> Option<Arc<RevocationToken>> {
        self.sources
            .iter()
            .filter_map(|s| s.get_revocation_token(certificate, issuer))
            .max_by_key(|t| t.this_update())
    }
}
