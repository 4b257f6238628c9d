//! Certificate sources and provenance tags.

use super::certificate::{CertificateToken, TrustServiceInfo};
use super::pool::CertificatePool;
use crate::error::{Error, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use x509_parser::pem::Pem;

/// Where a certificate was obtained from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CertificateSourceType {
    /// A trusted list (TSL)
    TrustedList,
    /// A locally configured trust store
    TrustedStore,
    /// Embedded in a signature's CMS SignedData
    Signature,
    /// Embedded in a timestamp token
    Timestamp,
    /// Embedded in an OCSP response
    OcspResponse,
    /// A PDF Document Security Store
    Dss,
    /// Fetched through Authority Information Access
    Aia,
    /// Anything else
    Other,
}

impl CertificateSourceType {
    /// Whether certificates from this source are trust anchors.
    pub fn is_trusted(&self) -> bool {
        matches!(self, CertificateSourceType::TrustedList | CertificateSourceType::TrustedStore)
    }
}

/// A collection of certificates sharing one provenance.
pub trait CertificateSource: Send + Sync {
    /// Provenance of every certificate in this source.
    fn source_type(&self) -> CertificateSourceType;

    /// Certificates held by this source, as registered in the pool.
    fn certificates(&self) -> Vec<Arc<CertificateToken>>;

    /// Whether `token` belongs to this source.
    fn contains(&self, token: &CertificateToken) -> bool {
        self.certificates().iter().any(|c| c.id() == token.id())
    }
}

/// Certificate source backed by a shared [`CertificatePool`].
///
/// Every certificate added here is registered in the pool under this
/// source's type; the source only remembers which pool tokens it added.
pub struct CommonCertificateSource {
    pool: Arc<CertificatePool>,
    source_type: CertificateSourceType,
    trust_service: Option<TrustServiceInfo>,
    tokens: Vec<Arc<CertificateToken>>,
}

impl CommonCertificateSource {
    /// Empty source registering into `pool`.
    pub fn new(pool: Arc<CertificatePool>, source_type: CertificateSourceType) -> Self {
        Self {
            pool,
            source_type,
            trust_service: None,
            tokens: Vec::new(),
        }
    }

    /// Attach trust-service metadata to every certificate added afterwards.
    pub fn with_trust_service(mut self, info: TrustServiceInfo) -> Self {
        self.trust_service = Some(info);
        self
    }

    /// The pool this source registers into.
    pub fn pool(&self) -> &Arc<CertificatePool> {
        &self.pool
    }

    /// Register one DER certificate.
    pub fn add_der(&mut self, der: &[u8]) -> Result<Arc<CertificateToken>> {
        let token = self.pool.get_instance(der, self.source_type)?;
        if let Some(info) = &self.trust_service {
            token.add_trust_service(info.clone());
        }
        if !self.tokens.iter().any(|t| t.id() == token.id()) {
            self.tokens.push(token.clone());
        }
        Ok(token)
    }

    /// Register every `CERTIFICATE` block of a PEM bundle.
    pub fn add_pem(&mut self, pem: &[u8]) -> Result<Vec<Arc<CertificateToken>>> {
        let mut added = Vec::new();
        for block in Pem::iter_from_buffer(pem) {
            let block = block.map_err(|e| Error::Certificate(format!("invalid PEM: {}", e)))?;
            if block.label != "CERTIFICATE" {
                log::debug!("Skipping PEM block '{}'", block.label);
                continue;
            }
            added.push(self.add_der(&block.contents)?);
        }
        if added.is_empty() {
            return Err(Error::Certificate("no certificate found in PEM data".to_string()));
        }
        Ok(added)
    }

    /// Register a DER or PEM certificate file.
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> Result<Vec<Arc<CertificateToken>>> {
        let bytes = std::fs::read(path.as_ref())?;
        if bytes.starts_with(b"-----BEGIN") {
            self.add_pem(&bytes)
        } else {
            Ok(vec![self.add_der(&bytes)?])
        }
    }

    /// Number of distinct certificates added.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl CertificateSource for CommonCertificateSource {
    fn source_type(&self) -> CertificateSourceType {
        self.source_type
    }

    fn certificates(&self) -> Vec<Arc<CertificateToken>> {
        self.tokens.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_path(name: &str) -> String {
        format!("{}/tests/fixtures/pki/{}", env!("CARGO_MANIFEST_DIR"), name)
    }

    #[test]
    fn test_trusted_types() {
        assert!(CertificateSourceType::TrustedList.is_trusted());
        assert!(CertificateSourceType::TrustedStore.is_trusted());
        assert!(!CertificateSourceType::Signature.is_trusted());
        assert!(!CertificateSourceType::Other.is_trusted());
    }

    #[test]
    fn test_pem_bundle() {
        let pool = Arc::new(CertificatePool::new());
        let mut source = CommonCertificateSource::new(pool.clone(), CertificateSourceType::TrustedStore);
        let added = source.add_file(fixture_path("trust_store.pem")).unwrap();
        assert_eq!(added.len(), 2);
        assert_eq!(source.len(), 2);
        assert!(added.iter().all(|t| pool.is_trusted(t)));
    }

    #[test]
    fn test_add_der_is_idempotent() {
        let pool = Arc::new(CertificatePool::new());
        let mut source = CommonCertificateSource::new(pool.clone(), CertificateSourceType::Other);
        let der = std::fs::read(fixture_path("leaf.der")).unwrap();
        let first = source.add_der(&der).unwrap();
        let second = source.add_der(&der).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.len(), 1);
        assert!(source.contains(&first));
    }

    #[test]
    fn test_trust_service_metadata() {
        let pool = Arc::new(CertificatePool::new());
        let info = TrustServiceInfo {
            provider: "Fixture TSP".into(),
            service_name: "Fixture QC CA".into(),
            status: Some("granted".into()),
        };
        let mut source = CommonCertificateSource::new(pool, CertificateSourceType::TrustedList)
            .with_trust_service(info.clone());
        let token = source.add_file(fixture_path("root.der")).unwrap().remove(0);
        assert_eq!(token.trust_services(), vec![info]);
    }

    #[test]
    fn test_pem_without_certificates() {
        let pool = Arc::new(CertificatePool::new());
        let mut source = CommonCertificateSource::new(pool, CertificateSourceType::Other);
        assert!(source.add_pem(b"").is_err());
    }
}
