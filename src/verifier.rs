//! The certificate verifier collaborator.
//!
//! A [`CertificateVerifier`] bundles what the caller injects into a
//! validation run: the shared [`CertificatePool`], trusted and adjunct
//! certificate sources, and revocation sources. Nothing here is hard-coded;
//! a verifier without any trusted source simply yields untrusted chains.

use crate::error::{Error, Result};
use crate::x509::{
    CertificatePool, CertificateSource, CompositeRevocationSource, OfflineCrlSource, OfflineOcspSource,
    RevocationSource,
};
use std::sync::Arc;

/// Trusted material and revocation access for validators.
pub struct CertificateVerifier {
    pool: Arc<CertificatePool>,
    trusted_sources: Vec<Arc<dyn CertificateSource>>,
    adjunct_sources: Vec<Arc<dyn CertificateSource>>,
    revocation_sources: Vec<Arc<dyn RevocationSource>>,
}

impl CertificateVerifier {
    /// Verifier working on `pool`.
    pub fn new(pool: Arc<CertificatePool>) -> Self {
        Self {
            pool,
            trusted_sources: Vec::new(),
            adjunct_sources: Vec::new(),
            revocation_sources: Vec::new(),
        }
    }

    /// The certificate pool shared by every validation using this verifier.
    pub fn pool(&self) -> &Arc<CertificatePool> {
        &self.pool
    }

    /// Add a source of trust anchors.
    ///
    /// Fails with [`Error::Configuration`] if the source's type is not a
    /// trusted provenance. Its certificates are imported into the pool.
    pub fn add_trusted_source(&mut self, source: Arc<dyn CertificateSource>) -> Result<()> {
        if !source.source_type().is_trusted() {
            return Err(Error::Configuration(format!(
                "{:?} is not a trusted certificate source type",
                source.source_type()
            )));
        }
        let imported = self.pool.import_source(source.as_ref())?;
        log::info!("Trusted source added: {} certificates", imported);
        self.trusted_sources.push(source);
        Ok(())
    }

    /// Add a source of untrusted intermediate certificates.
    pub fn add_adjunct_source(&mut self, source: Arc<dyn CertificateSource>) -> Result<()> {
        let imported = self.pool.import_source(source.as_ref())?;
        log::debug!("Adjunct source added: {} certificates", imported);
        self.adjunct_sources.push(source);
        Ok(())
    }

    /// Add a revocation source (OCSP responses, CRLs).
    pub fn add_revocation_source(&mut self, source: Arc<dyn RevocationSource>) {
        self.revocation_sources.push(source);
    }

    /// Builder form of [`add_trusted_source`](Self::add_trusted_source).
    pub fn with_trusted_source(mut self, source: Arc<dyn CertificateSource>) -> Result<Self> {
        self.add_trusted_source(source)?;
        Ok(self)
    }

    /// Builder form of [`add_revocation_source`](Self::add_revocation_source).
    pub fn with_revocation_source(mut self, source: Arc<dyn RevocationSource>) -> Self {
        self.add_revocation_source(source);
        self
    }

    pub fn trusted_sources(&self) -> &[Arc<dyn CertificateSource>] {
        &self.trusted_sources
    }

    pub fn adjunct_sources(&self) -> &[Arc<dyn CertificateSource>] {
        &self.adjunct_sources
    }

    pub fn revocation_sources(&self) -> &[Arc<dyn RevocationSource>] {
        &self.revocation_sources
    }

    /// Configured revocation sources plus CRLs and OCSP responses found in the document.
    pub(crate) fn revocation_source_with(
        &self,
        crls: OfflineCrlSource,
        ocsps: OfflineOcspSource,
    ) -> Arc<dyn RevocationSource> {
        let mut composite = CompositeRevocationSource::new();
        for source in &self.revocation_sources {
            composite.push(source.clone());
        }
        if !crls.is_empty() {
            composite.push(Arc::new(crls));
        }
        if !ocsps.is_empty() {
            composite.push(Arc::new(ocsps));
        }
        Arc::new(composite)
    }
}

impl std::fmt::Debug for CertificateVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateVerifier")
            .field("certificates", &self.pool.number_of_certificates())
            .field("trusted_sources", &self.trusted_sources.len())
            .field("adjunct_sources", &self.adjunct_sources.len())
            .field("revocation_sources", &self.revocation_sources.len())
            .finish()
    }
}
