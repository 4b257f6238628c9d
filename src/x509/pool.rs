//! Deduplicating certificate pool.
//!
//! Certificates are grouped into [`CertificatePoolEntity`] values by public
//! key. Two indices are kept, each behind its own lock:
//!
//! - public-key hash to entity (1:1)
//! - canonical subject name to tokens (1:n, re-keyed CAs share a name)
//!
//! The pool is an explicitly constructed service shared through `Arc`; it
//! owns every token, and tokens refer to each other through [`TokenLink`]s
//! resolved here.

use super::certificate::CertificateToken;
use super::source::{CertificateSource, CertificateSourceType};
use super::{EntityKey, TokenId, TokenLink};
use crate::config::DEFAULT_MAX_CHAIN_LENGTH;
use crate::digest::to_hex;
use crate::error::{Error, Result};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// All certificates sharing one public key.
pub struct CertificatePoolEntity {
    key: EntityKey,
    ski: Vec<u8>,
    tokens: RwLock<Vec<Arc<CertificateToken>>>,
    sources: RwLock<BTreeSet<CertificateSourceType>>,
}

impl CertificatePoolEntity {
    fn new(token: &CertificateToken) -> Self {
        Self {
            key: token.entity_key(),
            ski: token.ski().to_vec(),
            tokens: RwLock::new(Vec::new()),
            sources: RwLock::new(BTreeSet::new()),
        }
    }

    /// Public-key identity.
    pub fn key(&self) -> EntityKey {
        self.key
    }

    /// Subject key identifier shared by every member.
    pub fn ski(&self) -> &[u8] {
        &self.ski
    }

    /// Equivalent certificates, in registration order.
    pub fn tokens(&self) -> Vec<Arc<CertificateToken>> {
        read(&self.tokens).clone()
    }

    /// Union of the provenance tags of every member.
    pub fn sources(&self) -> BTreeSet<CertificateSourceType> {
        read(&self.sources).clone()
    }

    /// Whether any provenance is a trusted list or trusted store.
    pub fn is_trusted(&self) -> bool {
        read(&self.sources).iter().any(CertificateSourceType::is_trusted)
    }

    /// The first registered token, used as the entity's representative.
    pub fn representative(&self) -> Option<Arc<CertificateToken>> {
        read(&self.tokens).first().cloned()
    }

    fn find(&self, id: &TokenId) -> Option<Arc<CertificateToken>> {
        read(&self.tokens).iter().find(|t| t.id() == *id).cloned()
    }
}

/// Shared index of every certificate seen during validation.
pub struct CertificatePool {
    entities: RwLock<HashMap<EntityKey, Arc<CertificatePoolEntity>>>,
    by_subject: RwLock<HashMap<String, Vec<Arc<CertificateToken>>>>,
    max_chain_length: usize,
}

impl Default for CertificatePool {
    fn default() -> Self {
        Self::new()
    }
}

impl CertificatePool {
    /// Empty pool with the default walk bound.
    pub fn new() -> Self {
        Self::with_max_chain_length(DEFAULT_MAX_CHAIN_LENGTH)
    }

    /// Empty pool bounding trust-anchor walks to `max_chain_length` hops.
    pub fn with_max_chain_length(max_chain_length: usize) -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            by_subject: RwLock::new(HashMap::new()),
            max_chain_length,
        }
    }

    /// Parse and register a DER certificate under `source`.
    pub fn get_instance(&self, der: &[u8], source: CertificateSourceType) -> Result<Arc<CertificateToken>> {
        self.register(CertificateToken::from_der(der)?, source)
    }

    /// Register `token` under `source` and return the canonical instance.
    ///
    /// A byte-identical certificate already in the pool is returned instead
    /// of `token`, gaining `source` as an extra provenance tag. A different
    /// certificate for an already known key joins that key's entity, unless
    /// its subject key identifier disagrees with the entity's.
    pub fn register(&self, token: CertificateToken, source: CertificateSourceType) -> Result<Arc<CertificateToken>> {
        let canonical = {
            let mut entities = write(&self.entities);
            let entity = entities
                .entry(token.entity_key())
                .or_insert_with(|| Arc::new(CertificatePoolEntity::new(&token)))
                .clone();

            if entity.ski() != token.ski() {
                log::warn!(
                    "Rejecting '{}': SKI {} differs from {} already registered for the same key",
                    token.subject(),
                    to_hex(token.ski()),
                    to_hex(entity.ski())
                );
                return Err(Error::PoolConsistency(format!(
                    "certificate '{}' shares a public key with a certificate of different subject key identifier",
                    token.subject()
                )));
            }

            let canonical = match entity.find(&token.id()) {
                Some(existing) => existing,
                None => {
                    let token = Arc::new(token);
                    write(&entity.tokens).push(token.clone());
                    log::trace!("Registered '{}' ({})", token.subject(), token.id());
                    token
                },
            };

            canonical.add_source(source);
            let trusted = {
                let mut sources = write(&entity.sources);
                sources.insert(source);
                sources.iter().any(CertificateSourceType::is_trusted)
            };
            if trusted {
                for member in read(&entity.tokens).iter() {
                    member.mark_trusted();
                }
            }
            canonical
        };

        let mut by_subject = write(&self.by_subject);
        let bucket = by_subject.entry(canonical.canonical_subject().to_string()).or_default();
        if !bucket.iter().any(|t| t.id() == canonical.id()) {
            bucket.push(canonical.clone());
        }

        Ok(canonical)
    }

    /// Register every certificate of `source`; idempotent.
    pub fn import_source(&self, source: &dyn CertificateSource) -> Result<usize> {
        let certificates = source.certificates();
        for token in &certificates {
            let canonical = self.get_instance(token.der(), source.source_type())?;
            for info in token.trust_services() {
                canonical.add_trust_service(info);
            }
        }
        Ok(certificates.len())
    }

    /// Entity grouping `token`'s public key.
    pub fn entity(&self, token: &CertificateToken) -> Option<Arc<CertificatePoolEntity>> {
        self.entity_by_key(&token.entity_key())
    }

    /// Entity by public-key identity.
    pub fn entity_by_key(&self, key: &EntityKey) -> Option<Arc<CertificatePoolEntity>> {
        read(&self.entities).get(key).cloned()
    }

    /// Resolve a link recorded by a signature check.
    pub fn resolve(&self, link: &TokenLink) -> Option<Arc<CertificateToken>> {
        self.entity_by_key(&link.entity).and_then(|e| e.find(&link.token))
    }

    /// Whether `token` (or a certificate with the same key) came from a trusted source.
    pub fn is_trusted(&self, token: &CertificateToken) -> bool {
        self.entity(token).is_some_and(|e| e.is_trusted())
    }

    /// Whether `token` itself was registered.
    pub fn is_known(&self, token: &CertificateToken) -> bool {
        self.entity(token).is_some_and(|e| e.find(&token.id()).is_some())
    }

    /// Provenance tags of `token`'s entity.
    pub fn sources(&self, token: &CertificateToken) -> BTreeSet<CertificateSourceType> {
        self.entity(token).map(|e| e.sources()).unwrap_or_default()
    }

    /// Certificates sharing `token`'s public key, `token` included.
    pub fn equivalent_certificates(&self, token: &CertificateToken) -> Vec<Arc<CertificateToken>> {
        self.entity(token).map(|e| e.tokens()).unwrap_or_default()
    }

    /// Certificates whose subject key identifier is `ski`.
    pub fn get_by_ski(&self, ski: &[u8]) -> Vec<Arc<CertificateToken>> {
        read(&self.entities)
            .values()
            .filter(|e| e.ski() == ski)
            .flat_map(|e| e.tokens())
            .collect()
    }

    /// Certificates whose normalized subject is `canonical_subject`.
    pub fn get_by_subject(&self, canonical_subject: &str) -> Vec<Arc<CertificateToken>> {
        read(&self.by_subject).get(canonical_subject).cloned().unwrap_or_default()
    }

    /// Every registered certificate.
    pub fn certificates(&self) -> Vec<Arc<CertificateToken>> {
        read(&self.entities).values().flat_map(|e| e.tokens()).collect()
    }

    /// Snapshot of every entity.
    pub fn entities(&self) -> Vec<Arc<CertificatePoolEntity>> {
        read(&self.entities).values().cloned().collect()
    }

    /// Number of distinct certificates.
    pub fn number_of_certificates(&self) -> usize {
        read(&self.entities).values().map(|e| read(&e.tokens).len()).sum()
    }

    /// Number of distinct public keys.
    pub fn number_of_entities(&self) -> usize {
        read(&self.entities).len()
    }

    /// Certificates that verify `token`'s signature.
    ///
    /// Candidates sharing the AuthorityKeyIdentifier as SKI are tried first;
    /// when none verifies, every certificate named like `token`'s issuer is
    /// tried. Several matches are legal (re-issued CA certificates).
    pub fn get_issuers(&self, token: &CertificateToken) -> Vec<Arc<CertificateToken>> {
        if let Some(aki) = token.aki() {
            let by_key: Vec<_> = self
                .get_by_ski(aki)
                .into_iter()
                .filter(|candidate| token.is_signed_by(candidate))
                .collect();
            if !by_key.is_empty() {
                return by_key;
            }
            log::debug!("No issuer of '{}' found by key identifier {}", token.subject(), to_hex(aki));
        }

        self.get_by_subject(token.canonical_issuer())
            .into_iter()
            .filter(|candidate| token.is_signed_by(candidate))
            .collect()
    }

    /// Issuer of `token`, preferring one valid when `token` was created.
    ///
    /// Falls back to any verifying certificate with a warning.
    pub fn get_issuer(&self, token: &CertificateToken) -> Option<Arc<CertificateToken>> {
        let issuers = self.get_issuers(token);
        let created = token.not_before();

        // Every verifying candidate overwrote the link; point it back at the chosen one.
        if let Some(valid) = issuers.iter().find(|issuer| issuer.is_valid_on(&created)) {
            token.link_issuer(valid);
            return Some(valid.clone());
        }
        let fallback = issuers.into_iter().next();
        if let Some(issuer) = &fallback {
            token.link_issuer(issuer);
            log::warn!(
                "No issuer of '{}' was valid at {}; using '{}' (valid {} to {})",
                token.subject(),
                created,
                issuer.subject(),
                issuer.not_before(),
                issuer.not_after()
            );
        }
        fallback
    }

    /// Trusted certificate reached by walking issuers from `token`.
    ///
    /// The walk stops at a trusted entity, at a self-signed certificate,
    /// when an entity is visited twice, or after the configured number of
    /// hops.
    pub fn get_trust_anchor(&self, token: &Arc<CertificateToken>) -> Option<Arc<CertificateToken>> {
        let mut visited = HashSet::new();
        let mut current = token.clone();

        for _ in 0..=self.max_chain_length {
            if self.is_trusted(&current) {
                return Some(current);
            }
            if current.is_self_signed() || !visited.insert(current.entity_key()) {
                return None;
            }

            let issuer = current
                .issuer_link()
                .and_then(|link| self.resolve(&link))
                .or_else(|| self.get_issuer(&current))?;

            if visited.contains(&issuer.entity_key()) && !self.is_trusted(&issuer) {
                log::warn!("Issuer cycle detected at '{}'", issuer.subject());
                return None;
            }
            current = issuer;
        }

        log::warn!(
            "Trust anchor walk from '{}' exceeded {} hops",
            token.subject(),
            self.max_chain_length
        );
        None
    }

    /// Walk bound used by [`get_trust_anchor`](Self::get_trust_anchor).
    pub fn max_chain_length(&self) -> usize {
        self.max_chain_length
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pki(name: &str) -> Vec<u8> {
        std::fs::read(format!("{}/tests/fixtures/pki/{}", env!("CARGO_MANIFEST_DIR"), name)).unwrap()
    }

    #[test]
    fn test_same_source_twice() {
        let pool = CertificatePool::new();
        let a = pool.get_instance(&pki("leaf.der"), CertificateSourceType::Signature).unwrap();
        let b = pool.get_instance(&pki("leaf.der"), CertificateSourceType::Signature).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.number_of_certificates(), 1);
        assert_eq!(pool.number_of_entities(), 1);
    }

    #[test]
    fn test_second_source_adds_provenance_only() {
        let pool = CertificatePool::new();
        let token = pool.get_instance(&pki("root.der"), CertificateSourceType::Other).unwrap();
        assert!(!pool.is_trusted(&token));
        assert!(!token.is_trusted());

        pool.get_instance(&pki("root.der"), CertificateSourceType::TrustedStore).unwrap();
        assert!(pool.is_trusted(&token));
        assert!(token.is_trusted());
        assert_eq!(pool.number_of_certificates(), 1);
        assert_eq!(pool.sources(&token).len(), 2);
        assert_eq!(token.sources().len(), 2);
    }

    #[test]
    fn test_reissued_certificate_joins_entity() {
        let pool = CertificatePool::new();
        let root = pool.get_instance(&pki("root.der"), CertificateSourceType::TrustedStore).unwrap();
        let reissued = pool.get_instance(&pki("root_reissued.der"), CertificateSourceType::Other).unwrap();

        assert_ne!(root.id(), reissued.id());
        assert_eq!(pool.number_of_entities(), 1);
        assert_eq!(pool.number_of_certificates(), 2);
        assert!(pool.is_trusted(&reissued));
        assert!(reissued.is_trusted());
        assert_eq!(pool.equivalent_certificates(&root).len(), 2);
        assert_eq!(pool.get_by_subject(root.canonical_subject()).len(), 2);
    }

    #[test]
    fn test_ski_mismatch_rejected() {
        let pool = CertificatePool::new();
        pool.get_instance(&pki("root.der"), CertificateSourceType::TrustedStore).unwrap();
        let err = pool.get_instance(&pki("root_bad_ski.der"), CertificateSourceType::Other);
        assert!(matches!(err, Err(Error::PoolConsistency(_))));
        assert_eq!(pool.number_of_certificates(), 1);
    }

    #[test]
    fn test_rekeyed_ca_shares_subject_bucket() {
        let pool = CertificatePool::new();
        let root = pool.get_instance(&pki("root.der"), CertificateSourceType::TrustedStore).unwrap();
        pool.get_instance(&pki("root_rekeyed.der"), CertificateSourceType::Other).unwrap();
        assert_eq!(pool.number_of_entities(), 2);
        assert_eq!(pool.get_by_subject(root.canonical_subject()).len(), 2);
    }

    #[test]
    fn test_issuer_resolution() {
        let pool = CertificatePool::new();
        let root = pool.get_instance(&pki("root.der"), CertificateSourceType::TrustedStore).unwrap();
        pool.get_instance(&pki("root_rekeyed.der"), CertificateSourceType::Other).unwrap();
        let intermediate = pool.get_instance(&pki("intermediate.der"), CertificateSourceType::Other).unwrap();
        let leaf = pool.get_instance(&pki("leaf.der"), CertificateSourceType::Signature).unwrap();

        let issuers = pool.get_issuers(&intermediate);
        assert_eq!(issuers.len(), 1);
        assert_eq!(issuers[0].id(), root.id());
        assert_eq!(pool.get_issuer(&leaf).map(|t| t.id()), Some(intermediate.id()));
    }

    #[test]
    fn test_issuer_valid_at_creation_preferred() {
        let pool = CertificatePool::new();
        let old = pool.get_instance(&pki("intermediate_old.der"), CertificateSourceType::Other).unwrap();
        let current = pool.get_instance(&pki("intermediate.der"), CertificateSourceType::Other).unwrap();
        let leaf = pool.get_instance(&pki("leaf.der"), CertificateSourceType::Signature).unwrap();

        assert_eq!(pool.number_of_entities(), 2);
        assert_eq!(pool.get_issuers(&leaf).len(), 2);
        let issuer = pool.get_issuer(&leaf).unwrap();
        assert_eq!(issuer.id(), current.id());
        assert_ne!(issuer.id(), old.id());
    }

    #[test]
    fn test_issuer_link_follows_preferred_issuer() {
        let pool = CertificatePool::new();
        let root = pool.get_instance(&pki("root.der"), CertificateSourceType::TrustedStore).unwrap();
        let current = pool.get_instance(&pki("intermediate.der"), CertificateSourceType::Other).unwrap();
        let old = pool.get_instance(&pki("intermediate_old.der"), CertificateSourceType::Other).unwrap();
        let leaf = pool.get_instance(&pki("leaf.der"), CertificateSourceType::Signature).unwrap();

        // The expired certificate verifies last.
        assert_eq!(pool.get_issuers(&leaf).last().map(|t| t.id()), Some(old.id()));
        assert_eq!(leaf.issuer_link().map(|l| l.token), Some(old.id()));

        assert_eq!(pool.get_issuer(&leaf).map(|t| t.id()), Some(current.id()));
        assert_eq!(leaf.issuer_link().map(|l| l.token), Some(current.id()));
        assert_eq!(pool.get_trust_anchor(&leaf).map(|t| t.id()), Some(root.id()));
    }

    #[test]
    fn test_concurrent_registration() {
        let pool = Arc::new(CertificatePool::new());
        let der = pki("intermediate.der");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let der = der.clone();
                std::thread::spawn(move || pool.get_instance(&der, CertificateSourceType::Dss).unwrap())
            })
            .collect();
        let tokens: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(tokens.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(pool.number_of_certificates(), 1);
    }

    #[test]
    fn test_get_by_ski() {
        let pool = CertificatePool::new();
        let root = pool.get_instance(&pki("root.der"), CertificateSourceType::TrustedStore).unwrap();
        let found = pool.get_by_ski(root.ski());
        assert_eq!(found.len(), 1);
        assert!(pool.get_by_ski(&[0u8; 20]).is_empty());
    }

    #[test]
    fn test_trust_anchor() {
        let pool = CertificatePool::new();
        let root = pool.get_instance(&pki("root.der"), CertificateSourceType::TrustedStore).unwrap();
        pool.get_instance(&pki("intermediate.der"), CertificateSourceType::Signature).unwrap();
        let leaf = pool.get_instance(&pki("leaf.der"), CertificateSourceType::Signature).unwrap();

        assert_eq!(pool.get_trust_anchor(&leaf).map(|t| t.id()), Some(root.id()));
    }

    #[test]
    fn test_no_trust_anchor_without_trusted_source() {
        let pool = CertificatePool::new();
        pool.get_instance(&pki("root.der"), CertificateSourceType::Other).unwrap();
        pool.get_instance(&pki("intermediate.der"), CertificateSourceType::Signature).unwrap();
        let leaf = pool.get_instance(&pki("leaf.der"), CertificateSourceType::Signature).unwrap();
        assert!(pool.get_trust_anchor(&leaf).is_none());
    }

    #[test]
    fn test_walk_bound() {
        let pool = CertificatePool::with_max_chain_length(1);
        pool.get_instance(&pki("root.der"), CertificateSourceType::TrustedStore).unwrap();
        pool.get_instance(&pki("intermediate.der"), CertificateSourceType::Signature).unwrap();
        let leaf = pool.get_instance(&pki("leaf.der"), CertificateSourceType::Signature).unwrap();
        assert!(pool.get_trust_anchor(&leaf).is_none());
    }
}
