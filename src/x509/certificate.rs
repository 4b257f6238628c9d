//! Certificate tokens.
//!
//! A [`CertificateToken`] wraps one DER-encoded X.509 certificate. Every
//! field needed during chain building is extracted once at construction;
//! the DER is re-parsed only for signature verification.

use super::revocation::RevocationToken;
use super::source::CertificateSourceType;
use super::{utc_from_timestamp, EntityKey, TokenId, TokenLink};
use crate::digest::{to_hex, DigestAlgorithm};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha1::Sha1;
use sha2::Digest;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::prelude::{FromDer, X509Certificate, X509Name};

const OID_OCSP_NOCHECK: &str = "1.3.6.1.5.5.7.48.1.5";
const OID_AD_OCSP: &str = "1.3.6.1.5.5.7.48.1";
const OID_AD_CA_ISSUERS: &str = "1.3.6.1.5.5.7.48.2";

/// Trust-service metadata carried by certificates from a trusted list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustServiceInfo {
    /// Trust service provider name
    pub provider: String,
    /// Service name
    pub service_name: String,
    /// Service status URI, if published
    pub status: Option<String>,
}

/// Key usage bits relevant to signature validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KeyUsageFlags {
    /// digitalSignature
    pub digital_signature: bool,
    /// nonRepudiation / contentCommitment
    pub non_repudiation: bool,
    /// keyCertSign
    pub key_cert_sign: bool,
    /// cRLSign
    pub crl_sign: bool,
}

/// Extension data extracted at construction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CertificateExtensions {
    /// BasicConstraints cA flag
    pub is_ca: bool,
    /// BasicConstraints pathLenConstraint
    pub path_len: Option<u32>,
    /// KeyUsage, when present
    pub key_usage: Option<KeyUsageFlags>,
    /// ExtendedKeyUsage id-kp-OCSPSigning
    pub ocsp_signing: bool,
    /// ExtendedKeyUsage id-kp-timeStamping
    pub time_stamping: bool,
    /// id-pkix-ocsp-nocheck present
    pub ocsp_no_check: bool,
    /// CRL distribution point URLs
    pub crl_urls: Vec<String>,
    /// AIA OCSP responder URLs
    pub ocsp_urls: Vec<String>,
    /// AIA caIssuers URLs
    pub ca_issuers_urls: Vec<String>,
}

/// One X.509 certificate plus the state accumulated while resolving it.
pub struct CertificateToken {
    der: Vec<u8>,
    id: TokenId,
    entity_key: EntityKey,
    spki_der: Vec<u8>,
    subject: String,
    issuer: String,
    canonical_subject: String,
    canonical_issuer: String,
    issuer_raw: Vec<u8>,
    serial: String,
    serial_raw: Vec<u8>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    signature_algorithm: String,
    ski: Vec<u8>,
    aki: Option<Vec<u8>>,
    extensions: CertificateExtensions,

    digests: RwLock<HashMap<DigestAlgorithm, Vec<u8>>>,
    self_signed: OnceLock<bool>,

    sources: RwLock<BTreeSet<CertificateSourceType>>,
    trusted: AtomicBool,
    trust_services: RwLock<Vec<TrustServiceInfo>>,

    issuer_link: RwLock<Option<TokenLink>>,
    revocation: RwLock<Option<Arc<RevocationToken>>>,
    signature_failure: RwLock<Option<String>>,
}

impl CertificateToken {
    /// Parse a DER-encoded certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Certificate(format!("invalid certificate: {}", e)))?;

        let spki = cert.public_key();
        let spki_der = spki.raw.to_vec();
        let extensions = read_extensions(&cert);

        let ski = subject_key_identifier(&cert)
            .unwrap_or_else(|| Sha1::digest(&spki.subject_public_key.data[..]).to_vec());

        let aki = cert.extensions().iter().find_map(|ext| match ext.parsed_extension() {
            ParsedExtension::AuthorityKeyIdentifier(aki) => {
                aki.key_identifier.as_ref().map(|k| k.0.to_vec())
            },
            _ => None,
        });

        Ok(Self {
            id: TokenId::of(der),
            entity_key: EntityKey::of(&spki_der),
            spki_der,
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            canonical_subject: canonical_name(cert.subject()),
            canonical_issuer: canonical_name(cert.issuer()),
            issuer_raw: cert.issuer().as_raw().to_vec(),
            serial: cert.serial.to_string(),
            serial_raw: cert.raw_serial().to_vec(),
            not_before: utc_from_timestamp(cert.validity().not_before.timestamp()),
            not_after: utc_from_timestamp(cert.validity().not_after.timestamp()),
            signature_algorithm: cert.signature_algorithm.algorithm.to_id_string(),
            ski,
            aki,
            extensions,
            der: der.to_vec(),
            digests: RwLock::new(HashMap::new()),
            self_signed: OnceLock::new(),
            sources: RwLock::new(BTreeSet::new()),
            trusted: AtomicBool::new(false),
            trust_services: RwLock::new(Vec::new()),
            issuer_link: RwLock::new(None),
            revocation: RwLock::new(None),
            signature_failure: RwLock::new(None),
        })
    }

    /// Encoded certificate.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// SHA-256 of the encoded certificate.
    pub fn id(&self) -> TokenId {
        self.id
    }

    /// Public-key identity shared by equivalent certificates.
    pub fn entity_key(&self) -> EntityKey {
        self.entity_key
    }

    /// Encoded SubjectPublicKeyInfo.
    pub fn public_key_der(&self) -> &[u8] {
        &self.spki_der
    }

    /// Subject in RFC 4514 form.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Issuer in RFC 4514 form.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Normalized subject used for name comparisons.
    pub fn canonical_subject(&self) -> &str {
        &self.canonical_subject
    }

    /// Normalized issuer used for name comparisons.
    pub fn canonical_issuer(&self) -> &str {
        &self.canonical_issuer
    }

    /// Encoded issuer Name, as referenced by CMS IssuerAndSerialNumber.
    pub fn issuer_der(&self) -> &[u8] {
        &self.issuer_raw
    }

    /// Serial number in decimal.
    pub fn serial_number(&self) -> &str {
        &self.serial
    }

    /// Serial number INTEGER content bytes.
    pub fn serial_raw(&self) -> &[u8] {
        &self.serial_raw
    }

    /// Start of the validity period.
    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// End of the validity period.
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Signature algorithm OID in dotted form.
    pub fn signature_algorithm(&self) -> &str {
        &self.signature_algorithm
    }

    /// Subject key identifier, computed from the key when the extension is absent.
    pub fn ski(&self) -> &[u8] {
        &self.ski
    }

    /// AuthorityKeyIdentifier keyIdentifier, if present.
    pub fn aki(&self) -> Option<&[u8]> {
        self.aki.as_deref()
    }

    /// Extracted extension data.
    pub fn extensions(&self) -> &CertificateExtensions {
        &self.extensions
    }

    /// Whether the certificate is a CA certificate.
    pub fn is_ca(&self) -> bool {
        self.extensions.is_ca
    }

    /// Whether revocation checking is waived (id-pkix-ocsp-nocheck).
    pub fn has_ocsp_no_check(&self) -> bool {
        self.extensions.ocsp_no_check
    }

    /// Digest of the encoded certificate, memoized per algorithm.
    pub fn digest(&self, algorithm: DigestAlgorithm) -> Vec<u8> {
        if let Some(cached) = read(&self.digests).get(&algorithm) {
            return cached.clone();
        }
        let value = algorithm.digest(&self.der);
        write(&self.digests).insert(algorithm, value.clone());
        value
    }

    /// Subject and issuer names are equal after normalization.
    pub fn is_self_signed(&self) -> bool {
        *self
            .self_signed
            .get_or_init(|| self.canonical_subject == self.canonical_issuer)
    }

    /// Whether `date` lies within the validity period.
    pub fn is_valid_on(&self, date: &DateTime<Utc>) -> bool {
        self.not_before <= *date && *date <= self.not_after
    }

    /// Whether the certificate expired before `date`.
    pub fn is_expired_on(&self, date: &DateTime<Utc>) -> bool {
        *date > self.not_after
    }

    /// Verify this certificate's signature with `issuer`'s public key.
    ///
    /// On success the issuer link is recorded, except for a self-signed
    /// certificate checked against its own key. On failure the reason is
    /// kept for [`signature_failure`](Self::signature_failure).
    pub fn is_signed_by(&self, issuer: &CertificateToken) -> bool {
        let outcome = X509Certificate::from_der(&self.der)
            .map_err(|e| e.to_string())
            .and_then(|(_, cert)| {
                let (_, issuer_cert) =
                    X509Certificate::from_der(&issuer.der).map_err(|e| e.to_string())?;
                cert.verify_signature(Some(issuer_cert.public_key()))
                    .map_err(|e| e.to_string())
            });

        match outcome {
            Ok(()) => {
                self.link_issuer(issuer);
                *write(&self.signature_failure) = None;
                true
            },
            Err(reason) => {
                log::trace!(
                    "Signature of '{}' not verified by key of '{}': {}",
                    self.subject,
                    issuer.subject,
                    reason
                );
                *write(&self.signature_failure) = Some(format!(
                    "signature not verified with the key of '{}': {}",
                    issuer.subject, reason
                ));
                false
            },
        }
    }

    /// Record `issuer` as the issuer to follow. Self-links are not kept.
    pub(crate) fn link_issuer(&self, issuer: &CertificateToken) {
        if !(self.is_self_signed() && self.entity_key == issuer.entity_key) {
            *write(&self.issuer_link) = Some(TokenLink {
                entity: issuer.entity_key,
                token: issuer.id,
            });
        }
    }

    /// Reason of the last failed [`is_signed_by`](Self::is_signed_by) check.
    pub fn signature_failure(&self) -> Option<String> {
        read(&self.signature_failure).clone()
    }

    /// Issuer recorded by a successful signature check.
    pub fn issuer_link(&self) -> Option<TokenLink> {
        *read(&self.issuer_link)
    }

    /// Attach revocation data vouching for this certificate.
    pub fn set_revocation(&self, token: Arc<RevocationToken>) {
        token.set_related_certificate(self.id);
        *write(&self.revocation) = Some(token);
    }

    /// Attached revocation data.
    pub fn revocation(&self) -> Option<Arc<RevocationToken>> {
        read(&self.revocation).clone()
    }

    /// Revocation status: `None` when trusted or without revocation data,
    /// otherwise the negation of the revocation token's "good" status.
    pub fn is_revoked(&self) -> Option<bool> {
        if self.is_trusted() {
            return None;
        }
        let revocation = read(&self.revocation);
        revocation.as_ref().and_then(|token| token.status().map(|good| !good))
    }

    /// Provenance tags this certificate was registered under.
    pub fn sources(&self) -> BTreeSet<CertificateSourceType> {
        read(&self.sources).clone()
    }

    /// Whether the owning pool entity is trusted.
    pub fn is_trusted(&self) -> bool {
        self.trusted.load(Ordering::Acquire)
    }

    /// Trust-service metadata from trusted lists.
    pub fn trust_services(&self) -> Vec<TrustServiceInfo> {
        read(&self.trust_services).clone()
    }

    pub(crate) fn add_source(&self, source: CertificateSourceType) -> bool {
        write(&self.sources).insert(source)
    }

    pub(crate) fn mark_trusted(&self) {
        self.trusted.store(true, Ordering::Release);
    }

    pub(crate) fn add_trust_service(&self, info: TrustServiceInfo) {
        let mut services = write(&self.trust_services);
        if !services.contains(&info) {
            services.push(info);
        }
    }
}

impl fmt::Debug for CertificateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateToken")
            .field("id", &self.id)
            .field("subject", &self.subject)
            .field("serial", &self.serial)
            .finish()
    }
}

impl fmt::Display for CertificateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (serial {})", self.subject, self.serial)
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Normalized distinguished name: attribute OIDs with lowercased values,
/// inner whitespace collapsed, RDNs in encoded order.
pub fn canonical_name(name: &X509Name<'_>) -> String {
    name.iter()
        .map(|rdn| {
            rdn.iter()
                .map(|attr| {
                    let value = match attr.as_str() {
                        Ok(text) => text
                            .split_whitespace()
                            .collect::<Vec<_>>()
                            .join(" ")
                            .to_lowercase(),
                        Err(_) => format!("#{}", to_hex(attr.attr_value().as_bytes())),
                    };
                    format!("{}={}", attr.attr_type().to_id_string(), value)
                })
                .collect::<Vec<_>>()
                .join("+")
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn subject_key_identifier(cert: &X509Certificate<'_>) -> Option<Vec<u8>> {
    cert.extensions().iter().find_map(|ext| match ext.parsed_extension() {
        ParsedExtension::SubjectKeyIdentifier(ski) => Some(ski.0.to_vec()),
        _ => None,
    })
}

fn uri_of(name: &GeneralName<'_>) -> Option<String> {
    match name {
        GeneralName::URI(uri) => Some(uri.to_string()),
        _ => None,
    }
}

fn read_extensions(cert: &X509Certificate<'_>) -> CertificateExtensions {
    let mut out = CertificateExtensions::default();

    if let Ok(Some(bc)) = cert.basic_constraints() {
        out.is_ca = bc.value.ca;
        out.path_len = bc.value.path_len_constraint;
    }
    if let Ok(Some(ku)) = cert.key_usage() {
        out.key_usage = Some(KeyUsageFlags {
            digital_signature: ku.value.digital_signature(),
            non_repudiation: ku.value.non_repudiation(),
            key_cert_sign: ku.value.key_cert_sign(),
            crl_sign: ku.value.crl_sign(),
        });
    }
    if let Ok(Some(eku)) = cert.extended_key_usage() {
        out.ocsp_signing = eku.value.ocsp_signing;
        out.time_stamping = eku.value.time_stamping;
    }

    for ext in cert.extensions() {
        if ext.oid.to_id_string() == OID_OCSP_NOCHECK {
            out.ocsp_no_check = true;
        }
        match ext.parsed_extension() {
            ParsedExtension::CRLDistributionPoints(points) => {
                for point in points.points.iter() {
                    if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                        out.crl_urls.extend(names.iter().filter_map(uri_of));
                    }
                }
            },
            ParsedExtension::AuthorityInfoAccess(aia) => {
                for desc in &aia.accessdescs {
                    let Some(url) = uri_of(&desc.access_location) else {
                        continue;
                    };
                    match desc.access_method.to_id_string().as_str() {
                        OID_AD_OCSP => out.ocsp_urls.push(url),
                        OID_AD_CA_ISSUERS => out.ca_issuers_urls.push(url),
                        _ => {},
                    }
                }
            },
            _ => {},
        }
    }

    out
}
