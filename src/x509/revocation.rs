//! Revocation tokens (CRL entries and OCSP responses).

use super::certificate::{canonical_name, CertificateToken};
use super::{utc_from_timestamp, TokenId, TokenLink};
use crate::cms::verify_with_key;
use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use der::asn1::{GeneralizedTime, ObjectIdentifier};
use der::{Decode, Encode};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use x509_ocsp::{BasicOcspResponse, CertStatus, OcspResponse, SingleResponse};
use x509_parser::prelude::{CertificateRevocationList, FromDer, X509Certificate};

const OID_OCSP_BASIC: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.48.1.1");

/// Kind of revocation data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RevocationKind {
    /// Certificate revocation list
    Crl,
    /// OCSP response
    Ocsp,
}

/// CRLReason (RFC 5280, 5.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    /// Map a CRLReason code; unknown codes become `Unspecified`.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => RevocationReason::KeyCompromise,
            2 => RevocationReason::CaCompromise,
            3 => RevocationReason::AffiliationChanged,
            4 => RevocationReason::Superseded,
            5 => RevocationReason::CessationOfOperation,
            6 => RevocationReason::CertificateHold,
            8 => RevocationReason::RemoveFromCrl,
            9 => RevocationReason::PrivilegeWithdrawn,
            10 => RevocationReason::AaCompromise,
            _ => RevocationReason::Unspecified,
        }
    }
}

/// Certificate status carried by an OCSP SingleResponse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcspCertStatus {
    /// good
    Good,
    /// revoked, with time and optional reason
    Revoked {
        /// revocationTime
        time: DateTime<Utc>,
        /// revocationReason
        reason: Option<RevocationReason>,
    },
    /// unknown
    Unknown,
}

/// Fields of a decoded OCSP response, as supplied by an OCSP client.
#[derive(Debug, Clone)]
pub struct OcspResponseData {
    /// Encoded BasicOCSPResponse, if the client kept it
    pub encoded: Vec<u8>,
    /// Serial number (INTEGER content bytes) of the certificate the response is about
    pub serial: Vec<u8>,
    /// Normalized issuer name of that certificate
    pub issuer_name: String,
    /// producedAt
    pub produced_at: DateTime<Utc>,
    /// thisUpdate
    pub this_update: DateTime<Utc>,
    /// nextUpdate
    pub next_update: Option<DateTime<Utc>>,
    /// certStatus
    pub status: OcspCertStatus,
    /// Signature algorithm OID in dotted form
    pub signature_algorithm: String,
    /// Responder certificate embedded in the response
    pub responder_certificate: Option<Vec<u8>>,
}

impl OcspResponseData {
    /// Decode an encoded OCSPResponse (or a bare BasicOCSPResponse).
    ///
    /// Yields one entry per SingleResponse whose CertID names one of
    /// `certificates` (serial number plus issuer name hash). The response
    /// signature must verify with an embedded certificate, or with a
    /// certificate of `certificates` named as the target's issuer; that
    /// certificate becomes the responder.
    pub fn from_der(der: &[u8], certificates: &[Arc<CertificateToken>]) -> Result<Vec<Self>> {
        let basic = decode_basic_response(der)?;
        let tbs = basic.tbs_response_data.to_der()?;
        let signature_algorithm = basic.signature_algorithm.oid.to_string();
        let digest = signature_digest(&signature_algorithm).ok_or_else(|| {
            Error::Revocation(format!("unsupported OCSP signature algorithm {}", signature_algorithm))
        })?;
        let signature = basic.signature.raw_bytes();
        let produced_at = ocsp_time(&basic.tbs_response_data.produced_at)?;

        let embedded = basic
            .certs
            .iter()
            .flatten()
            .map(|cert| cert.to_der())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let embedded: Vec<CertificateToken> = embedded
            .iter()
            .filter_map(|der| CertificateToken::from_der(der).ok())
            .collect();

        let mut out = Vec::new();
        for single in &basic.tbs_response_data.responses {
            let Some(target) = certificates.iter().find(|c| names_certificate(single, c)) else {
                log::debug!("OCSP SingleResponse matches none of {} certificates", certificates.len());
                continue;
            };

            let responder = embedded
                .iter()
                .map(|t| (t.public_key_der(), t.der()))
                .chain(
                    certificates
                        .iter()
                        .filter(|c| c.canonical_subject() == target.canonical_issuer())
                        .map(|c| (c.public_key_der(), c.der())),
                )
                .find(|(key, _)| verify_with_key(key, digest, &tbs, signature).is_ok())
                .map(|(_, der)| der.to_vec());
            let Some(responder) = responder else {
                log::warn!("OCSP response for '{}' does not verify with any known responder", target.subject());
                continue;
            };

            let status = match &single.cert_status {
                CertStatus::Good(_) => OcspCertStatus::Good,
                CertStatus::Revoked(info) => OcspCertStatus::Revoked {
                    time: ocsp_time(&info.revocation_time)?,
                    reason: match &info.revocation_reason {
                        Some(reason) => reason.to_der()?.last().copied().map(RevocationReason::from_code),
                        None => None,
                    },
                },
                CertStatus::Unknown(_) => OcspCertStatus::Unknown,
            };

            out.push(Self {
                encoded: der.to_vec(),
                serial: target.serial_raw().to_vec(),
                issuer_name: target.canonical_issuer().to_string(),
                produced_at,
                this_update: ocsp_time(&single.this_update)?,
                next_update: single.next_update.as_ref().map(ocsp_time).transpose()?,
                status,
                signature_algorithm: signature_algorithm.clone(),
                responder_certificate: Some(responder),
            });
        }
        Ok(out)
    }
}

fn decode_basic_response(der: &[u8]) -> Result<BasicOcspResponse> {
    if let Ok(response) = OcspResponse::from_der(der) {
        let bytes = response
            .response_bytes
            .ok_or_else(|| Error::Revocation("OCSP response carries no response bytes".to_string()))?;
        if bytes.response_type != OID_OCSP_BASIC {
            return Err(Error::Revocation(format!("unsupported OCSP response type {}", bytes.response_type)));
        }
        return Ok(BasicOcspResponse::from_der(bytes.response.as_bytes())?);
    }
    BasicOcspResponse::from_der(der).map_err(|e| Error::Revocation(format!("invalid OCSP response: {}", e)))
}

fn names_certificate(single: &SingleResponse, cert: &CertificateToken) -> bool {
    let id = &single.cert_id;
    if id.serial_number.as_bytes() != cert.serial_raw() {
        return false;
    }
    DigestAlgorithm::from_oid(&id.hash_algorithm.oid)
        .is_ok_and(|alg| alg.digest(cert.issuer_der()) == id.issuer_name_hash.as_bytes())
}

fn ocsp_time<T: Encode>(time: &T) -> Result<DateTime<Utc>> {
    let time = GeneralizedTime::from_der(&time.to_der()?)?;
    let seconds = i64::try_from(time.to_unix_duration().as_secs()).unwrap_or(i64::MAX);
    Ok(utc_from_timestamp(seconds))
}

/// Digest behind a signature algorithm OID (RSA PKCS#1 v1.5 or ECDSA).
fn signature_digest(oid: &str) -> Option<DigestAlgorithm> {
    match oid {
        "1.2.840.113549.1.1.5" | "1.2.840.10045.4.1" => Some(DigestAlgorithm::Sha1),
        "1.2.840.113549.1.1.11" | "1.2.840.10045.4.3.2" => Some(DigestAlgorithm::Sha256),
        "1.2.840.113549.1.1.12" | "1.2.840.10045.4.3.3" => Some(DigestAlgorithm::Sha384),
        "1.2.840.113549.1.1.13" | "1.2.840.10045.4.3.4" => Some(DigestAlgorithm::Sha512),
        _ => None,
    }
}

/// Revocation data vouching for one certificate.
pub struct RevocationToken {
    id: TokenId,
    kind: RevocationKind,
    encoded: Vec<u8>,
    status: Option<bool>,
    issued_at: DateTime<Utc>,
    this_update: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
    revocation_time: Option<DateTime<Utc>>,
    reason: Option<RevocationReason>,
    signature_algorithm: String,
    issuer_name: String,
    responder_certificate: Option<Vec<u8>>,

    issuer_link: RwLock<Option<TokenLink>>,
    related_certificate: RwLock<Option<TokenId>>,
}

impl RevocationToken {
    /// Status of `cert` according to the CRL in `crl_der`.
    ///
    /// Fails when the CRL cannot be decoded or was not issued under the
    /// certificate's issuer name.
    pub fn from_crl(crl_der: &[u8], cert: &CertificateToken) -> Result<Self> {
        let (_, crl) = CertificateRevocationList::from_der(crl_der)
            .map_err(|e| Error::Revocation(format!("invalid CRL: {}", e)))?;

        let issuer_name = canonical_name(crl.issuer());
        if issuer_name != cert.canonical_issuer() {
            return Err(Error::Revocation(format!(
                "CRL issued by '{}' does not cover certificates of '{}'",
                crl.issuer(),
                cert.issuer()
            )));
        }

        let entry = crl
            .iter_revoked_certificates()
            .find(|revoked| revoked.raw_serial() == cert.serial_raw());

        let (revocation_time, reason) = match entry {
            Some(revoked) => (
                Some(utc_from_timestamp(revoked.revocation_date.timestamp())),
                Some(
                    revoked
                        .reason_code()
                        .map(|(_, code)| RevocationReason::from_code(code.0))
                        .unwrap_or(RevocationReason::Unspecified),
                ),
            ),
            None => (None, None),
        };

        let this_update = utc_from_timestamp(crl.last_update().timestamp());
        Ok(Self {
            id: TokenId::of(crl_der),
            kind: RevocationKind::Crl,
            encoded: crl_der.to_vec(),
            status: Some(revocation_time.is_none()),
            issued_at: this_update,
            this_update,
            next_update: crl.next_update().map(|t| utc_from_timestamp(t.timestamp())),
            revocation_time,
            reason,
            signature_algorithm: crl.signature_algorithm.algorithm.to_id_string(),
            issuer_name,
            responder_certificate: None,
            issuer_link: RwLock::new(None),
            related_certificate: RwLock::new(None),
        })
    }

    /// Build a token from decoded OCSP response fields.
    pub fn from_ocsp(data: OcspResponseData) -> Self {
        let (status, revocation_time, reason) = match data.status {
            OcspCertStatus::Good => (Some(true), None, None),
            OcspCertStatus::Revoked { time, reason } => {
                (Some(false), Some(time), Some(reason.unwrap_or(RevocationReason::Unspecified)))
            },
            OcspCertStatus::Unknown => (None, None, None),
        };

        let id_source = if data.encoded.is_empty() {
            format!("{}:{:?}:{}", data.issuer_name, data.serial, data.produced_at).into_bytes()
        } else {
            data.encoded.clone()
        };

        Self {
            id: TokenId::of(&id_source),
            kind: RevocationKind::Ocsp,
            encoded: data.encoded,
            status,
            issued_at: data.produced_at,
            this_update: data.this_update,
            next_update: data.next_update,
            revocation_time,
            reason,
            signature_algorithm: data.signature_algorithm,
            issuer_name: data.issuer_name,
            responder_certificate: data.responder_certificate,
            issuer_link: RwLock::new(None),
            related_certificate: RwLock::new(None),
        }
    }

    /// Identity of the encoded response.
    pub fn id(&self) -> TokenId {
        self.id
    }

    /// CRL or OCSP.
    pub fn kind(&self) -> RevocationKind {
        self.kind
    }

    /// Encoded CRL or OCSP response (may be empty for decoded-only OCSP data).
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    /// `Some(true)` when the certificate is good, `Some(false)` when revoked,
    /// `None` when the responder does not know.
    pub fn status(&self) -> Option<bool> {
        self.status
    }

    /// Issuing time (CRL thisUpdate, OCSP producedAt).
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// thisUpdate.
    pub fn this_update(&self) -> DateTime<Utc> {
        self.this_update
    }

    /// nextUpdate.
    pub fn next_update(&self) -> Option<DateTime<Utc>> {
        self.next_update
    }

    /// Revocation time, when revoked.
    pub fn revocation_time(&self) -> Option<DateTime<Utc>> {
        self.revocation_time
    }

    /// Revocation reason, when revoked.
    pub fn reason(&self) -> Option<RevocationReason> {
        self.reason
    }

    /// Signature algorithm OID in dotted form.
    pub fn signature_algorithm(&self) -> &str {
        &self.signature_algorithm
    }

    /// Normalized name of the CA the data is about.
    pub fn issuer_name(&self) -> &str {
        &self.issuer_name
    }

    /// Responder certificate embedded in an OCSP response.
    pub fn responder_certificate(&self) -> Option<&[u8]> {
        self.responder_certificate.as_deref()
    }

    /// Verify a CRL signature with `issuer`'s key and record the link.
    ///
    /// OCSP tokens are linked by the source that resolved the responder;
    /// for them this only reports whether a link exists to `issuer`.
    pub fn is_signed_by(&self, issuer: &CertificateToken) -> bool {
        match self.kind {
            RevocationKind::Crl => {
                let verified = CertificateRevocationList::from_der(&self.encoded)
                    .map_err(|e| e.to_string())
                    .and_then(|(_, crl)| {
                        let (_, issuer_cert) =
                            X509Certificate::from_der(issuer.der()).map_err(|e| e.to_string())?;
                        crl.verify_signature(issuer_cert.public_key())
                            .map_err(|e| e.to_string())
                    });
                match verified {
                    Ok(()) => {
                        self.set_issuer(issuer);
                        true
                    },
                    Err(reason) => {
                        log::debug!("CRL not signed by '{}': {}", issuer.subject(), reason);
                        false
                    },
                }
            },
            RevocationKind::Ocsp => self.issuer().map(|l| l.entity) == Some(issuer.entity_key()),
        }
    }

    /// Record `issuer` as the signer of this response.
    pub fn set_issuer(&self, issuer: &CertificateToken) {
        *self.issuer_link.write().unwrap_or_else(PoisonError::into_inner) = Some(TokenLink {
            entity: issuer.entity_key(),
            token: issuer.id(),
        });
    }

    /// Signer resolved so far.
    pub fn issuer(&self) -> Option<TokenLink> {
        *self.issuer_link.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Certificate this token currently vouches for.
    pub fn related_certificate(&self) -> Option<TokenId> {
        *self.related_certificate.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_related_certificate(&self, id: TokenId) {
        *self.related_certificate.write().unwrap_or_else(PoisonError::into_inner) = Some(id);
    }

    /// Whether the data is fresh enough at `validation_time`.
    ///
    /// With `max_age`, the token must have been issued no more than
    /// `max_age` before the validation time. Without it, the token is fresh
    /// when its nextUpdate is still ahead, or when it was issued after the
    /// best-signature-time.
    pub fn is_fresh(
        &self,
        validation_time: DateTime<Utc>,
        max_age: Option<Duration>,
        best_signature_time: Option<DateTime<Utc>>,
    ) -> bool {
        if let Some(max_age) = max_age {
            return self.this_update <= validation_time && validation_time - self.this_update <= max_age;
        }
        let before_next_update = self.next_update.is_some_and(|next| next > validation_time);
        let after_signature = best_signature_time.is_some_and(|t| self.this_update > t);
        before_next_update || after_signature
    }
}

impl fmt::Debug for RevocationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevocationToken")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("this_update", &self.this_update)
            .finish()
    }
}
