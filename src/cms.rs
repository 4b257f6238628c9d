//! CMS SignedData decoding and signer-info checks.
//!
//! Covers what signature validation needs from a PKCS#7/CAdES blob: the
//! embedded certificates and CRLs, the signer identifier, the signed
//! attributes (`messageDigest`, `signingTime`), the signature value,
//! RFC 3161 `TSTInfo` content, and signature timestamps carried as unsigned
//! attributes.

use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::x509::certificate::canonical_name;
use crate::x509::{utc_from_timestamp, CertificateToken};
use chrono::{DateTime, Utc};
use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::revocation::RevocationInfoChoice;
use cms::signed_data::{SignedData, SignerIdentifier, SignerInfo};
use der::asn1::{ObjectIdentifier, OctetStringRef};
use der::{Decode, Encode, SliceReader};
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use signature::Verifier;
use std::sync::Arc;
use x509_parser::prelude::{FromDer, X509Name};
use x509_tsp::TstInfo;

/// id-signedData
pub const OID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
/// id-data
pub const OID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
/// id-ct-TSTInfo
pub const OID_TST_INFO: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4");

const OID_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
const OID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
const OID_SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");
const OID_SIGNATURE_TIMESTAMP: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.14");
const OID_OCSP_RESPONSE_INFO: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.16.2");

const OID_RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_SECP384R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

/// How a SignerInfo names its certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerId {
    /// IssuerAndSerialNumber: encoded issuer Name and serial INTEGER content
    IssuerSerial {
        /// Encoded issuer Name
        issuer: Vec<u8>,
        /// Serial number content bytes
        serial: Vec<u8>,
    },
    /// SubjectKeyIdentifier
    KeyIdentifier(Vec<u8>),
}

/// Decoded RFC 3161 TSTInfo.
#[derive(Debug, Clone)]
pub struct TstInfoData {
    /// Message imprint hash algorithm, if supported
    pub imprint_algorithm: Option<DigestAlgorithm>,
    /// Message imprint hash algorithm OID
    pub imprint_algorithm_oid: String,
    /// Hashed message
    pub hashed_message: Vec<u8>,
    /// genTime
    pub gen_time: DateTime<Utc>,
    /// TSA policy OID
    pub policy: String,
    /// Serial number content bytes
    pub serial: Vec<u8>,
}

impl TstInfoData {
    fn decode(econtent: &[u8]) -> Result<Self> {
        let info = TstInfo::from_der(econtent)?;
        let imprint_oid = info.message_imprint.hash_algorithm.oid;
        Ok(Self {
            imprint_algorithm: DigestAlgorithm::from_oid(&imprint_oid).ok(),
            imprint_algorithm_oid: imprint_oid.to_string(),
            hashed_message: info.message_imprint.hashed_message.as_bytes().to_vec(),
            gen_time: unix_seconds(info.gen_time.to_unix_duration()),
            policy: info.policy.to_string(),
            serial: info.serial_number.as_bytes().to_vec(),
        })
    }

    /// Whether the imprint is the digest of `data`.
    pub fn matches(&self, data: &[u8]) -> bool {
        self.imprint_algorithm
            .is_some_and(|alg| alg.digest(data) == self.hashed_message)
    }
}

/// One SignerInfo.
#[derive(Debug, Clone)]
pub struct SignerInfoData {
    /// Signer certificate reference
    pub sid: SignerId,
    /// Digest algorithm, if supported
    pub digest_algorithm: Option<DigestAlgorithm>,
    /// Digest algorithm OID
    pub digest_algorithm_oid: String,
    /// DER `SET OF Attribute` the signature is computed over
    pub signed_attrs_der: Option<Vec<u8>>,
    /// messageDigest attribute
    pub message_digest: Option<Vec<u8>>,
    /// contentType attribute
    pub content_type: Option<String>,
    /// signingTime attribute
    pub signing_time: Option<DateTime<Utc>>,
    /// Signature algorithm OID
    pub signature_algorithm: String,
    /// Signature value
    pub signature: Vec<u8>,
    /// signatureTimeStampToken unsigned attributes
    pub timestamps: Vec<TimestampToken>,
}

impl SignerInfoData {
    fn decode(info: &SignerInfo) -> Result<Self> {
        let sid = match &info.sid {
            SignerIdentifier::IssuerAndSerialNumber(isn) => SignerId::IssuerSerial {
                issuer: isn.issuer.to_der()?,
                serial: isn.serial_number.as_bytes().to_vec(),
            },
            SignerIdentifier::SubjectKeyIdentifier(ski) => SignerId::KeyIdentifier(ski.0.as_bytes().to_vec()),
        };

        let mut data = Self {
            sid,
            digest_algorithm: DigestAlgorithm::from_oid(&info.digest_alg.oid).ok(),
            digest_algorithm_oid: info.digest_alg.oid.to_string(),
            signed_attrs_der: None,
            message_digest: None,
            content_type: None,
            signing_time: None,
            signature_algorithm: info.signature_algorithm.oid.to_string(),
            signature: info.signature.as_bytes().to_vec(),
            timestamps: Vec::new(),
        };

        if let Some(attrs) = &info.signed_attrs {
            data.signed_attrs_der = Some(attrs.to_der()?);
            for attr in attrs.iter() {
                let Some(value) = attr.values.iter().next() else {
                    continue;
                };
                if attr.oid == OID_MESSAGE_DIGEST {
                    data.message_digest = Some(value.decode_as::<OctetStringRef>()?.as_bytes().to_vec());
                } else if attr.oid == OID_SIGNING_TIME {
                    let time = x509_cert::time::Time::from_der(&value.to_der()?)?;
                    data.signing_time = Some(unix_seconds(time.to_unix_duration()));
                } else if attr.oid == OID_CONTENT_TYPE {
                    data.content_type = Some(value.decode_as::<ObjectIdentifier>()?.to_string());
                }
            }
        }

        if let Some(attrs) = &info.unsigned_attrs {
            for attr in attrs.iter().filter(|a| a.oid == OID_SIGNATURE_TIMESTAMP) {
                for value in attr.values.iter() {
                    match value.to_der().map_err(Error::from).and_then(|der| TimestampToken::from_der(&der)) {
                        Ok(token) => data.timestamps.push(token),
                        Err(e) => log::warn!("Skipping undecodable signature timestamp: {}", e),
                    }
                }
            }
        }

        Ok(data)
    }

    /// Whether the messageDigest attribute equals `digest`; `None` without the attribute.
    pub fn check_message_digest(&self, digest: &[u8]) -> Option<bool> {
        self.message_digest.as_deref().map(|md| md == digest)
    }

    /// First certificate of `candidates` matching the signer identifier.
    pub fn find_certificate(&self, candidates: &[Arc<CertificateToken>]) -> Option<Arc<CertificateToken>> {
        candidates.iter().find(|c| self.identifies(c)).cloned()
    }

    /// Whether `cert` is the certificate named by the signer identifier.
    pub fn identifies(&self, cert: &CertificateToken) -> bool {
        match &self.sid {
            SignerId::KeyIdentifier(ski) => cert.ski() == ski.as_slice(),
            SignerId::IssuerSerial { issuer, serial } => {
                if trim_leading_zeros(serial) != trim_leading_zeros(cert.serial_raw()) {
                    return false;
                }
                if issuer.as_slice() == cert.issuer_der() {
                    return true;
                }
                X509Name::from_der(issuer)
                    .map(|(_, name)| canonical_name(&name) == cert.canonical_issuer())
                    .unwrap_or(false)
            },
        }
    }

    /// Verify the signature value with `cert`'s public key.
    ///
    /// The signature covers the DER signed attributes when present, and
    /// `content` otherwise. Returns a readable reason on failure.
    pub fn verify_signature(&self, cert: &CertificateToken, content: &[u8]) -> std::result::Result<(), String> {
        let algorithm = self
            .digest_algorithm
            .ok_or_else(|| format!("unsupported digest algorithm {}", self.digest_algorithm_oid))?;
        let message = self.signed_attrs_der.as_deref().unwrap_or(content);
        verify_with_key(cert.public_key_der(), algorithm, message, &self.signature)
    }
}

/// RFC 3161 timestamp token (a SignedData over TSTInfo).
#[derive(Debug, Clone)]
pub struct TimestampToken {
    /// Decoded SignedData
    pub signed_data: CmsSignedData,
    /// Decoded TSTInfo
    pub tst_info: TstInfoData,
}

impl TimestampToken {
    /// Decode a timestamp token; fails when the content is not TSTInfo.
    pub fn from_der(bytes: &[u8]) -> Result<Self> {
        let signed_data = CmsSignedData::from_der(bytes)?;
        let tst_info = signed_data
            .tst_info()
            .cloned()
            .ok_or_else(|| Error::Cms(format!("content type {} is not TSTInfo", signed_data.content_type())))?;
        Ok(Self { signed_data, tst_info })
    }

    /// Generation time.
    pub fn gen_time(&self) -> DateTime<Utc> {
        self.tst_info.gen_time
    }
}

/// Decoded CMS SignedData.
#[derive(Debug, Clone)]
pub struct CmsSignedData {
    encoded: Vec<u8>,
    content_type: String,
    encapsulated_content: Option<Vec<u8>>,
    tst_info: Option<TstInfoData>,
    certificates: Vec<Vec<u8>>,
    crls: Vec<Vec<u8>>,
    ocsp_responses: Vec<Vec<u8>>,
    signers: Vec<SignerInfoData>,
}

impl CmsSignedData {
    /// Decode a ContentInfo wrapping SignedData.
    ///
    /// Trailing bytes after the ContentInfo are ignored (PDF `/Contents`
    /// values are zero padded).
    pub fn from_der(bytes: &[u8]) -> Result<Self> {
        if bytes.first() != Some(&0x30) {
            return Err(Error::InvalidHeader("CMS data must start with a DER SEQUENCE".to_string()));
        }
        let mut reader = SliceReader::new(bytes)?;
        let info = ContentInfo::decode(&mut reader)?;
        if info.content_type != OID_SIGNED_DATA {
            return Err(Error::Cms(format!(
                "content type {} is not signed-data",
                info.content_type
            )));
        }
        let encoded = info.to_der()?;
        let signed = info.content.decode_as::<SignedData>()?;

        let content_type = signed.encap_content_info.econtent_type;
        let encapsulated_content = signed
            .encap_content_info
            .econtent
            .as_ref()
            .map(|any| any.value().to_vec());
        let tst_info = match (&encapsulated_content, content_type == OID_TST_INFO) {
            (Some(content), true) => Some(TstInfoData::decode(content)?),
            _ => None,
        };

        let mut certificates = Vec::new();
        if let Some(set) = &signed.certificates {
            for choice in set.0.iter() {
                if let CertificateChoices::Certificate(cert) = choice {
                    certificates.push(cert.to_der()?);
                }
            }
        }

        let mut crls = Vec::new();
        let mut ocsp_responses = Vec::new();
        if let Some(choices) = &signed.crls {
            for choice in choices.0.iter() {
                match choice {
                    RevocationInfoChoice::Crl(crl) => crls.push(crl.to_der()?),
                    RevocationInfoChoice::Other(other) if other.other_format.oid == OID_OCSP_RESPONSE_INFO => {
                        ocsp_responses.push(other.other.to_der()?);
                    },
                    RevocationInfoChoice::Other(other) => {
                        log::debug!("Ignoring revocation info format {}", other.other_format.oid);
                    },
                }
            }
        }

        let signers = signed
            .signer_infos
            .0
            .iter()
            .map(SignerInfoData::decode)
            .collect::<Result<Vec<_>>>()?;

        log::trace!(
            "Decoded SignedData: {} signers, {} certificates, {} CRLs",
            signers.len(),
            certificates.len(),
            crls.len()
        );

        Ok(Self {
            encoded,
            content_type: content_type.to_string(),
            encapsulated_content,
            tst_info,
            certificates,
            crls,
            ocsp_responses,
            signers,
        })
    }

    /// The ContentInfo re-encoded without padding.
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    /// eContentType OID.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Whether the content is RFC 3161 TSTInfo.
    pub fn is_timestamp(&self) -> bool {
        self.tst_info.is_some()
    }

    /// Encapsulated content (absent for detached signatures).
    pub fn encapsulated_content(&self) -> Option<&[u8]> {
        self.encapsulated_content.as_deref()
    }

    /// Decoded TSTInfo for timestamp tokens.
    pub fn tst_info(&self) -> Option<&TstInfoData> {
        self.tst_info.as_ref()
    }

    /// Encoded certificates.
    pub fn certificates(&self) -> &[Vec<u8>] {
        &self.certificates
    }

    /// Encoded CRLs.
    pub fn crls(&self) -> &[Vec<u8>] {
        &self.crls
    }

    /// Encoded OCSP responses carried as other revocation info.
    pub fn ocsp_responses(&self) -> &[Vec<u8>] {
        &self.ocsp_responses
    }

    /// All SignerInfos.
    pub fn signers(&self) -> &[SignerInfoData] {
        &self.signers
    }

    /// The first SignerInfo.
    pub fn signer(&self) -> Option<&SignerInfoData> {
        self.signers.first()
    }
}

fn unix_seconds(duration: std::time::Duration) -> DateTime<Utc> {
    utc_from_timestamp(i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Verify `signature` over `message` with the key in `spki_der`.
///
/// RSA keys use PKCS#1 v1.5; EC keys on P-256 and P-384 use ASN.1 ECDSA.
pub fn verify_with_key(
    spki_der: &[u8],
    algorithm: DigestAlgorithm,
    message: &[u8],
    signature: &[u8],
) -> std::result::Result<(), String> {
    let spki = spki::SubjectPublicKeyInfoRef::try_from(spki_der).map_err(|e| e.to_string())?;

    if spki.algorithm.oid == OID_RSA_ENCRYPTION {
        return verify_rsa(spki_der, algorithm, message, signature);
    }
    if spki.algorithm.oid != OID_EC_PUBLIC_KEY {
        return Err(format!("unsupported key algorithm {}", spki.algorithm.oid));
    }

    let curve = spki.algorithm.parameters_oid().map_err(|e| e.to_string())?;
    let p256 = curve == OID_SECP256R1;
    let p384 = curve == OID_SECP384R1;
    let params: &'static dyn ring::signature::VerificationAlgorithm = match algorithm {
        DigestAlgorithm::Sha256 if p256 => &ring::signature::ECDSA_P256_SHA256_ASN1,
        DigestAlgorithm::Sha384 if p256 => &ring::signature::ECDSA_P256_SHA384_ASN1,
        DigestAlgorithm::Sha256 if p384 => &ring::signature::ECDSA_P384_SHA256_ASN1,
        DigestAlgorithm::Sha384 if p384 => &ring::signature::ECDSA_P384_SHA384_ASN1,
        _ => {
            return Err(format!(
                "unsupported ECDSA combination: curve {} with {}",
                curve,
                algorithm.name()
            ))
        },
    };

    let key = spki.subject_public_key.raw_bytes();
    ring::signature::UnparsedPublicKey::new(params, key)
        .verify(message, signature)
        .map_err(|_| "ECDSA signature mismatch".to_string())
}

fn verify_rsa(
    spki_der: &[u8],
    algorithm: DigestAlgorithm,
    message: &[u8],
    signature: &[u8],
) -> std::result::Result<(), String> {
    use rsa::pkcs1v15::{Signature, VerifyingKey};

    let key = RsaPublicKey::from_public_key_der(spki_der).map_err(|e| e.to_string())?;
    let signature = Signature::try_from(signature).map_err(|e| e.to_string())?;
    let outcome = match algorithm {
        DigestAlgorithm::Sha1 => VerifyingKey::<Sha1>::new(key).verify(message, &signature),
        DigestAlgorithm::Sha256 => VerifyingKey::<Sha256>::new(key).verify(message, &signature),
        DigestAlgorithm::Sha384 => VerifyingKey::<Sha384>::new(key).verify(message, &signature),
        DigestAlgorithm::Sha512 => VerifyingKey::<Sha512>::new(key).verify(message, &signature),
    };
    outcome.map_err(|e| format!("RSA signature mismatch: {}", e))
}
