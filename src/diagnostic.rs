//! Diagnostic data produced by a validation run.
//!
//! The graph holds raw facts only: per-signature intactness and coverage,
//! per-certificate trust, validity and revocation status, and the findings
//! recorded along the way. Turning it into a verdict or a report is left to
//! the caller.

use crate::byterange::ByteRange;
use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::x509::{
    CertificateExtensions, CertificateSourceType, CertificateToken, EntityKey, RevocationKind, RevocationReason,
    RevocationToken, TokenId, TrustServiceInfo,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

/// What kind of signature a report describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignatureReportKind {
    /// PDF signature dictionary (`/Type /Sig`)
    PdfSignature,
    /// PDF document timestamp (`/Type /DocTimeStamp`)
    DocumentTimestamp,
    /// Detached or enveloping CMS signature
    CmsSignature,
}

/// Facts gathered about one signature or document timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct SignatureReport {
    /// Field name, or object reference when the field is unknown
    pub id: String,
    pub kind: SignatureReportKind,
    pub sub_filter: Option<String>,
    pub byte_range: Option<ByteRange>,
    /// Revision closed by the signed range
    pub revision: Option<usize>,
    pub digest_algorithm: Option<DigestAlgorithm>,
    /// Hex digest of the signed bytes
    pub signed_digest: Option<String>,
    /// Digest of the signed bytes matches the signed attributes (or the timestamp imprint)
    pub intact: bool,
    /// Signature value verified with the signing certificate
    pub signature_valid: Option<bool>,
    /// ByteRange gap holds exactly the `/Contents` string
    pub contents_gap_valid: Option<bool>,
    /// Signed range reaches the end of the file
    pub covers_whole_document: Option<bool>,
    /// `/M` or the signingTime attribute
    pub claimed_signing_time: Option<DateTime<Utc>>,
    /// genTime, for timestamps
    pub timestamp_time: Option<DateTime<Utc>>,
    /// genTime of every valid signature timestamp (unsigned attribute)
    pub signature_timestamps: Vec<DateTime<Utc>>,
    /// Earliest proven existence time
    pub best_signature_time: Option<DateTime<Utc>>,
    pub signing_certificate: Option<TokenId>,
    /// Certificates from the signer towards the anchor
    pub chain: Vec<TokenId>,
    pub trust_anchor: Option<TokenId>,
    pub chain_trusted: bool,
    pub signer_revoked: Option<bool>,
    /// Ids of the timestamps whose range covers this one
    pub covered_by: Vec<String>,
    /// Bytes read through the covering timestamp's view equal the direct view
    pub nested_digest_consistent: Option<bool>,
    /// DSS revisions inside the signed range
    pub covered_dss_revisions: Vec<usize>,
    pub findings: Vec<String>,
}

impl SignatureReport {
    /// Empty report; every check starts out failed or unknown.
    pub fn new(id: impl Into<String>, kind: SignatureReportKind) -> Self {
        Self {
            id: id.into(),
            kind,
            sub_filter: None,
            byte_range: None,
            revision: None,
            digest_algorithm: None,
            signed_digest: None,
            intact: false,
            signature_valid: None,
            contents_gap_valid: None,
            covers_whole_document: None,
            claimed_signing_time: None,
            timestamp_time: None,
            signature_timestamps: Vec::new(),
            best_signature_time: None,
            signing_certificate: None,
            chain: Vec::new(),
            trust_anchor: None,
            chain_trusted: false,
            signer_revoked: None,
            covered_by: Vec::new(),
            nested_digest_consistent: None,
            covered_dss_revisions: Vec::new(),
            findings: Vec::new(),
        }
    }

    /// Whether this is a document timestamp.
    pub fn is_timestamp(&self) -> bool {
        self.kind == SignatureReportKind::DocumentTimestamp
    }

    /// Intact, cryptographically valid, chained to a trust anchor and not revoked.
    pub fn is_valid(&self) -> bool {
        self.intact && self.signature_valid == Some(true) && self.chain_trusted && self.signer_revoked != Some(true)
    }

    pub(crate) fn finding(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}: {}", self.id, message);
        self.findings.push(message);
    }
}

/// Facts about one certificate.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateReport {
    pub id: TokenId,
    pub entity: EntityKey,
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub self_signed: bool,
    pub trusted: bool,
    pub sources: BTreeSet<CertificateSourceType>,
    /// Issuer whose key verified this certificate's signature
    pub signed_by: Option<TokenId>,
    pub signature_failure: Option<String>,
    pub valid_at_validation_time: bool,
    pub revoked: Option<bool>,
    pub revocation: Option<TokenId>,
    pub trust_services: Vec<TrustServiceInfo>,
    pub extensions: CertificateExtensions,
}

impl CertificateReport {
    /// Snapshot `token` at `validation_time`.
    pub fn from_token(token: &CertificateToken, validation_time: &DateTime<Utc>) -> Self {
        Self {
            id: token.id(),
            entity: token.entity_key(),
            subject: token.subject().to_string(),
            issuer: token.issuer().to_string(),
            serial_number: token.serial_number().to_string(),
            not_before: token.not_before(),
            not_after: token.not_after(),
            self_signed: token.is_self_signed(),
            trusted: token.is_trusted(),
            sources: token.sources(),
            signed_by: token.issuer_link().map(|l| l.token),
            signature_failure: token.signature_failure(),
            valid_at_validation_time: token.is_valid_on(validation_time),
            revoked: token.is_revoked(),
            revocation: token.revocation().map(|r| r.id()),
            trust_services: token.trust_services(),
            extensions: token.extensions().clone(),
        }
    }
}

/// Facts about one CRL entry or OCSP response.
#[derive(Debug, Clone, Serialize)]
pub struct RevocationReport {
    pub id: TokenId,
    pub kind: RevocationKind,
    /// `Some(true)` for good, `Some(false)` for revoked
    pub status: Option<bool>,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
    pub revocation_time: Option<DateTime<Utc>>,
    pub reason: Option<RevocationReason>,
    pub issuer: Option<TokenId>,
    pub related_certificate: Option<TokenId>,
}

impl From<&RevocationToken> for RevocationReport {
    fn from(token: &RevocationToken) -> Self {
        Self {
            id: token.id(),
            kind: token.kind(),
            status: token.status(),
            this_update: token.this_update(),
            next_update: token.next_update(),
            revocation_time: token.revocation_time(),
            reason: token.reason(),
            issuer: token.issuer().map(|l| l.token),
            related_certificate: token.related_certificate(),
        }
    }
}

/// Material introduced by one revision's Document Security Store.
#[derive(Debug, Clone, Serialize)]
pub struct DssReport {
    pub revision: usize,
    pub certificates: usize,
    pub crls: usize,
    pub ocsps: usize,
}

/// The result graph of one validation run.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticData {
    pub document_name: Option<String>,
    pub document_size: u64,
    pub validation_time: DateTime<Utc>,
    pub signatures: Vec<SignatureReport>,
    pub certificates: Vec<CertificateReport>,
    pub revocations: Vec<RevocationReport>,
    pub dss: Vec<DssReport>,
    /// Document-level anomalies
    pub findings: Vec<String>,
}

impl DiagnosticData {
    pub(crate) fn new(document_name: Option<String>, document_size: u64, validation_time: DateTime<Utc>) -> Self {
        Self {
            document_name,
            document_size,
            validation_time,
            signatures: Vec::new(),
            certificates: Vec::new(),
            revocations: Vec::new(),
            dss: Vec::new(),
            findings: Vec::new(),
        }
    }

    /// Report of the signature with `id`.
    pub fn signature(&self, id: &str) -> Option<&SignatureReport> {
        self.signatures.iter().find(|s| s.id == id)
    }

    /// Report of the certificate with `id`.
    pub fn certificate(&self, id: &TokenId) -> Option<&CertificateReport> {
        self.certificates.iter().find(|c| &c.id == id)
    }

    /// Report of the revocation data with `id`.
    pub fn revocation(&self, id: &TokenId) -> Option<&RevocationReport> {
        self.revocations.iter().find(|r| &r.id == id)
    }

    /// Document timestamps, in file order.
    pub fn timestamps(&self) -> impl Iterator<Item = &SignatureReport> {
        self.signatures.iter().filter(|s| s.is_timestamp())
    }

    /// Record `token` (and its revocation data) once.
    pub(crate) fn add_certificate(&mut self, token: &CertificateToken) {
        if self.certificate(&token.id()).is_none() {
            self.certificates
                .push(CertificateReport::from_token(token, &self.validation_time));
        }
        if let Some(revocation) = token.revocation() {
            if self.revocation(&revocation.id()).is_none() {
                self.revocations.push(RevocationReport::from(revocation.as_ref()));
            }
        }
    }

    pub(crate) fn finding(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}", message);
        self.findings.push(message);
    }

    /// Export to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::ParseError {
            offset: 0,
            reason: format!("Failed to serialize to JSON: {}", e),
        })
    }
}
