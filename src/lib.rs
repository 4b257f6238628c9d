// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::enum_variant_names)]
#![allow(clippy::should_implement_trait)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]
#![cfg_attr(test, allow(unused_variables))]

//! # PAdES Trust
//!
//! Validation core for PAdES (PDF) and CAdES (CMS) signatures.
//!
//! ## Core Features
//!
//! - **Byte ranges**: `/ByteRange` views over any document, stackable for
//!   incremental revisions ([`byterange`])
//! - **Certificate pool**: deduplicating index by public key and subject,
//!   with per-entity provenance and trust ([`x509::CertificatePool`])
//! - **Tokens**: certificates and revocation data (CRL, OCSP) with signature
//!   checks, validity and revocation queries ([`x509`])
//! - **Trust chains**: issuer walks to a trust anchor, revocation freshness
//!   against a validation time ([`x509::ChainResolver`])
//! - **Orchestration**: signature dictionaries, DSS, document timestamps and
//!   coverage ordering for PDF ([`pdf`]); detached CMS ([`cades`])
//!
//! Problems with the *document* end up as findings in [`DiagnosticData`];
//! only structural rejection and caller misconfiguration are errors.
//!
//! ## Quick Start
//!
//! ```ignore
//! use pades_trust::x509::{CertificatePool, CertificateSourceType, CommonCertificateSource};
//! use pades_trust::{CertificateVerifier, FileDocument, PdfSignatureValidator};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = Arc::new(CertificatePool::new());
//! let mut anchors = CommonCertificateSource::new(pool.clone(), CertificateSourceType::TrustedStore);
//! anchors.add_file("trust_store.pem")?;
//!
//! let verifier = CertificateVerifier::new(pool).with_trusted_source(Arc::new(anchors))?;
//! let diagnostic = PdfSignatureValidator::new(Arc::new(FileDocument::new("signed.pdf")))
//!     .with_certificate_verifier(Arc::new(verifier))
//!     .validate()?;
//!
//! for signature in &diagnostic.signatures {
//!     println!("{}: valid={} findings={:?}", signature.id, signature.is_valid(), signature.findings);
//! }
//! # Ok(())
//! # }
//! ```

// Error handling
pub mod error;

// Configuration
pub mod config;

// Core PDF parsing
pub mod lexer;
pub mod object;
pub mod parser;

// Stream decoders
pub mod decoders;

// Documents and byte-range views
pub mod byterange;
pub mod document;

// Cryptographic material
pub mod cms;
pub mod digest;
pub mod x509;

// Validation
pub mod cades;
pub mod diagnostic;
pub mod pdf;
mod validation;
pub mod verifier;

// Re-exports
pub use byterange::{ByteRange, ByteRangeInputStream, PdfByteRangeDocument};
pub use cades::CmsDocumentValidator;
pub use config::ValidationConfig;
pub use diagnostic::{CertificateReport, DiagnosticData, RevocationReport, SignatureReport, SignatureReportKind};
pub use digest::DigestAlgorithm;
pub use document::{DocumentId, DssDocument, FileDocument, InMemoryDocument};
pub use error::{Error, Result};
pub use pdf::PdfSignatureValidator;
pub use verifier::CertificateVerifier;

// Version info
/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
