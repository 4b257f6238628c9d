//! PAdES: signatures embedded in PDF files.
//!
//! [`PdfStructure`] indexes every revision of the file,
//! [`find_signatures`] locates the signature dictionaries,
//! [`DocumentSecurityStore`] collects validation material, and
//! [`PdfSignatureValidator`] ties them to the CMS and trust-chain checks.

pub mod dss;
pub mod scanner;
pub mod signature;
pub mod validator;

pub use dss::{DocumentSecurityStore, DssContent, DssRevision};
pub use scanner::{IndexedObject, PdfStructure, Revision};
pub use signature::{
    check_contents_gap, find_signatures, parse_pdf_date, retrieve_previous_revision, revision_content,
    signature_value, signed_content_from_revision, PdfSignatureDictionary, SignatureKind,
};
pub use validator::PdfSignatureValidator;
