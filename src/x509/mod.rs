//! X.509 certificate and revocation model.
//!
//! The [`CertificatePool`] owns every [`CertificateToken`] seen during a
//! validation run. Tokens refer to their issuer through a [`TokenLink`]
//! (entity key plus token id) resolved against the pool, never by owning
//! the issuer directly.

pub mod certificate;
pub mod chain;
pub mod pool;
pub mod revocation;
pub mod revocation_source;
pub mod source;

pub use certificate::{CertificateExtensions, CertificateToken, KeyUsageFlags, TrustServiceInfo};
pub use chain::{CertificateChain, ChainElement, ChainResolver};
pub use pool::{CertificatePool, CertificatePoolEntity};
pub use revocation::{OcspCertStatus, OcspResponseData, RevocationKind, RevocationReason, RevocationToken};
pub use revocation_source::{
    CompositeRevocationSource, OfflineCrlSource, OfflineOcspSource, RevocationSource,
};
pub use source::{CertificateSource, CertificateSourceType, CommonCertificateSource};

use crate::digest::to_hex;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

macro_rules! sha256_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; 32]);

        impl $name {
            /// SHA-256 of `bytes`.
            pub fn of(bytes: &[u8]) -> Self {
                Self(Sha256::digest(bytes).into())
            }

            /// Raw digest bytes.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&to_hex(&self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &to_hex(&self.0)[..16])
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }
    };
}

sha256_id!(
    /// Identity of one encoded certificate or revocation response (SHA-256 of its DER).
    TokenId
);

sha256_id!(
    /// Identity of a public key (SHA-256 of the SubjectPublicKeyInfo DER).
    EntityKey
);

/// Non-owning reference from one token to another held by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenLink {
    /// Public-key entity of the referenced token
    pub entity: EntityKey,
    /// The referenced token itself
    pub token: TokenId,
}

/// Convert a unix timestamp from an ASN.1 time into chrono.
pub(crate) fn utc_from_timestamp(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
