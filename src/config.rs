//! Configuration for signature validation.

use chrono::{DateTime, Duration, Utc};

/// Default bound for issuer and trust-anchor walks.
pub const DEFAULT_MAX_CHAIN_LENGTH: usize = 32;

/// Signature validation configuration.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Time against which validity periods and revocation freshness are judged.
    /// `None` means "now" at the moment validation starts.
    pub validation_time: Option<DateTime<Utc>>,

    /// Maximum number of issuer hops followed during chain and trust-anchor walks.
    pub max_chain_length: usize,

    /// Maximum accepted age of revocation data, relative to the validation time.
    pub revocation_freshness: Option<Duration>,

    /// Query revocation sources for non-trusted certificates.
    pub check_revocation: bool,

    /// Maximum object nesting depth accepted by the PDF parser.
    pub max_nesting: usize,

    /// Maximum document size in bytes. Set to 0 to disable the check.
    pub max_file_size: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationConfig {
    /// Create new configuration with defaults.
    pub fn new() -> Self {
        Self {
            validation_time: None,
            max_chain_length: DEFAULT_MAX_CHAIN_LENGTH,
            revocation_freshness: None,
            check_revocation: true,
            max_nesting: 100,
            max_file_size: 500 * 1024 * 1024,
        }
    }

    /// Validate as of the given time instead of "now".
    pub fn with_validation_time(mut self, time: DateTime<Utc>) -> Self {
        self.validation_time = Some(time);
        self
    }

    /// Bound issuer walks to `length` hops.
    pub fn with_max_chain_length(mut self, length: usize) -> Self {
        self.max_chain_length = length;
        self
    }

    /// Require revocation data no older than `max_age` at validation time.
    pub fn with_revocation_freshness(mut self, max_age: Duration) -> Self {
        self.revocation_freshness = Some(max_age);
        self
    }

    /// Enable or disable revocation lookups.
    pub fn with_revocation_checks(mut self, enable: bool) -> Self {
        self.check_revocation = enable;
        self
    }

    /// Set the parser nesting limit.
    pub fn with_max_nesting(mut self, depth: usize) -> Self {
        self.max_nesting = depth;
        self
    }

    /// Set the document size limit.
    pub fn with_max_file_size(mut self, size: usize) -> Self {
        self.max_file_size = size;
        self
    }

    /// The validation time, resolved against the current clock when unset.
    pub fn resolved_validation_time(&self) -> DateTime<Utc> {
        self.validation_time.unwrap_or_else(Utc::now)
    }
}
