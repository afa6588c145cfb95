// Static handshake configuration, supplied at construction.

use serde::{Deserialize, Serialize};

use crate::error::{ConsentError, Result};

/// Length of the sliding rate-limit window.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 3600;

/// Longest lifetime a request may be given (ten years).
pub const MAX_EXPIRY_HOURS: u64 = 24 * 365 * 10;

/// Protocol configuration.
///
/// Deserializes from camelCase JSON; any omitted key takes its default.
///
/// # Example
/// ```ignore
/// let config = HandshakeConfig::default()
///     .default_expiry_hours(48)
///     .enable_zero_knowledge_proofs(true);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HandshakeConfig {
    /// Lifetime of a new request when the caller gives no expiry.
    pub default_expiry_hours: u64,
    /// Sessions one requester may open within [`RATE_LIMIT_WINDOW_SECS`].
    pub max_requests_per_hour: u32,
    pub enable_zero_knowledge_proofs: bool,
    pub enable_selective_disclosure: bool,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            default_expiry_hours: 24,
            max_requests_per_hour: 10,
            enable_zero_knowledge_proofs: false,
            enable_selective_disclosure: true,
        }
    }
}

impl HandshakeConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_expiry_hours == 0 {
            return Err(ConsentError::Config(
                "defaultExpiryHours must be greater than zero".into(),
            ));
        }
        if self.default_expiry_hours > MAX_EXPIRY_HOURS {
            return Err(ConsentError::Config(format!(
                "defaultExpiryHours must not exceed {MAX_EXPIRY_HOURS}"
            )));
        }
        if self.max_requests_per_hour == 0 {
            return Err(ConsentError::Config(
                "maxRequestsPerHour must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn default_expiry_hours(mut self, hours: u64) -> Self {
        self.default_expiry_hours = hours;
        self
    }

    pub fn max_requests_per_hour(mut self, max: u32) -> Self {
        self.max_requests_per_hour = max;
        self
    }

    pub fn enable_zero_knowledge_proofs(mut self, enabled: bool) -> Self {
        self.enable_zero_knowledge_proofs = enabled;
        self
    }

    pub fn enable_selective_disclosure(mut self, enabled: bool) -> Self {
        self.enable_selective_disclosure = enabled;
        self
    }
}
