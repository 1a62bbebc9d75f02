//! Configuration for the address normalizer.
//!
//! The rules themselves (abbreviation table, article list) are fixed: changing
//! them changes every stored fingerprint and requires a full backfill. The
//! config only bounds what the normalizer is willing to process.
//!
//! ```rust
//! use canonical::NormalizeConfig;
//!
//! let cfg = NormalizeConfig::default();
//! assert_eq!(cfg.max_input_bytes, 512);
//! assert!(cfg.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};

use crate::error::NormalizationError;

/// Limits applied by [`try_normalize_line`](crate::try_normalize_line) and
/// [`try_normalize_city`](crate::try_normalize_city).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizeConfig {
    /// Raw inputs longer than this many bytes are rejected as malformed.
    /// Postal address lines are short; anything near this limit is garbage.
    #[serde(default = "NormalizeConfig::default_max_input_bytes")]
    pub max_input_bytes: usize,
}

impl NormalizeConfig {
    pub(crate) fn default_max_input_bytes() -> usize {
        512
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), NormalizationError> {
        if self.max_input_bytes == 0 {
            return Err(NormalizationError::InvalidConfig(
                "max_input_bytes must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: Self::default_max_input_bytes(),
        }
    }
}
