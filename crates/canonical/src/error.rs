use thiserror::Error;

/// Errors that can occur while normalizing or fingerprinting an address.
///
/// The infallible entry points ([`normalize_line`](crate::normalize_line),
/// [`normalize_city`](crate::normalize_city)) never surface these; they log and
/// fall back to an empty string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("address input is {len} bytes, limit is {max}")]
    InputTooLong { len: usize, max: usize },
    #[error("address input contains control character U+{code:04X} at byte {offset}")]
    ControlCharacter { code: u32, offset: usize },
    #[error("invalid fingerprint {0:?}: expected 16 lowercase hex characters")]
    InvalidFingerprint(String),
    #[error("invalid normalize configuration: {0}")]
    InvalidConfig(String),
}
