//! Address canonicalization layer.
//!
//! Turns free-text Dutch postal address lines and city names into a
//! deterministic canonical form, and hashes the pair into a short fingerprint
//! that the index can look up in O(1).
//!
//! ## What we do
//!
//! - Unicode decomposition with diacritics stripped (`Ë` → `e`)
//! - Lowercasing and whitespace collapsing
//! - Street-type abbreviation expansion (`Kerkstr.` → `kerkstraat`)
//! - Leading articles moved to the end (`Van der Helststraat 3` →
//!   `helststraat 3 van der`)
//! - Fingerprint = first 8 bytes of SHA-256(`line|city`), hex-encoded
//!
//! ## Pure function guarantee
//!
//! No I/O, no clock calls, no OS locale. The same raw address produces the
//! same normalized fields and fingerprint on every machine, and normalizing an
//! already-normalized value is a no-op.
//!
//! ```rust
//! use canonical::{fingerprint, normalize_address_pair};
//!
//! let a = normalize_address_pair("Kerkstraat 12", "Utrecht");
//! let b = normalize_address_pair("kerkstr. 12", "utrecht");
//! assert_eq!(a, b);
//! assert_eq!(a.fingerprint, fingerprint("kerkstraat 12", "utrecht"));
//! ```

mod config;
mod document;
mod error;
mod hash;
mod pipeline;
mod token;
mod whitespace;

pub use crate::config::NormalizeConfig;
pub use crate::document::NormalizedAddress;
pub use crate::error::NormalizationError;
pub use crate::hash::{
    disambiguated_fingerprint, fingerprint, timestamp_fingerprint, Fingerprint,
    FINGERPRINT_BYTES, FINGERPRINT_HEX_LEN,
};
pub use crate::pipeline::{
    normalize_address_pair, normalize_city, normalize_line, try_normalize_address_pair,
    try_normalize_city, try_normalize_line,
};
pub use crate::whitespace::collapse_whitespace;
