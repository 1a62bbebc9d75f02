//! Whitespace normalization.
//!
//! Uses Unicode's definition of whitespace, so non-breaking spaces and tabs
//! pasted from spreadsheets collapse the same way ordinary spaces do.
//!
//! ```rust
//! use canonical::collapse_whitespace;
//!
//! assert_eq!(collapse_whitespace("  Kerkstraat \t 12\n"), "Kerkstraat 12");
//! assert_eq!(collapse_whitespace("Kerkstraat\u{00A0}12"), "Kerkstraat 12");
//! assert_eq!(collapse_whitespace("   "), "");
//! ```

/// Collapses repeated whitespace into single ASCII spaces and trims the edges.
pub fn collapse_whitespace(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    for segment in text.split_whitespace() {
        if !normalized.is_empty() {
            normalized.push(' ');
        }
        normalized.push_str(segment);
    }
    normalized
}
