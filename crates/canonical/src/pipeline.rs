use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::config::NormalizeConfig;
use crate::document::NormalizedAddress;
use crate::error::NormalizationError;
use crate::hash::fingerprint;
use crate::token::{expand_abbreviation, relocate_leading_articles};
use crate::whitespace::collapse_whitespace;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Line,
    City,
}

/// Normalize an address line, returning an error for malformed input.
pub fn try_normalize_line(raw: &str, cfg: &NormalizeConfig) -> Result<String, NormalizationError> {
    normalize_field(raw, cfg, Field::Line)
}

/// Normalize a city name, returning an error for malformed input.
pub fn try_normalize_city(raw: &str, cfg: &NormalizeConfig) -> Result<String, NormalizationError> {
    normalize_field(raw, cfg, Field::City)
}

/// Normalize an address line. Never fails; malformed input yields `""`.
///
/// ```rust
/// use canonical::normalize_line;
///
/// assert_eq!(normalize_line("Kerkstr. 12"), "kerkstraat 12");
/// assert_eq!(normalize_line("Van der Helststraat 3"), "helststraat 3 van der");
/// assert_eq!(normalize_line(""), "");
/// ```
pub fn normalize_line(raw: &str) -> String {
    infallible(raw, Field::Line)
}

/// Normalize a city name. Never fails; malformed input yields `""`.
///
/// ```rust
/// use canonical::normalize_city;
///
/// assert_eq!(normalize_city("  UTRECHT "), "utrecht");
/// assert_eq!(normalize_city("Den Haag"), "haag den");
/// ```
pub fn normalize_city(raw: &str) -> String {
    infallible(raw, Field::City)
}

/// Normalize both fields and derive the base fingerprint.
pub fn try_normalize_address_pair(
    raw_line: &str,
    raw_city: &str,
    cfg: &NormalizeConfig,
) -> Result<NormalizedAddress, NormalizationError> {
    let line = try_normalize_line(raw_line, cfg)?;
    let city = try_normalize_city(raw_city, cfg)?;
    let fingerprint = fingerprint(&line, &city);
    Ok(NormalizedAddress {
        line,
        city,
        fingerprint,
    })
}

/// Infallible counterpart of [`try_normalize_address_pair`].
pub fn normalize_address_pair(raw_line: &str, raw_city: &str) -> NormalizedAddress {
    let line = normalize_line(raw_line);
    let city = normalize_city(raw_city);
    let fingerprint = fingerprint(&line, &city);
    NormalizedAddress {
        line,
        city,
        fingerprint,
    }
}

fn infallible(raw: &str, field: Field) -> String {
    match normalize_field(raw, &NormalizeConfig::default(), field) {
        Ok(normalized) => normalized,
        Err(err) => {
            tracing::warn!(error = %err, "address normalization failed; using empty value");
            String::new()
        }
    }
}

fn normalize_field(
    raw: &str,
    cfg: &NormalizeConfig,
    field: Field,
) -> Result<String, NormalizationError> {
    validate_input(raw, cfg)?;

    let folded = fold_chars(raw);
    let collapsed = collapse_whitespace(&folded);

    let mut tokens: Vec<String> = Vec::with_capacity(collapsed.len() / 4 + 1);
    for token in collapsed.split(' ') {
        let token = token.trim_matches(|c| c == '-' || c == '/');
        if token.is_empty() {
            continue;
        }
        let token = match field {
            Field::Line => expand_abbreviation(token).into_owned(),
            Field::City => token.to_string(),
        };
        tokens.push(token);
    }

    relocate_leading_articles(&mut tokens);
    let normalized = tokens.join(" ");
    // Expansion can grow the value; keep every accepted output re-normalizable.
    if normalized.len() > cfg.max_input_bytes {
        return Err(NormalizationError::InputTooLong {
            len: normalized.len(),
            max: cfg.max_input_bytes,
        });
    }
    Ok(normalized)
}

fn validate_input(raw: &str, cfg: &NormalizeConfig) -> Result<(), NormalizationError> {
    if raw.len() > cfg.max_input_bytes {
        return Err(NormalizationError::InputTooLong {
            len: raw.len(),
            max: cfg.max_input_bytes,
        });
    }
    if let Some((offset, ch)) = raw
        .char_indices()
        .find(|(_, ch)| ch.is_control() && !ch.is_whitespace())
    {
        return Err(NormalizationError::ControlCharacter {
            code: ch as u32,
            offset,
        });
    }
    Ok(())
}

/// Decompose, lowercase, drop diacritics and apostrophes, and turn every
/// other non-token character into a space.
///
/// Decomposition runs before lowercasing: compatibility forms such as `ℌ`
/// decompose to uppercase letters that must still be folded.
fn fold_chars(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for decomposed in raw.nfkd() {
        for ch in decomposed.to_lowercase() {
            if is_combining_mark(ch) || is_apostrophe(ch) {
                continue;
            }
            if ch.is_alphanumeric() || ch == '-' || ch == '/' {
                out.push(ch);
            } else {
                out.push(' ');
            }
        }
    }
    out
}

fn is_apostrophe(ch: char) -> bool {
    matches!(ch, '\'' | '\u{2019}' | '\u{2018}' | '`' | '\u{00B4}')
}
