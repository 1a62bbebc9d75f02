//! Token-level rules: street-type abbreviations and leading articles.
//!
//! Both tables operate on tokens that are already lowercased and stripped of
//! diacritics. Every expansion target is chosen so that it never matches an
//! abbreviation again, which keeps normalization idempotent.

use std::borrow::Cow;

/// Whole-word street-type abbreviations.
const WHOLE_WORD: &[(&str, &str)] = &[
    ("str", "straat"),
    ("ln", "laan"),
    ("wg", "weg"),
    ("pl", "plein"),
    ("pln", "plein"),
    ("gr", "gracht"),
    ("kd", "kade"),
    ("sngl", "singel"),
    ("dk", "dijk"),
    ("bd", "boulevard"),
    ("blvd", "boulevard"),
];

/// Abbreviated suffixes of compound street names (`kerkstr`, `julianaln`).
/// Longest suffix first so `pln` wins over `ln`.
const COMPOUND_SUFFIX: &[(&str, &str)] = &[
    ("str", "straat"),
    ("pln", "plein"),
    ("ln", "laan"),
    ("wg", "weg"),
    ("gr", "gracht"),
    ("kd", "kade"),
];

/// Minimum stem length before a compound suffix is considered an abbreviation.
const MIN_COMPOUND_STEM: usize = 2;

/// Dutch articles and prepositions that lead street and place names.
const LEADING_ARTICLES: &[&str] = &["de", "het", "van", "der", "den", "ter", "aan", "t"];

/// Expand a street-type abbreviation, either as a whole word or as the
/// suffix of an alphabetic compound. House numbers pass through untouched.
pub(crate) fn expand_abbreviation(token: &str) -> Cow<'_, str> {
    if let Some((_, full)) = WHOLE_WORD.iter().find(|(abbr, _)| *abbr == token) {
        return Cow::Borrowed(full);
    }

    // Hyphenated names ("sint-jansstr") abbreviate the last segment.
    let (head, tail) = match token.rfind('-') {
        Some(idx) => token.split_at(idx + 1),
        None => ("", token),
    };
    if tail.is_empty() || !tail.chars().all(char::is_alphabetic) {
        return Cow::Borrowed(token);
    }

    for (suffix, full) in COMPOUND_SUFFIX {
        if let Some(stem) = tail.strip_suffix(suffix) {
            if stem.chars().count() >= MIN_COMPOUND_STEM {
                let mut expanded = String::with_capacity(token.len() + full.len());
                expanded.push_str(head);
                expanded.push_str(stem);
                expanded.push_str(full);
                return Cow::Owned(expanded);
            }
        }
    }

    Cow::Borrowed(token)
}

pub(crate) fn is_leading_article(token: &str) -> bool {
    LEADING_ARTICLES.contains(&token)
}

/// Move the leading run of articles to the end, preserving their order.
///
/// `["van", "der", "helststraat", "3"]` becomes
/// `["helststraat", "3", "van", "der"]`. A sequence made only of articles is
/// returned as-is.
pub(crate) fn relocate_leading_articles(tokens: &mut Vec<String>) {
    let lead = tokens
        .iter()
        .take_while(|t| is_leading_article(t))
        .count();
    if lead == 0 || lead == tokens.len() {
        return;
    }
    tokens.rotate_left(lead);
}
