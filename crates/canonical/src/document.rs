use serde::{Deserialize, Serialize};

use crate::hash::Fingerprint;

/// A normalized (line, city) pair together with its base fingerprint.
///
/// The fingerprint here is always the *base* derivation. Collision resolution
/// may assign a different final fingerprint when the pair is persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NormalizedAddress {
    pub line: String,
    pub city: String,
    pub fingerprint: Fingerprint,
}

impl NormalizedAddress {
    /// Both fields are non-empty, so the fingerprint identifies a real address.
    pub fn is_matchable(&self) -> bool {
        !self.line.is_empty() && !self.city.is_empty()
    }

    /// Same normalized content, ignoring the fingerprint.
    pub fn same_location(&self, line: &str, city: &str) -> bool {
        self.line == line && self.city == city
    }
}
