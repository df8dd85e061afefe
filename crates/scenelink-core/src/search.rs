//! Tokenized client-side search over asset display strings
//!
//! Display strings are normalized into a case-folded set of whitespace
//! separated tokens. A query matches when every query token is a substring of
//! at least one content token, so `"pump 12"` matches `"Pump-12A"` but the
//! literal string `"pump 12"` does not need to appear anywhere.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Normalized token set of a display string
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSignature {
    tokens: BTreeSet<String>,
}

impl SearchSignature {
    /// Tokenize `text`: trim, lowercase, split on whitespace, drop empty parts
    pub fn new(text: &str) -> Self {
        let tokens = text
            .trim()
            .to_lowercase()
            .split(char::is_whitespace)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self { tokens }
    }

    /// Signature of an asset's name and optional description
    pub fn for_asset(name: &str, description: Option<&str>) -> Self {
        Self::new(&format!("{} {}", name, description.unwrap_or_default()))
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Tokenized AND-contains: every query token is contained in some content token.
    ///
    /// An empty query matches everything.
    pub fn matches(&self, query: &SearchSignature) -> bool {
        query
            .tokens
            .iter()
            .all(|q| self.tokens.iter().any(|c| c.contains(q.as_str())))
    }

    /// Convenience wrapper that tokenizes a raw query string
    pub fn matches_str(&self, query: &str) -> bool {
        self.matches(&SearchSignature::new(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenization() {
        let sig = SearchSignature::new("  Pump-12A   Main\tDeck ");
        let tokens: Vec<_> = sig.tokens().collect();
        assert_eq!(tokens, vec!["deck", "main", "pump-12a"]);
    }

    #[test]
    fn test_tokenized_and_contains() {
        let pump = SearchSignature::for_asset("Pump-12A", None);
        let valve = SearchSignature::for_asset("Valve-7", None);

        assert!(pump.matches_str("pump 12"));
        assert!(!valve.matches_str("pump 12"));
    }

    #[test]
    fn test_all_query_tokens_required() {
        let sig = SearchSignature::for_asset("Compressor", Some("north skid"));
        assert!(sig.matches_str("comp north"));
        assert!(sig.matches_str("SKID"));
        assert!(!sig.matches_str("comp south"));
    }

    #[test]
    fn test_empty_query_matches() {
        let sig = SearchSignature::for_asset("Anything", None);
        assert!(sig.matches_str("   "));
    }
}
