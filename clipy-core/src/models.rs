//! Core data model behavior for Clipy
//!
//! Construction of history entries, derived fields (smart type, searchable
//! text, content hash) and in-memory query matching.

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use sha2::{Digest, Sha256};

use crate::content_detection::classify;
use crate::interface::{ClipboardPayload, EntryId, HistoryEntry, SmartType};

/// Content beyond this many characters is not indexed or searched by term
pub const SEARCHABLE_CONTENT_MAX_CHARS: usize = 50_000;

/// Regex queries only look at this many leading characters of content
pub const REGEX_SCOPE_MAX_CHARS: usize = 100_000;

impl HistoryEntry {
    /// Create a fresh entry captured now
    pub fn new(payload: ClipboardPayload, source_app: Option<String>) -> Self {
        Self::new_at(payload, source_app, Utc::now())
    }

    pub fn new_at(payload: ClipboardPayload, source_app: Option<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: EntryId::new(),
            payload,
            created_at,
            source_app,
            is_pinned: false,
            copy_count: 1,
            custom_metadata: None,
        }
    }

    /// Build the entry that replaces `self` when an equal payload is captured again.
    /// Pin and metadata survive, the count goes up, the capture time resets.
    pub fn recaptured(&self, source_app: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: EntryId::new(),
            payload: self.payload.clone(),
            created_at: now,
            source_app,
            is_pinned: self.is_pinned,
            copy_count: self.copy_count.saturating_add(1),
            custom_metadata: self.custom_metadata.clone(),
        }
    }

    pub fn smart_type(&self) -> SmartType {
        classify(&self.payload)
    }

    /// Lowercased content used by the full-text index (capped)
    pub fn search_content(&self) -> String {
        match &self.payload {
            ClipboardPayload::Text { body, .. } => truncate_chars(body, SEARCHABLE_CONTENT_MAX_CHARS).to_lowercase(),
            ClipboardPayload::Color { hex_code } => hex_code.to_lowercase(),
            ClipboardPayload::Image { .. } => "image".to_string(),
        }
    }

    /// Lowercased concatenation of content, source app, type title and metadata
    pub fn searchable_text(&self) -> String {
        let mut parts = vec![self.search_content()];
        if let Some(app) = &self.source_app {
            parts.push(app.to_lowercase());
        }
        parts.push(self.smart_type().title().to_lowercase());
        if let Some(meta) = &self.custom_metadata {
            parts.push(meta.to_lowercase());
        }
        parts.join(" ")
    }

    /// Dedup key: SHA-256 over the kind-tagged payload
    pub fn content_hash(&self) -> String {
        payload_hash(&self.payload)
    }

    /// In-memory query matching.
    ///
    /// - empty query matches everything
    /// - `/pattern` is a case-insensitive regex over the literal content (strict)
    /// - otherwise every whitespace-separated term must appear in the searchable text
    pub fn matches(&self, query: &str) -> bool {
        QueryMatcher::new(query).matches(self)
    }
}

/// A parsed query, reusable across many entries
#[derive(Debug, Clone)]
pub enum QueryMatcher {
    All,
    /// `None` when the pattern failed to compile: matches nothing
    Pattern(Option<Regex>),
    Terms(Vec<String>),
}

impl QueryMatcher {
    pub fn new(query: &str) -> Self {
        if let Some(pattern) = query.strip_prefix('/') {
            if !pattern.is_empty() {
                return QueryMatcher::Pattern(RegexBuilder::new(pattern).case_insensitive(true).build().ok());
            }
        }
        let terms: Vec<String> = query.to_lowercase().split_whitespace().map(str::to_string).collect();
        if terms.is_empty() {
            QueryMatcher::All
        } else {
            QueryMatcher::Terms(terms)
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, QueryMatcher::All)
    }

    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        match self {
            QueryMatcher::All => true,
            QueryMatcher::Pattern(None) => false,
            QueryMatcher::Pattern(Some(regex)) => {
                regex.is_match(truncate_chars(entry.payload.text_representation(), REGEX_SCOPE_MAX_CHARS))
            }
            QueryMatcher::Terms(terms) => {
                let haystack = entry.searchable_text();
                terms.iter().all(|term| haystack.contains(term.as_str()))
            }
        }
    }
}

/// Stable content hash of a payload (hex SHA-256).
/// Every field is length-prefixed so distinct payloads never share an input.
pub fn payload_hash(payload: &ClipboardPayload) -> String {
    fn field(hasher: &mut Sha256, bytes: &[u8]) {
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }

    let mut hasher = Sha256::new();
    field(&mut hasher, payload.kind().as_bytes());
    field(&mut hasher, payload.stored_content().as_bytes());
    match payload.source_url() {
        Some(url) => {
            hasher.update([1u8]);
            field(&mut hasher, url.as_bytes());
        }
        None => hasher.update([0u8]),
    }
    hex::encode(hasher.finalize())
}

/// Prefix of `s` holding at most `max_chars` characters
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_entry(body: &str) -> HistoryEntry {
        HistoryEntry::new(
            ClipboardPayload::Text { body: body.to_string(), source_url: None },
            Some("Safari".to_string()),
        )
    }

    #[test]
    fn test_new_entry_defaults() {
        let entry = text_entry("Hello World");
        assert_eq!(entry.copy_count, 1);
        assert!(!entry.is_pinned);
        assert!(entry.custom_metadata.is_none());
        assert_eq!(entry.smart_type(), SmartType::Text);
    }

    #[test]
    fn test_searchable_text_layout() {
        let mut entry = text_entry("Hello World");
        entry.custom_metadata = Some("Greeting NOTE".to_string());
        assert_eq!(entry.searchable_text(), "hello world safari text greeting note");

        let image = HistoryEntry::new(ClipboardPayload::Image { blob_key: "ab".repeat(32) }, None);
        assert_eq!(image.searchable_text(), "image image");
    }

    #[test]
    fn test_searchable_text_caps_content() {
        let mut body = "a".repeat(SEARCHABLE_CONTENT_MAX_CHARS);
        body.push_str("needle");
        let entry = text_entry(&body);
        assert!(!entry.matches("needle"));
        assert!(entry.matches("aaa"));
    }

    #[test]
    fn test_empty_query_matches_everything() {
        assert!(text_entry("anything").matches(""));
        assert!(text_entry("anything").matches("   "));
        let image = HistoryEntry::new(ClipboardPayload::Image { blob_key: "00".repeat(32) }, None);
        assert!(image.matches(""));
    }

    #[test]
    fn test_term_matching_requires_all_terms() {
        let entry = text_entry("The quick brown fox");
        assert!(entry.matches("quick fox"));
        assert!(entry.matches("QUICK"));
        assert!(entry.matches("safari"));
        assert!(entry.matches("text"));
        assert!(!entry.matches("quick cat"));
    }

    #[test]
    fn test_regex_matching() {
        assert!(text_entry("abcdef").matches("/^abc"));
        assert!(text_entry("ABCdef").matches("/^abc"));
        assert!(!text_entry("xabc").matches("/^abc"));
        // The lowercase cache is not consulted: source app does not match a pattern
        assert!(!text_entry("hello").matches("/safari"));
    }

    #[test]
    fn test_invalid_regex_is_strict() {
        let entry = text_entry("(unclosed");
        assert!(!entry.matches("/(unclosed"));
    }

    #[test]
    fn test_lone_slash_is_a_term() {
        assert!(text_entry("a/b").matches("/"));
        assert!(!text_entry("ab").matches("/"));
    }

    #[test]
    fn test_query_matcher_parsing() {
        assert!(QueryMatcher::new("").is_all());
        assert!(QueryMatcher::new(" \t").is_all());
        assert!(matches!(QueryMatcher::new("/["), QueryMatcher::Pattern(None)));
        match QueryMatcher::new("Foo  BAR") {
            QueryMatcher::Terms(terms) => assert_eq!(terms, vec!["foo", "bar"]),
            other => panic!("unexpected matcher {:?}", other),
        }
    }

    #[test]
    fn test_regex_scope_is_capped() {
        let mut body = "x".repeat(REGEX_SCOPE_MAX_CHARS);
        body.push_str("tail");
        assert!(!text_entry(&body).matches("/tail"));
        assert!(text_entry("short tail").matches("/tail$"));
    }

    #[test]
    fn test_recaptured_preserves_user_state() {
        let mut original = text_entry("dup");
        original.is_pinned = true;
        original.custom_metadata = Some("keep".to_string());
        original.copy_count = 3;

        let later = original.created_at + chrono::Duration::hours(2);
        let replacement = original.recaptured(Some("Terminal".to_string()), later);

        assert_ne!(replacement.id, original.id);
        assert_eq!(replacement.payload, original.payload);
        assert_eq!(replacement.copy_count, 4);
        assert!(replacement.is_pinned);
        assert_eq!(replacement.custom_metadata.as_deref(), Some("keep"));
        assert_eq!(replacement.created_at, later);
        assert_eq!(replacement.source_app.as_deref(), Some("Terminal"));
    }

    #[test]
    fn test_payload_hash_distinguishes_kind_and_source() {
        let plain = ClipboardPayload::Text { body: "#FFF".to_string(), source_url: None };
        let color = ClipboardPayload::Color { hex_code: "#FFF".to_string() };
        assert_ne!(payload_hash(&plain), payload_hash(&color));

        let with_url = ClipboardPayload::Text {
            body: "#FFF".to_string(),
            source_url: Some("https://example.com".to_string()),
        };
        assert_ne!(payload_hash(&plain), payload_hash(&with_url));
        assert_eq!(payload_hash(&plain), payload_hash(&plain.clone()));
        assert_eq!(payload_hash(&plain).len(), 64);

        let joined = ClipboardPayload::Text { body: "a\0b".to_string(), source_url: None };
        let split = ClipboardPayload::Text { body: "a".to_string(), source_url: Some("b".to_string()) };
        assert_ne!(payload_hash(&joined), payload_hash(&split));
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
