//! Content type detection for clipboard payloads
//!
//! Classifies payloads into smart types (URL, email, code, ...) and detects
//! hex color strings before the monitor wraps them.

use crate::interface::{ClipboardPayload, SmartType};
use once_cell::sync::Lazy;
use regex::Regex;

/// Hex color: optional leading `#`, exactly 3 or 6 hex digits, whole string
static HEX_COLOR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#?([A-Fa-f0-9]{6}|[A-Fa-f0-9]{3})$").unwrap()
});

/// Email address anywhere in the text (TLD of 2-64 letters)
static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Z0-9a-z._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,64}").unwrap()
});

/// Keyword and symbol indicators for code snippets
const CODE_INDICATORS: &[&str] = &[
    "func ", "var ", "let ", "class ", "struct ", "import ", "{", "}", ";", "def ", "return ",
];

/// Minimum number of distinct indicators for a snippet to count as code
const CODE_INDICATOR_THRESHOLD: usize = 2;

/// Check if a string is a hex color (`#FFF`, `a1b2c3`, ...)
pub fn is_hex_color(text: &str) -> bool {
    HEX_COLOR_REGEX.is_match(text)
}

/// Check if a string is an absolute URL with both scheme and host
pub fn is_url(text: &str) -> bool {
    let trimmed = text.trim();
    // The URL parser silently strips tabs/newlines; multi-line text is never a link
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        return false;
    }
    match url::Url::parse(trimmed) {
        Ok(url) => url.host_str().is_some_and(|host| !host.is_empty()),
        Err(_) => false,
    }
}

/// Check if the text contains an email address
fn is_email(text: &str) -> bool {
    EMAIL_REGEX.is_match(text)
}

/// Check if the text looks like a code snippet
fn is_code(text: &str) -> bool {
    CODE_INDICATORS
        .iter()
        .filter(|indicator| text.contains(*indicator))
        .count()
        >= CODE_INDICATOR_THRESHOLD
}

/// Classify a payload. Total and deterministic.
pub fn classify(payload: &ClipboardPayload) -> SmartType {
    match payload {
        ClipboardPayload::Image { .. } => SmartType::Image,
        ClipboardPayload::Color { .. } => SmartType::Color,
        ClipboardPayload::Text { body, .. } => classify_text(body),
    }
}

fn classify_text(text: &str) -> SmartType {
    if is_url(text) {
        return SmartType::Url;
    }
    if is_email(text) {
        return SmartType::Email;
    }
    if is_code(text) {
        return SmartType::Code;
    }
    SmartType::Text
}

/// Host of a URL string, if it parses
pub fn url_host(url: &str) -> Option<String> {
    url::Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(body: &str) -> ClipboardPayload {
        ClipboardPayload::Text { body: body.to_string(), source_url: None }
    }

    #[test]
    fn test_hex_color_detection() {
        assert!(is_hex_color("#FFF"));
        assert!(is_hex_color("ABCDEF"));
        assert!(is_hex_color("#a1b2c3"));
        assert!(is_hex_color("fff"));

        assert!(!is_hex_color("#12"));
        assert!(!is_hex_color("hello"));
        assert!(!is_hex_color("#1234567"));
        assert!(!is_hex_color("#12345"));
        assert!(!is_hex_color("##FFF"));
        assert!(!is_hex_color("#GGG"));
    }

    #[test]
    fn test_image_and_color_payloads_ignore_content() {
        let image = ClipboardPayload::Image { blob_key: "https://example.com".to_string() };
        assert_eq!(classify(&image), SmartType::Image);

        let color = ClipboardPayload::Color { hex_code: "#FFF".to_string() };
        assert_eq!(classify(&color), SmartType::Color);
    }

    #[test]
    fn test_url_detection() {
        assert_eq!(classify(&text("https://github.com")), SmartType::Url);
        assert_eq!(classify(&text("  http://example.com/path?q=1  ")), SmartType::Url);
        assert_eq!(classify(&text("ftp://files.example.com/doc.pdf")), SmartType::Url);

        // No host
        assert_ne!(classify(&text("mailto:user@example.com")), SmartType::Url);
        assert_ne!(classify(&text("file:///etc/passwd")), SmartType::Url);
        // Not a URL at all
        assert_eq!(classify(&text("just some words")), SmartType::Text);
        // Multi-line content is never a link
        assert!(!is_url("https://example.com\nsecond line"));
    }

    #[test]
    fn test_email_detection() {
        assert_eq!(classify(&text("user@example.com")), SmartType::Email);
        assert_eq!(classify(&text("mailto:user@example.com")), SmartType::Email);
        assert_eq!(classify(&text("reach me at first.last+tag@mail.co.uk today")), SmartType::Email);
        assert_eq!(classify(&text("user@localhost")), SmartType::Text);
        assert_eq!(classify(&text("user@example.c")), SmartType::Text);
    }

    #[test]
    fn test_code_detection() {
        assert_eq!(classify(&text("fn main() { println!(\"hi\"); }")), SmartType::Code);
        assert_eq!(classify(&text("def foo():\n    return 1")), SmartType::Code);
        assert_eq!(classify(&text("import os\nlet x = 1")), SmartType::Code);
        // One indicator is not enough
        assert_eq!(classify(&text("let it be")), SmartType::Text);
        assert_eq!(classify(&text("a; b")), SmartType::Text);
    }

    #[test]
    fn test_url_takes_priority_over_email() {
        assert_eq!(classify(&text("https://user@example.com/")), SmartType::Url);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let samples = [
            "https://github.com",
            "user@example.com",
            "struct Foo { a: u8 }",
            "plain words",
        ];
        for sample in samples {
            let first = text(sample);
            let second = ClipboardPayload::Text { body: sample.to_string(), source_url: None };
            assert_eq!(classify(&first), classify(&second));
        }
    }

    #[test]
    fn test_url_host() {
        assert_eq!(url_host("https://news.ycombinator.com/item?id=1").as_deref(), Some("news.ycombinator.com"));
        assert_eq!(url_host("not a url"), None);
    }
}
