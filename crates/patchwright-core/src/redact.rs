//! Secret redaction (spec.md §7): any configured secret value, and any
//! string matching a secret-like pattern, is replaced by a four-character
//! prefix and `****` before emission into logs or terminal notifications.

use std::sync::LazyLock;

use regex::Regex;

static SECRET_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(token|key|secret|password|credential|auth)\s*[:=]\s*['"]?([A-Za-z0-9+/=_-]{8,})['"]?"#)
        .expect("valid regex")
});

/// Redact any `key=value`/`key: value`-shaped secret-like fields in `text`,
/// and every occurrence of `configured_secret` (when non-empty), replacing
/// the value with its four-character prefix followed by `****`.
pub fn redact(text: &str, configured_secret: &str) -> String {
    let mut out = SECRET_PATTERN
        .replace_all(text, |caps: &regex::Captures| {
            let label = &caps[1];
            let value = &caps[2];
            format!("{label}={}", mask(value))
        })
        .into_owned();

    if !configured_secret.is_empty() && out.contains(configured_secret) {
        out = out.replace(configured_secret, &mask(configured_secret));
    }

    out
}

fn mask(value: &str) -> String {
    let prefix: String = value.chars().take(4).collect();
    format!("{prefix}****")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_token_assignment() {
        let text = "Authorization header: token=abcdef1234567890 sent to LLM";
        let redacted = redact(text, "");
        assert!(!redacted.contains("abcdef1234567890"));
        assert!(redacted.contains("abcd****"));
    }

    #[test]
    fn redacts_quoted_secret() {
        let text = r#"config secret: "s3cr3tvalue123""#;
        let redacted = redact(text, "");
        assert!(!redacted.contains("s3cr3tvalue123"));
    }

    #[test]
    fn redacts_configured_secret_verbatim() {
        let text = "webhook call failed, secret-material-xyz rejected";
        let redacted = redact(text, "secret-material-xyz");
        assert!(!redacted.contains("secret-material-xyz"));
    }

    #[test]
    fn leaves_unrelated_text_untouched() {
        let text = "compiling OrderService.java, 0 errors";
        assert_eq!(redact(text, ""), text);
    }

    #[test]
    fn short_values_are_not_redacted() {
        // Fewer than 8 chars after the pattern shouldn't match.
        let text = "key=abc";
        assert_eq!(redact(text, ""), text);
    }
}
