//! Username sanitization and profile URL handling.

use once_cell::sync::Lazy;
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;
use url::Url;

/// Longest username kept after sanitization, in characters.
pub const MAX_USERNAME_CHARS: usize = 30;

/// Base used to synthesize a profile URL when the export has none.
pub const DEFAULT_PROFILE_BASE_URL: &str = "https://www.instagram.com/";

const STRIPPED_CHARS: &[char] = &['<', '>', '&', '"', '\''];

/// First path segments that name a site section rather than an account.
static RESERVED_SEGMENTS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "_u", "accounts", "explore", "p", "reel", "reels", "stories", "direct", "intent",
        "i", "home", "search", "settings", "status", "hashtag", "web",
    ]
    .into_iter()
    .collect()
});

/// Clean a raw username candidate.
///
/// Strips a leading `@`, the characters `<>&"'` and surrounding whitespace,
/// keeps only the first whitespace-separated word, then truncates to
/// [`MAX_USERNAME_CHARS`]. Returns `None` when nothing usable remains.
#[must_use]
pub fn sanitize_username(raw: &str) -> Option<String> {
    let normalized: String = raw.nfc().collect();
    let cleaned: String = normalized
        .chars()
        .filter(|c| !STRIPPED_CHARS.contains(c))
        .collect();
    let word = cleaned.split_whitespace().next()?;
    let word = word.trim_start_matches('@');
    let truncated: String = word.chars().take(MAX_USERNAME_CHARS).collect();
    if truncated.is_empty() {
        None
    } else {
        Some(truncated)
    }
}

/// Pull a username out of a profile link.
///
/// Handles absolute and relative links, `/_u/<name>` style prefixes and
/// intent links carrying `screen_name`. Returns `None` for links that point
/// at something other than a profile.
#[must_use]
pub fn username_from_link(href: &str) -> Option<String> {
    let url = parse_link(href)?;

    if let Some((_, name)) = url
        .query_pairs()
        .find(|(k, _)| k == "screen_name" || k == "username")
    {
        return sanitize_username(&name);
    }

    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let first = segments.next()?;
    let candidate = if first == "_u" {
        segments.next()?
    } else if RESERVED_SEGMENTS.contains(first.to_lowercase().as_str()) {
        return None;
    } else {
        first
    };
    sanitize_username(candidate)
}

/// True when `href` is an absolute http(s) URL.
#[must_use]
pub fn is_absolute_http(href: &str) -> bool {
    Url::parse(href).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

/// Build a profile URL for `username` under `base`.
#[must_use]
pub fn profile_url(base: &str, username: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{username}")
    } else {
        format!("{base}/{username}")
    }
}

fn parse_link(href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    match Url::parse(href) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
        Ok(_) => None,
        // Relative links resolve against a throwaway base; only the path matters.
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse("https://profile.invalid/").ok()?.join(href).ok()
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_markup_characters() {
        assert_eq!(sanitize_username("<alice>"), Some("alice".to_string()));
        assert_eq!(sanitize_username("bo\"b'&"), Some("bob".to_string()));
        assert_eq!(sanitize_username("  @carol  "), Some("carol".to_string()));
    }

    #[test]
    fn test_sanitize_keeps_first_word() {
        assert_eq!(
            sanitize_username("dave\nJan 5, 2024"),
            Some("dave".to_string())
        );
    }

    #[test]
    fn test_sanitize_rejects_empty() {
        assert_eq!(sanitize_username(""), None);
        assert_eq!(sanitize_username("   "), None);
        assert_eq!(sanitize_username("<>&\"'"), None);
        assert_eq!(sanitize_username("@"), None);
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "a".repeat(45);
        assert_eq!(
            sanitize_username(&long).map(|s| s.chars().count()),
            Some(MAX_USERNAME_CHARS)
        );
    }

    #[test]
    fn test_username_from_absolute_link() {
        assert_eq!(
            username_from_link("https://www.instagram.com/alice.b/"),
            Some("alice.b".to_string())
        );
        assert_eq!(
            username_from_link("https://x.com/user111"),
            Some("user111".to_string())
        );
    }

    #[test]
    fn test_username_from_prefixed_and_relative_links() {
        assert_eq!(
            username_from_link("https://www.instagram.com/_u/carol"),
            Some("carol".to_string())
        );
        assert_eq!(username_from_link("/dave?hl=en"), Some("dave".to_string()));
    }

    #[test]
    fn test_username_from_intent_link() {
        assert_eq!(
            username_from_link("https://twitter.com/intent/user?screen_name=Erin"),
            Some("Erin".to_string())
        );
        assert_eq!(
            username_from_link("https://twitter.com/intent/user?user_id=123"),
            None
        );
    }

    #[test]
    fn test_username_from_non_profile_links() {
        assert_eq!(username_from_link("https://www.instagram.com/explore/"), None);
        assert_eq!(username_from_link("https://www.instagram.com/"), None);
        assert_eq!(username_from_link("mailto:someone@example.com"), None);
        assert_eq!(username_from_link(""), None);
    }

    #[test]
    fn test_profile_url_joins_base() {
        assert_eq!(
            profile_url("https://www.instagram.com/", "alice"),
            "https://www.instagram.com/alice"
        );
        assert_eq!(profile_url("https://x.com", "bob"), "https://x.com/bob");
    }

    #[test]
    fn test_is_absolute_http() {
        assert!(is_absolute_http("https://x.com/bob"));
        assert!(!is_absolute_http("/bob"));
        assert!(!is_absolute_http("javascript:void(0)"));
    }
}
