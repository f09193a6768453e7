//! URL normalization
//!
//! Every spelling of the same platform video (watch page with extra query
//! parameters, short link, embed, `/v/`, shorts) collapses to one canonical
//! watch URL plus its video id. Other URLs lose query and fragment and get a
//! lowercased host.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

static PLATFORM_VIDEO_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:youtube\.com/watch\?(?:[^#]*&)?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/v/|youtube\.com/shorts/)([A-Za-z0-9_-]+)",
    )
    .unwrap_or_else(|e| panic!("video id pattern must compile: {}", e))
});

/// Result of normalizing a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUrl {
    /// Canonical form used as the ledger identity
    pub url: String,
    /// Platform video id when the URL points at a known platform
    pub video_id: Option<String>,
}

/// Canonical watch URL for a platform video id
pub fn canonical_watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

/// Extract the platform video id, if any
pub fn extract_video_id(url: &str) -> Option<String> {
    PLATFORM_VIDEO_ID
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Normalize `url`. Pure and idempotent; unparsable input comes back trimmed.
pub fn normalize(url: &str) -> NormalizedUrl {
    let trimmed = url.trim();

    if let Some(video_id) = extract_video_id(trimmed) {
        return NormalizedUrl {
            url: canonical_watch_url(&video_id),
            video_id: Some(video_id),
        };
    }

    let normalized = match Url::parse(trimmed) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => {
                let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();
                format!(
                    "{}://{}{}{}",
                    parsed.scheme(),
                    host.to_lowercase(),
                    port,
                    parsed.path()
                )
            }
            None => trimmed.to_string(),
        },
        Err(_) => trimmed.to_string(),
    };

    NormalizedUrl {
        url: normalized,
        video_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_spellings_collapse() {
        let spellings = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?v=dQw4w9WgXcQ&t=42s",
            "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/v/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "  https://m.youtube.com/watch?v=dQw4w9WgXcQ  ",
        ];

        for spelling in spellings {
            let normalized = normalize(spelling);
            assert_eq!(
                normalized.url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                "spelling {}",
                spelling
            );
            assert_eq!(normalized.video_id.as_deref(), Some("dQw4w9WgXcQ"));
        }
    }

    #[test]
    fn test_other_urls_drop_query_and_lowercase_host() {
        let normalized = normalize("https://Example.COM/Sounds/Clip?id=3#frag");
        assert_eq!(normalized.url, "https://example.com/Sounds/Clip");
        assert_eq!(normalized.video_id, None);

        let with_port = normalize("http://Media.local:8080/a?b=c");
        assert_eq!(with_port.url, "http://media.local:8080/a");
    }

    #[test]
    fn test_unparsable_input_returned_as_is() {
        assert_eq!(normalize("not a url").url, "not a url");
        assert_eq!(normalize("").url, "");
    }

    #[test]
    fn test_idempotent() {
        for url in [
            "https://youtu.be/abc_DEF-123",
            "https://Example.com/x?y=1",
            "garbage",
            "https://www.youtube.com/shorts/zz",
        ] {
            let once = normalize(url);
            let twice = normalize(&once.url);
            assert_eq!(once, twice, "not idempotent for {}", url);
        }
    }
}
