//! Secret handling utilities.
//!
//! Re-exports secrecy types and keeps API credentials out of URLs that get
//! logged.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Render a URL for logs with any `api_key` query value masked.
pub fn redact_url(url: &reqwest::Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            if k == "api_key" {
                (k.into_owned(), "***".to_string())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();
    if pairs.is_empty() {
        return redacted.to_string();
    }
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_is_masked() {
        let url = reqwest::Url::parse("https://api.example.org/3/tv/1?api_key=abc&language=en-US")
            .unwrap();
        let shown = redact_url(&url);
        assert!(!shown.contains("abc"));
        assert!(shown.contains("language=en-US"));
    }
}
