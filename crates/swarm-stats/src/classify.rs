//! URL classification.
//!
//! Every URL the player requests is bucketed as a manifest, a segment, or,
//! deliberately, "unknown". The unknown bucket is a diagnostic fallback,
//! never a silent discard: a nonzero count in the exit summary means the
//! origin serves something this classifier has not been taught.

use url::Url;

/// What kind of resource a requested URL refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlKind {
    Manifest,
    Segment,
    Unknown,
}

/// Classify by path extension, ignoring query strings and fragments.
pub fn classify_url(raw: &str) -> UrlKind {
    let path = match Url::parse(raw) {
        Ok(url) => url.path().to_string(),
        // Relative or otherwise unparseable reference: strip query/fragment
        // by hand and classify what is left.
        Err(_) => {
            let end = raw.find(['?', '#']).unwrap_or(raw.len());
            raw[..end].to_string()
        }
    };

    if path.ends_with(".m3u8") {
        UrlKind::Manifest
    } else if path.ends_with(".ts") || path.ends_with(".mp4") {
        UrlKind::Segment
    } else {
        UrlKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("http://origin/live/stream.m3u8", UrlKind::Manifest)]
    #[case("http://origin/live/stream.m3u8?token=abc", UrlKind::Manifest)]
    #[case("https://origin/live/seg0001.ts", UrlKind::Segment)]
    #[case("https://origin/live/seg0001.ts?sid=9", UrlKind::Segment)]
    #[case("https://origin/live/init.mp4", UrlKind::Segment)]
    #[case("relative/chunk.ts?x=1", UrlKind::Segment)]
    #[case("playlist.m3u8", UrlKind::Manifest)]
    #[case("http://origin/favicon.ico", UrlKind::Unknown)]
    #[case("http://origin/live/key", UrlKind::Unknown)]
    #[case("", UrlKind::Unknown)]
    fn classifies(#[case] url: &str, #[case] expected: UrlKind) {
        assert_eq!(classify_url(url), expected);
    }
}
