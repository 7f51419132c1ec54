//! Shareable locator strings in magnet URI form
//!
//! A locator packs a content id plus optional hints (display name, length,
//! announce endpoints) into a single string that survives copy and paste.

use magnet_url::Magnet;

use super::{ContentError, ContentId};
use crate::content::ContentManifest;

/// Parsed locator with the content id and whatever hints were present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    /// Content identifier the locator points at
    pub content_id: ContentId,
    /// Suggested display name, if encoded
    pub display_name: Option<String>,
    /// Total content length in bytes, if encoded
    pub total_length: Option<u64>,
    /// Announce endpoints carried as hints
    pub announce_hints: Vec<String>,
}

impl Locator {
    /// Builds a locator string for an addressed manifest.
    pub fn build(manifest: &ContentManifest, display_name: &str, announce_hints: &[String]) -> String {
        Self::build_parts(
            manifest.content_id,
            display_name,
            Some(manifest.total_length),
            announce_hints,
        )
    }

    /// Builds a locator string from individual parts.
    pub fn build_parts(
        content_id: ContentId,
        display_name: &str,
        total_length: Option<u64>,
        announce_hints: &[String],
    ) -> String {
        let mut locator = format!("magnet:?xt=urn:btih:{content_id}");

        if !display_name.is_empty() {
            locator.push_str("&dn=");
            locator.push_str(&urlencoding::encode(display_name));
        }
        if let Some(length) = total_length {
            locator.push_str(&format!("&xl={length}"));
        }
        for hint in announce_hints {
            locator.push_str("&tr=");
            locator.push_str(&urlencoding::encode(hint));
        }

        locator
    }

    /// Parses a locator string back into its parts.
    ///
    /// # Errors
    ///
    /// - `ContentError::InvalidLocator` - Malformed URI or missing content id
    pub fn parse(locator: &str) -> Result<Self, ContentError> {
        // Validate basic URI shape first
        Magnet::new(locator).map_err(|e| ContentError::InvalidLocator {
            reason: format!("invalid magnet URI: {e:?}"),
        })?;

        let params = locator
            .strip_prefix("magnet:?")
            .ok_or_else(|| ContentError::InvalidLocator {
                reason: "missing magnet:? prefix".to_string(),
            })?;

        let mut content_id = None;
        let mut display_name = None;
        let mut total_length = None;
        let mut announce_hints = Vec::new();

        for param in params.split('&') {
            if let Some(encoded) = param.strip_prefix("xt=urn:btih:") {
                content_id = Some(encoded.parse::<ContentId>()?);
            } else if let Some(encoded) = param.strip_prefix("dn=") {
                let decoded =
                    urlencoding::decode(encoded).map_err(|e| ContentError::InvalidLocator {
                        reason: format!("invalid display name encoding: {e}"),
                    })?;
                display_name = Some(decoded.into_owned());
            } else if let Some(encoded) = param.strip_prefix("xl=") {
                let length = encoded.parse::<u64>().map_err(|e| {
                    ContentError::InvalidLocator {
                        reason: format!("invalid length parameter: {e}"),
                    }
                })?;
                total_length = Some(length);
            } else if let Some(encoded) = param.strip_prefix("tr=") {
                let decoded =
                    urlencoding::decode(encoded).map_err(|e| ContentError::InvalidLocator {
                        reason: format!("invalid tracker encoding: {e}"),
                    })?;
                announce_hints.push(decoded.into_owned());
            }
        }

        let content_id = content_id.ok_or_else(|| ContentError::InvalidLocator {
            reason: "missing xt=urn:btih: parameter".to_string(),
        })?;

        Ok(Self {
            content_id,
            display_name,
            total_length,
            announce_hints,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_id() -> ContentId {
        ContentId::new([0xab; 20])
    }

    #[test]
    fn test_build_and_parse_round_trip() {
        let hints = vec![
            "http://tracker.example.com:8080/announce".to_string(),
            "udp://tracker.example.com:8080".to_string(),
        ];
        let locator = Locator::build_parts(test_id(), "My Video.mp4", Some(1_048_576), &hints);

        let parsed = Locator::parse(&locator).unwrap();
        assert_eq!(parsed.content_id, test_id());
        assert_eq!(parsed.display_name.as_deref(), Some("My Video.mp4"));
        assert_eq!(parsed.total_length, Some(1_048_576));
        assert_eq!(parsed.announce_hints, hints);
    }

    #[test]
    fn test_build_minimal() {
        let locator = Locator::build_parts(test_id(), "", None, &[]);
        assert_eq!(
            locator,
            format!("magnet:?xt=urn:btih:{}", "ab".repeat(20))
        );

        let parsed = Locator::parse(&locator).unwrap();
        assert_eq!(parsed.content_id, test_id());
        assert_eq!(parsed.display_name, None);
        assert_eq!(parsed.total_length, None);
        assert!(parsed.announce_hints.is_empty());
    }

    #[test]
    fn test_parse_rejects_non_magnet() {
        let result = Locator::parse("http://example.com/video.mp4");
        assert!(matches!(result, Err(ContentError::InvalidLocator { .. })));
    }

    #[test]
    fn test_parse_rejects_missing_id() {
        let result = Locator::parse("magnet:?dn=video.mp4");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_rejects_short_hash() {
        let result = Locator::parse("magnet:?xt=urn:btih:abc123");
        assert!(result.is_err());
    }

    #[test]
    fn test_display_name_encoding() {
        let locator = Locator::build_parts(test_id(), "weird name & symbols?.mp4", None, &[]);
        assert!(!locator.contains(' '));

        let parsed = Locator::parse(&locator).unwrap();
        assert_eq!(
            parsed.display_name.as_deref(),
            Some("weird name & symbols?.mp4")
        );
    }
}
