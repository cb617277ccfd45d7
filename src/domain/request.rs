//! Conversion request payload and its defaulting rules.
//!
//! The wire payload is deliberately loose: every field is optional and blank strings
//! are treated as absent. [`ConversionRequest::from_payload`] is the single place that
//! turns it into a validated value:
//!
//! * `content` must be present, not blank, and no larger than the configured ceiling;
//! * `title` defaults to the empty string (the header synthesizer substitutes
//!   `"Document"`);
//! * `author` and `authors[]` are merged in that order, trimmed and de-duplicated;
//! * with no author at all, a short identity derived from `pubkey` is used instead;
//! * `theme` must be a bare theme name, never a path.

use serde::Deserialize;

use super::error::DomainError;

pub const DEFAULT_TITLE: &str = "Document";
pub const DEFAULT_REVISION: &str = "1.0";

const PUBKEY_IDENTITY_THRESHOLD: usize = 16;
const PUBKEY_IDENTITY_HEAD: usize = 10;
const PUBKEY_IDENTITY_TAIL: usize = 6;

/// JSON body accepted by the conversion routes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConvertPayload {
    pub content: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub authors: Option<Vec<String>>,
    pub pubkey: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub published_on: Option<String>,
    pub created_at: Option<String>,
    pub image: Option<String>,
    pub theme: Option<String>,
}

/// Publication metadata attached to a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub title: String,
    pub authors: Vec<String>,
    pub pubkey: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub published_on: Option<String>,
    pub created_at: Option<String>,
    pub cover_image: Option<String>,
}

impl DocumentMetadata {
    /// Title used in headers and renderer attributes.
    pub fn display_title(&self) -> &str {
        let trimmed = self.title.trim();
        if trimmed.is_empty() {
            DEFAULT_TITLE
        } else {
            trimmed
        }
    }

    /// Authors joined the way an AsciiDoc author line expects them.
    pub fn author_line(&self) -> Option<String> {
        (!self.authors.is_empty()).then(|| self.authors.join("; "))
    }

    pub fn revision(&self) -> &str {
        self.version.as_deref().unwrap_or(DEFAULT_REVISION)
    }
}

/// Validated conversion input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub content: String,
    pub metadata: DocumentMetadata,
    pub theme: Option<String>,
}

impl ConversionRequest {
    /// Validate the payload and apply the defaulting rules described in the module docs.
    ///
    /// Performs no I/O; the size check happens here so oversize bodies are rejected
    /// before any working directory exists.
    pub fn from_payload(payload: ConvertPayload, max_bytes: usize) -> Result<Self, DomainError> {
        let ConvertPayload {
            content,
            title,
            author,
            authors,
            pubkey,
            version,
            description,
            summary,
            published_on,
            created_at,
            image,
            theme,
        } = payload;

        let content = content
            .filter(|value| !value.trim().is_empty())
            .ok_or(DomainError::MissingContent)?;
        if content.len() > max_bytes {
            return Err(DomainError::ContentTooLarge {
                size: content.len(),
                limit: max_bytes,
            });
        }

        let theme = clean(theme);
        if let Some(name) = theme.as_deref() {
            validate_theme(name)?;
        }

        let pubkey = clean(pubkey);
        let mut merged = merge_authors(author, authors.unwrap_or_default());
        if merged.is_empty() {
            if let Some(key) = pubkey.as_deref() {
                merged.push(pubkey_identity(key));
            }
        }

        let metadata = DocumentMetadata {
            title: title.map(|value| value.trim().to_string()).unwrap_or_default(),
            authors: merged,
            pubkey,
            version: clean(version),
            description: clean(description),
            summary: clean(summary),
            published_on: clean(published_on),
            created_at: clean(created_at),
            cover_image: clean(image),
        };

        Ok(Self {
            content,
            metadata,
            theme,
        })
    }
}

/// Short, stable author identity derived from a public key.
pub fn pubkey_identity(pubkey: &str) -> String {
    let key = pubkey.trim();
    if !key.is_ascii() || key.len() <= PUBKEY_IDENTITY_THRESHOLD {
        return key.to_string();
    }
    let head = &key[..PUBKEY_IDENTITY_HEAD];
    let tail = &key[key.len() - PUBKEY_IDENTITY_TAIL..];
    format!("{head}...{tail}")
}

// The renderer resolves theme values relative to its theme directory.
fn validate_theme(name: &str) -> Result<(), DomainError> {
    let allowed = name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if !allowed || name.starts_with('.') {
        return Err(DomainError::validation(format!(
            "Theme `{name}` must be a name made of letters, digits, `-`, `_` or `.`"
        )));
    }
    Ok(())
}

fn merge_authors(single: Option<String>, many: Vec<String>) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for candidate in single.into_iter().chain(many) {
        let trimmed = candidate.trim();
        if trimmed.is_empty() || merged.iter().any(|existing| existing == trimmed) {
            continue;
        }
        merged.push(trimmed.to_string());
    }
    merged
}

fn clean(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(content: &str) -> ConvertPayload {
        ConvertPayload {
            content: Some(content.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn missing_content_is_rejected() {
        let err = ConversionRequest::from_payload(ConvertPayload::default(), 1024)
            .expect_err("missing content");
        assert!(matches!(err, DomainError::MissingContent));

        let err =
            ConversionRequest::from_payload(payload("  \n\t"), 1024).expect_err("blank content");
        assert!(matches!(err, DomainError::MissingContent));
    }

    #[test]
    fn oversize_content_is_rejected() {
        let err = ConversionRequest::from_payload(payload("0123456789"), 9)
            .expect_err("content over ceiling");
        match err {
            DomainError::ContentTooLarge { size, limit } => {
                assert_eq!(size, 10);
                assert_eq!(limit, 9);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(ConversionRequest::from_payload(payload("0123456789"), 10).is_ok());
    }

    #[test]
    fn title_defaults_to_empty_and_displays_document() {
        let request = ConversionRequest::from_payload(payload("text"), 1024).expect("valid");
        assert_eq!(request.metadata.title, "");
        assert_eq!(request.metadata.display_title(), "Document");
        assert_eq!(request.metadata.revision(), "1.0");
    }

    #[test]
    fn authors_are_merged_and_deduplicated() {
        let request = ConversionRequest::from_payload(
            ConvertPayload {
                author: Some(" Ada Lovelace ".to_string()),
                authors: Some(vec![
                    "Charles Babbage".to_string(),
                    "Ada Lovelace".to_string(),
                    "".to_string(),
                ]),
                ..payload("text")
            },
            1024,
        )
        .expect("valid");

        assert_eq!(
            request.metadata.authors,
            vec!["Ada Lovelace".to_string(), "Charles Babbage".to_string()]
        );
        assert_eq!(
            request.metadata.author_line().as_deref(),
            Some("Ada Lovelace; Charles Babbage")
        );
    }

    #[test]
    fn pubkey_identity_is_used_without_authors() {
        let key = "npub1qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqzzzzzzzz";
        let request = ConversionRequest::from_payload(
            ConvertPayload {
                pubkey: Some(key.to_string()),
                ..payload("text")
            },
            1024,
        )
        .expect("valid");

        assert_eq!(request.metadata.authors, vec!["npub1qqqqq...zzzzzz"]);
        assert_eq!(request.metadata.pubkey.as_deref(), Some(key));
    }

    #[test]
    fn short_pubkeys_are_kept_verbatim() {
        assert_eq!(pubkey_identity("abc123"), "abc123");
        assert_eq!(pubkey_identity("0123456789abcdef"), "0123456789abcdef");
        assert_eq!(pubkey_identity("0123456789abcdefg"), "0123456789...bcdefg");
    }

    #[test]
    fn blank_optional_fields_are_absent() {
        let request = ConversionRequest::from_payload(
            ConvertPayload {
                version: Some("   ".to_string()),
                image: Some("".to_string()),
                theme: Some("dark".to_string()),
                ..payload("text")
            },
            1024,
        )
        .expect("valid");

        assert_eq!(request.metadata.version, None);
        assert_eq!(request.metadata.cover_image, None);
        assert_eq!(request.theme.as_deref(), Some("dark"));
    }

    #[test]
    fn theme_paths_are_rejected() {
        for theme in ["../../etc/passwd", "/srv/themes/dark", ".hidden", "dark theme"] {
            let err = ConversionRequest::from_payload(
                ConvertPayload {
                    theme: Some(theme.to_string()),
                    ..payload("text")
                },
                1024,
            )
            .expect_err("theme rejected");
            assert!(matches!(err, DomainError::Validation { .. }), "{theme}: {err:?}");
        }

        let request = ConversionRequest::from_payload(
            ConvertPayload {
                theme: Some("house-style_v2.1".to_string()),
                ..payload("text")
            },
            1024,
        )
        .expect("valid theme");
        assert_eq!(request.theme.as_deref(), Some("house-style_v2.1"));
    }

    #[test]
    fn payload_deserializes_with_nulls() {
        let payload: ConvertPayload = serde_json::from_str(
            r#"{"content":"x","authors":null,"title":null,"published_on":"2024-05-01"}"#,
        )
        .expect("payload");
        assert_eq!(payload.authors, None);
        assert_eq!(payload.published_on.as_deref(), Some("2024-05-01"));
    }
}
