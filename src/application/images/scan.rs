//! Discovery of remote image references in a document body.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static IMAGE_MACRO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bimage::?([^\s\[\]]+)\[").expect("image macro pattern")
});

static COVER_ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^:(?:front-)?cover-image:[ \t]*(\S.*?)[ \t]*$").expect("cover attribute pattern")
});

/// A remote image and every spelling of it found in the document.
///
/// The renderer copies targets into `<img src>` exactly as written, so embedding has to
/// match on the written text rather than the normalized URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub url: Url,
    pub written: Vec<String>,
}

impl ImageReference {
    /// Parse `raw` as an absolute http or https image target.
    pub fn parse(raw: &str) -> Option<Self> {
        let written = raw.trim();
        let url = parse_remote(written)?;
        Some(Self {
            url,
            written: vec![written.to_string()],
        })
    }

    /// First spelling seen in the document or request.
    pub fn as_written(&self) -> &str {
        self.written.first().map_or(self.url.as_str(), String::as_str)
    }

    /// Text to match against `src` attributes: the written forms, then the normalized URL.
    pub fn spellings(&self) -> impl Iterator<Item = &str> {
        let normalized = self.url.as_str();
        self.written
            .iter()
            .map(String::as_str)
            .chain((!self.written.iter().any(|form| form == normalized)).then_some(normalized))
    }

    fn absorb(&mut self, written: &str) {
        if !self.written.iter().any(|form| form == written) {
            self.written.push(written.to_string());
        }
    }
}

/// Distinct remote (http/https) images referenced by `content` or `cover`, in order of
/// first appearance with the cover first.
pub fn remote_references(content: &str, cover: Option<&str>) -> Vec<ImageReference> {
    let cover_attributes = COVER_ATTRIBUTE
        .captures_iter(content)
        .filter_map(|captures| captures.get(1))
        .map(|value| strip_macro(value.as_str()));
    let macros = IMAGE_MACRO
        .captures_iter(content)
        .filter_map(|captures| captures.get(1))
        .map(|target| target.as_str());

    let mut references: Vec<ImageReference> = Vec::new();
    for raw in cover.into_iter().map(strip_macro).chain(cover_attributes).chain(macros) {
        let Some(reference) = ImageReference::parse(raw) else {
            continue;
        };
        match references.iter_mut().find(|known| known.url == reference.url) {
            Some(known) => known.absorb(reference.as_written()),
            None => references.push(reference),
        }
    }
    references
}

/// Cover target declared by the document's first `:front-cover-image:` or `:cover-image:`
/// attribute.
pub fn document_cover(content: &str) -> Option<&str> {
    COVER_ATTRIBUTE
        .captures(content)
        .and_then(|captures| captures.get(1))
        .map(|value| strip_macro(value.as_str()))
}

/// Parse `raw` as an absolute http or https URL.
fn parse_remote(raw: &str) -> Option<Url> {
    let url = Url::parse(raw.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

// `image:cover.png[Cover]` → `cover.png`
fn strip_macro(value: &str) -> &str {
    let value = value.trim();
    let Some(rest) = value
        .strip_prefix("image::")
        .or_else(|| value.strip_prefix("image:"))
    else {
        return value;
    };
    rest.split_once('[').map_or(rest, |(target, _)| target)
}
