//! Inline downloaded images into rendered HTML.

use std::collections::HashMap;

use lol_html::{RewriteStrSettings, element, html_content::ContentType, rewrite_str};

use super::ImageError;

/// Source for the cover block inserted at the top of `<body>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverSource {
    /// Inline data URI of a downloaded cover.
    Embedded(String),
    /// Remote URL kept as-is because the download failed.
    Remote(String),
}

impl CoverSource {
    fn src(&self) -> &str {
        match self {
            CoverSource::Embedded(src) | CoverSource::Remote(src) => src,
        }
    }
}

/// Replace `<img src>` values found in `replacements` and prepend the cover block.
pub fn embed_images(
    html: &str,
    replacements: &HashMap<String, String>,
    cover: Option<&CoverSource>,
) -> Result<String, ImageError> {
    let cover_block = cover.map(|cover| {
        format!(
            r#"<div class="cover-image"><img src="{}" alt="Cover"></div>"#,
            escape_attribute(cover.src())
        )
    });

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("img[src]", |el| {
                    if let Some(src) = el.get_attribute("src") {
                        if let Some(data_uri) = replacements.get(src.trim()) {
                            el.set_attribute("src", data_uri)?;
                        }
                    }
                    Ok(())
                }),
                element!("body", |el| {
                    if let Some(block) = cover_block.as_deref() {
                        el.prepend(block, ContentType::Html);
                    }
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::new()
        },
    )
    .map_err(|err| ImageError::Rewrite(err.to_string()))
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
