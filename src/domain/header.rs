//! Document header detection and repair.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

use super::request::DocumentMetadata;

static ATTRIBUTE_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^:!?[A-Za-z0-9_][A-Za-z0-9_-]*!?:(?:\s|$)").expect("attribute entry pattern")
});

/// Ensure `content` opens with a level-0 heading, synthesizing one from `metadata` when absent.
///
/// Content that already carries a document title is returned untouched.
pub fn validate_and_fix<'a>(content: &'a str, metadata: &DocumentMetadata) -> Cow<'a, str> {
    if has_document_title(content) {
        return Cow::Borrowed(content);
    }

    let mut fixed = synthesize_header(metadata);
    fixed.push_str(content);
    Cow::Owned(fixed)
}

/// Whether the first meaningful line of `content` is a document title.
///
/// Blank lines, line comments, comment blocks and attribute entries are skipped.
pub fn has_document_title(content: &str) -> bool {
    let mut open_block: Option<&str> = None;

    for line in content.lines() {
        let trimmed = line.trim();

        if let Some(delimiter) = open_block {
            if trimmed == delimiter {
                open_block = None;
            }
            continue;
        }

        if trimmed.is_empty() {
            continue;
        }
        if is_comment_block_delimiter(trimmed) {
            open_block = Some(trimmed);
            continue;
        }
        if trimmed.starts_with("//") || ATTRIBUTE_ENTRY.is_match(trimmed) {
            continue;
        }

        return is_level_zero_heading(trimmed);
    }

    false
}

/// Uppercase the first character of every word, leaving the remainder as written.
pub fn title_case(input: &str) -> String {
    input
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn synthesize_header(metadata: &DocumentMetadata) -> String {
    let mut header = format!("= {}\n", title_case(metadata.display_title()));

    if let Some(authors) = metadata.author_line() {
        header.push_str(&single_line(&authors));
        header.push('\n');
    }

    push_attribute(&mut header, "revnumber", Some(metadata.revision()));
    push_attribute(&mut header, "revdate", metadata.published_on.as_deref());
    push_attribute(&mut header, "docdate", metadata.created_at.as_deref());
    push_attribute(&mut header, "description", metadata.description.as_deref());
    push_attribute(&mut header, "summary", metadata.summary.as_deref());
    push_attribute(&mut header, "pubkey", metadata.pubkey.as_deref());

    header.push('\n');
    header
}

fn push_attribute(header: &mut String, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        header.push_str(&format!(":{name}: {}\n", single_line(value)));
    }
}

// Attribute values and the author line end at the first newline.
fn single_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_comment_block_delimiter(line: &str) -> bool {
    line.len() >= 4 && line.bytes().all(|byte| byte == b'/')
}

fn is_level_zero_heading(line: &str) -> bool {
    ["= ", "# "]
        .iter()
        .any(|marker| line.strip_prefix(marker).is_some_and(|rest| !rest.trim().is_empty()))
}
