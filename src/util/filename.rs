//! Download filenames for `Content-Disposition`.

const FALLBACK_STEM: &str = "document";
const MAX_STEM_CHARS: usize = 120;

/// Turn a document title into a safe filename stem.
///
/// Letters, digits, `-`, `_`, `.` and spaces survive with their case intact; anything
/// else (quotes, path separators, control characters) becomes `_`. Blank results fall
/// back to `document`.
pub fn sanitize_stem(title: &str) -> String {
    let replaced: String = title
        .trim()
        .chars()
        .take(MAX_STEM_CHARS)
        .map(|ch| {
            if ch.is_alphanumeric() || matches!(ch, '-' | '_' | '.' | ' ') {
                ch
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|ch: char| ch == '.' || ch.is_whitespace());
    if trimmed.is_empty() || trimmed.chars().all(|ch| ch == '_') {
        FALLBACK_STEM.to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<stem>.<extension>` for the artifact download.
pub fn attachment_filename(title: &str, extension: &str) -> String {
    format!("{}.{extension}", sanitize_stem(title))
}

/// Full `Content-Disposition` header value.
///
/// Non-ASCII names also get an RFC 5987 `filename*` parameter; the plain `filename`
/// keeps an ASCII-only rendition for older clients.
pub fn content_disposition(filename: &str) -> String {
    if filename.is_ascii() {
        return format!("attachment; filename=\"{filename}\"");
    }
    let ascii: String = filename
        .chars()
        .map(|ch| if ch.is_ascii() { ch } else { '_' })
        .collect();
    format!(
        "attachment; filename=\"{ascii}\"; filename*=UTF-8''{}",
        percent_encode(filename)
    )
}

fn percent_encode(value: &str) -> String {
    value
        .bytes()
        .map(|byte| match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (byte as char).to_string()
            }
            other => format!("%{other:02X}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_keep_their_case() {
        assert_eq!(attachment_filename("Test", "epub"), "Test.epub");
        assert_eq!(
            attachment_filename("My Book v1.2", "pdf"),
            "My Book v1.2.pdf"
        );
    }

    #[test]
    fn unsafe_characters_are_replaced() {
        assert_eq!(sanitize_stem("a/b\\c\"d"), "a_b_c_d");
        assert_eq!(sanitize_stem("line\nbreak"), "line_break");
    }

    #[test]
    fn blank_titles_fall_back() {
        assert_eq!(sanitize_stem(""), "document");
        assert_eq!(sanitize_stem("   "), "document");
        assert_eq!(sanitize_stem("///"), "document");
        assert_eq!(sanitize_stem(".."), "document");
    }

    #[test]
    fn disposition_quotes_ascii_names() {
        assert_eq!(
            content_disposition("Test.epub"),
            "attachment; filename=\"Test.epub\""
        );
    }

    #[test]
    fn disposition_encodes_unicode_names() {
        assert_eq!(
            content_disposition("Café.pdf"),
            "attachment; filename=\"Caf_.pdf\"; filename*=UTF-8''Caf%C3%A9.pdf"
        );
    }
}
