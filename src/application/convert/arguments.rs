use std::{ffi::OsString, path::Path};

use crate::domain::{OutputFormat, request::DocumentMetadata};

const SAFE_MODE: &str = "safe";

/// Command-line arguments for one renderer invocation.
///
/// Metadata attributes are only passed when the request supplied them so a title already
/// present in the document is not overridden by a default.
pub(crate) fn renderer_arguments(
    format: OutputFormat,
    metadata: &DocumentMetadata,
    theme: Option<&str>,
    input: &Path,
    output: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();

    if let Some(library) = format.renderer_library() {
        args.push("-r".into());
        args.push(library.into());
    }
    args.push("-b".into());
    args.push(format.backend().into());
    args.push("-S".into());
    args.push(SAFE_MODE.into());

    let mut attribute = |name: &str, value: Option<&str>| {
        args.push("-a".into());
        args.push(match value {
            Some(value) => format!("{name}={value}").into(),
            None => name.into(),
        });
    };

    if !metadata.title.is_empty() {
        attribute("doctitle", Some(metadata.title.as_str()));
    }
    if let Some(authors) = metadata.author_line() {
        attribute("author", Some(authors.as_str()));
    }
    if let Some(version) = metadata.version.as_deref() {
        attribute("revnumber", Some(version));
    }
    if let Some(published) = metadata.published_on.as_deref() {
        attribute("revdate", Some(published));
    }
    if let Some(created) = metadata.created_at.as_deref() {
        attribute("docdate", Some(created));
    }
    if let Some(cover) = metadata.cover_image.as_deref() {
        attribute("front-cover-image", Some(cover));
    }
    attribute("toc", None);
    attribute("stem", None);
    attribute("allow-uri-read", None);
    if let Some(theme) = theme {
        if format.render_stage() == OutputFormat::Pdf {
            attribute("pdf-theme", Some(theme));
        }
        attribute("theme", Some(theme));
    }

    args.push("-o".into());
    args.push(output.into());
    args.push(input.into());
    args
}

/// Arguments for the e-book converter: `<input> <output>`.
pub(crate) fn ebook_converter_arguments(input: &Path, output: &Path) -> Vec<OsString> {
    vec![input.into(), output.into()]
}
