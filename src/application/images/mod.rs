//! Remote image acquisition and inline embedding for HTML output.
//!
//! Images referenced by the document are downloaded one at a time into
//! `<workdir>/images` before rendering. Once the renderer has produced HTML, every
//! matching `<img src>` is swapped for a base64 data URI and the cover block is inserted.
//! The source document is never rewritten, and a failed download only costs that image.

mod download;
mod embed;
mod scan;

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    string::FromUtf8Error,
    time::Instant,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use thiserror::Error;
use tracing::{debug, warn};

pub use download::{DownloadedImage, ImageFetcher, image_mime, local_filename};
pub use embed::{CoverSource, embed_images};
pub use scan::{ImageReference, document_cover, remote_references};

use crate::application::error::ErrorKind;

const IMAGE_DIR: &str = "images";
const DOWNLOADS_METRIC: &str = "presswork_image_downloads_total";

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to build image HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request for {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("download of {url} timed out")]
    Timeout { url: String },
    #[error("image at {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: u64 },
    #[error("image at {url} has an empty body")]
    Empty { url: String },
    #[error("image file operation `{operation}` failed for {}: {source}", .path.display())]
    FileOperation {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("rendered HTML is not valid UTF-8: {0}")]
    Encoding(#[from] FromUtf8Error),
    #[error("failed to rewrite rendered HTML: {0}")]
    Rewrite(String),
}

impl ImageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImageError::Client(_) => ErrorKind::InitializationError,
            ImageError::FileOperation { .. } => ErrorKind::FileOperationError,
            ImageError::Encoding(_) => ErrorKind::EncodingError,
            _ => ErrorKind::ConversionFailed,
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            ImageError::Timeout { .. } => "timeout",
            ImageError::TooLarge { .. } => "too_large",
            ImageError::FileOperation { .. } => "file_error",
            _ => "failed",
        }
    }
}

/// Images acquired for one request.
#[derive(Debug)]
pub struct ImageSet {
    dir: PathBuf,
    downloaded: Vec<DownloadedImage>,
    cover: Option<ImageReference>,
}

impl ImageSet {
    /// Inline the images into the HTML file at `html_path`, then delete the image directory.
    pub async fn finish(self, html_path: &Path) -> Result<(), ImageError> {
        let result = self.embed_into(html_path).await;
        self.remove_dir().await;
        result
    }

    async fn embed_into(&self, html_path: &Path) -> Result<(), ImageError> {
        let bytes = tokio::fs::read(html_path)
            .await
            .map_err(|source| ImageError::FileOperation {
                operation: "read_html",
                path: html_path.to_path_buf(),
                source,
            })?;
        let html = String::from_utf8(bytes)?;

        let mut replacements: HashMap<String, String> = HashMap::new();
        for image in &self.downloaded {
            match tokio::fs::read(&image.path).await {
                Ok(data) => {
                    let data_uri = format!("data:{};base64,{}", image.mime, STANDARD.encode(data));
                    for spelling in image.reference.spellings() {
                        // Attribute values come back as written, so `&` may still be escaped.
                        let escaped = spelling.replace('&', "&amp;");
                        if escaped != spelling {
                            replacements.insert(escaped, data_uri.clone());
                        }
                        replacements.insert(spelling.to_string(), data_uri.clone());
                    }
                }
                Err(err) => warn!(
                    target = "presswork::application::images",
                    op = "images::embed",
                    url = %image.reference.url,
                    path = %image.path.display(),
                    error = %err,
                    "Downloaded image could not be read; leaving remote reference"
                ),
            }
        }

        let cover = self.cover.as_ref().map(|reference| {
            match replacements.get(reference.url.as_str()) {
                Some(data_uri) => CoverSource::Embedded(data_uri.clone()),
                None => CoverSource::Remote(reference.as_written().to_string()),
            }
        });

        let rewritten = embed_images(&html, &replacements, cover.as_ref())?;
        tokio::fs::write(html_path, rewritten)
            .await
            .map_err(|source| ImageError::FileOperation {
                operation: "write_html",
                path: html_path.to_path_buf(),
                source,
            })?;

        debug!(
            target = "presswork::application::images",
            op = "images::embed",
            embedded = self.downloaded.len(),
            cover = cover.is_some(),
            "Images embedded into rendered HTML"
        );
        Ok(())
    }

    async fn remove_dir(&self) {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                target = "presswork::application::images",
                op = "images::cleanup",
                error_kind = "file_operation_error",
                path = %self.dir.display(),
                error = %err,
                "Failed to remove image directory"
            ),
        }
    }
}

/// Download every remote image referenced by `content` (and the request cover) into
/// `<workdir>/images`. Individual failures are logged and skipped.
///
/// The cover block uses the request cover when it is a remote URL, and otherwise the
/// document's own cover attribute.
pub async fn acquire(
    fetcher: &ImageFetcher,
    content: &str,
    cover: Option<&str>,
    workdir: &Path,
) -> Result<ImageSet, ImageError> {
    let started_at = Instant::now();
    let dir = workdir.join(IMAGE_DIR);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|source| ImageError::FileOperation {
            operation: "create_image_dir",
            path: dir.clone(),
            source,
        })?;

    let references = remote_references(content, cover);
    let mut downloaded = Vec::with_capacity(references.len());
    let mut failed = 0usize;

    for reference in &references {
        let url = &reference.url;
        match fetcher.fetch(reference, &dir).await {
            Ok(image) => {
                metrics::counter!(DOWNLOADS_METRIC, "outcome" => "ok").increment(1);
                debug!(
                    target = "presswork::application::images",
                    op = "images::download",
                    url = %url,
                    path = %image.path.display(),
                    mime = %image.mime,
                    "Image downloaded"
                );
                downloaded.push(image);
            }
            Err(err) => {
                failed += 1;
                metrics::counter!(DOWNLOADS_METRIC, "outcome" => err.outcome()).increment(1);
                warn!(
                    target = "presswork::application::images",
                    op = "images::download",
                    url = %url,
                    error_kind = err.kind().as_str(),
                    error = %err,
                    "Image download failed; keeping remote reference"
                );
            }
        }
    }

    debug!(
        target = "presswork::application::images",
        op = "images::acquire",
        referenced = references.len(),
        downloaded = downloaded.len(),
        failed,
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "Image acquisition finished"
    );

    Ok(ImageSet {
        dir,
        downloaded,
        cover: cover
            .and_then(ImageReference::parse)
            .or_else(|| document_cover(content).and_then(ImageReference::parse)),
    })
}
