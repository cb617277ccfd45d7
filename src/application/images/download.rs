use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::ImageSettings;

use super::{ImageError, ImageReference};

const DIGEST_LEN: usize = 12;
const FALLBACK_MIME: &str = "application/octet-stream";

/// Image stored in the request's image directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedImage {
    pub reference: ImageReference,
    pub path: PathBuf,
    pub mime: String,
}

/// HTTP client for remote images with per-image time and size limits.
#[derive(Debug, Clone)]
pub struct ImageFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: u64,
}

impl ImageFetcher {
    pub fn new(settings: &ImageSettings) -> Result<Self, ImageError> {
        let client = reqwest::Client::builder()
            .timeout(settings.download_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ImageError::Client)?;
        Ok(Self {
            client,
            timeout: settings.download_timeout,
            max_bytes: settings.max_bytes.get(),
        })
    }

    /// Download the referenced image into `dir`.
    pub async fn fetch(
        &self,
        reference: &ImageReference,
        dir: &Path,
    ) -> Result<DownloadedImage, ImageError> {
        tokio::time::timeout(self.timeout, self.fetch_inner(reference, dir))
            .await
            .map_err(|_| ImageError::Timeout {
                url: reference.url.to_string(),
            })?
    }

    async fn fetch_inner(
        &self,
        reference: &ImageReference,
        dir: &Path,
    ) -> Result<DownloadedImage, ImageError> {
        let url = &reference.url;
        let request_error = |source: reqwest::Error| {
            if source.is_timeout() {
                ImageError::Timeout {
                    url: url.to_string(),
                }
            } else {
                ImageError::Request {
                    url: url.to_string(),
                    source,
                }
            }
        };

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(request_error)?;

        if response
            .content_length()
            .is_some_and(|length| length > self.max_bytes)
        {
            return Err(self.too_large(url));
        }

        let content_type = header_value(&response, CONTENT_TYPE);
        let disposition = header_value(&response, CONTENT_DISPOSITION);

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(request_error)? {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(self.too_large(url));
            }
            body.extend_from_slice(&chunk);
        }
        if body.is_empty() {
            return Err(ImageError::Empty {
                url: url.to_string(),
            });
        }

        let filename = local_filename(url, disposition.as_deref(), content_type.as_deref());
        let path = dir.join(&filename);
        tokio::fs::write(&path, &body)
            .await
            .map_err(|source| ImageError::FileOperation {
                operation: "write_image",
                path: path.clone(),
                source,
            })?;

        Ok(DownloadedImage {
            reference: reference.clone(),
            mime: image_mime(content_type.as_deref(), &filename),
            path,
        })
    }

    fn too_large(&self, url: &Url) -> ImageError {
        ImageError::TooLarge {
            url: url.to_string(),
            limit: self.max_bytes,
        }
    }
}

fn header_value(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Local name for a downloaded image: a short URL digest plus the best available name.
///
/// The name comes from the URL path when it carries an extension, then from the
/// `Content-Disposition` filename, and otherwise only the extension is derived from the
/// content type.
pub fn local_filename(url: &Url, disposition: Option<&str>, content_type: Option<&str>) -> String {
    let digest = short_digest(url.as_str());

    let named = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| has_extension(segment))
        .map(str::to_string)
        .or_else(|| disposition.and_then(disposition_filename))
        .filter(|name| has_extension(name));

    match named {
        Some(name) => {
            let (stem, extension) = name.rsplit_once('.').unwrap_or((name.as_str(), ""));
            let stem = slug::slugify(stem);
            let extension = clean_extension(extension);
            if stem.is_empty() {
                format!("{digest}.{extension}")
            } else {
                format!("{digest}-{stem}.{extension}")
            }
        }
        None => {
            let extension = content_type
                .and_then(extension_for_mime)
                .unwrap_or_else(|| "img".to_string());
            format!("{digest}.{extension}")
        }
    }
}

fn short_digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(DIGEST_LEN);
    digest
}

fn has_extension(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, extension)| !clean_extension(extension).is_empty())
}

fn clean_extension(extension: &str) -> String {
    extension
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase()
}

fn disposition_filename(header: &str) -> Option<String> {
    header.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        let name = value.rsplit(['/', '\\']).next().unwrap_or(value);
        (!name.is_empty()).then(|| name.to_string())
    })
}

fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn extension_for_mime(content_type: &str) -> Option<String> {
    let essence = mime_essence(content_type);
    let preferred = match essence.as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        _ => None,
    };
    preferred
        .or_else(|| {
            mime_guess::get_mime_extensions_str(&essence)
                .and_then(|extensions| extensions.first().copied())
        })
        .map(str::to_string)
}

/// Mime type used for the data URI: the served image type, else a guess from the name.
pub fn image_mime(content_type: Option<&str>, filename: &str) -> String {
    if let Some(essence) = content_type.map(mime_essence) {
        if essence.starts_with("image/") {
            return essence;
        }
    }
    mime_guess::from_path(filename)
        .first()
        .filter(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).expect("url")
    }

    #[test]
    fn filename_prefers_url_path() {
        let name = local_filename(
            &url("https://cdn.example.com/media/My%20Photo.JPG?size=large"),
            Some("attachment; filename=\"other.png\""),
            Some("image/png"),
        );
        assert_eq!(name.len(), DIGEST_LEN + "-my-20photo.jpg".len());
        assert!(name.ends_with("-my-20photo.jpg"), "{name}");
    }

    #[test]
    fn filename_falls_back_to_content_disposition() {
        let name = local_filename(
            &url("https://example.com/download?id=7"),
            Some("inline; filename=\"chart final.png\""),
            None,
        );
        assert!(name.ends_with("-chart-final.png"), "{name}");
    }

    #[test]
    fn filename_falls_back_to_content_type() {
        let name = local_filename(&url("https://example.com/avatar"), None, Some("image/jpeg"));
        assert_eq!(name, format!("{}.jpg", short_digest("https://example.com/avatar")));

        let unknown = local_filename(&url("https://example.com/blob"), None, None);
        assert!(unknown.ends_with(".img"));
    }

    #[test]
    fn distinct_urls_get_distinct_names() {
        let first = local_filename(&url("https://a.example.com/x.png"), None, None);
        let second = local_filename(&url("https://b.example.com/x.png"), None, None);
        assert_ne!(first, second);
    }

    #[test]
    fn mime_prefers_served_image_type() {
        assert_eq!(image_mime(Some("image/webp; charset=binary"), "a.png"), "image/webp");
        assert_eq!(image_mime(Some("application/octet-stream"), "a.png"), "image/png");
        assert_eq!(image_mime(None, "a.unknownext"), FALLBACK_MIME);
    }
}
