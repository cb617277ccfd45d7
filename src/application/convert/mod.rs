//! Conversion orchestration around the external renderer and e-book converter.

mod arguments;
pub mod discovery;
mod error;
mod process;
mod workdir;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use bytes::Bytes;
use tracing::{debug, info};

pub use discovery::{Capability, DiscoveryStrategy};
pub use error::ConvertError;
pub use workdir::WorkingDirectory;

use crate::{
    application::images::{self, ImageFetcher},
    config::{ConversionSettings, Settings},
    domain::{OutputFormat, header::validate_and_fix, request::ConversionRequest},
};

use self::{
    arguments::{ebook_converter_arguments, renderer_arguments},
    workdir::IntermediateArtifact,
};

const DOCUMENT_STEM: &str = "document";
const CONVERSIONS_METRIC: &str = "presswork_conversions_total";
const CONVERSION_MS_METRIC: &str = "presswork_conversion_ms";

/// Artifact produced by a successful conversion.
///
/// Owns the working directory holding the artifact; dropping or closing the result
/// removes both.
#[derive(Debug)]
pub struct ConversionResult {
    pub path: PathBuf,
    pub size: u64,
    pub format: OutputFormat,
    pub content_type: &'static str,
    workdir: WorkingDirectory,
}

impl ConversionResult {
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Read the artifact into memory and remove the working directory.
    pub async fn into_bytes(self) -> Result<Bytes, ConvertError> {
        let read = tokio::fs::read(&self.path)
            .await
            .map_err(ConvertError::file("read_artifact", &self.path));
        self.workdir.close().await;
        transition("cleaned", self.format);
        read.map(Bytes::from)
    }
}

/// Shared, read-only conversion service.
#[derive(Debug, Clone)]
pub struct Converter {
    renderer: Option<Arc<Capability>>,
    ebook_converter: Option<Arc<Capability>>,
    images: ImageFetcher,
    settings: ConversionSettings,
}

impl Converter {
    /// Discover external tools and build the converter. Missing tools degrade the service.
    pub async fn initialize(settings: &Settings) -> Result<Self, ConvertError> {
        let renderer = discovery::discover_renderer(&settings.renderer).await;
        let ebook_converter = discovery::discover_ebook_converter(&settings.renderer).await;
        let images = ImageFetcher::new(&settings.images)?;

        let converter = Self::new(
            renderer,
            ebook_converter,
            images,
            settings.conversion.clone(),
        );
        info!(
            target = "presswork::application::convert",
            op = "convert::initialize",
            renderer_ready = converter.is_ready(),
            ebook_converter_ready = converter.ebook_converter_ready(),
            "Converter initialized"
        );
        Ok(converter)
    }

    pub fn new(
        renderer: Option<Capability>,
        ebook_converter: Option<Capability>,
        images: ImageFetcher,
        settings: ConversionSettings,
    ) -> Self {
        Self {
            renderer: renderer.map(Arc::new),
            ebook_converter: ebook_converter.map(Arc::new),
            images,
            settings,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.renderer.is_some()
    }

    pub fn ebook_converter_ready(&self) -> bool {
        self.ebook_converter.is_some()
    }

    pub fn renderer(&self) -> Option<&Capability> {
        self.renderer.as_deref()
    }

    pub fn ebook_converter(&self) -> Option<&Capability> {
        self.ebook_converter.as_deref()
    }

    pub fn max_content_bytes(&self) -> usize {
        self.settings.max_content_bytes.get()
    }

    /// Convert `request` into `format` inside a fresh working directory.
    ///
    /// The whole pipeline, image downloads included, runs under the configured deadline.
    /// On any failure the working directory is removed before the error is returned.
    pub async fn convert(
        &self,
        request: &ConversionRequest,
        format: OutputFormat,
    ) -> Result<ConversionResult, ConvertError> {
        let started_at = Instant::now();
        let outcome = self.convert_inner(request, format).await;

        let label = match &outcome {
            Ok(_) => "ok",
            Err(err) => err.kind().as_str(),
        };
        metrics::counter!(CONVERSIONS_METRIC, "format" => format.as_str(), "outcome" => label)
            .increment(1);
        metrics::histogram!(CONVERSION_MS_METRIC, "format" => format.as_str())
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        match &outcome {
            Ok(result) => info!(
                target = "presswork::application::convert",
                op = "convert::convert",
                format = format.as_str(),
                result = "ok",
                bytes = result.size,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Conversion succeeded"
            ),
            Err(err) => debug!(
                target = "presswork::application::convert",
                op = "convert::convert",
                format = format.as_str(),
                state = "failed",
                error_kind = err.kind().as_str(),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Conversion failed"
            ),
        }
        outcome
    }

    async fn convert_inner(
        &self,
        request: &ConversionRequest,
        format: OutputFormat,
    ) -> Result<ConversionResult, ConvertError> {
        let renderer = self
            .renderer
            .as_deref()
            .ok_or(ConvertError::RendererUnavailable)?;
        let ebook_converter = match format.is_kindle() {
            true => Some(
                self.ebook_converter
                    .as_deref()
                    .ok_or(ConvertError::EbookConverterUnavailable)?,
            ),
            false => None,
        };

        let workdir = WorkingDirectory::create(&self.settings.temp_dir).await?;
        transition("converting", format);

        let pipeline = self.run_pipeline(renderer, ebook_converter, request, format, &workdir);
        let outcome = tokio::time::timeout(self.settings.timeout, pipeline).await;
        let artifact = match outcome {
            Ok(Ok(path)) => path,
            Ok(Err(err)) => {
                workdir.close().await;
                transition("cleaned", format);
                return Err(err);
            }
            Err(_) => {
                transition("timed_out", format);
                workdir.close().await;
                transition("cleaned", format);
                return Err(ConvertError::Timeout {
                    limit: self.settings.timeout,
                });
            }
        };

        let final_stage = if format.is_kindle() {
            "ebook_convert"
        } else {
            "render"
        };
        let size = match artifact_size(&artifact, final_stage).await {
            Ok(size) => size,
            Err(err) => {
                workdir.close().await;
                transition("cleaned", format);
                return Err(err);
            }
        };
        transition("succeeded", format);

        Ok(ConversionResult {
            path: artifact,
            size,
            format,
            content_type: format.content_type(),
            workdir,
        })
    }

    async fn run_pipeline(
        &self,
        renderer: &Capability,
        ebook_converter: Option<&Capability>,
        request: &ConversionRequest,
        format: OutputFormat,
        workdir: &WorkingDirectory,
    ) -> Result<PathBuf, ConvertError> {
        let document = validate_and_fix(&request.content, &request.metadata);
        let input = workdir.join(format!("{DOCUMENT_STEM}.adoc"));
        tokio::fs::write(&input, document.as_bytes())
            .await
            .map_err(ConvertError::file("write_document", &input))?;

        let image_set = match format {
            OutputFormat::Html5 => Some(
                images::acquire(
                    &self.images,
                    &request.content,
                    request.metadata.cover_image.as_deref(),
                    workdir.path(),
                )
                .await?,
            ),
            _ => None,
        };

        let stage = format.render_stage();
        let rendered = workdir.join(format!("{DOCUMENT_STEM}.{}", stage.extension()));
        let args = renderer_arguments(
            format,
            &request.metadata,
            request.theme.as_deref(),
            &input,
            &rendered,
        );
        process::run(renderer, &args, workdir.path(), "render").await?;
        artifact_size(&rendered, "render").await?;

        if let Some(image_set) = image_set {
            image_set.finish(&rendered).await?;
        }

        let Some(ebook_converter) = ebook_converter else {
            return Ok(rendered);
        };

        let intermediate = IntermediateArtifact::new(rendered);
        let target = workdir.join(format!("{DOCUMENT_STEM}.{}", format.extension()));
        let args = ebook_converter_arguments(intermediate.path(), &target);
        process::run(ebook_converter, &args, workdir.path(), "ebook_convert").await?;
        drop(intermediate);
        Ok(target)
    }
}

fn transition(state: &'static str, format: OutputFormat) {
    debug!(
        target = "presswork::application::convert",
        op = "convert::transition",
        state,
        format = format.as_str(),
        "Conversion state changed"
    );
}

async fn artifact_size(path: &Path, stage: &'static str) -> Result<u64, ConvertError> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConvertError::MissingOutput {
                stage,
                path: path.to_path_buf(),
            });
        }
        Err(err) => return Err(ConvertError::file("inspect_artifact", path)(err)),
    };
    if metadata.len() == 0 {
        return Err(ConvertError::EmptyOutput { stage });
    }
    Ok(metadata.len())
}

#[cfg(all(test, unix))]
mod tests;
