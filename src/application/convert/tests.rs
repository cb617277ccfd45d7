use std::{
    fs,
    num::{NonZeroU64, NonZeroUsize},
    os::unix::fs::PermissionsExt,
    time::Duration,
};

use tempfile::TempDir;

use super::*;
use crate::{
    application::error::ErrorKind,
    config::ImageSettings,
    domain::request::ConvertPayload,
};

const FAKE_RENDERER: &str = r#"#!/bin/sh
out=""
backend=""
input=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    -o) shift; out="$1" ;;
    -b) shift; backend="$1" ;;
    -r|-S|-a) shift ;;
    *) input="$1" ;;
  esac
  shift
done
printf 'backend=%s\n' "$backend" > "$out"
cat "$input" >> "$out"
"#;

const FAKE_EBOOK_CONVERTER: &str = r#"#!/bin/sh
printf 'kindle:' > "$2"
cat "$1" >> "$2"
"#;

struct Fixture {
    tools: TempDir,
    temp_root: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            tools: TempDir::new().expect("tools dir"),
            temp_root: TempDir::new().expect("temp root"),
        }
    }

    fn tool(&self, name: &str, script: &str) -> Capability {
        let path = self.tools.path().join(name);
        fs::write(&path, script).expect("write script");
        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("set perms");
        Capability {
            program: path,
            prefix_args: Vec::new(),
            strategy: DiscoveryStrategy::DirectPath,
            version: "test".to_string(),
            envs: Vec::new(),
        }
    }

    fn converter(
        &self,
        renderer: Option<Capability>,
        ebook_converter: Option<Capability>,
        timeout: Duration,
    ) -> Converter {
        let images = ImageFetcher::new(&ImageSettings {
            download_timeout: Duration::from_secs(5),
            max_bytes: NonZeroU64::new(1024 * 1024).expect("non-zero"),
        })
        .expect("image fetcher");
        Converter::new(
            renderer,
            ebook_converter,
            images,
            ConversionSettings {
                timeout,
                max_content_bytes: NonZeroUsize::new(1024 * 1024).expect("non-zero"),
                temp_dir: self.temp_root.path().to_path_buf(),
            },
        )
    }

    fn leftover_entries(&self) -> usize {
        fs::read_dir(self.temp_root.path())
            .expect("read temp root")
            .count()
    }
}

fn request(content: &str, title: &str) -> ConversionRequest {
    ConversionRequest::from_payload(
        ConvertPayload {
            content: Some(content.to_string()),
            title: Some(title.to_string()),
            ..Default::default()
        },
        1024 * 1024,
    )
    .expect("valid request")
}

#[tokio::test]
async fn epub_conversion_returns_artifact_and_cleans_up() {
    let fixture = Fixture::new();
    let renderer = fixture.tool("asciidoctor", FAKE_RENDERER);
    let converter = fixture.converter(Some(renderer), None, Duration::from_secs(10));

    let result = converter
        .convert(&request("= Test\n\nHello", "Test"), OutputFormat::Epub)
        .await
        .expect("conversion succeeds");

    assert_eq!(result.content_type, "application/epub+zip");
    assert!(result.size > 0);
    assert!(result.workdir().exists());

    let bytes = result.into_bytes().await.expect("artifact bytes");
    let text = String::from_utf8(bytes.to_vec()).expect("utf8");
    assert!(text.starts_with("backend=epub3\n= Test\n"), "{text}");
    assert_eq!(fixture.leftover_entries(), 0);
}

#[tokio::test]
async fn missing_header_is_synthesized_before_rendering() {
    let fixture = Fixture::new();
    let renderer = fixture.tool("asciidoctor", FAKE_RENDERER);
    let converter = fixture.converter(Some(renderer), None, Duration::from_secs(10));

    let result = converter
        .convert(&request("Just a paragraph.", ""), OutputFormat::Html5)
        .await
        .expect("conversion succeeds");

    let text = String::from_utf8(result.into_bytes().await.expect("bytes").to_vec()).expect("utf8");
    assert!(text.contains("= Document\n:revnumber: 1.0\n\nJust a paragraph."), "{text}");
}

#[tokio::test]
async fn renderer_failure_is_reported_and_cleaned_up() {
    let fixture = Fixture::new();
    let renderer = fixture.tool(
        "asciidoctor",
        "#!/bin/sh\necho 'asciidoctor: FAILED: missing converter for backend' >&2\nexit 1\n",
    );
    let converter = fixture.converter(Some(renderer), None, Duration::from_secs(10));

    let err = converter
        .convert(&request("= T\n", "T"), OutputFormat::Pdf)
        .await
        .expect_err("renderer fails");

    assert_eq!(err.kind(), ErrorKind::ConversionFailed);
    assert!(err.to_string().contains("missing converter"), "{err}");
    assert_eq!(fixture.leftover_entries(), 0);
}

#[tokio::test]
async fn empty_output_is_a_failure() {
    let fixture = Fixture::new();
    let renderer = fixture.tool(
        "asciidoctor",
        "#!/bin/sh\nwhile [ \"$#\" -gt 0 ]; do if [ \"$1\" = -o ]; then shift; : > \"$1\"; fi; shift; done\n",
    );
    let converter = fixture.converter(Some(renderer), None, Duration::from_secs(10));

    let err = converter
        .convert(&request("= T\n", "T"), OutputFormat::Docbook5)
        .await
        .expect_err("empty output");

    assert!(matches!(err, ConvertError::EmptyOutput { .. }), "{err:?}");
    assert_eq!(fixture.leftover_entries(), 0);
}

#[tokio::test]
async fn deadline_kills_the_renderer() {
    let fixture = Fixture::new();
    let renderer = fixture.tool("asciidoctor", "#!/bin/sh\nexec sleep 30\n");
    let converter = fixture.converter(Some(renderer), None, Duration::from_secs(1));

    let started = Instant::now();
    let err = converter
        .convert(&request("= T\n", "T"), OutputFormat::Epub)
        .await
        .expect_err("times out");

    assert_eq!(err.kind(), ErrorKind::ConversionTimeout);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(fixture.leftover_entries(), 0);
}

#[tokio::test]
async fn kindle_conversion_removes_intermediate_epub() {
    let fixture = Fixture::new();
    let renderer = fixture.tool("asciidoctor", FAKE_RENDERER);
    let ebook = fixture.tool("ebook-convert", FAKE_EBOOK_CONVERTER);
    let converter = fixture.converter(Some(renderer), Some(ebook), Duration::from_secs(10));

    let result = converter
        .convert(&request("= Test\n\nBody", "Test"), OutputFormat::Mobi)
        .await
        .expect("conversion succeeds");

    assert_eq!(result.content_type, "application/x-mobipocket-ebook");
    assert!(result.path.to_string_lossy().ends_with("document.mobi"));
    let mut names: Vec<String> = fs::read_dir(result.workdir())
        .expect("read workdir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["document.adoc", "document.mobi"]);

    let text = String::from_utf8(result.into_bytes().await.expect("bytes").to_vec()).expect("utf8");
    assert!(text.starts_with("kindle:backend=epub3\n"), "{text}");
    assert_eq!(fixture.leftover_entries(), 0);
}

#[tokio::test]
async fn failed_kindle_stage_still_removes_everything() {
    let fixture = Fixture::new();
    let renderer = fixture.tool("asciidoctor", FAKE_RENDERER);
    let ebook = fixture.tool("ebook-convert", "#!/bin/sh\nexit 2\n");
    let converter = fixture.converter(Some(renderer), Some(ebook), Duration::from_secs(10));

    let err = converter
        .convert(&request("= Test\n", "Test"), OutputFormat::Azw3)
        .await
        .expect_err("converter fails");

    assert!(matches!(err, ConvertError::Process { stage: "ebook_convert", .. }), "{err:?}");
    assert_eq!(fixture.leftover_entries(), 0);
}

#[tokio::test]
async fn degraded_converter_rejects_without_touching_disk() {
    let fixture = Fixture::new();
    let converter = fixture.converter(None, None, Duration::from_secs(10));

    let err = converter
        .convert(&request("= T\n", "T"), OutputFormat::Epub)
        .await
        .expect_err("renderer missing");

    assert!(matches!(err, ConvertError::RendererUnavailable));
    assert!(!converter.is_ready());
    assert_eq!(fixture.leftover_entries(), 0);
}

#[tokio::test]
async fn kindle_formats_need_the_ebook_converter() {
    let fixture = Fixture::new();
    let renderer = fixture.tool("asciidoctor", FAKE_RENDERER);
    let converter = fixture.converter(Some(renderer), None, Duration::from_secs(10));

    let err = converter
        .convert(&request("= T\n", "T"), OutputFormat::Azw3)
        .await
        .expect_err("converter missing");

    assert!(matches!(err, ConvertError::EbookConverterUnavailable));
    assert_eq!(fixture.leftover_entries(), 0);
}
