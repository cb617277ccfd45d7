#![allow(dead_code)]

use std::{
    fs,
    num::{NonZeroU64, NonZeroUsize},
    os::unix::fs::PermissionsExt,
    path::Path,
    time::Duration,
};

use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response, header},
};
use http_body_util::BodyExt;
use presswork::{
    application::{
        convert::{Capability, Converter, DiscoveryStrategy},
        images::ImageFetcher,
    },
    config::{ConversionSettings, CorsSettings, ImageSettings},
    infra::http::{HttpState, build_router},
};
use tempfile::TempDir;
use tower::ServiceExt;

/// Stand-in for the renderer. HTML output turns `image::` macros into `<img>` tags;
/// every other backend echoes the backend name followed by the input document.
pub const FAKE_RENDERER: &str = r#"#!/bin/sh
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
case "$backend" in
  html5)
    {
      printf '<!DOCTYPE html>\n<html><head><title>doc</title></head><body>\n'
      sed -n 's/^image::\{0,1\}\([^[]*\)\[.*$/<img src="\1" alt="figure">/p' "$input"
      printf '</body></html>\n'
    } > "$out"
    ;;
  *)
    printf 'backend=%s\n' "$backend" > "$out"
    cat "$input" >> "$out"
    ;;
esac
"#;

pub const FAKE_EBOOK_CONVERTER: &str = r#"#!/bin/sh
printf 'kindle:' > "$2"
cat "$1" >> "$2"
"#;

pub const SLOW_RENDERER: &str = "#!/bin/sh\nexec sleep 30\n";

pub struct Harness {
    pub tools: TempDir,
    pub temp_root: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            tools: TempDir::new().expect("tools dir"),
            temp_root: TempDir::new().expect("temp root"),
        }
    }

    pub fn tool(&self, name: &str, script: &str) -> Capability {
        write_tool(self.tools.path(), name, script)
    }

    pub fn converter(
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
                max_content_bytes: NonZeroUsize::new(64 * 1024).expect("non-zero"),
                temp_dir: self.temp_root.path().to_path_buf(),
            },
        )
    }

    /// Router backed by the fake renderer and e-book converter.
    pub fn ready_router(&self) -> Router {
        let renderer = self.tool("asciidoctor", FAKE_RENDERER);
        let ebook = self.tool("ebook-convert", FAKE_EBOOK_CONVERTER);
        router(
            self.converter(Some(renderer), Some(ebook), Duration::from_secs(10)),
            "*",
        )
    }

    pub fn leftover_entries(&self) -> Vec<String> {
        fs::read_dir(self.temp_root.path())
            .expect("read temp root")
            .map(|entry| {
                entry
                    .expect("entry")
                    .file_name()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }
}

pub fn write_tool(dir: &Path, name: &str, script: &str) -> Capability {
    let path = dir.join(name);
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

pub fn router(converter: Converter, allow_origin: &str) -> Router {
    build_router(
        HttpState::new(converter),
        &CorsSettings {
            allow_origin: allow_origin.to_string(),
        },
    )
    .expect("router builds")
}

pub fn convert_request(format: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(format!("/convert/{format}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .expect("request")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).expect("utf8 body")
}
