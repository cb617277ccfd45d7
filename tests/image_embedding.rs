#![cfg(unix)]

mod common;

use std::net::SocketAddr;

use axum::{
    Router,
    http::{StatusCode, header},
    routing::get,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::json;
use tokio::net::TcpListener;

use common::{Harness, body_text, convert_request, send};

const PIXEL: &[u8] = b"\x89PNG\r\n\x1a\nfake-pixel-bytes";
const COVER: &[u8] = b"\x89PNG\r\n\x1a\nfake-cover-bytes";

async fn spawn_image_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind image server");
    let addr = listener.local_addr().expect("local addr");
    let app = Router::new()
        .route(
            "/pixel.png",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], PIXEL) }),
        )
        .route(
            "/cover.png",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], COVER) }),
        )
        .route("/empty.png", get(|| async { StatusCode::OK }));
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("image server");
    });
    addr
}

#[tokio::test]
async fn html_embeds_downloaded_images_and_keeps_failed_ones_remote() {
    let addr = spawn_image_server().await;
    let harness = Harness::new();
    let app = harness.ready_router();

    let content = format!(
        "= Gallery\n\nimage::http://{addr}/pixel.png[Pixel]\n\nimage::http://127.0.0.1:1/missing.png[Missing]\n\nimage::http://{addr}/empty.png[Empty]\n"
    );
    let body = json!({
        "content": content,
        "title": "Gallery",
        "image": format!("http://{addr}/cover.png"),
    })
    .to_string();

    let response = send(&app, convert_request("html5", body)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/html; charset=utf-8"
    );
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"Gallery.html\""
    );

    let html = body_text(response).await;
    let pixel = format!("src=\"data:image/png;base64,{}\"", STANDARD.encode(PIXEL));
    let cover = format!(
        "<div class=\"cover-image\"><img src=\"data:image/png;base64,{}\" alt=\"Cover\"></div>",
        STANDARD.encode(COVER)
    );
    assert!(html.contains(&pixel), "{html}");
    assert!(html.contains(&cover), "{html}");
    assert!(
        html.contains("src=\"http://127.0.0.1:1/missing.png\""),
        "{html}"
    );
    assert!(
        html.contains(&format!("src=\"http://{addr}/empty.png\"")),
        "{html}"
    );
    assert!(harness.leftover_entries().is_empty());
}

#[tokio::test]
async fn failed_cover_download_keeps_the_remote_cover() {
    let harness = Harness::new();
    let app = harness.ready_router();

    let body = json!({
        "content": "= Plain\n\nNo figures here.",
        "image": "http://127.0.0.1:1/cover.png",
    })
    .to_string();

    let response = send(&app, convert_request("html5", body)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(
        html.contains(
            "<div class=\"cover-image\"><img src=\"http://127.0.0.1:1/cover.png\" alt=\"Cover\"></div>"
        ),
        "{html}"
    );
    assert!(harness.leftover_entries().is_empty());
}

#[tokio::test]
async fn images_are_embedded_under_the_spelling_the_document_uses() {
    let addr = spawn_image_server().await;
    let harness = Harness::new();
    let app = harness.ready_router();

    let port = addr.port();
    let content = format!(
        "= Spelling\n\nimage::HTTP://LOCALHOST:{port}/pixel.png[Upper]\n\nimage::http://{addr}/figures/../pixel.png[Dotted]\n"
    );
    let body = json!({ "content": content }).to_string();

    let response = send(&app, convert_request("html5", body)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    let pixel = format!("src=\"data:image/png;base64,{}\"", STANDARD.encode(PIXEL));
    assert_eq!(html.matches(&pixel).count(), 2, "{html}");
    assert!(!html.contains("LOCALHOST"), "{html}");
    assert!(!html.contains("/figures/../"), "{html}");
    assert!(harness.leftover_entries().is_empty());
}

#[tokio::test]
async fn document_cover_attribute_becomes_the_cover_block() {
    let addr = spawn_image_server().await;
    let harness = Harness::new();
    let app = harness.ready_router();

    let content = format!("= Covered\n:front-cover-image: image:http://{addr}/cover.png[Front]\n\nBody\n");
    let body = json!({ "content": content }).to_string();

    let response = send(&app, convert_request("html5", body)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    let cover = format!(
        "<div class=\"cover-image\"><img src=\"data:image/png;base64,{}\" alt=\"Cover\"></div>",
        STANDARD.encode(COVER)
    );
    assert!(html.contains(&cover), "{html}");
    assert!(harness.leftover_entries().is_empty());
}

#[tokio::test]
async fn request_cover_wins_over_document_cover() {
    let addr = spawn_image_server().await;
    let harness = Harness::new();
    let app = harness.ready_router();

    let content = format!("= Covered\n:cover-image: http://{addr}/pixel.png\n\nBody\n");
    let body = json!({
        "content": content,
        "image": format!("http://{addr}/cover.png"),
    })
    .to_string();

    let response = send(&app, convert_request("html5", body)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    let cover = format!(
        "<div class=\"cover-image\"><img src=\"data:image/png;base64,{}\" alt=\"Cover\"></div>",
        STANDARD.encode(COVER)
    );
    assert!(html.contains(&cover), "{html}");
    assert_eq!(html.matches("cover-image").count(), 1, "{html}");
}
