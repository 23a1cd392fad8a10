//! HTTP endpoint tests driven through the router directly.

mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::util::ServiceExt;

use blot_server::router;

async fn get(app: axum::Router, path: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(path).body(Body::empty()).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn status_reports_database_shape() {
    let fixture = support::fixture();
    let app = router(fixture.ctx.clone(), None);

    let (status, body) = get(app, "/api/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tu_count"], Value::from(1));
    assert!(body["ccj"]
        .as_str()
        .expect("ccj")
        .ends_with("compile_commands.json"));
    assert!(body["project_root"].is_string());
}

#[tokio::test]
async fn files_lists_sources_relative_to_root() {
    let fixture = support::fixture();
    let app = router(fixture.ctx.clone(), None);

    let (status, body) = get(app, "/api/files").await;

    assert_eq!(status, StatusCode::OK);
    let files = body["files"].as_array().expect("files");
    assert!(files.iter().any(|f| f == "source.cpp"));
}

#[tokio::test]
async fn source_returns_file_content() {
    let fixture = support::fixture();
    let app = router(fixture.ctx.clone(), None);

    let (status, body) = get(app, "/api/source?file=source.cpp").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["file"], Value::from("source.cpp"));
    assert!(body["content"]
        .as_str()
        .expect("content")
        .contains("int main"));
}

#[tokio::test]
async fn source_without_param_is_bad_request() {
    let fixture = support::fixture();
    let app = router(fixture.ctx.clone(), None);

    let (status, _) = get(app, "/api/source").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn source_traversal_is_forbidden() {
    let fixture = support::fixture();
    let app = router(fixture.ctx.clone(), None);

    let (status, _) = get(app, "/api/source?file=..%2F..%2Fetc%2Fpasswd").await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn source_absolute_path_is_forbidden() {
    let fixture = support::fixture();
    let app = router(fixture.ctx.clone(), None);

    let (status, _) = get(app, "/api/source?file=%2Fetc%2Fpasswd").await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn source_missing_file_is_not_found() {
    let fixture = support::fixture();
    let app = router(fixture.ctx.clone(), None);

    let (status, _) = get(app, "/api/source?file=missing.cpp").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn static_without_web_root_is_not_found() {
    let fixture = support::fixture();
    let app = router(fixture.ctx.clone(), None);

    let (status, _) = get(app, "/index.html").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn static_serves_from_web_root() {
    let fixture = support::fixture();
    std::fs::write(fixture.root.join("index.html"), "<html>blot</html>").expect("index");
    let app = router(fixture.ctx.clone(), Some(fixture.root.clone()));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    assert!(content_type.starts_with("text/html"));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(bytes.as_ref(), b"<html>blot</html>");
}

#[tokio::test]
async fn static_traversal_is_forbidden() {
    let fixture = support::fixture();
    let app = router(fixture.ctx.clone(), Some(fixture.root.clone()));

    let (status, _) = get(app, "/../etc/passwd").await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}
