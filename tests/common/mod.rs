//! Test utilities and common setup.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use dirserve::{Config, Mount};
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "dirserve-test-boundary";

/// A temp dir holding a served `docs` tree and a `secret.txt` beside it.
pub struct Fixture {
    pub temp: TempDir,
    pub docs: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let docs = temp.path().join("docs");
        fs::create_dir_all(docs.join("sub").join("deeper")).unwrap();
        fs::write(docs.join("a.txt"), "alpha\n").unwrap();
        fs::write(docs.join("b.txt"), "bravo\n").unwrap();
        fs::write(docs.join("sub").join("c.txt"), "charlie\n").unwrap();
        fs::write(docs.join("sub").join("deeper").join("d.bin"), [0u8, 159, 146, 150]).unwrap();
        fs::write(temp.path().join("secret.txt"), "top secret\n").unwrap();
        Self { temp, docs }
    }

    pub fn app(&self, uploads: bool) -> Router {
        self.app_with_config(uploads, &Config::default())
    }

    pub fn app_with_config(&self, uploads: bool, config: &Config) -> Router {
        let mount = Mount::new("/docs/", &self.docs).with_uploads(uploads);
        dirserve::app(vec![mount], config).unwrap()
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub async fn send(app: Router, request: Request<Body>) -> TestResponse {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn get(app: Router, uri: &str) -> TestResponse {
    send(
        app,
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
    )
    .await
}

/// A `multipart/form-data` request with a single file field.
pub fn upload_request(uri: &str, field: &str, filename: &str, content: &[u8]) -> Request<Body> {
    multipart_request(
        uri,
        &format!("form-data; name=\"{field}\"; filename=\"{filename}\""),
        content,
    )
}

/// A `multipart/form-data` request with one part carrying `disposition`.
pub fn multipart_request(uri: &str, disposition: &str, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn read(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap()
}
