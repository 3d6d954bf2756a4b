use std::io;
use std::path::{Path, PathBuf};

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Errors raised while serving a single request.
#[derive(Error, Debug)]
pub enum FileServerError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed multipart body: {0}")]
    Multipart(String),

    #[error("Invalid upload file name: {0:?}")]
    InvalidFileName(String),

    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },
}

impl FileServerError {
    /// Classify a filesystem error for `path`.
    pub fn from_io(err: io::Error, path: &Path) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FileServerError::NotFound(path.display().to_string()),
            io::ErrorKind::PermissionDenied => {
                FileServerError::PermissionDenied(path.display().to_string())
            }
            _ => FileServerError::Io(err),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            FileServerError::NotFound(_) => StatusCode::NOT_FOUND,
            FileServerError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            FileServerError::Io(_) | FileServerError::Multipart(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            FileServerError::InvalidFileName(_) => StatusCode::BAD_REQUEST,
            FileServerError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

/// Plain-text response whose body is the canonical reason phrase of `status`.
pub fn status_response(status: StatusCode) -> Response {
    let text = status.canonical_reason().unwrap_or("Unknown Status");
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("{text}\n"),
    )
        .into_response()
}

impl IntoResponse for FileServerError {
    fn into_response(self) -> Response {
        status_response(self.status_code())
    }
}

/// Fatal errors raised while assembling the server.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Invalid route {0:?}: expected ROUTE=PATH or PATH")]
    InvalidRoute(String),

    #[error("Route {0:?} is mounted more than once")]
    DuplicateRoute(String),

    #[error("No routes configured")]
    NoRoutes,

    #[error("Mount root does not exist: {}", .0.display())]
    MissingRoot(PathBuf),

    #[error("Invalid listen address {addr:?}: {reason}")]
    InvalidAddr { addr: String, reason: String },

    #[error("Invalid config file: {0}")]
    Config(#[from] toml::de::Error),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
