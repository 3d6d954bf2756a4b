//! Per-mount request handling.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequest, Multipart, Query, Request},
    http::{header, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, info, warn};

use crate::archive::{
    archive_file_name, attachment_disposition, stream_archive, ArchiveStreamer, TarGzStreamer,
    ZipStreamer, TAR_GZ_QUERY, ZIP_QUERY,
};
use crate::error::{status_response, FileServerError};
use crate::listing;
use crate::mount::Mount;
use crate::resolve::{decode_url_path, resolve};
use crate::upload::{self, UploadOutcome};

/// What the resolved path turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Missing,
    Denied,
    Unreadable,
    Directory,
    File,
}

impl Target {
    pub fn from_stat(stat: &io::Result<std::fs::Metadata>) -> Self {
        match stat {
            Ok(metadata) if metadata.is_dir() => Target::Directory,
            Ok(_) => Target::File,
            Err(e) => match e.kind() {
                io::ErrorKind::NotFound => Target::Missing,
                io::ErrorKind::PermissionDenied => Target::Denied,
                _ => Target::Unreadable,
            },
        }
    }
}

/// The request attributes that steer dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFlags {
    pub zip: bool,
    pub tar_gz: bool,
    pub post: bool,
}

impl RequestFlags {
    pub fn from_request(req: &Request) -> Self {
        let params: Vec<(String, String)> = Query::try_from_uri(req.uri())
            .map(|Query(params)| params)
            .unwrap_or_default();
        // Only the first value of a key counts, as with form decoding elsewhere
        let requested = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .is_some_and(|(_, v)| !v.is_empty())
        };

        Self {
            zip: requested(ZIP_QUERY),
            tar_gz: requested(TAR_GZ_QUERY),
            post: req.method() == Method::POST,
        }
    }
}

/// Response mode chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    NotFound,
    Forbidden,
    Failure,
    ArchiveZip,
    ArchiveTarGz,
    Upload,
    Listing,
    RawFile,
}

/// Pick the response mode. Stat failures come first, then archive queries,
/// then uploads, then listing, then the raw file.
pub fn decide(target: Target, flags: &RequestFlags, allow_upload: bool) -> Action {
    match target {
        Target::Missing => Action::NotFound,
        Target::Denied => Action::Forbidden,
        Target::Unreadable => Action::Failure,
        _ if flags.zip => Action::ArchiveZip,
        _ if flags.tar_gz => Action::ArchiveTarGz,
        Target::Directory if allow_upload && flags.post => Action::Upload,
        Target::Directory => Action::Listing,
        Target::File => Action::RawFile,
    }
}

/// Serves one mount.
pub struct FileHandler {
    mount: Mount,
    tar_gz: Arc<dyn ArchiveStreamer>,
    zip: Arc<dyn ArchiveStreamer>,
    max_upload_size: Option<u64>,
}

impl FileHandler {
    pub fn new(mount: Mount) -> Self {
        Self::with_archivers(
            mount,
            Arc::new(TarGzStreamer::default()),
            Arc::new(ZipStreamer),
        )
    }

    pub fn with_archivers(
        mount: Mount,
        tar_gz: Arc<dyn ArchiveStreamer>,
        zip: Arc<dyn ArchiveStreamer>,
    ) -> Self {
        Self {
            mount,
            tar_gz,
            zip,
            max_upload_size: None,
        }
    }

    pub fn with_upload_limit(mut self, max_upload_size: Option<u64>) -> Self {
        self.max_upload_size = max_upload_size;
        self
    }

    pub fn mount(&self) -> &Mount {
        &self.mount
    }

    /// Filesystem path addressed by a decoded URL path.
    pub fn os_path(&self, url_path: &str) -> PathBuf {
        resolve(&self.mount.route, &self.mount.root, url_path)
    }

    pub async fn handle(&self, req: Request) -> Response {
        let remote = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_else(|| "-".to_string());
        info!(
            "[{}] {} {} {}",
            self.mount.root.display(),
            remote,
            req.method(),
            req.uri()
        );

        let os_path = self.os_path(&decode_url_path(req.uri().path()));
        let stat = tokio::fs::metadata(&os_path).await;
        let target = Target::from_stat(&stat);
        let flags = RequestFlags::from_request(&req);

        let action = decide(target, &flags, self.mount.allow_upload);
        let result = match action {
            Action::NotFound | Action::Forbidden | Action::Failure => match stat {
                Err(e) => Err(FileServerError::from_io(e, &os_path)),
                Ok(_) => Ok(status_response(StatusCode::INTERNAL_SERVER_ERROR)),
            },
            Action::ArchiveZip => self.serve_archive(self.zip.clone(), os_path.clone()).await,
            Action::ArchiveTarGz => {
                self.serve_archive(self.tar_gz.clone(), os_path.clone()).await
            }
            Action::Upload => self.serve_upload(req, &os_path).await,
            Action::Listing => self.serve_listing(req.uri().clone(), os_path.clone()).await,
            Action::RawFile => Ok(serve_file(req, &os_path).await),
        };

        result.unwrap_or_else(|e| {
            if e.status_code().is_server_error() {
                warn!("{:?} on {:?} failed: {}", action, os_path, e);
            } else {
                debug!("{:?} on {:?}: {}", action, os_path, e);
            }
            e.into_response()
        })
    }

    async fn serve_archive(
        &self,
        streamer: Arc<dyn ArchiveStreamer>,
        root: PathBuf,
    ) -> Result<Response, FileServerError> {
        let file_name = archive_file_name(&root, streamer.extension());
        let content_type = streamer.content_type();
        let body = stream_archive(streamer, root).await?;

        Ok((
            [
                (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
                (header::CONTENT_DISPOSITION, attachment_disposition(&file_name)),
            ],
            body,
        )
            .into_response())
    }

    async fn serve_upload(&self, req: Request, dir: &Path) -> Result<Response, FileServerError> {
        let target = req.uri().to_string();
        let multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| FileServerError::Multipart(e.body_text()))?;

        match upload::accept(multipart, dir, self.max_upload_size).await? {
            UploadOutcome::Stored(path) => info!("Uploaded {:?}", path),
            UploadOutcome::Missing => info!("Upload to {:?} carried no file", dir),
        }
        Ok(Redirect::to(&target).into_response())
    }

    async fn serve_listing(&self, uri: Uri, dir: PathBuf) -> Result<Response, FileServerError> {
        let root = self.mount.root.clone();
        let allow_upload = self.mount.allow_upload;

        let html = tokio::task::spawn_blocking(move || {
            listing::render(&dir, &root, &uri, allow_upload)
        })
        .await
        .map_err(|e| FileServerError::Io(io::Error::other(e.to_string())))??;

        Ok((
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            html,
        )
            .into_response())
    }
}

/// Raw file transfer, with content type, range and conditional handling
/// left to `ServeFile`.
async fn serve_file(req: Request, path: &Path) -> Response {
    match ServeFile::new(path).oneshot(req).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    }
}
