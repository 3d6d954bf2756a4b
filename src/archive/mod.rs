//! Whole-subtree archive downloads.
//!
//! Streamers are synchronous and write into any `io::Write`; [`stream_archive`]
//! runs one on the blocking pool and turns its output into a response body.

mod targz;
mod zipfile;

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use axum::body::Body;
use axum::http::HeaderValue;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use crate::error::FileServerError;

pub use self::targz::TarGzStreamer;
pub use self::zipfile::ZipStreamer;

/// Query parameter requesting a tar.gz of the addressed subtree.
pub const TAR_GZ_QUERY: &str = "tar.gz";
/// Query parameter requesting a zip of the addressed subtree.
pub const ZIP_QUERY: &str = "zip";

const CHUNK_SIZE: usize = 64 * 1024;
const CHANNEL_DEPTH: usize = 16;

/// Writes a directory subtree to a sink as a single archive.
pub trait ArchiveStreamer: Send + Sync {
    fn content_type(&self) -> &'static str;

    /// File extension without the leading dot.
    fn extension(&self) -> &'static str;

    /// Walk `root` and write the archive to `sink`. Directories produce no
    /// entries; every regular file is written under its path relative to
    /// `root`.
    fn stream(&self, sink: &mut dyn Write, root: &Path) -> io::Result<()>;
}

/// A regular file found while walking a subtree, opened for reading.
pub(crate) struct ArchiveFile {
    /// Path relative to the walk root, `/`-separated
    pub name: String,
    pub size: u64,
    pub mode: u32,
    pub modified: Option<SystemTime>,
    pub file: File,
}

/// Visit every regular file under `root`, siblings in file name order.
///
/// Symlinks are not descended into but links to files are archived with the
/// target's contents. Dangling links and special files are skipped.
pub(crate) fn walk_files<F>(root: &Path, mut visit: F) -> io::Result<()>
where
    F: FnMut(ArchiveFile) -> io::Result<()>,
{
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_dir() {
            continue;
        }

        let metadata = match fs::metadata(entry.path()) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound && entry.path_is_symlink() => {
                warn!("Skipping dangling symlink {:?}", entry.path());
                continue;
            }
            Err(e) => return Err(e),
        };
        if !metadata.is_file() {
            debug!("Skipping non-regular file {:?}", entry.path());
            continue;
        }

        let file = File::open(entry.path())?;
        visit(ArchiveFile {
            name: entry_name(root, entry.path()),
            size: metadata.len(),
            mode: file_mode(&metadata),
            modified: metadata.modified().ok(),
            file,
        })?;
    }
    Ok(())
}

fn entry_name(root: &Path, path: &Path) -> String {
    let relative: Vec<String> = path
        .strip_prefix(root)
        .unwrap_or(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if relative.is_empty() {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string())
    } else {
        relative.join("/")
    }
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Download name for an archive of `root`.
pub fn archive_file_name(root: &Path, extension: &str) -> String {
    let base = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    format!("{base}.{extension}")
}

/// `Content-Disposition` value forcing a download as `file_name`.
pub fn attachment_disposition(file_name: &str) -> HeaderValue {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c == ' ' || c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();

    let mut value = format!("attachment; filename=\"{fallback}\"");
    if fallback != file_name {
        value.push_str(&format!(
            "; filename*=UTF-8''{}",
            urlencoding::encode(file_name)
        ));
    }
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// `io::Write` end of the archive body channel.
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `streamer` over `root` on the blocking pool. Chunks arrive on the
/// returned channel; the handle yields the streamer's result.
fn spawn_streamer(
    streamer: Arc<dyn ArchiveStreamer>,
    root: PathBuf,
) -> (mpsc::Receiver<io::Result<Bytes>>, JoinHandle<io::Result<()>>) {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);

    let task = tokio::task::spawn_blocking(move || {
        let mut sink = BufWriter::with_capacity(CHUNK_SIZE, ChannelWriter { tx });
        let result = streamer
            .stream(&mut sink, &root)
            .and_then(|()| sink.flush());
        // Anything still buffered after a failure is discarded
        let (writer, _) = sink.into_parts();

        if let Err(e) = &result {
            if e.kind() == io::ErrorKind::BrokenPipe {
                debug!("Client dropped {} archive of {:?}", streamer.extension(), root);
            } else {
                error!(
                    "Failed to stream {} archive of {:?}: {}",
                    streamer.extension(),
                    root,
                    e
                );
                let _ = writer
                    .tx
                    .blocking_send(Err(io::Error::new(e.kind(), e.to_string())));
            }
        }
        result
    });

    (rx, task)
}

/// Run `streamer` over `root` on the blocking pool and return the archive as
/// a streaming body.
///
/// Fails only if the archive breaks before its first chunk; later failures
/// abort the body mid-stream.
pub async fn stream_archive(
    streamer: Arc<dyn ArchiveStreamer>,
    root: PathBuf,
) -> Result<Body, FileServerError> {
    let (mut rx, task) = spawn_streamer(streamer, root);

    match rx.recv().await {
        Some(Ok(first)) => {
            let head = futures::stream::once(async move { Ok::<_, io::Error>(first) });
            Ok(Body::from_stream(head.chain(ReceiverStream::new(rx))))
        }
        Some(Err(e)) => Err(FileServerError::Io(e)),
        None => match task.await {
            Ok(Ok(())) => Ok(Body::empty()),
            Ok(Err(e)) => Err(FileServerError::Io(e)),
            Err(e) => Err(FileServerError::Io(io::Error::other(e.to_string()))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_entry_name() {
        let root = Path::new("/srv/reports");
        assert_eq!(entry_name(root, &root.join("a").join("b.txt")), "a/b.txt");
        assert_eq!(entry_name(root, root), "reports");
    }

    #[test]
    fn test_archive_file_name() {
        assert_eq!(
            archive_file_name(Path::new("/srv/reports"), "tar.gz"),
            "reports.tar.gz"
        );
        assert_eq!(archive_file_name(Path::new("/"), "zip"), "archive.zip");
    }

    #[test]
    fn test_attachment_disposition() {
        assert_eq!(
            attachment_disposition("reports.zip"),
            "attachment; filename=\"reports.zip\""
        );
        assert_eq!(
            attachment_disposition("b\u{e4}r.zip"),
            "attachment; filename=\"b_r.zip\"; filename*=UTF-8''b%C3%A4r.zip"
        );
        assert_eq!(
            attachment_disposition("a\"b.zip"),
            "attachment; filename=\"a_b.zip\"; filename*=UTF-8''a%22b.zip"
        );
    }

    #[test]
    fn test_walk_files_skips_directories() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("a").join("empty")).unwrap();
        fs::write(temp.path().join("a").join("x.txt"), "x").unwrap();
        fs::write(temp.path().join("top.txt"), "top").unwrap();

        let mut names = Vec::new();
        walk_files(temp.path(), |entry| {
            names.push((entry.name, entry.size));
            Ok(())
        })
        .unwrap();
        names.sort();

        assert_eq!(
            names,
            vec![("a/x.txt".to_string(), 1), ("top.txt".to_string(), 3)]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_walk_files_skips_dangling_symlink() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("real.txt"), "real").unwrap();
        std::os::unix::fs::symlink(temp.path().join("gone"), temp.path().join("dangling"))
            .unwrap();

        let mut names = Vec::new();
        walk_files(temp.path(), |entry| {
            names.push(entry.name);
            Ok(())
        })
        .unwrap();

        assert_eq!(names, vec!["real.txt".to_string()]);
    }

    #[test]
    fn test_walk_files_missing_root() {
        let temp = TempDir::new().unwrap();
        let result = walk_files(&temp.path().join("missing"), |_| Ok(()));
        assert!(result.is_err());
    }

    struct FailingStreamer;

    impl ArchiveStreamer for FailingStreamer {
        fn content_type(&self) -> &'static str {
            "application/octet-stream"
        }

        fn extension(&self) -> &'static str {
            "bin"
        }

        fn stream(&self, _sink: &mut dyn Write, _root: &Path) -> io::Result<()> {
            Err(io::Error::other("boom"))
        }
    }

    #[tokio::test]
    async fn test_stream_archive_fails_before_first_chunk() {
        let temp = TempDir::new().unwrap();
        let result = stream_archive(Arc::new(FailingStreamer), temp.path().to_path_buf()).await;
        assert!(matches!(result, Err(FileServerError::Io(_))));
    }

    #[tokio::test]
    async fn test_client_disconnect_ends_stream_with_error() {
        let temp = TempDir::new().unwrap();
        for i in 0..4 {
            fs::write(temp.path().join(format!("{i}.bin")), vec![0u8; 1 << 20]).unwrap();
        }

        // Uncompressed, so the output outgrows the channel
        let streamer = Arc::new(TarGzStreamer::new(flate2::Compression::none()));
        let (mut rx, task) = spawn_streamer(streamer, temp.path().to_path_buf());

        let first = rx.recv().await.unwrap().unwrap();
        assert!(!first.is_empty());
        drop(rx);

        let result = task.await.expect("archive task panicked");
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_stream_archive_body() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("f.txt"), "hello").unwrap();

        let body = stream_archive(Arc::new(TarGzStreamer::default()), temp.path().to_path_buf())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        // gzip magic
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    }
}
