use std::io::{self, Read, Write};
use std::path::Path;
use std::time::UNIX_EPOCH;

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Builder, EntryType, Header};
use tracing::warn;

use super::{walk_files, ArchiveFile, ArchiveStreamer};

/// Gzip-compressed tar, written straight through to the sink.
pub struct TarGzStreamer {
    compression: Compression,
}

impl TarGzStreamer {
    pub fn new(compression: Compression) -> Self {
        Self { compression }
    }
}

impl Default for TarGzStreamer {
    fn default() -> Self {
        Self::new(Compression::default())
    }
}

impl ArchiveStreamer for TarGzStreamer {
    fn content_type(&self) -> &'static str {
        "application/x-tar+gzip"
    }

    fn extension(&self) -> &'static str {
        "tar.gz"
    }

    fn stream(&self, sink: &mut dyn Write, root: &Path) -> io::Result<()> {
        let mut builder = Builder::new(GzEncoder::new(sink, self.compression));

        let walked = walk_files(root, |entry| append_file(&mut builder, entry));

        // Tar trailer first, then the gzip footer
        let closed = builder
            .into_inner()
            .and_then(|encoder| encoder.finish())
            .map(|_| ());
        if let Err(e) = &closed {
            warn!("Failed to finish tar.gz archive of {:?}: {}", root, e);
        }

        walked.and(closed)
    }
}

fn append_file<W: Write>(builder: &mut Builder<W>, entry: ArchiveFile) -> io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(entry.size);
    header.set_mode(entry.mode);
    header.set_mtime(
        entry
            .modified
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0),
    );

    let data = ExactReader {
        inner: entry.file.take(entry.size),
        remaining: entry.size,
    };
    builder.append_data(&mut header, &entry.name, data)
}

/// Yields exactly the size recorded in the header, failing if the file
/// shrank underneath us.
struct ExactReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank while being archived",
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}
