use std::cell::Cell;
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;
use std::rc::Rc;
use std::time::SystemTime;

use chrono::{Datelike, Local, Timelike};
use tempfile::tempfile;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{walk_files, ArchiveFile, ArchiveStreamer};

/// Deflate zip, written to the sink one entry at a time.
///
/// Each file is compressed into a scratch single-entry archive first, so its
/// local header goes out with the final CRC and sizes and the outer writer
/// never has to seek back.
#[derive(Default)]
pub struct ZipStreamer;

impl ArchiveStreamer for ZipStreamer {
    fn content_type(&self) -> &'static str {
        "application/zip"
    }

    fn extension(&self) -> &'static str {
        "zip"
    }

    fn stream(&self, sink: &mut dyn Write, root: &Path) -> io::Result<()> {
        let discard = Rc::new(Cell::new(false));
        let mut zip = ZipWriter::new(ForwardOnly::new(sink, discard.clone()));
        let mut scratch = tempfile()?;

        let walked = walk_files(root, |entry| add_file(&mut zip, &mut scratch, entry));
        if let Err(e) = walked {
            // No central directory for a broken archive; close out silently so
            // dropping the writer does not try again
            discard.set(true);
            if let Err(close) = zip.finish() {
                debug!("Abandoned zip archive of {:?}: {}", root, close);
            }
            return Err(e);
        }

        zip.finish().map_err(zip_error_to_io)?;
        Ok(())
    }
}

fn add_file<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    scratch: &mut File,
    mut entry: ArchiveFile,
) -> io::Result<()> {
    let mut options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(entry.mode)
        .large_file(entry.size >= u64::from(u32::MAX));
    if let Some(modified) = entry.modified.and_then(zip_time) {
        options = options.last_modified_time(modified);
    }

    scratch.set_len(0)?;
    scratch.rewind()?;
    let mut single = ZipWriter::new(&mut *scratch);
    single
        .start_file(entry.name.as_str(), options)
        .map_err(zip_error_to_io)?;
    io::copy(&mut entry.file, &mut single)?;
    single.finish().map_err(zip_error_to_io)?;

    let mut compressed = ZipArchive::new(&mut *scratch).map_err(zip_error_to_io)?;
    let file = compressed.by_index_raw(0).map_err(zip_error_to_io)?;
    zip.raw_copy_file(file).map_err(zip_error_to_io)
}

/// `Seek` over a plain sink that only tracks the write position. Seeks that
/// would move it fail.
///
/// Once `discard` is set, by the caller or by a failed sink write, later
/// writes are dropped so the zip writer can close out without reporting the
/// same failure again.
struct ForwardOnly<W> {
    inner: W,
    position: u64,
    discard: Rc<Cell<bool>>,
}

impl<W: Write> ForwardOnly<W> {
    fn new(inner: W, discard: Rc<Cell<bool>>) -> Self {
        Self {
            inner,
            position: 0,
            discard,
        }
    }
}

impl<W: Write> Write for ForwardOnly<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.discard.get() {
            self.position += buf.len() as u64;
            return Ok(buf.len());
        }
        match self.inner.write(buf) {
            Ok(n) => {
                self.position += n as u64;
                Ok(n)
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::Interrupted {
                    self.discard.set(true);
                }
                Err(e)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.discard.get() {
            return Ok(());
        }
        self.inner.flush()
    }
}

impl<W> Seek for ForwardOnly<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) | SeekFrom::End(delta) => {
                self.position.checked_add_signed(delta)
            }
        };
        match target {
            Some(offset) if offset == self.position => Ok(offset),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "zip output cannot seek",
            )),
        }
    }
}

/// Zip timestamps are local wall-clock time; anything before 1980 is dropped.
fn zip_time(time: SystemTime) -> Option<zip::DateTime> {
    let local: chrono::DateTime<Local> = time.into();
    zip::DateTime::from_date_and_time(
        u16::try_from(local.year()).ok()?,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}

fn zip_error_to_io(error: zip::result::ZipError) -> io::Error {
    match error {
        zip::result::ZipError::Io(e) => e,
        other => io::Error::other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use std::io::{Cursor, Read};
    use tempfile::TempDir;

    fn extract(bytes: Vec<u8>) -> BTreeMap<String, Vec<u8>> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut files = BTreeMap::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).unwrap();
            let mut content = Vec::new();
            file.read_to_end(&mut content).unwrap();
            files.insert(file.name().to_string(), content);
        }
        files
    }

    #[test]
    fn test_round_trip() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("photos");
        fs::create_dir_all(root.join("2024").join("empty")).unwrap();
        fs::write(root.join("index.txt"), "album\n").unwrap();
        fs::write(root.join("2024").join("pic.raw"), vec![7u8; 10_000]).unwrap();

        let mut out = Vec::new();
        ZipStreamer.stream(&mut out, &root).unwrap();

        let files = extract(out);
        assert_eq!(files.len(), 2);
        assert_eq!(files["index.txt"], b"album\n");
        assert_eq!(files["2024/pic.raw"], vec![7u8; 10_000]);
    }

    #[test]
    fn test_empty_directory() {
        let temp = TempDir::new().unwrap();
        let mut out = Vec::new();
        ZipStreamer.stream(&mut out, temp.path()).unwrap();
        assert!(extract(out).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_is_preserved() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let script = temp.path().join("run.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();

        let mut out = Vec::new();
        ZipStreamer.stream(&mut out, temp.path()).unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(out)).unwrap();
        let file = archive.by_name("run.sh").unwrap();
        assert_eq!(file.unix_mode().unwrap() & 0o777, 0o750);
    }

    #[test]
    fn test_missing_root_fails() {
        let temp = TempDir::new().unwrap();
        let mut out = Vec::new();
        let result = ZipStreamer.stream(&mut out, &temp.path().join("missing"));
        assert!(result.is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_entries_reach_sink_during_walk() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "alpha").unwrap();
        fs::write(temp.path().join("b.txt"), "bravo").unwrap();

        // Rewrites b.txt on its first write; only a sink written to before
        // the walk reaches b.txt sees the new contents archived.
        struct TouchingSink {
            later: std::path::PathBuf,
            out: Vec<u8>,
        }

        impl Write for TouchingSink {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                if self.out.is_empty() {
                    fs::write(&self.later, "changed").unwrap();
                }
                self.out.extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut sink = TouchingSink {
            later: temp.path().join("b.txt"),
            out: Vec::new(),
        };
        ZipStreamer.stream(&mut sink, temp.path()).unwrap();

        let files = extract(sink.out);
        assert_eq!(files["a.txt"], b"alpha");
        assert_eq!(files["b.txt"], b"changed");
    }

    #[test]
    fn test_sink_failure_stops_walk() {
        let temp = TempDir::new().unwrap();
        for i in 0..4 {
            fs::write(temp.path().join(format!("{i}.bin")), vec![i as u8; 4096]).unwrap();
        }

        struct ClosedSink {
            writes: usize,
        }

        impl Write for ClosedSink {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                self.writes += 1;
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut sink = ClosedSink { writes: 0 };
        let err = ZipStreamer.stream(&mut sink, temp.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(sink.writes, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_walk_failure_writes_no_central_directory() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "alpha").unwrap();
        let locked = temp.path().join("b.txt");
        fs::write(&locked, "bravo").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if File::open(&locked).is_ok() {
            // Permission bits do not bind root
            return;
        }

        let mut out = Vec::new();
        let result = ZipStreamer.stream(&mut out, temp.path());
        assert!(result.is_err());
        assert!(!out.is_empty());
        assert!(zip::ZipArchive::new(Cursor::new(out)).is_err());
    }

    #[test]
    fn test_forward_only_seek() {
        let mut writer = ForwardOnly::new(Vec::new(), Rc::default());
        writer.write_all(b"abc").unwrap();
        assert_eq!(writer.stream_position().unwrap(), 3);
        assert_eq!(writer.seek(SeekFrom::End(0)).unwrap(), 3);
        assert!(writer.seek(SeekFrom::Start(0)).is_err());
        assert!(writer.seek(SeekFrom::Current(-1)).is_err());
    }

    #[test]
    fn test_zip_time_range() {
        assert!(zip_time(SystemTime::UNIX_EPOCH).is_none());
        assert!(zip_time(SystemTime::now()).is_some());
    }
}
