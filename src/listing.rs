//! HTML rendering of a single directory level.

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use axum::extract::Query;
use axum::http::Uri;

use crate::archive::{TAR_GZ_QUERY, ZIP_QUERY};
use crate::upload::UPLOAD_FIELD;

/// One immediate child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_dir: bool,
    pub size_bytes: u64,
    pub child_url: String,
}

impl DirectoryEntry {
    /// Name as shown in the listing; directories carry a trailing separator.
    pub fn display_name(&self) -> String {
        if self.is_dir {
            format!("{}{}", self.name, MAIN_SEPARATOR)
        } else {
            self.name.clone()
        }
    }
}

/// Human-readable size with 1024-based units, rounded to whole units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSize(pub u64);

impl fmt::Display for FileSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const KB: f64 = 1024.0;
        const MB: f64 = KB * 1024.0;
        const GB: f64 = MB * 1024.0;

        let size = self.0 as f64;
        if size < KB {
            write!(f, "{}", self.0)
        } else if size < MB {
            write!(f, "{}K", (size / KB).round())
        } else if size < GB {
            write!(f, "{}M", (size / MB).round())
        } else {
            write!(f, "{}G", (size / GB).round())
        }
    }
}

/// Directories first, then ascending by name.
pub fn sort_entries(entries: &mut [DirectoryEntry]) {
    entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.name.cmp(&b.name),
    });
}

/// Read the immediate children of `dir`, sorted. Child links are built under
/// the raw (still percent-encoded) `url_path`.
pub fn read_entries(dir: &Path, url_path: &str) -> io::Result<Vec<DirectoryEntry>> {
    let base = url_path.trim_end_matches('/');
    let mut entries = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        // Symlinks are described as themselves, not their targets
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = metadata.is_dir();
        let mut child_url = format!("{}/{}", base, urlencoding::encode(&name));
        if is_dir {
            child_url.push('/');
        }

        entries.push(DirectoryEntry {
            name,
            is_dir,
            size_bytes: metadata.len(),
            child_url,
        });
    }

    sort_entries(&mut entries);
    Ok(entries)
}

/// Link to the current URL with `key=true` set, keeping other parameters.
pub fn archive_url(uri: &Uri, key: &str) -> String {
    let mut params: Vec<(String, String)> = Query::try_from_uri(uri)
        .map(|Query(params)| params)
        .unwrap_or_default();
    params.retain(|(k, _)| k != key);
    params.push((key.to_string(), "true".to_string()));
    params.sort_by(|a, b| a.0.cmp(&b.0));

    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", uri.path(), query)
}

/// Listing title: the mount root's base name joined with the path below it.
fn listing_title(dir: &Path, mount_root: &Path) -> String {
    let mut title = mount_root
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| mount_root.to_path_buf());
    if let Ok(relative) = dir.strip_prefix(mount_root) {
        if !relative.as_os_str().is_empty() {
            title.push(relative);
        }
    }
    title.display().to_string()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// A fully read directory, ready to be rendered.
pub struct Listing {
    pub title: String,
    pub tar_gz_url: String,
    pub zip_url: String,
    pub upload_url: Option<String>,
    pub entries: Vec<DirectoryEntry>,
}

impl Listing {
    pub fn read(dir: &Path, mount_root: &Path, uri: &Uri, allow_upload: bool) -> io::Result<Self> {
        Ok(Self {
            title: listing_title(dir, mount_root),
            tar_gz_url: archive_url(uri, TAR_GZ_QUERY),
            zip_url: archive_url(uri, ZIP_QUERY),
            upload_url: allow_upload.then(|| uri.to_string()),
            entries: read_entries(dir, uri.path())?,
        })
    }
}

const STYLE: &str = "body{font-family:sans-serif;margin:2em}\
table{border-collapse:collapse}\
th,td{padding:.2em 1em;text-align:left}\
td.size{text-align:right;font-family:monospace}\
tr:nth-child(even){background:#f4f4f4}";

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = html_escape(&self.title);
        writeln!(f, "<!DOCTYPE html>")?;
        writeln!(f, "<html>\n<head>")?;
        writeln!(f, "<meta charset=\"utf-8\">")?;
        writeln!(
            f,
            "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">"
        )?;
        writeln!(f, "<title>{title}</title>")?;
        writeln!(f, "<style>{STYLE}</style>")?;
        writeln!(f, "</head>\n<body>")?;
        writeln!(f, "<h1>{title}</h1>")?;
        writeln!(
            f,
            "<p><a href=\"{}\">.tar.gz</a> <a href=\"{}\">.zip</a></p>",
            html_escape(&self.tar_gz_url),
            html_escape(&self.zip_url)
        )?;

        writeln!(f, "<table>")?;
        writeln!(
            f,
            "<thead><tr><th>Name</th><th>Size</th><th>Bytes</th></tr></thead>"
        )?;
        writeln!(f, "<tbody>")?;
        for entry in &self.entries {
            let (size, bytes) = if entry.is_dir {
                ("-".to_string(), "-".to_string())
            } else {
                (
                    FileSize(entry.size_bytes).to_string(),
                    entry.size_bytes.to_string(),
                )
            };
            writeln!(
                f,
                "<tr><td><a href=\"{}\">{}</a></td><td class=\"size\">{}</td><td class=\"size\">{}</td></tr>",
                html_escape(&entry.child_url),
                html_escape(&entry.display_name()),
                size,
                bytes
            )?;
        }
        writeln!(f, "</tbody>\n</table>")?;

        if let Some(upload_url) = &self.upload_url {
            writeln!(
                f,
                "<form method=\"post\" action=\"{}\" enctype=\"multipart/form-data\">",
                html_escape(upload_url)
            )?;
            writeln!(
                f,
                "<input type=\"file\" name=\"{UPLOAD_FIELD}\" required> <input type=\"submit\" value=\"Upload\">"
            )?;
            writeln!(f, "</form>")?;
        }

        writeln!(f, "</body>\n</html>")
    }
}

/// Read `dir` and render it as an HTML page.
pub fn render(dir: &Path, mount_root: &Path, uri: &Uri, allow_upload: bool) -> io::Result<String> {
    Ok(Listing::read(dir, mount_root, uri, allow_upload)?.to_string())
}
