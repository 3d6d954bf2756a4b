//! Mapping of request URL paths onto paths under a mount root.
//!
//! Resolution is purely lexical: the remainder of the URL after the mount
//! prefix is cleaned as if it were rooted, so `..` can never climb above the
//! mount, and only then joined onto the mount root.

use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};

/// Resolve `request_path` (already percent-decoded) to a filesystem path under
/// `mount_root`.
///
/// The mount prefix is stripped in both its `prefix` and `/prefix` spellings,
/// `/` and `\` are both treated as separators, and `.`/`..`/empty segments are
/// cleaned before joining. The result always has `mount_root` as a prefix.
pub fn resolve(mount_prefix: &str, mount_root: &Path, request_path: &str) -> PathBuf {
    let request_path: Cow<'_, str> = if request_path.starts_with('/') {
        Cow::Borrowed(request_path)
    } else {
        Cow::Owned(format!("/{request_path}"))
    };

    let remainder = strip_mount_prefix(&request_path, mount_prefix);

    let mut result = mount_root.to_path_buf();
    for segment in clean_segments(remainder) {
        result.push(segment);
    }
    result
}

fn strip_mount_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    let path = path.strip_prefix(prefix).unwrap_or(path);
    let slashed = format!("/{prefix}");
    path.strip_prefix(slashed.as_str()).unwrap_or(path)
}

/// Lexically clean a URL remainder into the segments to append to a root.
fn clean_segments(remainder: &str) -> Vec<&str> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in remainder.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            name if is_plain_name(name) => segments.push(name),
            // Drive prefixes and the like on hosts that have them
            _ => {}
        }
    }
    segments
}

fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Percent-decode a raw URL path. Invalid UTF-8 is replaced lossily.
pub fn decode_url_path(raw: &str) -> String {
    let bytes = urlencoding::decode_binary(raw.as_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Lexically normalize `path`: drop `.`, fold `..` into its parent and never
/// climb above the root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => result.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match result.components().next_back() {
                Some(Component::Normal(_)) => {
                    result.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                None | Some(Component::ParentDir) | Some(Component::CurDir) => {
                    result.push("..")
                }
            },
            Component::Normal(name) => result.push(name),
        }
    }
    if result.as_os_str().is_empty() {
        result.push(".");
    }
    result
}
