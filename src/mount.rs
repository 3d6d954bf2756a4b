use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StartupError;
use crate::resolve::normalize;

/// A URL prefix bound to a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// URL prefix, usually `/name/`
    pub route: String,
    /// Absolute filesystem root served under `route`
    pub root: PathBuf,
    pub allow_upload: bool,
}

impl Mount {
    pub fn new(route: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            route: route.into(),
            root: root.into(),
            allow_upload: false,
        }
    }

    pub fn with_uploads(mut self, allow_upload: bool) -> Self {
        self.allow_upload = allow_upload;
        self
    }
}

impl From<RouteSpec> for Mount {
    fn from(spec: RouteSpec) -> Self {
        Mount::new(spec.route, spec.path)
    }
}

/// One `ROUTE=PATH` (or bare `PATH`) argument.
///
/// The route is normalized to `/<route>/` and defaults to the base name of
/// the path; the path is made absolute against the current directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RouteSpec {
    pub route: String,
    pub path: PathBuf,
}

impl RouteSpec {
    /// Parse `spec`, resolving relative paths against `cwd`.
    pub fn parse_in(spec: &str, cwd: &Path) -> Result<Self, StartupError> {
        let (route, path) = match spec.split_once('=') {
            Some((route, path)) => (Some(route), path),
            None => (None, spec),
        };
        if path.is_empty() {
            return Err(StartupError::InvalidRoute(spec.to_string()));
        }

        let path = normalize(&cwd.join(path));
        let route = match route {
            Some(route) => route.to_string(),
            None => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        Ok(Self {
            route: normalize_route(&route),
            path,
        })
    }

    /// The mount used when no routes are configured: the current directory
    /// under its own base name.
    pub fn current_dir() -> Result<Self, StartupError> {
        Self::parse_in(".", &std::env::current_dir()?)
    }
}

fn normalize_route(route: &str) -> String {
    let trimmed = route.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

impl FromStr for RouteSpec {
    type Err = StartupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_in(s, &std::env::current_dir()?)
    }
}

impl TryFrom<String> for RouteSpec {
    type Error = StartupError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RouteSpec> for String {
    fn from(spec: RouteSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={}",
            self.route.trim_matches('/'),
            self.path.display()
        )
    }
}
