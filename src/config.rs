use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StartupError;
use crate::mount::{Mount, RouteSpec};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen address; `:PORT` listens on all interfaces
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Port overriding the one in `addr`
    #[serde(default)]
    pub port: Option<u16>,

    /// Accept multipart uploads into served directories
    #[serde(default)]
    pub uploads: bool,

    /// Disable all log output
    #[serde(default)]
    pub quiet: bool,

    /// Path that redirects to the first mount unless a mount claims it
    #[serde(default = "default_root_route")]
    pub root_route: String,

    /// Mounted directories, as `ROUTE=PATH`
    #[serde(default)]
    pub routes: Vec<RouteSpec>,

    #[serde(default)]
    pub ssl_certificate: Option<PathBuf>,

    #[serde(default)]
    pub ssl_key: Option<PathBuf>,

    /// Maximum size of a single uploaded file (in bytes)
    #[serde(default)]
    pub max_upload_size: Option<u64>,
}

fn default_addr() -> String {
    ":8080".to_string()
}

fn default_root_route() -> String {
    "/".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            port: None,
            uploads: false,
            quiet: false,
            root_route: default_root_route(),
            routes: Vec::new(),
            ssl_certificate: None,
            ssl_key: None,
            max_upload_size: None,
        }
    }
}

/// Certificate and key files for HTTPS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, StartupError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// The socket address to listen on.
    pub fn listen_addr(&self) -> Result<SocketAddr, StartupError> {
        let invalid = |reason: String| StartupError::InvalidAddr {
            addr: self.addr.clone(),
            reason,
        };

        let host_port = if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        };

        let mut addr = host_port
            .to_socket_addrs()
            .map_err(|e| invalid(e.to_string()))?
            .next()
            .ok_or_else(|| invalid("address did not resolve".to_string()))?;

        if let Some(port) = self.port {
            addr.set_port(port);
        }
        Ok(addr)
    }

    /// Certificate and key, only when both are configured.
    pub fn tls(&self) -> Option<TlsFiles> {
        match (&self.ssl_certificate, &self.ssl_key) {
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert: cert.clone(),
                key: key.clone(),
            }),
            _ => None,
        }
    }

    /// The configured mounts, or the current directory when none are.
    pub fn mounts(&self) -> Result<Vec<Mount>, StartupError> {
        let specs = if self.routes.is_empty() {
            vec![RouteSpec::current_dir()?]
        } else {
            self.routes.clone()
        };

        Ok(specs
            .into_iter()
            .map(|spec| Mount::from(spec).with_uploads(self.uploads))
            .collect())
    }
}
