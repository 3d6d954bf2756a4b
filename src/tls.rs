use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};

use crate::config::TlsFiles;
use crate::error::StartupError;

fn open(path: &Path) -> Result<BufReader<File>, StartupError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| StartupError::Tls(format!("failed to open {}: {}", path.display(), e)))
}

pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, StartupError> {
    let certs = certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StartupError::Tls(format!("failed to parse {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(StartupError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, StartupError> {
    private_key(&mut open(path)?)
        .map_err(|e| StartupError::Tls(format!("failed to parse {}: {}", path.display(), e)))?
        .ok_or_else(|| StartupError::Tls(format!("no private key found in {}", path.display())))
}

/// HTTP/1.1 server config for the given PEM certificate chain and key.
pub fn server_config(files: &TlsFiles) -> Result<Arc<ServerConfig>, StartupError> {
    let certs = load_certs(&files.cert)?;
    let key = load_private_key(&files.key)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| StartupError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| StartupError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}
