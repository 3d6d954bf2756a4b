//! Ad-hoc HTTP file server.
//!
//! Serves local directories under URL prefixes with HTML directory listings,
//! on-the-fly tar.gz/zip downloads of whole subtrees and optional uploads.
//! It can be used as a standalone binary or embedded in another application.

pub mod archive;
pub mod config;
pub mod error;
pub mod handler;
pub mod listing;
pub mod mount;
pub mod resolve;
pub mod routes;
pub mod server;
pub mod tls;
pub mod upload;

use axum::Router;

pub use config::Config;
pub use error::{FileServerError, StartupError};
pub use handler::FileHandler;
pub use mount::{Mount, RouteSpec};
pub use routes::RouteTable;

/// Build the router serving `mounts` with the tuning from `config`.
pub fn app(mounts: Vec<Mount>, config: &Config) -> Result<Router, StartupError> {
    let handlers = mounts
        .into_iter()
        .map(|mount| FileHandler::new(mount).with_upload_limit(config.max_upload_size))
        .collect();
    Ok(RouteTable::new(handlers, &config.root_route)?.into_router())
}
