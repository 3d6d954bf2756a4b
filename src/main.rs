use std::path::PathBuf;

use clap::Parser;
use dirserve::{server, tls, Config, RouteSpec, StartupError};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "dirserve")]
#[command(about = "Serve local directories over HTTP with listings, archive downloads and uploads")]
#[command(version)]
struct Cli {
    /// Address to listen on (`:PORT` listens on all interfaces)
    #[arg(short, long, env = "ADDR")]
    addr: Option<String>,

    /// Port to listen on, overriding the port in --addr
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Accept file uploads into served directories
    #[arg(short, long, env = "UPLOADS")]
    uploads: bool,

    /// Disable all log output
    #[arg(short, long, env = "QUIET")]
    quiet: bool,

    /// Route to serve, as ROUTE=PATH or PATH (repeatable)
    #[arg(short = 'r', long = "route", value_name = "ROUTE=PATH")]
    routes: Vec<RouteSpec>,

    /// More routes, as ROUTE=PATH or PATH
    #[arg(value_name = "ROUTE=PATH")]
    paths: Vec<RouteSpec>,

    /// TLS certificate chain (PEM)
    #[arg(long = "ssl-cert", env = "SSL_CERTIFICATE")]
    ssl_cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long = "ssl-key", env = "SSL_KEY")]
    ssl_key: Option<PathBuf>,

    /// Config file path (optional)
    #[arg(short, long, env = "DIRSERVE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, env = "DIRSERVE_VERBOSE")]
    verbose: bool,
}

impl Cli {
    /// Layer command-line values over the config file.
    fn apply(self, mut config: Config) -> Config {
        if let Some(addr) = self.addr {
            config.addr = addr;
        }
        if self.port.is_some() {
            config.port = self.port;
        }
        config.uploads |= self.uploads;
        config.quiet |= self.quiet;
        config.routes.extend(self.routes);
        config.routes.extend(self.paths);
        if self.ssl_cert.is_some() {
            config.ssl_certificate = self.ssl_cert;
        }
        if self.ssl_key.is_some() {
            config.ssl_key = self.ssl_key;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    // Load config from file if provided, otherwise use defaults
    let file_config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    let config = cli.apply(file_config);

    if !config.quiet {
        let filter = if verbose {
            "dirserve=debug,tower_http=debug"
        } else {
            "dirserve=info,tower_http=info"
        };

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| filter.into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let mounts = config.mounts()?;
    for mount in &mounts {
        if !mount.root.exists() {
            return Err(StartupError::MissingRoot(mount.root.clone()).into());
        }
    }

    let addr = config.listen_addr()?;
    let tls_config = config
        .tls()
        .map(|files| tls::server_config(&files))
        .transpose()?;
    let app = dirserve::app(mounts, &config)?;

    let listener = TcpListener::bind(addr).await?;
    match tls_config {
        Some(tls_config) => server::serve_tls(listener, app, tls_config).await?,
        None => server::serve(listener, app).await?,
    }

    Ok(())
}
