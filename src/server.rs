use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::ConnectInfo, Router};
use hyper::{body::Incoming, server::conn::http1, service::service_fn, Request};
use hyper_util::rt::TokioIo;
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, error, info};

/// Serve `app` over plain HTTP until the listener fails.
pub async fn serve(listener: TcpListener, app: Router) -> io::Result<()> {
    info!(
        "{} listening on {}",
        env!("CARGO_PKG_NAME"),
        listener.local_addr()?
    );
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

/// Serve `app` over HTTPS. Each accepted connection is handshaked and served
/// on its own task; handshake and connection errors only end that connection.
pub async fn serve_tls(
    listener: TcpListener,
    app: Router,
    tls_config: Arc<ServerConfig>,
) -> io::Result<()> {
    info!(
        "{} listening on {} (HTTPS)",
        env!("CARGO_PKG_NAME"),
        listener.local_addr()?
    );
    let acceptor = TlsAcceptor::from(tls_config);

    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Accept error: {}", e);
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!("TLS handshake with {} failed: {}", remote_addr, e);
                    return;
                }
            };

            let service = service_fn(move |mut req: Request<Incoming>| {
                req.extensions_mut().insert(ConnectInfo(remote_addr));
                app.clone().oneshot(req)
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Connection from {} ended with error: {}", remote_addr, e);
            }
        });
    }
}
