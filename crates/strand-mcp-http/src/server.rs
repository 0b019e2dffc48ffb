//! Hyper glue: bind a TCP listener and drive the endpoint handler.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::service::StreamableHttpService;

/// Serve the endpoint until the listener fails. One task per connection;
/// HTTP/1.1 keep-alive carries the SSE streams.
pub async fn serve(
    service: Arc<StreamableHttpService>,
    addr: SocketAddr,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "streamable HTTP endpoint listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let handler = service_fn(move |req| {
                let service = Arc::clone(&service);
                async move { Ok::<_, Infallible>(service.handle_request(req).await) }
            });
            if let Err(err) = http1::Builder::new().serve_connection(io, handler).await {
                debug!(peer = %peer, error = %err, "connection ended");
            }
        });
    }
}
