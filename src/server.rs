//! HTTP/1 listener for the proxy port

use crate::proxy::CacheProxy;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Proxy listener
pub struct ProxyServer {
    listener: TcpListener,
    proxy: CacheProxy,
}

impl ProxyServer {
    /// Bind the listener
    ///
    /// Failing to bind is fatal at startup, so the raw IO error is returned.
    pub async fn bind(addr: SocketAddr, proxy: CacheProxy) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(ProxyServer { listener, proxy })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the task is dropped
    ///
    /// Each connection is served on its own task. Accept errors are logged
    /// and the loop continues.
    pub async fn serve(self) -> io::Result<()> {
        info!("Proxy listening on http://{}", self.listener.local_addr()?);

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    continue;
                }
            };
            debug!("Accepted connection from {}", peer);

            let io = TokioIo::new(stream);
            let proxy = self.proxy.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let proxy = proxy.clone();
                    async move { Ok::<_, Infallible>(proxy.handle(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Error serving connection from {}: {:?}", peer, err);
                }
            });
        }
    }
}
