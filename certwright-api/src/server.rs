//! HTTP-01 responder server

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use certwright_core::{Error, Result};
use certwright_tls::ChallengeTokenStore;

use crate::handlers;

/// Pause after a failed accept so descriptor exhaustion does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// 🎯 Answers the authority's `/.well-known/acme-challenge/` validation requests
pub struct ChallengeServer {
    listener: TcpListener,
    store: Arc<ChallengeTokenStore>,
}

impl ChallengeServer {
    /// Bind the listening socket; nothing is served until [`serve`](Self::serve)
    pub async fn bind(addr: SocketAddr, store: Arc<ChallengeTokenStore>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Server(format!("Failed to bind challenge responder on {}: {}", addr, e)))?;

        Ok(Self { listener, store })
    }

    /// Actual bound address (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the task is dropped
    pub async fn serve(self) -> Result<()> {
        self.serve_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves
    pub async fn serve_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let addr = self.local_addr()?;
        tracing::info!("🎯 Challenge responder listening on http://{}", addr);

        tokio::pin!(shutdown);
        loop {
            let (stream, _) = tokio::select! {
                accepted = next_connection(|| self.listener.accept()) => accepted,
                _ = &mut shutdown => break,
            };

            let io = TokioIo::new(stream);
            let store = self.store.clone();

            tokio::task::spawn(async move {
                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service_fn(move |req| handle_request(req, store.clone())))
                    .await
                {
                    tracing::debug!("Error serving connection: {:?}", err);
                }
            });
        }

        tracing::info!("🛑 Challenge responder on {} stopped", addr);
        Ok(())
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    store: Arc<ChallengeTokenStore>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    Ok(handlers::route(req.method(), req.uri().path(), &store))
}

/// Accept the next connection, backing off after each failure
async fn next_connection<T, F, Fut>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(connection) => return connection,
            Err(e) => {
                tracing::warn!("Challenge responder accept error: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}
