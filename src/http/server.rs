//! HTTP listeners for the gateway and the admin endpoints.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::admin::admin_router;
use super::admission::{admission_middleware, panic_response, Admission};
use super::proxy::{forward, UpstreamProxy};
use crate::error::Result;

/// Router for the gateway listener: admission in front of the upstream proxy.
pub fn gateway_router(admission: Arc<Admission>, proxy: Arc<UpstreamProxy>) -> Router {
    Router::new()
        .fallback(forward)
        .with_state(proxy)
        .layer(from_fn_with_state(admission, admission_middleware))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
}

/// The gateway and admin listeners, served together.
pub struct GatewayServer {
    listen_addr: SocketAddr,
    admin_addr: SocketAddr,
    gateway: Router,
    admin: Router,
}

impl GatewayServer {
    pub fn new(
        listen_addr: SocketAddr,
        admin_addr: SocketAddr,
        admission: Arc<Admission>,
        proxy: Arc<UpstreamProxy>,
    ) -> Self {
        Self {
            listen_addr,
            admin_addr,
            gateway: gateway_router(admission.clone(), proxy),
            admin: admin_router(admission),
        }
    }

    /// Bind both listeners and serve until `signal` resolves.
    ///
    /// In-flight requests on both listeners are drained before returning.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(self.listen_addr).await?;
        let admin_listener = TcpListener::bind(self.admin_addr).await?;

        serve_listeners(listener, admin_listener, self.gateway, self.admin, signal).await
    }
}

/// Serve already-bound listeners until `signal` resolves.
pub async fn serve_listeners<F>(
    listener: TcpListener,
    admin_listener: TcpListener,
    gateway: Router,
    admin: Router,
    signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    info!(addr = %listener.local_addr()?, "Gateway listening");
    info!(addr = %admin_listener.local_addr()?, "Admin endpoints listening");

    let (stop_tx, stop_rx) = watch::channel(false);

    let trigger = async move {
        signal.await;
        let _ = stop_tx.send(true);
        Ok::<(), std::io::Error>(())
    };
    let gateway = axum::serve(listener, gateway)
        .with_graceful_shutdown(stopped(stop_rx.clone()))
        .into_future();
    let admin = axum::serve(admin_listener, admin)
        .with_graceful_shutdown(stopped(stop_rx))
        .into_future();

    tokio::try_join!(trigger, gateway, admin).map_err(|e| {
        error!(error = %e, "HTTP server failed");
        e
    })?;

    info!("Listeners drained");
    Ok(())
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
