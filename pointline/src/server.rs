use std::future::{ready, Future};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use futures::StreamExt;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::api::ServiceError;
use crate::config::Config;
use crate::handler::PayloadHandler;
use crate::prometheus::{report_connection_closed, report_connection_opened, setup_metrics_recorder};

async fn index() -> &'static str {
    "pointline"
}

async fn liveness() -> &'static str {
    "ok"
}

pub fn admin_router(metrics: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/", get(index))
        .route("/_liveness", get(liveness))
        .layer(TraceLayer::new_for_http());

    // Don't install metrics unless asked to
    // Installing a global recorder when pointline is used as a library (during tests etc)
    // does not work well.
    match metrics {
        Some(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        None => router,
    }
}

/// Accepts line protocol connections on `listener` until `shutdown`
/// resolves, then waits for open connections to wind down.
pub async fn serve<F>(
    config: Config,
    listener: TcpListener,
    admin_listener: TcpListener,
    handler: Arc<PayloadHandler>,
    shutdown: F,
) -> Result<(), ServiceError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics = match config.export_prometheus {
        true => Some(setup_metrics_recorder()?),
        false => None,
    };

    let token = CancellationToken::new();
    let admin = {
        let token = token.clone();
        tokio::spawn(async move {
            axum::serve(admin_listener, admin_router(metrics))
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        })
    };

    info!("listening on {:?}", listener.local_addr());

    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, remote_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                        continue;
                    }
                };
                connections.spawn(handle_connection(
                    socket,
                    remote_addr,
                    handler.clone(),
                    config.max_line_length,
                    token.clone(),
                ));
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    token.cancel();
    while connections.join_next().await.is_some() {}

    match admin.await {
        Ok(result) => result.map_err(ServiceError::AdminServer),
        Err(e) => Err(ServiceError::AdminServer(io::Error::new(io::ErrorKind::Other, e))),
    }
}

async fn handle_connection(
    socket: TcpStream,
    remote_addr: SocketAddr,
    handler: Arc<PayloadHandler>,
    max_line_length: usize,
    shutdown: CancellationToken,
) {
    report_connection_opened();
    let remote = remote_addr.ip().to_string();
    let codec = AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), max_line_length);
    let mut frames = FramedRead::new(socket, codec);

    loop {
        let frame = tokio::select! {
            frame = frames.next() => frame,
            _ = shutdown.cancelled() => None,
        };
        match frame {
            Some(Ok(payload)) => handler.ingest(&payload, Some(&remote)),
            Some(Err(e)) => {
                handler.handle_transport_error(&e, Some(&remote));
                break;
            }
            None => break,
        }
    }

    debug!(remote = %remote, "connection closed");
    report_connection_closed();
}
