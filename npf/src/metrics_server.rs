//! The `/metrics` HTTP endpoint, grounded on the teacher's
//! `telemetry::server::start_observability_server`: a `hyper`/`hyper-util`
//! service accepting connections on the binary's own tokio runtime.
//! `npf-core` builds the `prometheus::Registry` (see
//! `npf_core::telemetry::init_metrics`) but never serves it — serving
//! needs an async runtime, and the dataplane core stays synchronous
//! (§4.10, §5).

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

type RespBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn text_body(status: StatusCode, body: Vec<u8>, content_type: &str) -> Response<RespBody> {
    let body = Full::new(Bytes::from(body)).map_err(|never| match never {}).boxed();
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        content_type.parse().expect("static content-type is valid"),
    );
    resp
}

fn handle_metrics(registry: &Registry) -> Response<RespBody> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => text_body(StatusCode::OK, buffer, encoder.format_type()),
        Err(e) => {
            warn!(error = %e, "metrics encode error");
            text_body(StatusCode::INTERNAL_SERVER_ERROR, Vec::new(), "text/plain")
        }
    }
}

/// Runs the `/metrics` endpoint on `port` until the process exits.
/// Intended to be `tokio::spawn`ed from the binary's own runtime; never
/// called from a dataplane worker thread.
pub async fn start_metrics_server(
    port: u16,
    registry: Registry,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let registry = Arc::new(registry);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(?addr, "metrics server listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "metrics server: accept error");
                continue;
            }
        };

        let registry = registry.clone();
        tokio::spawn(async move {
            let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                let registry = registry.clone();
                async move {
                    let resp = if req.uri().path() == "/metrics" {
                        handle_metrics(&registry)
                    } else {
                        text_body(StatusCode::NOT_FOUND, Vec::new(), "text/plain")
                    };
                    Ok::<_, hyper::Error>(resp)
                }
            });

            let builder = ConnBuilder::new(TokioExecutor::new());
            if let Err(e) = builder.serve_connection(TokioIo::new(stream), svc).await {
                warn!(?peer, error = %e, "metrics server: serve_connection error");
            }
        });
    }
}
