//! HTTP server for Prometheus metrics and health checks.
//!
//! Exposes:
//! - GET /metrics - Prometheus-format metrics
//! - GET /health - Health check endpoint
//! - GET /ready - Readiness check endpoint

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, error, info};
use metrics::Metrics;
use tokio::net::TcpListener;

use crate::error::ServerError;

/// HTTP metrics server configuration
pub struct HttpMetricsServer {
    node_id: String,
    metrics: Arc<Metrics>,
    addr: String,
}

impl HttpMetricsServer {
    pub fn new(node_id: impl Into<String>, metrics: Arc<Metrics>, addr: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            metrics,
            addr: addr.into(),
        }
    }

    /// Start the HTTP metrics server
    pub async fn start(self) -> Result<(), ServerError> {
        let addr: SocketAddr = self
            .addr
            .parse()
            .map_err(|e| ServerError::InvalidAddr(format!("{}: {}", self.addr, e)))?;
        let listener = TcpListener::bind(addr).await?;

        info!("HTTP metrics server listening on http://{}", addr);
        info!("  - GET /metrics  - Prometheus metrics");
        info!("  - GET /health   - Health check");
        info!("  - GET /ready    - Readiness check");

        let node_id = Arc::new(self.node_id);
        let metrics = self.metrics;

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept HTTP connection: {}", e);
                    continue;
                }
            };

            let io = TokioIo::new(stream);
            let node_id = node_id.clone();
            let metrics = metrics.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let node_id = node_id.clone();
                    let metrics = metrics.clone();
                    async move { handle_request(req, node_id, metrics).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("HTTP connection error from {}: {}", remote_addr, e);
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    node_id: Arc<String>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let prometheus_metrics = metrics.render();
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(prometheus_metrics)))
                .unwrap()
        }
        (&Method::GET, "/health") => {
            let body = format!(r#"{{"status":"healthy","node_id":"{}"}}"#, node_id);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(Full::new(Bytes::from(body)))
                .unwrap()
        }
        (&Method::GET, "/ready") => {
            let body = r#"{"status":"ready"}"#;
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(Full::new(Bytes::from(body)))
                .unwrap()
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(r#"{"error":"not found"}"#)))
            .unwrap(),
    };

    Ok(response)
}
