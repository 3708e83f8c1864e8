//! HTTP server for the deal relay.
//!
//! Routes:
//! - `POST /send-deal`: relay a deal to the WhatsApp group(s)
//! - `GET /health`: session readiness
//! - `GET /metrics`: Prometheus metrics

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::context::AppContext;
use crate::deal::Deal;
use crate::error::{Error, Result};
use crate::{metrics, relay};

pub const SEND_DEAL_PATH: &str = "/send-deal";
pub const HEALTH_PATH: &str = "/health";
pub const METRICS_PATH: &str = "/metrics";

#[derive(Debug, Deserialize)]
struct SendDealRequest {
    #[serde(default)]
    deal: Option<Value>,
}

/// Extract the deal from a `{"deal": {...}}` body.
pub fn parse_deal(body: &[u8]) -> Result<Deal> {
    let request: SendDealRequest =
        serde_json::from_slice(body).map_err(|_| Error::MissingDeal)?;
    match request.deal {
        Some(deal @ Value::Object(_)) => {
            serde_json::from_value(deal).map_err(|_| Error::MissingDeal)
        }
        _ => Err(Error::MissingDeal),
    }
}

fn json_response(status: StatusCode, body: Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}

fn error_response(err: &Error) -> Response<Full<Bytes>> {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, json!({ "error": err.to_string() }))
}

async fn send_deal(ctx: &AppContext, body: &[u8]) -> Response<Full<Bytes>> {
    if ctx.session().await.is_none() {
        return error_response(&Error::NotReady);
    }

    let deal = match parse_deal(body) {
        Ok(deal) => deal,
        Err(e) => return error_response(&e),
    };

    match relay::relay_deal(ctx, &deal).await {
        Ok(sent_to) => json_response(
            StatusCode::OK,
            json!({ "success": true, "sent_to": sent_to }),
        ),
        Err(e) => {
            error!(error = %e, "Error sending message");
            error_response(&e)
        }
    }
}

async fn health(ctx: &AppContext) -> Response<Full<Bytes>> {
    let readiness = ctx.readiness();
    json_response(
        StatusCode::OK,
        json!({
            "status": readiness.as_str(),
            "error": readiness.error(),
            "target_group": ctx.target_group().await,
            "started_at": ctx.started_at().to_rfc3339(),
            "uptime_secs": ctx.uptime_secs(),
        }),
    )
}

fn metrics_response() -> Response<Full<Bytes>> {
    match metrics::render() {
        Ok((content_type, buffer)) => {
            let mut response = Response::new(Full::from(buffer));
            if let Ok(value) = header::HeaderValue::from_str(&content_type) {
                response.headers_mut().insert(header::CONTENT_TYPE, value);
            }
            response
        }
        Err(err) => {
            error!("Failed to encode metrics: {}", err);
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "encode error" }),
            )
        }
    }
}

fn route_label(path: &str) -> &'static str {
    match path {
        SEND_DEAL_PATH => SEND_DEAL_PATH,
        HEALTH_PATH => HEALTH_PATH,
        METRICS_PATH => METRICS_PATH,
        _ => "other",
    }
}

/// Dispatch one request. Independent of the connection so it can be tested directly.
pub async fn route(
    ctx: &AppContext,
    method: &Method,
    path: &str,
    body: Bytes,
) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::POST, SEND_DEAL_PATH) => send_deal(ctx, &body).await,
        (&Method::GET, HEALTH_PATH) => health(ctx).await,
        (&Method::GET, METRICS_PATH) => metrics_response(),
        (_, SEND_DEAL_PATH | HEALTH_PATH | METRICS_PATH) => json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            json!({ "error": "Method not allowed" }),
        ),
        _ => json_response(StatusCode::NOT_FOUND, json!({ "error": "Not found" })),
    }
}

fn unreadable_body(path: &str) -> Response<Full<Bytes>> {
    if path == SEND_DEAL_PATH {
        return error_response(&Error::MissingDeal);
    }
    json_response(
        StatusCode::BAD_REQUEST,
        json!({ "error": "Unreadable request body" }),
    )
}

async fn handle_request(
    ctx: Arc<AppContext>,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match req.into_body().collect().await {
        Ok(collected) => route(&ctx, &method, &path, collected.to_bytes()).await,
        Err(err) => {
            warn!("Failed to read request body: {}", err);
            unreadable_body(&path)
        }
    };

    let status = response.status().as_u16();
    metrics::record_request(route_label(&path), status, start.elapsed());
    info!(status, elapsed_ms = start.elapsed().as_millis() as u64, "Request handled");
    Ok(response)
}

/// Accept connections until the listener fails.
pub async fn serve(listener: TcpListener, ctx: Arc<AppContext>) -> Result<()> {
    metrics::init_collectors();
    let addr = listener.local_addr()?;
    info!(%addr, "WhatsApp deal relay listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let ctx = ctx.clone();
                let span = info_span!(
                    "request",
                    id = %Uuid::new_v4(),
                    method = %req.method(),
                    path = %req.uri().path(),
                );
                handle_request(ctx, req).instrument(span)
            });
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(?peer, "Connection error: {}", err);
            }
        });
    }
}

/// Bind the listener and serve on a background task.
pub async fn spawn_server(
    addr: SocketAddr,
    ctx: Arc<AppContext>,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        if let Err(err) = serve(listener, ctx).await {
            error!(%local, "Relay server failed: {}", err);
        }
    });
    Ok((local, handle))
}
