//! HTTP surface for the shared variant.
//!
//! Every response carries the caller's effective identity in the
//! `x-coupon-token` header. A missing or malformed token is replaced with a
//! fresh one rather than rejected.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use axum_server::Handle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use couponbot_common::models::{CouponDefinition, IdentityToken};
use couponbot_core::eventbus::{CouponEvent, EventBus};
use couponbot_core::identity::resolve_presented;
use couponbot_core::services::{CouponGrant, CouponService, GrantStatus};
use couponbot_core::{ClaimFailure, Error};

pub const TOKEN_HEADER: &str = "x-coupon-token";

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CouponService>,
    pub event_bus: Arc<EventBus>,
}

#[derive(Debug, Serialize)]
struct GrantView {
    status: GrantStatus,
    coupon: CouponDefinition,
    claimed_at: DateTime<Utc>,
    available_again_at: DateTime<Utc>,
    cooldown_remaining_ms: u64,
    cooldown_remaining: String,
}

impl GrantView {
    fn new(grant: CouponGrant, cooldown: Duration) -> Self {
        Self {
            status: grant.status,
            available_again_at: grant.available_again_at(cooldown),
            claimed_at: grant.claim.claimed_at,
            cooldown_remaining_ms: grant.cooldown_remaining.as_millis() as u64,
            cooldown_remaining: grant.formatted_remaining(),
            coupon: grant.coupon,
        }
    }
}

/// Maps the claim failure taxonomy onto status codes.
struct ApiError(ClaimFailure);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ClaimFailure::NoCouponsAvailable => StatusCode::NOT_FOUND,
            ClaimFailure::InvalidIdentity => StatusCode::BAD_REQUEST,
            ClaimFailure::TransientFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = json!({
            "error": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        });
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/coupon", get(current_coupon).post(request_coupon))
        .route("/api/coupon/events", get(coupon_events))
        .route("/api/identity", post(new_identity))
        .route("/api/health", get(health))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Serve until Ctrl+C, then drain in-flight requests.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<(), Error> {
    let event_bus = state.event_bus.clone();
    let app = router(state);

    let handle = Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl+C received; shutting down"),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        // Ends open event streams.
        event_bus.shutdown();
        shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    info!("Coupon API listening on http://{}", addr);
    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    info!("Coupon API shut down.");
    Ok(())
}

fn presented_token(headers: &HeaderMap) -> IdentityToken {
    let raw = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok());
    resolve_presented(raw).token
}

/// First hop of `X-Forwarded-For`, else the socket peer.
fn client_ip(req: &Request) -> Option<String> {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn with_token(token: &IdentityToken, response: impl IntoResponse) -> Response {
    ([(TOKEN_HEADER, token.to_string())], response).into_response()
}

async fn current_coupon(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let token = presented_token(&headers);
    let cooldown = state.service.config().cooldown;
    match state.service.current_claim(&token).await {
        Ok(Some(grant)) => with_token(&token, Json(json!({ "claim": GrantView::new(grant, cooldown) }))),
        Ok(None) => with_token(&token, Json(json!({ "claim": null }))),
        Err(e) => with_token(&token, ApiError(e)),
    }
}

async fn request_coupon(State(state): State<AppState>, req: Request) -> Response {
    let token = presented_token(req.headers());
    let ip = client_ip(&req);
    let cooldown = state.service.config().cooldown;
    match state.service.request_coupon(&token, ip).await {
        Ok(grant) => {
            let status = if grant.is_new() { StatusCode::CREATED } else { StatusCode::OK };
            with_token(&token, (status, Json(GrantView::new(grant, cooldown))))
        }
        Err(e) => with_token(&token, ApiError(e)),
    }
}

async fn new_identity(State(state): State<AppState>) -> Response {
    let token = IdentityToken::generate();
    state.event_bus.publish(CouponEvent::IdentityReset).await;
    with_token(&token, Json(json!({ "token": token })))
}

/// Pushes `claim.recorded` for the caller's identity until the server shuts down.
async fn coupon_events(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let token = presented_token(&headers);
    let watched = token.clone();
    let rx = state.event_bus.subscribe(None).await;
    let bus = state.event_bus.clone();
    let closed = async move { bus.closed().await };

    let events = ReceiverStream::new(rx).filter_map(move |event| {
        if !event.concerns(&watched) {
            return None;
        }
        let payload = match &event {
            CouponEvent::ClaimRecorded(claim) => json!({
                "coupon_code": claim.coupon_code,
                "claimed_at": claim.claimed_at,
            }),
            _ => json!({}),
        };
        Some(Event::default().event(event.event_type()).json_data(payload))
    });
    let stream = futures_util::StreamExt::take_until(events, closed);

    with_token(&token, Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn health(State(state): State<AppState>) -> Response {
    let policy = state.service.engine().policy().to_string();
    match state.service.pool_status().await {
        Ok(pool) => Json(json!({ "status": "ok", "policy": policy, "pool": pool })).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}
