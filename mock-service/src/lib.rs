use axum::{
    extract::{Path, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
#[allow(unused)]
use metrics::{counter, gauge, histogram};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
#[allow(unused)]
use tracing::{debug, info, warn};

pub mod prelude {
    pub use super::{router, run, spawn, Event, Location, Reservation, Seat, DEV_TOKEN};
}

/// Token accepted by [`run`] when no other token is configured.
pub const DEV_TOKEN: &str = "dev-token";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub name: String,
    pub location_id: String,
    pub event_date: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Location {
    pub id: String,
    pub name: String,
    pub capacity: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub zone_number: i32,
    pub row: i32,
    pub column: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub event_id: String,
    pub total_price: f64,
    pub seats: Vec<Seat>,
}

struct AppState {
    token: String,
    events: Vec<Event>,
    locations: Vec<Location>,
    reservations: AtomicU64,
}

/// Ticketing gateway double. `/v1` routes require `Authorization: Bearer <token>`; the
/// `/flaky` and `/delay` routes are open.
pub fn router(token: &str) -> Router {
    let state = Arc::new(AppState {
        token: token.to_string(),
        events: fixture_events(),
        locations: fixture_locations(),
        reservations: AtomicU64::new(0),
    });

    let v1 = Router::new()
        .route("/events", get(list_events))
        .route("/events/:id", get(get_event))
        .route("/locations", get(list_locations))
        .route("/locations/:id", get(get_location))
        .route("/reservations", post(reserve))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));

    // Detail paths as some load scripts call them, without the version prefix.
    let legacy = Router::new()
        .route("/events/:id", get(get_event))
        .route("/locations/:id", get(get_location))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .nest("/v1", v1)
        .merge(legacy)
        .route("/flaky/:failure_ppm", get(flaky))
        .route("/delay/ms/:delay_ms", get(delay))
        .route("/latency/ms/:mean_ms", get(latency))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the process exits.
pub async fn run(addr: SocketAddr, token: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Mock service listening on {}", listener.local_addr()?);
    axum::serve(listener, router(token)).await?;
    Ok(())
}

/// Bind `addr` (port `0` picks a free one) and serve in the background.
pub async fn spawn(addr: SocketAddr, token: &str) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local = listener.local_addr()?;
    let app = router(token);
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            warn!("Mock service stopped: {err}");
        }
    });
    debug!("Mock service listening on {local}");
    Ok(local)
}

async fn authenticate(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == state.token);

    if authorized {
        next.run(request).await
    } else {
        counter!("mock-service.unauthorized").increment(1);
        (StatusCode::UNAUTHORIZED, "missing or invalid bearer token").into_response()
    }
}

async fn list_events(State(state): State<Arc<AppState>>) -> Json<Vec<Event>> {
    counter!("mock-service.events").increment(1);
    Json(state.events.clone())
}

async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Event>, StatusCode> {
    counter!("mock-service.events").increment(1);
    state
        .events
        .iter()
        .find(|e| e.id == id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn list_locations(State(state): State<Arc<AppState>>) -> Json<Vec<Location>> {
    counter!("mock-service.locations").increment(1);
    Json(state.locations.clone())
}

async fn get_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Location>, StatusCode> {
    counter!("mock-service.locations").increment(1);
    state
        .locations
        .iter()
        .find(|l| l.id == id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn reserve(
    State(state): State<Arc<AppState>>,
    Json(reservation): Json<Reservation>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if reservation.seats.is_empty() || !state.events.iter().any(|e| e.id == reservation.event_id) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let n = state.reservations.fetch_add(1, Ordering::Relaxed);
    counter!("mock-service.reservations").increment(1);
    Ok(Json(serde_json::json!({ "id": format!("rsv-{n:08}") })))
}

/// Responds 500 with probability `failure_ppm / 1_000_000`.
async fn flaky(Path(failure_ppm): Path<u32>) -> StatusCode {
    let roll = rand::thread_rng().gen_range(0..1_000_000);
    if roll < failure_ppm {
        counter!("mock-service.flaky.errors").increment(1);
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

async fn delay(Path(delay_ms): Path<u64>) {
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
}

/// Normally distributed latency around `mean_ms` with a 10% standard deviation.
async fn latency(Path(mean_ms): Path<f64>) -> Result<(), StatusCode> {
    let normal = Normal::new(mean_ms, mean_ms * 0.1).map_err(|_| StatusCode::BAD_REQUEST)?;
    let ms = normal.sample(&mut rand::thread_rng()).max(0.);
    histogram!("mock-service.latency").record(ms);
    tokio::time::sleep(Duration::from_secs_f64(ms / 1_000.)).await;
    Ok(())
}

fn fixture_events() -> Vec<Event> {
    [
        ("b1a9d6b7-23f4-4b95-92f1-3a5e4f57e9aa", "Summer Sonic", "loc-1"),
        ("0c5e2a44-7f0d-4b1e-9a53-2d8e6b1c7f10", "Jazz Night", "loc-2"),
        ("7d3f9b12-1c6a-4e8f-b2d4-5a9c0e3f6b21", "Indie Showcase", "loc-1"),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, (id, name, location))| Event {
        id: id.to_string(),
        name: name.to_string(),
        location_id: location.to_string(),
        event_date: format!("2026-0{}-15T19:00:00Z", i + 6),
    })
    .collect()
}

fn fixture_locations() -> Vec<Location> {
    vec![
        Location {
            id: "loc-1".to_string(),
            name: "Main Arena".to_string(),
            capacity: 12_000,
        },
        Location {
            id: "loc-2".to_string(),
            name: "Riverside Hall".to_string(),
            capacity: 800,
        },
    ]
}
