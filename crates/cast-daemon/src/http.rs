use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use cast_core::CoreHandle;
use cast_proto::protocol::{Intent, UiState};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    core: CoreHandle,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    core: CoreHandle,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(core);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(core: CoreHandle) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/toggle/:station_id", post(toggle_station))
        .route("/api/volume/:percent", post(set_volume))
        .route("/api/sleep/:minutes", post(set_sleep))
        .route("/api/sleep", axum::routing::delete(cancel_sleep))
        .route("/api/error/dismiss", post(dismiss_error))
        .layer(CorsLayer::permissive())
        .with_state(HttpState { core })
}

async fn get_state(State(state): State<HttpState>) -> Json<UiState> {
    Json(state.core.state())
}

async fn send(state: &HttpState, intent: Intent) -> StatusCode {
    match state.core.intent(intent).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            error!("HTTP API: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn toggle_station(
    State(state): State<HttpState>,
    Path(station_id): Path<String>,
) -> StatusCode {
    info!("HTTP API: toggle {}", station_id);
    if state.core.state().station(&station_id).is_none() {
        return StatusCode::NOT_FOUND;
    }
    send(&state, Intent::PlayToggle { station_id }).await
}

async fn set_volume(State(state): State<HttpState>, Path(percent): Path<u32>) -> StatusCode {
    let value = (percent as f32 / 100.0).clamp(0.0, 1.0);
    info!("HTTP API: set volume to {}%", percent);
    send(&state, Intent::SetVolume { value }).await
}

async fn set_sleep(State(state): State<HttpState>, Path(minutes): Path<u32>) -> StatusCode {
    info!("HTTP API: sleep in {} min", minutes);
    send(
        &state,
        Intent::SetSleepTimer {
            minutes: Some(minutes),
        },
    )
    .await
}

async fn cancel_sleep(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: cancel sleep timer");
    send(&state, Intent::SetSleepTimer { minutes: None }).await
}

async fn dismiss_error(State(state): State<HttpState>) -> StatusCode {
    send(&state, Intent::DismissError).await
}
