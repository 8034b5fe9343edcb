use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{sse::Event as SseEvent, Html, Json, Sse},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, error, warn};

use super::events::MapEvent;
use super::state::AppState;
use crate::constants::HEARTBEAT_SECS;
use crate::controller::Sighting;
use crate::error::SightingError;
use crate::geo::{Coordinate, Region, Span};
use crate::html_template;
use crate::permission::AuthorizationStatus;
use crate::settings::Settings;
use crate::viewport::{Annotation, AnnotationView, ViewportSnapshot};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn index_error_status(e: &SightingError) -> StatusCode {
    match e {
        SightingError::Index(inner) if inner.is_transient() => StatusCode::BAD_GATEWAY,
        SightingError::Index(_) => StatusCode::BAD_REQUEST,
        SightingError::MalformedKey { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// Structures for API requests and responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ViewportResponse {
    #[serde(flatten)]
    pub viewport: ViewportSnapshot,
    pub indexed_sightings: usize,
    pub query_center: Option<Coordinate>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolvedAnnotation {
    /// Position in the viewport's marker list; `None` for the user marker.
    pub index: Option<usize>,
    pub annotation: Annotation,
    pub view: AnnotationView,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizationPayload {
    pub status: AuthorizationStatus,
}

#[derive(Debug, Deserialize)]
pub struct RegionPayload {
    pub center: Coordinate,
    #[serde(default)]
    pub span: Option<Span>,
}

pub async fn index_html(State(state): State<AppState>) -> Html<String> {
    let settings = lock(&state.settings).clone();
    html_template::get_map_html(&settings)
}

pub async fn get_viewport(State(state): State<AppState>) -> Json<ViewportResponse> {
    let viewport = lock(&state.viewport).snapshot();
    Json(ViewportResponse {
        viewport,
        indexed_sightings: state.controller.index().len(),
        query_center: state.controller.active_center(),
    })
}

pub async fn get_annotations(State(state): State<AppState>) -> Json<Vec<ResolvedAnnotation>> {
    let viewport = lock(&state.viewport);
    let user = viewport.user_annotation().map(|annotation| ResolvedAnnotation {
        index: None,
        view: viewport.resolve_annotation_view(&annotation),
        annotation,
    });
    let creatures = viewport
        .annotations()
        .iter()
        .enumerate()
        .map(|(index, annotation)| ResolvedAnnotation {
            index: Some(index),
            annotation: annotation.clone(),
            view: viewport.resolve_annotation_view(annotation),
        });

    Json(user.into_iter().chain(creatures).collect())
}

// The page became visible: check location access
pub async fn view_appeared(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut viewport = lock(&state.viewport);
    state.gate.check_and_request(state.location.as_ref(), &mut viewport);
    Json(serde_json::json!({ "shows_user_location": viewport.shows_user_location() }))
}

pub async fn authorization_changed(
    State(state): State<AppState>,
    Json(payload): Json<AuthorizationPayload>,
) -> Json<serde_json::Value> {
    state.location.record_status(payload.status);
    let mut viewport = lock(&state.viewport);
    state.gate.on_authorization_changed(payload.status, &mut viewport);
    Json(serde_json::json!({ "shows_user_location": viewport.shows_user_location() }))
}

pub async fn location_update(
    State(state): State<AppState>,
    Json(location): Json<Coordinate>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if !location.is_valid() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let centered = lock(&state.viewport).on_location_update(location);
    Ok(Json(serde_json::json!({ "centered": centered })))
}

pub async fn region_will_change(
    State(state): State<AppState>,
    Json(payload): Json<RegionPayload>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if !payload.center.is_valid() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if payload.span.is_some_and(|span| !span.is_valid()) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let center = {
        let mut viewport = lock(&state.viewport);
        let span = payload.span.unwrap_or(viewport.region().span);
        viewport.on_region_will_change(Region {
            center: payload.center,
            span,
        })
    };

    state.controller.refresh_sightings(center).await.map_err(|e| {
        error!("sighting refresh failed: {e}");
        index_error_status(&e)
    })?;

    Ok(Json(serde_json::json!({ "status": "refreshing", "center": center })))
}

pub async fn spawn_sighting(State(state): State<AppState>) -> Result<Json<Sighting>, StatusCode> {
    state.controller.spawn_random_sighting().await.map(Json).map_err(|e| {
        error!("failed to record sighting: {e}");
        index_error_status(&e)
    })
}

pub async fn annotation_action(
    State(state): State<AppState>,
    AxumPath(index): AxumPath<usize>,
) -> StatusCode {
    let viewport = lock(&state.viewport);
    let Some(annotation) = viewport.annotation(index) else {
        return StatusCode::NOT_FOUND;
    };
    if viewport.on_annotation_action_tapped(annotation, state.planner.as_ref()) {
        StatusCode::ACCEPTED
    } else {
        StatusCode::NO_CONTENT
    }
}

pub async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(lock(&state.settings).clone())
}

// Changes are persisted and take effect on the next start
pub async fn update_settings(
    State(state): State<AppState>,
    Json(new_settings): Json<Settings>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if let Err(e) = new_settings.validate() {
        warn!("rejected settings update: {e}");
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        ));
    }
    new_settings.save().map_err(|e| {
        error!("failed to save settings: {e:#}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "failed to save settings" })),
        )
    })?;
    *lock(&state.settings) = new_settings;

    Ok(Json(serde_json::json!({
        "status": "saved",
        "restart_required": true
    })))
}

// SSE endpoint for map updates
pub async fn map_events_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let (tx, rx) = mpsc::channel(100);

    // Subscribe to the main event sender
    let mut event_receiver = state.event_sender.subscribe();

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                received = event_receiver.recv() => match received {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event stream lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tokio::time::sleep(Duration::from_secs(HEARTBEAT_SECS)) => MapEvent::Heartbeat {
                    message: "SSE connection alive".to_string(),
                },
            };

            let sse_event = SseEvent::default()
                .json_data(&event)
                .unwrap_or_else(|_| SseEvent::default().data("Error serializing event"));

            if tx.send(Ok(sse_event)).await.is_err() {
                debug!("event stream client disconnected");
                break;
            }
        }
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
