use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use axum::extract::{Path as AxumPath, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use booth_common::artifact::{content_type_for, is_image_name};
use booth_common::state::BoothState;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const GALLERY_PAGE: &str = include_str!("../assets/gallery.html");

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct AppState {
    photo_dir: PathBuf,
    booth: Arc<BoothState>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Plain file name with no directory components.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && name != "."
}

/// Image files in `dir`, oldest modification time first.
fn list_images(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut images: Vec<(SystemTime, String)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_image_name(&name) {
                return None;
            }
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            Some((meta.modified().unwrap_or(SystemTime::UNIX_EPOCH), name))
        })
        .collect();
    images.sort();
    images.into_iter().map(|(_, name)| name).collect()
}

fn bad_name(name: &str) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "status": "error", "message": format!("invalid file name {name:?}") })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "running",
        "photos_dir": state.photo_dir.display().to_string(),
    }))
}

/// GET /gallery
async fn gallery_page() -> Html<&'static str> {
    Html(GALLERY_PAGE)
}

/// GET /api/photos
async fn list_photos(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let dir = state.photo_dir.clone();
    match tokio::task::spawn_blocking(move || list_images(&dir)).await {
        Ok(names) => Json(names).into_response(),
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /photos/:name
async fn get_photo(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
) -> impl IntoResponse {
    if !is_safe_name(&name) {
        return bad_name(&name);
    }
    match tokio::fs::read(state.photo_dir.join(&name)).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type_for(&name))], bytes).into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(error = %e, name, "failed to read photo");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /delete/:name and /delete_photo/:name
async fn delete_photo(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
) -> impl IntoResponse {
    if !is_safe_name(&name) {
        return bad_name(&name);
    }
    match tokio::fs::remove_file(state.photo_dir.join(&name)).await {
        Ok(()) => {
            info!(name, "deleted local photo");
            Json(json!({ "status": "ok" })).into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": "error", "message": "file not found" })),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, name, "failed to delete photo");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// GET /set_filter/:name
async fn set_filter(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
) -> impl IntoResponse {
    match state.booth.set_filter_named(&name) {
        Ok(filter) => Json(json!({ "status": "ok", "filter": filter })).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "error", "message": e.to_string() })),
        )
            .into_response(),
    }
}

/// GET /get_filter
async fn get_filter(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "filter": state.booth.filter() }))
}

/// GET /set_mode/:name
async fn set_mode(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
) -> impl IntoResponse {
    match state.booth.set_mode_named(&name) {
        Ok(mode) => Json(json!({ "status": "ok", "mode": mode })).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "error", "message": e.to_string() })),
        )
            .into_response(),
    }
}

/// GET /get_mode
async fn get_mode(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "mode": state.booth.mode() }))
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(photo_dir: impl Into<PathBuf>, booth: Arc<BoothState>) -> Router {
    let state = Arc::new(AppState {
        photo_dir: photo_dir.into(),
        booth,
    });

    Router::new()
        .route("/", get(status))
        .route("/gallery", get(gallery_page))
        .route("/api/photos", get(list_photos))
        .route("/photos/:name", get(get_photo))
        .route("/delete/:name", get(delete_photo))
        .route("/delete_photo/:name", get(delete_photo))
        .route("/set_filter/:name", get(set_filter))
        .route("/get_filter", get(get_filter))
        .route("/set_mode/:name", get(set_mode))
        .route("/get_mode", get(get_mode))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the gallery on `addr` until the process exits.
pub async fn serve(addr: &str, app: Router) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr, "gallery server listening");
    axum::serve(listener, app).await
}
