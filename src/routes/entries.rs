use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::models::{CalendarEntry, CreateCalendarEntry, UpdateCalendarEntry};
use crate::error::AppResult;
use crate::recurrence::QueryWindow;
use crate::services::entries::{EntryService, WindowItem};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_entries).post(create_entry))
        .route(
            "/:id",
            get(get_entry).patch(update_entry).delete(delete_entry),
        )
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Read window; both bounds are required, as RFC 3339 instants or dates.
#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub id: String,
    pub deleted: bool,
}

// ============================================================================
// Handlers
// ============================================================================

async fn create_entry(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCalendarEntry>,
) -> AppResult<(StatusCode, Json<CalendarEntry>)> {
    let entry = EntryService::create(&state.db, body).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Single entries contained in the window plus the occurrences of every
/// series overlapping it.
async fn list_entries(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WindowQuery>,
) -> AppResult<Json<Vec<WindowItem>>> {
    let window = QueryWindow::parse(query.start.as_deref(), query.end.as_deref())?
        .ensure_max_span(state.config.query.max_window_days)?;

    let items = EntryService::list_in_window(&state.db, &window).await?;
    Ok(Json(items))
}

async fn get_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<CalendarEntry>> {
    Ok(Json(EntryService::get(&state.db, &id).await?))
}

async fn update_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateCalendarEntry>,
) -> AppResult<Json<CalendarEntry>> {
    Ok(Json(EntryService::update(&state.db, &id, body).await?))
}

async fn delete_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<DeletedResponse>> {
    EntryService::delete(&state.db, &id).await?;
    Ok(Json(DeletedResponse { id, deleted: true }))
}

/// Insert sample entries. Only mounted when the seed endpoint is enabled.
pub async fn seed_entries(
    State(state): State<Arc<AppState>>,
) -> AppResult<(StatusCode, Json<Vec<CalendarEntry>>)> {
    let created = EntryService::seed_sample_entries(&state.db, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(created)))
}
