//! Row API endpoints
//!
//! Provides REST API endpoints for row data:
//! - GET /api/tables/:id/rows - List rows (read access)
//! - POST /api/tables/:id/rows - Insert a row (write access)
//! - GET /api/tables/:id/rows/:row_id - Get a row
//! - PUT/PATCH /api/tables/:id/rows/:row_id - Patch cells; null removes
//! - DELETE /api/tables/:id/rows/:row_id - Delete a row
//! - DELETE /api/tables/:id/rows - Clear every row (admin access)
//!
//! Writes take a `{"data": {column: value}}` envelope.
//!
//! Write access follows the visibility rules: owners and admins always,
//! other authenticated identities only on shared tables.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::access::{AccessLevel, resolve_access};
use crate::core::db::models::{TableRow, UserTable};
use crate::core::db::repositories::{
    RowRepository, RowRepositoryError, TableRepository, TableRepositoryError,
};
use crate::core::identity::Requester;

/// Row API state containing the table and row repositories
#[derive(Clone)]
pub struct RowApiState {
    pub table_repo: TableRepository,
    pub row_repo: RowRepository,
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

/// Row API error types
#[derive(Debug, thiserror::Error)]
pub enum RowApiError {
    #[error("Table not found")]
    TableNotFound,

    #[error("Row not found")]
    NotFound,

    #[error("Access denied")]
    AccessDenied,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Value for column '{0}' already exists in another row")]
    DuplicateValue(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<RowRepositoryError> for RowApiError {
    fn from(err: RowRepositoryError) -> Self {
        match err {
            RowRepositoryError::TableNotFound => RowApiError::TableNotFound,
            RowRepositoryError::NotFound => RowApiError::NotFound,
            RowRepositoryError::DuplicateValue { column } => RowApiError::DuplicateValue(column),
            RowRepositoryError::Validation(e) => RowApiError::BadRequest(e.to_string()),
            RowRepositoryError::Database(e) => RowApiError::InternalError(e.to_string()),
        }
    }
}

impl From<TableRepositoryError> for RowApiError {
    fn from(err: TableRepositoryError) -> Self {
        match err {
            TableRepositoryError::NotFound => RowApiError::TableNotFound,
            other => RowApiError::InternalError(other.to_string()),
        }
    }
}

impl IntoResponse for RowApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            RowApiError::TableNotFound => (StatusCode::NOT_FOUND, "TABLE_NOT_FOUND"),
            RowApiError::NotFound => (StatusCode::NOT_FOUND, "ROW_NOT_FOUND"),
            RowApiError::AccessDenied => (StatusCode::FORBIDDEN, "ACCESS_DENIED"),
            RowApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            RowApiError::DuplicateValue(_) => (StatusCode::CONFLICT, "DUPLICATE_VALUE"),
            RowApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            RowApiError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = ApiError {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Envelope for row writes
#[derive(Debug, Deserialize)]
pub struct RowDataRequest {
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// Query parameters for listing rows
#[derive(Debug, Deserialize, Default)]
pub struct ListRowsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

/// Response for row list
#[derive(Debug, Serialize)]
pub struct RowListResponse {
    pub rows: Vec<TableRow>,
    pub count: usize,
    pub total: i64,
}

/// Response for delete operation
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
    pub id: Uuid,
}

/// Response for clearing a table
#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed: u64,
}

// ============================================================================
// Router
// ============================================================================

/// Create the row API router
pub fn row_api_router(state: RowApiState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route(
            "/api/tables/{id}/rows",
            get(list_rows_handler)
                .post(insert_row_handler)
                .delete(clear_rows_handler),
        )
        .route(
            "/api/tables/{id}/rows/{row_id}",
            get(get_row_handler)
                .put(update_row_handler)
                .patch(update_row_handler)
                .delete(delete_row_handler),
        )
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/tables/:id/rows
/// List rows in insertion order
async fn list_rows_handler(
    State(state): State<Arc<RowApiState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Query(query): Query<ListRowsQuery>,
) -> Result<Json<RowListResponse>, RowApiError> {
    let requester = Requester::from_headers(&headers);
    access_for(&state, id, &requester).await?;

    let limit = query.limit.clamp(1, 500);
    let offset = query.offset.max(0);

    let rows = state.row_repo.list(id, limit, offset).await?;
    let total = state.row_repo.count(id).await?;
    let count = rows.len();

    Ok(Json(RowListResponse { rows, count, total }))
}

/// POST /api/tables/:id/rows
/// Insert a row validated against the column definitions
async fn insert_row_handler(
    State(state): State<Arc<RowApiState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<RowDataRequest>,
) -> Result<(StatusCode, Json<TableRow>), RowApiError> {
    let requester = Requester::from_headers(&headers);
    let level = access_for(&state, id, &requester).await?;
    require_write(level)?;
    let author = requester.identity.ok_or(RowApiError::Unauthorized)?;

    let row = state.row_repo.insert(id, &request.data, &author).await?;

    Ok((StatusCode::CREATED, Json(row)))
}

/// GET /api/tables/:id/rows/:row_id
/// Get a single row
async fn get_row_handler(
    State(state): State<Arc<RowApiState>>,
    headers: HeaderMap,
    Path((id, row_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<TableRow>, RowApiError> {
    let requester = Requester::from_headers(&headers);
    access_for(&state, id, &requester).await?;

    let row = state
        .row_repo
        .find_by_id(id, row_id)
        .await?
        .ok_or(RowApiError::NotFound)?;

    Ok(Json(row))
}

/// PATCH /api/tables/:id/rows/:row_id
/// Patch cells; an explicit null removes the cell
async fn update_row_handler(
    State(state): State<Arc<RowApiState>>,
    headers: HeaderMap,
    Path((id, row_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<RowDataRequest>,
) -> Result<Json<TableRow>, RowApiError> {
    let requester = Requester::from_headers(&headers);
    let level = access_for(&state, id, &requester).await?;
    require_write(level)?;

    if request.data.is_empty() {
        return Err(RowApiError::BadRequest("No cells to update".to_string()));
    }

    let row = state.row_repo.update(id, row_id, &request.data).await?;

    Ok(Json(row))
}

/// DELETE /api/tables/:id/rows/:row_id
/// Delete a single row
async fn delete_row_handler(
    State(state): State<Arc<RowApiState>>,
    headers: HeaderMap,
    Path((id, row_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DeleteResponse>, RowApiError> {
    let requester = Requester::from_headers(&headers);
    let level = access_for(&state, id, &requester).await?;
    require_write(level)?;

    state.row_repo.delete(id, row_id).await?;

    Ok(Json(DeleteResponse {
        deleted: true,
        id: row_id,
    }))
}

/// DELETE /api/tables/:id/rows
/// Remove every row, keeping the schema (admin access)
async fn clear_rows_handler(
    State(state): State<Arc<RowApiState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ClearResponse>, RowApiError> {
    let requester = Requester::from_headers(&headers);
    let level = access_for(&state, id, &requester).await?;
    if !level.can_admin() {
        return Err(RowApiError::AccessDenied);
    }

    tracing::info!("Clearing rows of table {}", id);

    let removed = state.row_repo.clear_table(id).await?;

    Ok(Json(ClearResponse { removed }))
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolve the requester's access; unreadable tables present as not
/// found.
async fn access_for(
    state: &RowApiState,
    table_id: Uuid,
    requester: &Requester,
) -> Result<AccessLevel, RowApiError> {
    let table: UserTable = state
        .table_repo
        .find_by_id(table_id)
        .await?
        .ok_or(RowApiError::TableNotFound)?;

    let level = resolve_access(
        table.visibility,
        &table.owner(),
        requester.identity.as_ref(),
        requester.is_admin,
    );

    if !level.can_read() {
        return Err(RowApiError::TableNotFound);
    }

    Ok(level)
}

fn require_write(level: AccessLevel) -> Result<(), RowApiError> {
    if level.can_write() {
        Ok(())
    } else {
        Err(RowApiError::AccessDenied)
    }
}

// ============================================================================
// Tests
// ============================================================================
