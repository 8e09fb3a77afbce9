//! Table API endpoints
//!
//! Provides REST API endpoints for table and column management:
//! - POST /api/tables - Create a table (auth required)
//! - GET /api/tables - List own tables (admin: ?all=true lists everything)
//! - GET /api/tables/:id - Get a table with its columns
//! - PUT /api/tables/:id - Update table settings
//! - DELETE /api/tables/:id - Delete a table
//! - POST /api/tables/:id/clone - Clone table structure without rows
//! - POST /api/tables/mass - Apply a bulk action to many tables
//! - POST /api/tables/:id/columns - Add a column
//! - PUT /api/tables/:id/columns/:column_id - Update a column
//! - DELETE /api/tables/:id/columns/:column_id - Delete a column
//! - PATCH /api/tables/:id/columns/:column_id/move - Move a column one step
//!
//! Identity comes from gateway headers; see the identity module. Schema
//! mutations need admin-level access to the table (owner or platform
//! admin), reads need read access per the visibility rules.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post, put},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::access::{AccessLevel, OwnerIdentity, Visibility, resolve_access};
use crate::core::db::models::{
    CreateColumn, CreateTable, TableColumn, UpdateColumn, UpdateTable, UserTable,
};
use crate::core::db::repositories::{
    ColumnRepository, ColumnRepositoryError, MassAction, MoveDirection, TableRepository,
    TableRepositoryError,
};
use crate::core::identity::Requester;
use crate::core::protection::{RentalPeriod, TableType};

/// Table API state containing the table and column repositories
#[derive(Clone)]
pub struct TableApiState {
    pub table_repo: TableRepository,
    pub column_repo: ColumnRepository,
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }
}

/// Table API error types
#[derive(Debug, thiserror::Error)]
pub enum TableApiError {
    #[error("Table not found")]
    NotFound,

    #[error("Column not found")]
    ColumnNotFound,

    #[error("Access denied")]
    AccessDenied,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Column '{0}' is managed by the table type and cannot be changed")]
    Protected(String),

    #[error("A column with this name already exists: {0}")]
    DuplicateColumn(String),

    #[error("Concurrent modification, please retry")]
    Conflict,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<TableRepositoryError> for TableApiError {
    fn from(err: TableRepositoryError) -> Self {
        match err {
            TableRepositoryError::NotFound => TableApiError::NotFound,
            TableRepositoryError::Validation(e) => TableApiError::BadRequest(e.to_string()),
            TableRepositoryError::Database(e) => TableApiError::InternalError(e.to_string()),
        }
    }
}

impl From<ColumnRepositoryError> for TableApiError {
    fn from(err: ColumnRepositoryError) -> Self {
        match err {
            ColumnRepositoryError::TableNotFound => TableApiError::NotFound,
            ColumnRepositoryError::NotFound => TableApiError::ColumnNotFound,
            ColumnRepositoryError::Protected(name) => TableApiError::Protected(name),
            ColumnRepositoryError::DuplicateName(name) => TableApiError::DuplicateColumn(name),
            ColumnRepositoryError::Conflict => TableApiError::Conflict,
            ColumnRepositoryError::Validation(e) => TableApiError::BadRequest(e.to_string()),
            ColumnRepositoryError::Database(e) => TableApiError::InternalError(e.to_string()),
        }
    }
}

impl IntoResponse for TableApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            TableApiError::NotFound => (StatusCode::NOT_FOUND, "TABLE_NOT_FOUND"),
            TableApiError::ColumnNotFound => (StatusCode::NOT_FOUND, "COLUMN_NOT_FOUND"),
            TableApiError::AccessDenied => (StatusCode::FORBIDDEN, "ACCESS_DENIED"),
            TableApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            TableApiError::Protected(_) => (StatusCode::FORBIDDEN, "PROTECTED_COLUMN"),
            TableApiError::DuplicateColumn(_) => (StatusCode::CONFLICT, "DUPLICATE_COLUMN"),
            TableApiError::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
            TableApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            TableApiError::InternalError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = ApiError::new(self.to_string(), code);

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Query parameters for listing tables
#[derive(Debug, Deserialize, Default)]
pub struct ListTablesQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    /// List every table regardless of owner (platform admins only)
    #[serde(default)]
    pub all: bool,
}

fn default_limit() -> i64 {
    50
}

/// Request for applying a bulk action
#[derive(Debug, Deserialize)]
pub struct MassActionRequest {
    pub action: String,
    pub ids: Vec<Uuid>,
}

/// Request for moving a column
#[derive(Debug, Deserialize)]
pub struct MoveColumnRequest {
    pub direction: MoveDirection,
}

/// Response for a single table
#[derive(Debug, Serialize)]
pub struct TableResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner: OwnerIdentity,
    pub visibility: Visibility,
    pub table_type: TableType,
    pub product_id_column: Option<Uuid>,
    pub rental_period: Option<RentalPeriod>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<UserTable> for TableResponse {
    fn from(table: UserTable) -> Self {
        let owner = table.owner();
        Self {
            id: table.id,
            name: table.name,
            description: table.description,
            owner,
            visibility: table.visibility,
            table_type: table.table_type,
            product_id_column: table.product_id_column,
            rental_period: table.rental_period,
            created_at: table.created_at,
            updated_at: table.updated_at,
        }
    }
}

/// Response for a table with its column definitions
#[derive(Debug, Serialize)]
pub struct TableDetailResponse {
    #[serde(flatten)]
    pub table: TableResponse,
    pub columns: Vec<TableColumn>,
}

/// Response for table list
#[derive(Debug, Serialize)]
pub struct TableListResponse {
    pub tables: Vec<TableResponse>,
    pub count: usize,
}

/// Response for a bulk action
#[derive(Debug, Serialize)]
pub struct MassActionResponse {
    pub action: String,
    pub affected: u64,
}

/// Response for delete operation
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
    pub id: Uuid,
}

// ============================================================================
// Router
// ============================================================================

/// Create the table API router
pub fn table_api_router(state: TableApiState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/api/tables", post(create_table_handler))
        .route("/api/tables", get(list_tables_handler))
        .route("/api/tables/mass", post(mass_action_handler))
        .route("/api/tables/{id}", get(get_table_handler))
        .route("/api/tables/{id}", put(update_table_handler))
        .route("/api/tables/{id}", delete(delete_table_handler))
        .route("/api/tables/{id}/clone", post(clone_table_handler))
        .route("/api/tables/{id}/columns", post(add_column_handler))
        .route(
            "/api/tables/{id}/columns/{column_id}",
            put(update_column_handler),
        )
        .route(
            "/api/tables/{id}/columns/{column_id}",
            delete(delete_column_handler),
        )
        .route(
            "/api/tables/{id}/columns/{column_id}/move",
            patch(move_column_handler),
        )
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/tables
/// Create a table with its initial columns (auth required)
async fn create_table_handler(
    State(state): State<Arc<TableApiState>>,
    headers: HeaderMap,
    Json(request): Json<CreateTable>,
) -> Result<(StatusCode, Json<TableDetailResponse>), TableApiError> {
    let requester = Requester::from_headers(&headers);
    let owner = requester.identity.ok_or(TableApiError::Unauthorized)?;

    tracing::info!("Creating table '{}' for {:?}", request.name, owner);

    let (table, columns) = state.table_repo.create(&request, &owner).await?;

    Ok((
        StatusCode::CREATED,
        Json(TableDetailResponse {
            table: table.into(),
            columns,
        }),
    ))
}

/// GET /api/tables
/// List the requester's tables; admins may list all with ?all=true
async fn list_tables_handler(
    State(state): State<Arc<TableApiState>>,
    headers: HeaderMap,
    Query(query): Query<ListTablesQuery>,
) -> Result<Json<TableListResponse>, TableApiError> {
    let requester = Requester::from_headers(&headers);
    let identity = requester.identity.ok_or(TableApiError::Unauthorized)?;

    let limit = query.limit.clamp(1, 200);
    let offset = query.offset.max(0);

    tracing::debug!("Listing tables for {:?}, all: {}", identity, query.all);

    let tables = if query.all {
        if !requester.is_admin {
            return Err(TableApiError::AccessDenied);
        }
        state.table_repo.list_all(limit, offset).await?
    } else {
        state.table_repo.list_by_owner(&identity, limit, offset).await?
    };

    let count = tables.len();
    let tables: Vec<TableResponse> = tables.into_iter().map(Into::into).collect();

    Ok(Json(TableListResponse { tables, count }))
}

/// GET /api/tables/:id
/// Get a table and its columns
async fn get_table_handler(
    State(state): State<Arc<TableApiState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<TableDetailResponse>, TableApiError> {
    let requester = Requester::from_headers(&headers);
    let (table, _) = load_table_with_access(&state, id, &requester).await?;

    let columns = state.column_repo.list(table.id).await?;

    Ok(Json(TableDetailResponse {
        table: table.into(),
        columns,
    }))
}

/// PUT /api/tables/:id
/// Update table settings; switching to sale/rent adds the managed columns
async fn update_table_handler(
    State(state): State<Arc<TableApiState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateTable>,
) -> Result<Json<TableResponse>, TableApiError> {
    let requester = Requester::from_headers(&headers);
    let (_, level) = load_table_with_access(&state, id, &requester).await?;
    require_admin(level)?;

    if request.is_empty() {
        return Err(TableApiError::BadRequest(
            "No fields to update".to_string(),
        ));
    }

    tracing::info!("Updating table {}", id);

    let table = state.table_repo.update(id, &request).await?;

    Ok(Json(table.into()))
}

/// DELETE /api/tables/:id
/// Delete a table together with its columns and rows
async fn delete_table_handler(
    State(state): State<Arc<TableApiState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, TableApiError> {
    let requester = Requester::from_headers(&headers);
    let (_, level) = load_table_with_access(&state, id, &requester).await?;
    require_admin(level)?;

    tracing::info!("Deleting table {}", id);

    state.table_repo.delete(id).await?;

    Ok(Json(DeleteResponse { deleted: true, id }))
}

/// POST /api/tables/:id/clone
/// Clone the table structure without rows
async fn clone_table_handler(
    State(state): State<Arc<TableApiState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<TableResponse>), TableApiError> {
    let requester = Requester::from_headers(&headers);
    let (_, level) = load_table_with_access(&state, id, &requester).await?;
    require_admin(level)?;

    tracing::info!("Cloning table {}", id);

    let clone = state.table_repo.clone_table(id).await?;

    Ok((StatusCode::CREATED, Json(clone.into())))
}

/// POST /api/tables/mass
/// Apply a bulk action; non-admins only affect tables they own
async fn mass_action_handler(
    State(state): State<Arc<TableApiState>>,
    headers: HeaderMap,
    Json(request): Json<MassActionRequest>,
) -> Result<Json<MassActionResponse>, TableApiError> {
    let requester = Requester::from_headers(&headers);
    let identity = requester.identity.ok_or(TableApiError::Unauthorized)?;

    let action: MassAction = request
        .action
        .parse()
        .map_err(TableApiError::BadRequest)?;

    tracing::info!(
        "Mass action {} on {} tables by {:?}",
        action,
        request.ids.len(),
        identity
    );

    let affected = state
        .table_repo
        .mass_action(action, &request.ids, &identity, requester.is_admin)
        .await?;

    Ok(Json(MassActionResponse {
        action: action.to_string(),
        affected,
    }))
}

/// POST /api/tables/:id/columns
/// Add a column, shifting later columns right if a position is given
async fn add_column_handler(
    State(state): State<Arc<TableApiState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<CreateColumn>,
) -> Result<(StatusCode, Json<TableColumn>), TableApiError> {
    let requester = Requester::from_headers(&headers);
    let (_, level) = load_table_with_access(&state, id, &requester).await?;
    require_admin(level)?;

    let column = state.column_repo.add(id, &request).await?;

    Ok((StatusCode::CREATED, Json(column)))
}

/// PUT /api/tables/:id/columns/:column_id
/// Update a column definition
async fn update_column_handler(
    State(state): State<Arc<TableApiState>>,
    headers: HeaderMap,
    Path((id, column_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateColumn>,
) -> Result<Json<TableColumn>, TableApiError> {
    let requester = Requester::from_headers(&headers);
    let (_, level) = load_table_with_access(&state, id, &requester).await?;
    require_admin(level)?;

    let column = state.column_repo.update(id, column_id, &request).await?;

    Ok(Json(column))
}

/// DELETE /api/tables/:id/columns/:column_id
/// Delete a column; protected columns refuse
async fn delete_column_handler(
    State(state): State<Arc<TableApiState>>,
    headers: HeaderMap,
    Path((id, column_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<DeleteResponse>, TableApiError> {
    let requester = Requester::from_headers(&headers);
    let (_, level) = load_table_with_access(&state, id, &requester).await?;
    require_admin(level)?;

    state.column_repo.delete(id, column_id).await?;

    Ok(Json(DeleteResponse {
        deleted: true,
        id: column_id,
    }))
}

/// PATCH /api/tables/:id/columns/:column_id/move
/// Swap a column with its neighbor; boundaries are a no-op
async fn move_column_handler(
    State(state): State<Arc<TableApiState>>,
    headers: HeaderMap,
    Path((id, column_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<MoveColumnRequest>,
) -> Result<Json<TableColumn>, TableApiError> {
    let requester = Requester::from_headers(&headers);
    let (_, level) = load_table_with_access(&state, id, &requester).await?;
    require_admin(level)?;

    let column = state
        .column_repo
        .move_column(id, column_id, request.direction)
        .await?;

    Ok(Json(column))
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Load a table and resolve the requester's access to it. Tables the
/// requester cannot even read present as not found.
async fn load_table_with_access(
    state: &TableApiState,
    id: Uuid,
    requester: &Requester,
) -> Result<(UserTable, AccessLevel), TableApiError> {
    let table = state
        .table_repo
        .find_by_id(id)
        .await?
        .ok_or(TableApiError::NotFound)?;

    let level = resolve_access(
        table.visibility,
        &table.owner(),
        requester.identity.as_ref(),
        requester.is_admin,
    );

    if !level.can_read() {
        return Err(TableApiError::NotFound);
    }

    Ok((table, level))
}

fn require_admin(level: AccessLevel) -> Result<(), TableApiError> {
    if level.can_admin() {
        Ok(())
    } else {
        Err(TableApiError::AccessDenied)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_serialization() {
        let error = ApiError::new("Something went wrong", "ERROR_CODE");
        let json = serde_json::to_string(&error).unwrap();

        assert!(json.contains("Something went wrong"));
        assert!(json.contains("ERROR_CODE"));
    }

    #[test]
    fn test_mass_action_request_deserialization() {
        let json = r#"{
            "action": "make_public",
            "ids": ["550e8400-e29b-41d4-a716-446655440000"]
        }"#;

        let request: MassActionRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.action, "make_public");
        assert_eq!(request.ids.len(), 1);
        assert!(request.action.parse::<MassAction>().is_ok());
    }

    #[test]
    fn test_move_column_request_deserialization() {
        let request: MoveColumnRequest =
            serde_json::from_str(r#"{"direction": "down"}"#).unwrap();
        assert_eq!(request.direction, MoveDirection::Down);
    }

    #[test]
    fn test_list_tables_query_defaults() {
        let query: ListTablesQuery = serde_json::from_str("{}").unwrap();

        assert_eq!(query.limit, 50);
        assert_eq!(query.offset, 0);
        assert!(!query.all);
    }

    #[test]
    fn test_table_response_carries_tagged_owner() {
        use chrono::Utc;
        use crate::core::access::IdentityKind;

        let table = UserTable {
            id: Uuid::nil(),
            name: "Items".to_string(),
            description: None,
            owner_kind: IdentityKind::ApiToken,
            owner_id: Uuid::nil(),
            visibility: Visibility::Public,
            table_type: TableType::Sale,
            product_id_column: None,
            rental_period: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&TableResponse::from(table)).unwrap();

        assert!(json.contains(r#""kind":"api_token""#));
        assert!(json.contains(r#""table_type":"sale""#));
    }

    #[test]
    fn test_require_admin_levels() {
        assert!(require_admin(AccessLevel::Admin).is_ok());
        assert!(matches!(
            require_admin(AccessLevel::Write),
            Err(TableApiError::AccessDenied)
        ));
        assert!(matches!(
            require_admin(AccessLevel::Read),
            Err(TableApiError::AccessDenied)
        ));
    }

    #[test]
    fn test_error_status_mapping() {
        let response = TableApiError::Protected("price".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = TableApiError::DuplicateColumn("qty".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = TableApiError::NotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_repository_error_conversion() {
        let err: TableApiError = TableRepositoryError::NotFound.into();
        assert!(matches!(err, TableApiError::NotFound));

        let err: TableApiError =
            ColumnRepositoryError::Protected("price".to_string()).into();
        assert!(matches!(err, TableApiError::Protected(_)));

        let err: TableApiError = ColumnRepositoryError::Conflict.into();
        assert!(matches!(err, TableApiError::Conflict));
    }
}
