//! Public API endpoints
//!
//! Read-only catalog over sale/rent tables whose visibility is public
//! or shared. No identity headers are consulted here; private tables
//! and non-commerce table types are simply invisible.
//!
//! - GET /api/public/tables - List reachable tables with row counts
//! - GET /api/public/tables/search - Find tables carrying given columns
//! - GET /api/public/tables/:id/records - Filtered, paged records
//! - GET /api/public/tables/:id/records/:row_id - One record
//! - GET /api/public/tables/:id/records/:row_id/availability - Stock check
//! - GET /api/public/tables/:id/values/:column - Distinct column values
//! - GET /api/public/records - Records across every reachable table
//! - GET /api/public/values/:column - Distinct values across tables
//!
//! Records carry a computed `available` field (for sale tables the
//! remaining quantity, for rent tables whether the item is free) plus
//! `table_id`/`table_name`/`table_type` naming the table they came
//! from. Cell filters use the `where[column]=value` query convention.

use std::collections::HashMap;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::db::models::{TableRow, UserTable};
use crate::core::db::repositories::{
    PublicRepository, PublicRepositoryError, PublicTableSummary, TableRecord,
};
use crate::core::protection::TableType;

/// Public API state containing the catalog repository
#[derive(Clone)]
pub struct PublicApiState {
    pub public_repo: PublicRepository,
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

/// Public API error types
#[derive(Debug, thiserror::Error)]
pub enum PublicApiError {
    #[error("Table not found")]
    TableNotFound,

    #[error("Record not found")]
    RecordNotFound,

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<PublicRepositoryError> for PublicApiError {
    fn from(err: PublicRepositoryError) -> Self {
        match err {
            PublicRepositoryError::TableNotFound => PublicApiError::TableNotFound,
            PublicRepositoryError::RecordNotFound => PublicApiError::RecordNotFound,
            PublicRepositoryError::UnknownColumn(name) => PublicApiError::UnknownColumn(name),
            PublicRepositoryError::Database(e) => PublicApiError::InternalError(e.to_string()),
        }
    }
}

impl IntoResponse for PublicApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            PublicApiError::TableNotFound => (StatusCode::NOT_FOUND, "TABLE_NOT_FOUND"),
            PublicApiError::RecordNotFound => (StatusCode::NOT_FOUND, "RECORD_NOT_FOUND"),
            PublicApiError::UnknownColumn(_) => (StatusCode::BAD_REQUEST, "UNKNOWN_COLUMN"),
            PublicApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            PublicApiError::InternalError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
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

/// Query parameters for listing tables
#[derive(Debug, Deserialize, Default)]
pub struct ListTablesQuery {
    /// Narrow to one table type ("sale" or "rent")
    #[serde(rename = "type")]
    pub table_type: Option<TableType>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

/// Query parameters for column search
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    /// Comma-separated column names, all of which must be present
    pub columns: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Response for table list
#[derive(Debug, Serialize)]
pub struct TableListResponse {
    pub tables: Vec<PublicTableSummary>,
    pub count: usize,
}

/// Response for a page of records
#[derive(Debug, Serialize)]
pub struct RecordListResponse {
    pub records: Vec<Value>,
    pub count: usize,
    pub total: i64,
}

/// Response for distinct values
#[derive(Debug, Serialize)]
pub struct ValuesResponse {
    pub column: String,
    pub values: Vec<String>,
}

/// Response for distinct values gathered across tables
#[derive(Debug, Serialize)]
pub struct CrossValuesResponse {
    pub column: String,
    pub values: Vec<String>,
    pub tables_sampled: i64,
}

/// Query parameters for an availability check
#[derive(Debug, Deserialize, Default)]
pub struct AvailabilityQuery {
    #[serde(default = "default_quantity")]
    pub quantity: f64,
}

fn default_quantity() -> f64 {
    1.0
}

/// Response for an availability check
#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub available: bool,
    pub requested: f64,
}

// ============================================================================
// Router
// ============================================================================

/// Create the public API router
pub fn public_api_router(state: PublicApiState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/api/public/tables", get(list_tables_handler))
        .route("/api/public/tables/search", get(search_tables_handler))
        .route("/api/public/tables/{id}/records", get(list_records_handler))
        .route(
            "/api/public/tables/{id}/records/{row_id}",
            get(get_record_handler),
        )
        .route(
            "/api/public/tables/{id}/records/{row_id}/availability",
            get(availability_handler),
        )
        .route(
            "/api/public/tables/{id}/values/{column}",
            get(distinct_values_handler),
        )
        .route("/api/public/records", get(list_all_records_handler))
        .route("/api/public/values/{column}", get(all_values_handler))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/public/tables
async fn list_tables_handler(
    State(state): State<Arc<PublicApiState>>,
    Query(query): Query<ListTablesQuery>,
) -> Result<Json<TableListResponse>, PublicApiError> {
    let tables = state
        .public_repo
        .list_tables(query.table_type, query.limit.clamp(1, 200), query.offset.max(0))
        .await?;
    let count = tables.len();

    Ok(Json(TableListResponse { tables, count }))
}

/// GET /api/public/tables/search?columns=price,qty
async fn search_tables_handler(
    State(state): State<Arc<PublicApiState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<TableListResponse>, PublicApiError> {
    let names: Vec<String> = query
        .columns
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return Err(PublicApiError::BadRequest(
            "At least one column name is required".to_string(),
        ));
    }

    let tables = state
        .public_repo
        .search_by_columns(&names, query.limit.clamp(1, 200), query.offset.max(0))
        .await?;
    let count = tables.len();

    Ok(Json(TableListResponse { tables, count }))
}

/// GET /api/public/tables/:id/records
/// Supports `where[column]=value` filters plus limit/offset
async fn list_records_handler(
    State(state): State<Arc<PublicApiState>>,
    Path(id): Path<Uuid>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<RecordListResponse>, PublicApiError> {
    let table = state.public_repo.visible_table(id).await?;

    let filters = parse_filters(&params);
    let (limit, offset) = parse_page(&params);
    let projection = parse_projection(&params);

    let page = state
        .public_repo
        .query_records(id, &filters, limit, offset)
        .await?;

    let records: Vec<Value> = page
        .rows
        .into_iter()
        .map(|row| {
            let payload = record_payload(&table, row);
            if projection.is_empty() {
                payload
            } else {
                project(payload, &projection)
            }
        })
        .collect();
    let count = records.len();

    Ok(Json(RecordListResponse {
        records,
        count,
        total: page.total,
    }))
}

/// GET /api/public/tables/:id/records/:row_id
async fn get_record_handler(
    State(state): State<Arc<PublicApiState>>,
    Path((id, row_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, PublicApiError> {
    let table = state.public_repo.visible_table(id).await?;
    let row = state.public_repo.find_record(id, row_id).await?;

    Ok(Json(record_payload(&table, row)))
}

/// GET /api/public/tables/:id/records/:row_id/availability?quantity=n
async fn availability_handler(
    State(state): State<Arc<PublicApiState>>,
    Path((id, row_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, PublicApiError> {
    if query.quantity <= 0.0 {
        return Err(PublicApiError::BadRequest(
            "Quantity must be positive".to_string(),
        ));
    }

    let table = state.public_repo.visible_table(id).await?;
    let row = state.public_repo.find_record(id, row_id).await?;

    Ok(Json(AvailabilityResponse {
        available: is_available(table.table_type, &row.data.0, query.quantity),
        requested: query.quantity,
    }))
}

/// GET /api/public/tables/:id/values/:column
async fn distinct_values_handler(
    State(state): State<Arc<PublicApiState>>,
    Path((id, column)): Path<(Uuid, String)>,
) -> Result<Json<ValuesResponse>, PublicApiError> {
    let values = state.public_repo.distinct_values(id, &column).await?;

    Ok(Json(ValuesResponse { column, values }))
}

/// GET /api/public/records
/// Same filters, pagination and projection as the per-table route, plus
/// `type=sale|rent` narrowing; records come from every reachable table.
async fn list_all_records_handler(
    State(state): State<Arc<PublicApiState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<RecordListResponse>, PublicApiError> {
    let table_type = params
        .get("type")
        .map(|raw| {
            raw.parse::<TableType>()
                .map_err(PublicApiError::BadRequest)
        })
        .transpose()?;

    let filters = parse_filters(&params);
    let (limit, offset) = parse_page(&params);
    let projection = parse_projection(&params);

    let page = state
        .public_repo
        .query_records_all(table_type, &filters, limit, offset)
        .await?;

    let records: Vec<Value> = page
        .rows
        .into_iter()
        .map(|record| {
            let payload = cross_record_payload(record);
            if projection.is_empty() {
                payload
            } else {
                project(payload, &projection)
            }
        })
        .collect();
    let count = records.len();

    Ok(Json(RecordListResponse {
        records,
        count,
        total: page.total,
    }))
}

/// GET /api/public/values/:column
async fn all_values_handler(
    State(state): State<Arc<PublicApiState>>,
    Path(column): Path<String>,
) -> Result<Json<CrossValuesResponse>, PublicApiError> {
    let gathered = state.public_repo.distinct_values_all(&column).await?;

    Ok(Json(CrossValuesResponse {
        column,
        values: gathered.values,
        tables_sampled: gathered.tables_sampled,
    }))
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Extract clamped limit/offset from the raw query parameters.
fn parse_page(params: &HashMap<String, String>) -> (i64, i64) {
    let limit = params
        .get("limit")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default_limit())
        .clamp(1, 500);
    let offset = params
        .get("offset")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0)
        .max(0);
    (limit, offset)
}

/// Extract the comma-separated `columns=` projection list, if any.
fn parse_projection(params: &HashMap<String, String>) -> Vec<String> {
    params
        .get("columns")
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Extract `where[column]=value` pairs from the raw query parameters.
fn parse_filters(params: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut filters: Vec<(String, String)> = params
        .iter()
        .filter_map(|(key, value)| {
            let name = key.strip_prefix("where[")?.strip_suffix(']')?;
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.clone()))
        })
        .collect();
    // HashMap order is arbitrary; keep bound parameters deterministic.
    filters.sort();
    filters
}

/// Item availability derived from the commerce cells: remaining
/// quantity for sale tables, a free/taken flag for rent tables.
fn availability(table_type: TableType, data: &Map<String, Value>) -> Value {
    match table_type {
        TableType::Sale => data
            .get("qty")
            .and_then(Value::as_f64)
            .map(|qty| json!(qty.max(0.0)))
            .unwrap_or(json!(0)),
        TableType::Rent => {
            let used = data.get("used").and_then(Value::as_bool).unwrap_or(false);
            json!(!used)
        }
        TableType::Default => Value::Null,
    }
}

/// Whether a requested quantity can be served from this item. Rent items
/// serve at most one unit at a time.
fn is_available(table_type: TableType, data: &Map<String, Value>, quantity: f64) -> bool {
    match table_type {
        TableType::Sale => {
            data.get("qty").and_then(Value::as_f64).unwrap_or(0.0) >= quantity
        }
        TableType::Rent => {
            let used = data.get("used").and_then(Value::as_bool).unwrap_or(false);
            !used && quantity <= 1.0
        }
        TableType::Default => false,
    }
}

/// Restrict a record payload to the requested columns; the envelope
/// fields always stay.
fn project(payload: Value, columns: &[String]) -> Value {
    let Value::Object(map) = payload else {
        return payload;
    };

    let kept: Map<String, Value> = map
        .into_iter()
        .filter(|(key, _)| {
            matches!(
                key.as_str(),
                "id" | "created_at" | "available" | "table_id" | "table_name" | "table_type"
            ) || columns.iter().any(|c| c.eq_ignore_ascii_case(key))
        })
        .collect();
    Value::Object(kept)
}

/// Flatten a row into the public record envelope: the cells plus the
/// row id, timestamps, availability, and the owning table's identity.
fn record_payload(table: &UserTable, row: TableRow) -> Value {
    flatten_record(
        row.data.0,
        row.id,
        row.created_at,
        table.id,
        &table.name,
        table.table_type,
    )
}

/// Flatten a cross-table record into the same envelope.
fn cross_record_payload(record: TableRecord) -> Value {
    flatten_record(
        record.data.0,
        record.id,
        record.created_at,
        record.table_id,
        &record.table_name,
        record.table_type,
    )
}

fn flatten_record(
    data: Map<String, Value>,
    row_id: Uuid,
    created_at: chrono::DateTime<chrono::Utc>,
    table_id: Uuid,
    table_name: &str,
    table_type: TableType,
) -> Value {
    let available = availability(table_type, &data);

    let mut payload = Map::new();
    for (key, value) in data {
        payload.insert(key, value);
    }
    payload.insert("id".to_string(), json!(row_id));
    payload.insert("table_id".to_string(), json!(table_id));
    payload.insert("table_name".to_string(), json!(table_name));
    payload.insert("table_type".to_string(), json!(table_type));
    payload.insert("created_at".to_string(), json!(created_at));
    payload.insert("available".to_string(), available);

    Value::Object(payload)
}

// ============================================================================
// Tests
// ============================================================================
