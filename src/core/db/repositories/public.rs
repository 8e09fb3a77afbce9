//! Public catalog repository.
//!
//! Read-only queries backing the unauthenticated storefront surface.
//! Only sale/rent tables whose visibility is public or shared are
//! reachable here; everything else behaves as if it does not exist.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::core::db::models::{TableRow, UserTable};
use crate::core::protection::{RentalPeriod, TableType};

/// Public repository error types.
#[derive(Debug, thiserror::Error)]
pub enum PublicRepositoryError {
    #[error("Table not found")]
    TableNotFound,

    #[error("Record not found")]
    RecordNotFound,

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Catalog listing entry: table metadata plus its row count.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PublicTableSummary {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub table_type: TableType,
    pub rental_period: Option<RentalPeriod>,
    pub row_count: i64,
}

/// A page of filtered records with the unpaged total.
#[derive(Debug)]
pub struct RecordPage {
    pub rows: Vec<TableRow>,
    pub total: i64,
}

/// A record joined with the table that owns it, for cross-table reads.
#[derive(Debug, Clone, FromRow)]
pub struct TableRecord {
    pub id: Uuid,
    pub table_id: Uuid,
    pub table_name: String,
    pub table_type: TableType,
    pub data: sqlx::types::Json<serde_json::Map<String, serde_json::Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A page of cross-table records with the unpaged total.
#[derive(Debug)]
pub struct TableRecordPage {
    pub rows: Vec<TableRecord>,
    pub total: i64,
}

/// Distinct values of one column gathered across every reachable table
/// that carries it.
#[derive(Debug)]
pub struct ColumnValues {
    pub values: Vec<String>,
    pub tables_sampled: i64,
}

const PUBLIC_TABLE_FILTER: &str =
    "visibility IN ('public', 'shared') AND table_type IN ('sale', 'rent')";

/// Public catalog repository for read-only database queries.
#[derive(Clone)]
pub struct PublicRepository {
    pool: PgPool,
}

impl PublicRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch a table only if it is publicly reachable.
    pub async fn visible_table(
        &self,
        table_id: Uuid,
    ) -> Result<UserTable, PublicRepositoryError> {
        sqlx::query_as::<_, UserTable>(&format!(
            "SELECT id, name, description, owner_kind, owner_id, visibility, table_type, \
                    product_id_column, rental_period, created_at, updated_at \
             FROM user_tables WHERE id = $1 AND {PUBLIC_TABLE_FILTER}"
        ))
        .bind(table_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(PublicRepositoryError::TableNotFound)
    }

    /// List reachable tables with their row counts, optionally narrowed
    /// to one table type.
    pub async fn list_tables(
        &self,
        table_type: Option<TableType>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PublicTableSummary>, PublicRepositoryError> {
        let summaries = sqlx::query_as::<_, PublicTableSummary>(&format!(
            r#"
            SELECT t.id, t.name, t.description, t.table_type, t.rental_period,
                   (SELECT COUNT(*) FROM table_rows r WHERE r.table_id = t.id) AS row_count
            FROM user_tables t
            WHERE {PUBLIC_TABLE_FILTER}
              AND ($1::varchar IS NULL OR t.table_type = $1)
            ORDER BY t.updated_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(table_type)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(summaries)
    }

    /// Find reachable tables containing all of the given column names
    /// (matched case-insensitively).
    pub async fn search_by_columns(
        &self,
        column_names: &[String],
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PublicTableSummary>, PublicRepositoryError> {
        let summaries = sqlx::query_as::<_, PublicTableSummary>(&format!(
            r#"
            SELECT t.id, t.name, t.description, t.table_type, t.rental_period,
                   (SELECT COUNT(*) FROM table_rows r WHERE r.table_id = t.id) AS row_count
            FROM user_tables t
            WHERE {PUBLIC_TABLE_FILTER}
              AND NOT EXISTS (
                  SELECT 1 FROM unnest($1::text[]) AS want(name)
                  WHERE NOT EXISTS (
                      SELECT 1 FROM table_columns c
                      WHERE c.table_id = t.id AND lower(c.name) = lower(want.name)
                  )
              )
            ORDER BY t.updated_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(column_names)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(summaries)
    }

    /// Fetch one record of a reachable table.
    pub async fn find_record(
        &self,
        table_id: Uuid,
        row_id: Uuid,
    ) -> Result<TableRow, PublicRepositoryError> {
        self.visible_table(table_id).await?;

        sqlx::query_as::<_, TableRow>(
            "SELECT * FROM table_rows WHERE table_id = $1 AND id = $2",
        )
        .bind(table_id)
        .bind(row_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(PublicRepositoryError::RecordNotFound)
    }

    /// Page through a reachable table's records, optionally filtered by
    /// exact cell matches. Filter keys must name existing columns; both
    /// keys and values are bound, never interpolated.
    pub async fn query_records(
        &self,
        table_id: Uuid,
        filters: &[(String, String)],
        limit: i64,
        offset: i64,
    ) -> Result<RecordPage, PublicRepositoryError> {
        self.visible_table(table_id).await?;

        for (name, _) in filters {
            self.require_column(table_id, name).await?;
        }

        let mut count_query: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM table_rows WHERE table_id = ");
        count_query.push_bind(table_id);
        push_filters(&mut count_query, filters);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM table_rows WHERE table_id = ");
        query.push_bind(table_id);
        push_filters(&mut query, filters);
        query.push(" ORDER BY updated_at DESC, id ASC LIMIT ");
        query.push_bind(limit);
        query.push(" OFFSET ");
        query.push_bind(offset);

        let rows = query
            .build_query_as::<TableRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(RecordPage { rows, total })
    }

    /// Page through records of every reachable table at once, newest
    /// updates first. Rows carry their owning table's identity so mixed
    /// results stay attributable. Filter keys that no table defines
    /// simply match nothing.
    pub async fn query_records_all(
        &self,
        table_type: Option<TableType>,
        filters: &[(String, String)],
        limit: i64,
        offset: i64,
    ) -> Result<TableRecordPage, PublicRepositoryError> {
        let mut count_query: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT COUNT(*) FROM table_rows r \
             JOIN user_tables t ON t.id = r.table_id \
             WHERE {PUBLIC_TABLE_FILTER}"
        ));
        push_type_filter(&mut count_query, table_type);
        push_filters(&mut count_query, filters);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT r.id, r.table_id, t.name AS table_name, t.table_type, \
                    r.data, r.created_at, r.updated_at \
             FROM table_rows r \
             JOIN user_tables t ON t.id = r.table_id \
             WHERE {PUBLIC_TABLE_FILTER}"
        ));
        push_type_filter(&mut query, table_type);
        push_filters(&mut query, filters);
        query.push(" ORDER BY r.updated_at DESC, r.id ASC LIMIT ");
        query.push_bind(limit);
        query.push(" OFFSET ");
        query.push_bind(offset);

        let rows = query
            .build_query_as::<TableRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok(TableRecordPage { rows, total })
    }

    /// Distinct non-null values of one column across a reachable table.
    pub async fn distinct_values(
        &self,
        table_id: Uuid,
        column: &str,
    ) -> Result<Vec<String>, PublicRepositoryError> {
        self.visible_table(table_id).await?;
        let canonical = self.require_column(table_id, column).await?;

        let values: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT data ->> $2 FROM table_rows \
             WHERE table_id = $1 AND data ->> $2 IS NOT NULL \
             ORDER BY 1",
        )
        .bind(table_id)
        .bind(&canonical)
        .fetch_all(&self.pool)
        .await?;

        Ok(values)
    }

    /// Distinct non-null values of a column across every reachable table
    /// that defines it, along with how many tables were consulted. A
    /// column nobody defines yields an empty answer, not an error.
    pub async fn distinct_values_all(
        &self,
        column: &str,
    ) -> Result<ColumnValues, PublicRepositoryError> {
        let tables_sampled: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM user_tables t \
             WHERE {PUBLIC_TABLE_FILTER} \
               AND EXISTS ( \
                   SELECT 1 FROM table_columns c \
                   WHERE c.table_id = t.id AND lower(c.name) = lower($1) \
               )"
        ))
        .bind(column)
        .fetch_one(&self.pool)
        .await?;

        // Joining through table_columns resolves each table's own
        // spelling of the column name.
        let values: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT DISTINCT r.data ->> c.name \
             FROM user_tables t \
             JOIN table_columns c \
               ON c.table_id = t.id AND lower(c.name) = lower($1) \
             JOIN table_rows r ON r.table_id = t.id \
             WHERE {PUBLIC_TABLE_FILTER} AND r.data ->> c.name IS NOT NULL \
             ORDER BY 1"
        ))
        .bind(column)
        .fetch_all(&self.pool)
        .await?;

        Ok(ColumnValues {
            values,
            tables_sampled,
        })
    }

    /// Resolve a column name case-insensitively to its stored spelling.
    async fn require_column(
        &self,
        table_id: Uuid,
        name: &str,
    ) -> Result<String, PublicRepositoryError> {
        sqlx::query_scalar(
            "SELECT name FROM table_columns \
             WHERE table_id = $1 AND lower(name) = lower($2)",
        )
        .bind(table_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PublicRepositoryError::UnknownColumn(name.to_string()))
    }
}

fn push_type_filter(query: &mut QueryBuilder<'_, Postgres>, table_type: Option<TableType>) {
    if let Some(kind) = table_type {
        query.push(" AND t.table_type = ");
        query.push_bind(kind);
    }
}

fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filters: &[(String, String)]) {
    for (name, value) in filters {
        query.push(" AND data ->> ");
        query.push_bind(name.clone());
        query.push(" = ");
        query.push_bind(value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::access::{OwnerIdentity, Visibility};
    use crate::core::db::models::{ColumnType, CreateColumn, CreateTable};
    use crate::core::db::pool::{DbConfig, create_pool_with_migrations};
    use crate::core::db::repositories::row::RowRepository;
    use crate::core::db::repositories::table::TableRepository;
    use serde_json::json;

    async fn test_pool() -> PgPool {
        let config = DbConfig::from_env().expect("DATABASE_URL must be set for tests");
        create_pool_with_migrations(&config)
            .await
            .expect("Failed to create test pool")
    }

    async fn sale_table(pool: &PgPool, name: &str, visibility: Visibility) -> Uuid {
        let dto = CreateTable {
            name: name.to_string(),
            description: None,
            visibility,
            table_type: TableType::Sale,
            product_id_column: None,
            rental_period: None,
            columns: vec![CreateColumn {
                name: "title".to_string(),
                column_type: ColumnType::Text,
                is_required: true,
                allow_duplicates: true,
                default_value: None,
                position: None,
            }],
        };
        let (table, _) = TableRepository::new(pool.clone())
            .create(&dto, &OwnerIdentity::User(Uuid::new_v4()))
            .await
            .unwrap();
        table.id
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_private_tables_are_invisible() {
        let pool = test_pool().await;
        let public_id = sale_table(&pool, "Pub Catalog A", Visibility::Public).await;
        let private_id = sale_table(&pool, "Pub Catalog B", Visibility::Private).await;
        let repo = PublicRepository::new(pool.clone());

        assert!(repo.visible_table(public_id).await.is_ok());
        let err = repo.visible_table(private_id).await.unwrap_err();
        assert!(matches!(err, PublicRepositoryError::TableNotFound));

        let tables = repo.list_tables(None, 100, 0).await.unwrap();
        assert!(tables.iter().any(|t| t.id == public_id));
        assert!(!tables.iter().any(|t| t.id == private_id));

        let table_repo = TableRepository::new(pool);
        table_repo.delete(public_id).await.unwrap();
        table_repo.delete(private_id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_query_records_filters_and_counts() {
        let pool = test_pool().await;
        let table_id = sale_table(&pool, "Pub Filter Test", Visibility::Public).await;
        let repo = PublicRepository::new(pool.clone());
        let rows = RowRepository::new(pool.clone());
        let author = OwnerIdentity::User(Uuid::new_v4());

        for (title, price) in [("a", 5), ("b", 5), ("c", 7)] {
            let mut data = serde_json::Map::new();
            data.insert("title".to_string(), json!(title));
            data.insert("price".to_string(), json!(price));
            rows.insert(table_id, &data, &author).await.unwrap();
        }

        let page = repo
            .query_records(table_id, &[("price".to_string(), "5".to_string())], 1, 0)
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.rows.len(), 1);
        // Most recently updated record comes first.
        assert_eq!(page.rows[0].data.0["title"], json!("b"));

        let err = repo
            .query_records(table_id, &[("ghost".to_string(), "x".to_string())], 10, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, PublicRepositoryError::UnknownColumn(_)));

        let values = repo.distinct_values(table_id, "price").await.unwrap();
        assert_eq!(values, vec!["5".to_string(), "7".to_string()]);

        TableRepository::new(pool).delete(table_id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_cross_table_records_and_values() {
        let pool = test_pool().await;
        let first = sale_table(&pool, "Pub Cross A", Visibility::Public).await;
        let second = sale_table(&pool, "Pub Cross B", Visibility::Shared).await;
        let hidden = sale_table(&pool, "Pub Cross C", Visibility::Private).await;
        let repo = PublicRepository::new(pool.clone());
        let rows = RowRepository::new(pool.clone());
        let author = OwnerIdentity::User(Uuid::new_v4());

        for (table_id, title) in [
            (first, "cross-a"),
            (second, "cross-b"),
            (hidden, "cross-hidden"),
        ] {
            let mut data = serde_json::Map::new();
            data.insert("title".to_string(), json!(title));
            data.insert("price".to_string(), json!(4242));
            rows.insert(table_id, &data, &author).await.unwrap();
        }

        let page = repo
            .query_records_all(
                None,
                &[("price".to_string(), "4242".to_string())],
                10,
                0,
            )
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert!(page.rows.iter().all(|r| r.table_id != hidden));
        let names: Vec<&str> = page.rows.iter().map(|r| r.table_name.as_str()).collect();
        assert!(names.contains(&"Pub Cross A"));
        assert!(names.contains(&"Pub Cross B"));

        let gathered = repo.distinct_values_all("title").await.unwrap();
        assert!(gathered.tables_sampled >= 2);
        assert!(gathered.values.contains(&"cross-a".to_string()));
        assert!(gathered.values.contains(&"cross-b".to_string()));
        assert!(!gathered.values.contains(&"cross-hidden".to_string()));

        let table_repo = TableRepository::new(pool);
        for id in [first, second, hidden] {
            table_repo.delete(id).await.unwrap();
        }
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_search_by_columns_requires_all_names() {
        let pool = test_pool().await;
        let table_id = sale_table(&pool, "Pub Search Test", Visibility::Shared).await;
        let repo = PublicRepository::new(pool.clone());

        let hits = repo
            .search_by_columns(&["TITLE".to_string(), "price".to_string()], 100, 0)
            .await
            .unwrap();
        assert!(hits.iter().any(|t| t.id == table_id));

        let misses = repo
            .search_by_columns(&["title".to_string(), "ghost".to_string()], 100, 0)
            .await
            .unwrap();
        assert!(!misses.iter().any(|t| t.id == table_id));

        TableRepository::new(pool).delete(table_id).await.unwrap();
    }
}
