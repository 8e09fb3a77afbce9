//! Row repository.
//!
//! Rows hold semi-structured JSONB validated against the table's column
//! definitions at write time: unknown keys are rejected, declared types
//! enforced, defaults applied, and single-column uniqueness checked for
//! columns with `allow_duplicates = false`. Values are stored in
//! canonical JSON form so uniqueness and filtering compare like with
//! like ("5" and 5 both land as the number 5).

use std::collections::HashMap;

use serde_json::{Map, Value};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::core::access::OwnerIdentity;
use crate::core::db::models::{TableColumn, TableRow};
use crate::core::validation::{ValidationError, check_value};

/// Row repository error types.
#[derive(Debug, thiserror::Error)]
pub enum RowRepositoryError {
    #[error("Table not found")]
    TableNotFound,

    #[error("Row not found")]
    NotFound,

    #[error("Value for column '{column}' already exists in another row")]
    DuplicateValue { column: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Row repository for database operations.
#[derive(Clone)]
pub struct RowRepository {
    pool: PgPool,
}

impl RowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn columns(&self, table_id: Uuid) -> Result<Vec<TableColumn>, RowRepositoryError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM user_tables WHERE id = $1)")
                .bind(table_id)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Err(RowRepositoryError::TableNotFound);
        }

        let columns = sqlx::query_as::<_, TableColumn>(
            "SELECT * FROM table_columns WHERE table_id = $1 ORDER BY position ASC",
        )
        .bind(table_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(columns)
    }

    /// One row per unique-constrained column present in the candidate
    /// data; `exclude` skips the row being updated.
    async fn check_unique(
        &self,
        table_id: Uuid,
        columns: &[TableColumn],
        data: &Map<String, Value>,
        exclude: Option<Uuid>,
    ) -> Result<(), RowRepositoryError> {
        for column in columns.iter().filter(|c| !c.allow_duplicates) {
            let Some(value) = data.get(&column.name) else {
                continue;
            };
            let cell = check_value(&column.name, column.column_type, value)?;

            let taken: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM table_rows \
                 WHERE table_id = $1 AND data ->> $2 = $3 \
                   AND ($4::uuid IS NULL OR id <> $4))",
            )
            .bind(table_id)
            .bind(&column.name)
            .bind(cell.as_text())
            .bind(exclude)
            .fetch_one(&self.pool)
            .await?;

            if taken {
                return Err(RowRepositoryError::DuplicateValue {
                    column: column.name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Insert a row.
    ///
    /// Keys are matched to columns case-insensitively and stored under
    /// the column's canonical name; a key matching no column is an
    /// error. Missing cells take the column default when one is set,
    /// then required columns must all be present.
    pub async fn insert(
        &self,
        table_id: Uuid,
        data: &Map<String, Value>,
        created_by: &OwnerIdentity,
    ) -> Result<TableRow, RowRepositoryError> {
        let columns = self.columns(table_id).await?;
        let by_name: HashMap<String, &TableColumn> = columns
            .iter()
            .map(|c| (c.name.to_lowercase(), c))
            .collect();

        let mut canonical = Map::new();
        for (key, value) in data {
            let column = by_name
                .get(&key.to_lowercase())
                .ok_or_else(|| ValidationError::UnknownColumn(key.clone()))?;
            if value.is_null() {
                continue;
            }
            let cell = check_value(&column.name, column.column_type, value)?;
            canonical.insert(column.name.clone(), cell.to_json());
        }

        for column in &columns {
            if canonical.contains_key(&column.name) {
                continue;
            }
            if let Some(ref default) = column.default_value {
                let cell = check_value(
                    &column.name,
                    column.column_type,
                    &Value::String(default.clone()),
                )?;
                canonical.insert(column.name.clone(), cell.to_json());
            } else if column.is_required {
                return Err(ValidationError::MissingRequired(column.name.clone()).into());
            }
        }

        self.check_unique(table_id, &columns, &canonical, None).await?;

        let row = sqlx::query_as::<_, TableRow>(
            r#"
            INSERT INTO table_rows (table_id, data, created_by_kind, created_by_id)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(table_id)
        .bind(Json(&canonical))
        .bind(created_by.kind())
        .bind(created_by.id())
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(%table_id, row_id = %row.id, "Inserted row");
        Ok(row)
    }

    /// Patch a row. Only supplied keys are touched; an explicit null
    /// removes the cell, which is rejected for required columns.
    pub async fn update(
        &self,
        table_id: Uuid,
        row_id: Uuid,
        patch: &Map<String, Value>,
    ) -> Result<TableRow, RowRepositoryError> {
        let columns = self.columns(table_id).await?;
        let by_name: HashMap<String, &TableColumn> = columns
            .iter()
            .map(|c| (c.name.to_lowercase(), c))
            .collect();

        let mut merge = Map::new();
        let mut remove: Vec<String> = Vec::new();
        for (key, value) in patch {
            let column = by_name
                .get(&key.to_lowercase())
                .ok_or_else(|| ValidationError::UnknownColumn(key.clone()))?;
            if value.is_null() {
                if column.is_required {
                    return Err(ValidationError::MissingRequired(column.name.clone()).into());
                }
                remove.push(column.name.clone());
            } else {
                let cell = check_value(&column.name, column.column_type, value)?;
                merge.insert(column.name.clone(), cell.to_json());
            }
        }

        self.check_unique(table_id, &columns, &merge, Some(row_id))
            .await?;

        let row = sqlx::query_as::<_, TableRow>(
            r#"
            UPDATE table_rows
            SET data = (data || $3::jsonb) - $4::text[], updated_at = now()
            WHERE table_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(table_id)
        .bind(row_id)
        .bind(Json(&merge))
        .bind(&remove)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RowRepositoryError::NotFound)?;

        Ok(row)
    }

    pub async fn find_by_id(
        &self,
        table_id: Uuid,
        row_id: Uuid,
    ) -> Result<Option<TableRow>, RowRepositoryError> {
        let row = sqlx::query_as::<_, TableRow>(
            "SELECT * FROM table_rows WHERE table_id = $1 AND id = $2",
        )
        .bind(table_id)
        .bind(row_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// List rows in insertion order, oldest first.
    pub async fn list(
        &self,
        table_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TableRow>, RowRepositoryError> {
        let rows = sqlx::query_as::<_, TableRow>(
            "SELECT * FROM table_rows WHERE table_id = $1 \
             ORDER BY created_at ASC, id ASC LIMIT $2 OFFSET $3",
        )
        .bind(table_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn count(&self, table_id: Uuid) -> Result<i64, RowRepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM table_rows WHERE table_id = $1")
                .bind(table_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    pub async fn delete(&self, table_id: Uuid, row_id: Uuid) -> Result<(), RowRepositoryError> {
        let result = sqlx::query("DELETE FROM table_rows WHERE table_id = $1 AND id = $2")
            .bind(table_id)
            .bind(row_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RowRepositoryError::NotFound);
        }

        Ok(())
    }

    /// Delete every row of a table; the schema stays. Returns the
    /// number of rows removed.
    pub async fn clear_table(&self, table_id: Uuid) -> Result<u64, RowRepositoryError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM user_tables WHERE id = $1)")
                .bind(table_id)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Err(RowRepositoryError::TableNotFound);
        }

        let result = sqlx::query("DELETE FROM table_rows WHERE table_id = $1")
            .bind(table_id)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        tracing::info!(%table_id, removed, "Cleared table rows");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::access::Visibility;
    use crate::core::db::models::{ColumnType, CreateColumn, CreateTable};
    use crate::core::db::pool::{DbConfig, create_pool_with_migrations};
    use crate::core::db::repositories::table::TableRepository;
    use crate::core::protection::TableType;
    use serde_json::json;

    async fn test_pool() -> PgPool {
        let config = DbConfig::from_env().expect("DATABASE_URL must be set for tests");
        create_pool_with_migrations(&config)
            .await
            .expect("Failed to create test pool")
    }

    fn column(name: &str, ty: ColumnType) -> CreateColumn {
        CreateColumn {
            name: name.to_string(),
            column_type: ty,
            is_required: false,
            allow_duplicates: true,
            default_value: None,
            position: None,
        }
    }

    /// title (text, required), serial (text, unique), stock (number,
    /// default "5"), active (boolean).
    async fn fixture_table(pool: &PgPool, name: &str) -> Uuid {
        let mut title = column("title", ColumnType::Text);
        title.is_required = true;
        let mut serial = column("serial", ColumnType::Text);
        serial.allow_duplicates = false;
        let mut stock = column("stock", ColumnType::Number);
        stock.default_value = Some("5".to_string());

        let dto = CreateTable {
            name: name.to_string(),
            description: None,
            visibility: Visibility::Private,
            table_type: TableType::Default,
            product_id_column: None,
            rental_period: None,
            columns: vec![title, serial, stock, column("active", ColumnType::Boolean)],
        };
        let repo = TableRepository::new(pool.clone());
        let (table, _) = repo
            .create(&dto, &OwnerIdentity::User(Uuid::new_v4()))
            .await
            .unwrap();
        table.id
    }

    fn data(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_insert_applies_defaults_and_canonicalizes() {
        let pool = test_pool().await;
        let table_id = fixture_table(&pool, "Row Insert Test").await;
        let repo = RowRepository::new(pool.clone());
        let author = OwnerIdentity::User(Uuid::new_v4());

        // Mixed-case key, stringly-typed boolean: both normalized.
        let row = repo
            .insert(
                table_id,
                &data(&[("Title", json!("Widget")), ("ACTIVE", json!("true"))]),
                &author,
            )
            .await
            .unwrap();

        assert_eq!(row.data.0.get("title"), Some(&json!("Widget")));
        assert_eq!(row.data.0.get("active"), Some(&json!(true)));
        assert_eq!(row.data.0.get("stock"), Some(&json!(5)));
        assert!(!row.data.0.contains_key("serial"));
        assert_eq!(row.created_by(), author);

        TableRepository::new(pool).delete(table_id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_insert_rejects_unknown_and_missing_required() {
        let pool = test_pool().await;
        let table_id = fixture_table(&pool, "Row Reject Test").await;
        let repo = RowRepository::new(pool.clone());
        let author = OwnerIdentity::User(Uuid::new_v4());

        let err = repo
            .insert(
                table_id,
                &data(&[("title", json!("x")), ("ghost", json!(1))]),
                &author,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RowRepositoryError::Validation(ValidationError::UnknownColumn(_))
        ));

        let err = repo
            .insert(table_id, &data(&[("active", json!(true))]), &author)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RowRepositoryError::Validation(ValidationError::MissingRequired(_))
        ));

        let err = repo
            .insert(
                table_id,
                &data(&[("title", json!("x")), ("stock", json!("lots"))]),
                &author,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RowRepositoryError::Validation(ValidationError::TypeMismatch { .. })
        ));

        TableRepository::new(pool).delete(table_id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_unique_column_blocks_duplicates() {
        let pool = test_pool().await;
        let table_id = fixture_table(&pool, "Row Unique Test").await;
        let repo = RowRepository::new(pool.clone());
        let author = OwnerIdentity::User(Uuid::new_v4());

        let first = repo
            .insert(
                table_id,
                &data(&[("title", json!("a")), ("serial", json!("SN-1"))]),
                &author,
            )
            .await
            .unwrap();

        let err = repo
            .insert(
                table_id,
                &data(&[("title", json!("b")), ("serial", json!("SN-1"))]),
                &author,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RowRepositoryError::DuplicateValue { ref column } if column == "serial"
        ));

        // Updating a row to its own value is not a duplicate.
        let updated = repo
            .update(table_id, first.id, &data(&[("serial", json!("SN-1"))]))
            .await
            .unwrap();
        assert_eq!(updated.data.0.get("serial"), Some(&json!("SN-1")));

        TableRepository::new(pool).delete(table_id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_update_merges_and_null_removes() {
        let pool = test_pool().await;
        let table_id = fixture_table(&pool, "Row Update Test").await;
        let repo = RowRepository::new(pool.clone());
        let author = OwnerIdentity::User(Uuid::new_v4());

        let row = repo
            .insert(
                table_id,
                &data(&[("title", json!("a")), ("active", json!(false))]),
                &author,
            )
            .await
            .unwrap();

        let updated = repo
            .update(
                table_id,
                row.id,
                &data(&[("stock", json!(9)), ("active", Value::Null)]),
            )
            .await
            .unwrap();

        assert_eq!(updated.data.0.get("title"), Some(&json!("a")));
        assert_eq!(updated.data.0.get("stock"), Some(&json!(9)));
        assert!(!updated.data.0.contains_key("active"));
        assert!(updated.updated_at > row.updated_at);

        // Removing a required cell is refused.
        let err = repo
            .update(table_id, row.id, &data(&[("title", Value::Null)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RowRepositoryError::Validation(ValidationError::MissingRequired(_))
        ));

        TableRepository::new(pool).delete(table_id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_clear_table_reports_count() {
        let pool = test_pool().await;
        let table_id = fixture_table(&pool, "Row Clear Test").await;
        let repo = RowRepository::new(pool.clone());
        let author = OwnerIdentity::User(Uuid::new_v4());

        for i in 0..3 {
            repo.insert(table_id, &data(&[("title", json!(format!("r{i}")))]), &author)
                .await
                .unwrap();
        }
        assert_eq!(repo.count(table_id).await.unwrap(), 3);

        let removed = repo.clear_table(table_id).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(repo.count(table_id).await.unwrap(), 0);

        let err = repo
            .clear_table(Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, RowRepositoryError::TableNotFound));

        TableRepository::new(pool).delete(table_id).await.unwrap();
    }
}
