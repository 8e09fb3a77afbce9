//! Column repository.
//!
//! Owns column ordering and the protected-column policy. Every mutation
//! that touches positions runs inside a transaction holding a per-table
//! advisory lock, so concurrent writers against the same table serialize
//! instead of tripping the unique (table_id, position) index.
//!
//! Positions are dense 0..N-1 for user columns; auto-managed columns of
//! sale/rent tables sit past PROTECTED_POSITION_BASE so they always
//! render after user columns. Deleting a column leaves a gap on purpose;
//! readers sort by position, they never assume contiguity.

use serde::Deserialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::core::db::models::{CreateColumn, TableColumn, UpdateColumn};
use crate::core::protection::{
    PROTECTED_POSITION_BASE, TableType, is_protected_name, required_columns_for,
};
use crate::core::validation::{ValidationError, validate_name};

/// Column repository error types.
#[derive(Debug, thiserror::Error)]
pub enum ColumnRepositoryError {
    #[error("Table not found")]
    TableNotFound,

    #[error("Column not found")]
    NotFound,

    #[error("Column '{0}' is managed by the table type and cannot be changed")]
    Protected(String),

    #[error("A column named '{0}' already exists in this table")]
    DuplicateName(String),

    #[error("Concurrent modification, please retry")]
    Conflict,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Direction of a single-step reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    Up,
    Down,
}

/// Map a unique-index violation onto a domain error; anything else
/// passes through as a database error.
fn map_unique_violation(err: sqlx::Error, name: &str) -> ColumnRepositoryError {
    if let sqlx::Error::Database(db) = &err {
        match db.constraint() {
            Some("table_columns_name_ci_idx") => {
                return ColumnRepositoryError::DuplicateName(name.to_string());
            }
            Some("table_columns_position_idx") => return ColumnRepositoryError::Conflict,
            _ => {}
        }
    }
    ColumnRepositoryError::Database(err)
}

/// Serialize writers against one table for the rest of the transaction.
async fn lock_table(
    tx: &mut Transaction<'_, Postgres>,
    table_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
        .bind(table_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Next free user-column position, ignoring the protected range.
async fn next_user_position(
    tx: &mut Transaction<'_, Postgres>,
    table_id: Uuid,
) -> Result<i32, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM table_columns \
         WHERE table_id = $1 AND position < $2",
    )
    .bind(table_id)
    .bind(PROTECTED_POSITION_BASE)
    .fetch_one(&mut **tx)
    .await
}

/// Add any missing auto-managed columns for the table type.
///
/// Runs on the caller's transaction so table creation and type changes
/// get the columns atomically. Idempotent: existing columns (matched
/// case-insensitively) are left alone, whatever their settings. Returns
/// how many columns were added.
pub(crate) async fn ensure_required_columns_on(
    tx: &mut Transaction<'_, Postgres>,
    table_id: Uuid,
    table_type: TableType,
) -> Result<u32, sqlx::Error> {
    let required = required_columns_for(table_type);
    if required.is_empty() {
        return Ok(0);
    }

    lock_table(tx, table_id).await?;

    let mut added = 0u32;
    for spec in required {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM table_columns \
             WHERE table_id = $1 AND lower(name) = lower($2))",
        )
        .bind(table_id)
        .bind(spec.name)
        .fetch_one(&mut **tx)
        .await?;
        if exists {
            continue;
        }

        let max_position: Option<i32> =
            sqlx::query_scalar("SELECT MAX(position) FROM table_columns WHERE table_id = $1")
                .bind(table_id)
                .fetch_one(&mut **tx)
                .await?;
        let position = max_position
            .map(|p| p + 1)
            .unwrap_or(0)
            .max(PROTECTED_POSITION_BASE);

        sqlx::query(
            r#"
            INSERT INTO table_columns
                (table_id, name, column_type, is_required, allow_duplicates,
                 default_value, position)
            VALUES ($1, $2, $3, $4, true, $5, $6)
            "#,
        )
        .bind(table_id)
        .bind(spec.name)
        .bind(spec.column_type)
        .bind(spec.is_required)
        .bind(spec.default_value)
        .bind(position)
        .execute(&mut **tx)
        .await?;

        added += 1;
    }

    if added > 0 {
        tracing::info!(%table_id, ?table_type, added, "Added managed columns");
    }

    Ok(added)
}

/// Column repository for database operations.
#[derive(Clone)]
pub struct ColumnRepository {
    pool: PgPool,
}

impl ColumnRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn table_type(&self, table_id: Uuid) -> Result<TableType, ColumnRepositoryError> {
        sqlx::query_scalar("SELECT table_type FROM user_tables WHERE id = $1")
            .bind(table_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(ColumnRepositoryError::TableNotFound)
    }

    /// List the columns of a table in display order.
    pub async fn list(&self, table_id: Uuid) -> Result<Vec<TableColumn>, ColumnRepositoryError> {
        let columns = sqlx::query_as::<_, TableColumn>(
            "SELECT * FROM table_columns WHERE table_id = $1 ORDER BY position ASC",
        )
        .bind(table_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(columns)
    }

    pub async fn find_by_id(
        &self,
        table_id: Uuid,
        column_id: Uuid,
    ) -> Result<Option<TableColumn>, ColumnRepositoryError> {
        let column = sqlx::query_as::<_, TableColumn>(
            "SELECT * FROM table_columns WHERE table_id = $1 AND id = $2",
        )
        .bind(table_id)
        .bind(column_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(column)
    }

    /// Add a column, appending unless an explicit position is given.
    ///
    /// An explicit position shifts every column at or past it one step
    /// right, one row at a time from the highest position down so the
    /// unique index never sees a collision. Out-of-range positions clamp
    /// to the ends.
    pub async fn add(
        &self,
        table_id: Uuid,
        dto: &CreateColumn,
    ) -> Result<TableColumn, ColumnRepositoryError> {
        validate_name(&dto.name)?;
        self.table_type(table_id).await?;

        let mut tx = self.pool.begin().await?;
        lock_table(&mut tx, table_id).await?;

        let duplicate: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM table_columns \
             WHERE table_id = $1 AND lower(name) = lower($2))",
        )
        .bind(table_id)
        .bind(dto.name.trim())
        .fetch_one(&mut *tx)
        .await?;
        if duplicate {
            return Err(ColumnRepositoryError::DuplicateName(dto.name.trim().to_string()));
        }

        let next_free = next_user_position(&mut tx, table_id).await?;
        let target = dto
            .position
            .map(|p| p.clamp(0, next_free))
            .unwrap_or(next_free);

        if target < next_free {
            let to_shift: Vec<Uuid> = sqlx::query_scalar(
                "SELECT id FROM table_columns \
                 WHERE table_id = $1 AND position >= $2 \
                 ORDER BY position DESC",
            )
            .bind(table_id)
            .bind(target)
            .fetch_all(&mut *tx)
            .await?;

            for id in to_shift {
                sqlx::query("UPDATE table_columns SET position = position + 1 WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let column = sqlx::query_as::<_, TableColumn>(
            r#"
            INSERT INTO table_columns
                (table_id, name, column_type, is_required, allow_duplicates,
                 default_value, position)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(table_id)
        .bind(dto.name.trim())
        .bind(dto.column_type)
        .bind(dto.is_required)
        .bind(dto.allow_duplicates)
        .bind(&dto.default_value)
        .bind(target)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, dto.name.trim()))?;

        tx.commit().await?;

        tracing::info!(%table_id, column_id = %column.id, position = target, "Added column");
        Ok(column)
    }

    /// Sparse column update. Renaming a protected column of a sale/rent
    /// table is rejected; everything else goes through as supplied.
    pub async fn update(
        &self,
        table_id: Uuid,
        column_id: Uuid,
        updates: &UpdateColumn,
    ) -> Result<TableColumn, ColumnRepositoryError> {
        let table_type = self.table_type(table_id).await?;
        let current = self
            .find_by_id(table_id, column_id)
            .await?
            .ok_or(ColumnRepositoryError::NotFound)?;

        if let Some(ref name) = updates.name {
            validate_name(name)?;
            if name.trim() != current.name && is_protected_name(table_type, &current.name) {
                return Err(ColumnRepositoryError::Protected(current.name));
            }
        }

        let column = sqlx::query_as::<_, TableColumn>(
            r#"
            UPDATE table_columns
            SET
                name = COALESCE($3, name),
                column_type = COALESCE($4, column_type),
                is_required = COALESCE($5, is_required),
                allow_duplicates = COALESCE($6, allow_duplicates),
                default_value = CASE WHEN $7::boolean THEN $8 ELSE default_value END,
                updated_at = now()
            WHERE table_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(table_id)
        .bind(column_id)
        .bind(updates.name.as_deref().map(str::trim))
        .bind(updates.column_type)
        .bind(updates.is_required)
        .bind(updates.allow_duplicates)
        .bind(updates.default_value.is_some())
        .bind(updates.default_value.as_ref().and_then(|v| v.as_deref()))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, updates.name.as_deref().unwrap_or(&current.name)))?
        .ok_or(ColumnRepositoryError::NotFound)?;

        Ok(column)
    }

    /// Delete a column. The position gap it leaves is tolerated; order
    /// comes from sorting, not contiguity. Row data keyed by the column
    /// is left in place and simply stops being part of the schema.
    pub async fn delete(
        &self,
        table_id: Uuid,
        column_id: Uuid,
    ) -> Result<(), ColumnRepositoryError> {
        let table_type = self.table_type(table_id).await?;
        let column = self
            .find_by_id(table_id, column_id)
            .await?
            .ok_or(ColumnRepositoryError::NotFound)?;

        if is_protected_name(table_type, &column.name) {
            return Err(ColumnRepositoryError::Protected(column.name));
        }

        sqlx::query("DELETE FROM table_columns WHERE table_id = $1 AND id = $2")
            .bind(table_id)
            .bind(column_id)
            .execute(&self.pool)
            .await?;

        tracing::info!(%table_id, %column_id, "Deleted column");
        Ok(())
    }

    /// Swap a column with its neighbor in the given direction.
    ///
    /// At a boundary this is a no-op, not an error. Protected columns
    /// are pinned and never take part in a swap, from either side.
    pub async fn move_column(
        &self,
        table_id: Uuid,
        column_id: Uuid,
        direction: MoveDirection,
    ) -> Result<TableColumn, ColumnRepositoryError> {
        let table_type = self.table_type(table_id).await?;

        let mut tx = self.pool.begin().await?;
        lock_table(&mut tx, table_id).await?;

        let current = sqlx::query_as::<_, TableColumn>(
            "SELECT * FROM table_columns WHERE table_id = $1 AND id = $2",
        )
        .bind(table_id)
        .bind(column_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ColumnRepositoryError::NotFound)?;

        if is_protected_name(table_type, &current.name) {
            return Err(ColumnRepositoryError::Protected(current.name));
        }

        // The sentinel range is only off-limits while the table type
        // actually pins columns there; on a default table former
        // sentinel columns reorder like any other.
        let down_bound = if required_columns_for(table_type).is_empty() {
            i32::MAX
        } else {
            PROTECTED_POSITION_BASE
        };

        let neighbor: Option<(Uuid, i32)> = match direction {
            MoveDirection::Up => {
                sqlx::query_as(
                    "SELECT id, position FROM table_columns \
                     WHERE table_id = $1 AND position < $2 \
                     ORDER BY position DESC LIMIT 1",
                )
                .bind(table_id)
                .bind(current.position)
                .fetch_optional(&mut *tx)
                .await?
            }
            MoveDirection::Down => {
                sqlx::query_as(
                    "SELECT id, position FROM table_columns \
                     WHERE table_id = $1 AND position > $2 AND position < $3 \
                     ORDER BY position ASC LIMIT 1",
                )
                .bind(table_id)
                .bind(current.position)
                .bind(down_bound)
                .fetch_optional(&mut *tx)
                .await?
            }
        };

        let Some((neighbor_id, neighbor_position)) = neighbor else {
            tx.commit().await?;
            return Ok(current);
        };

        // Three-step swap: park the moving column on a temporary
        // negative position so the unique (table_id, position) index is
        // satisfied at every statement.
        sqlx::query("UPDATE table_columns SET position = -1, updated_at = now() WHERE id = $1")
            .bind(current.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE table_columns SET position = $2, updated_at = now() WHERE id = $1")
            .bind(neighbor_id)
            .bind(current.position)
            .execute(&mut *tx)
            .await?;
        let moved = sqlx::query_as::<_, TableColumn>(
            "UPDATE table_columns SET position = $2, updated_at = now() \
             WHERE id = $1 RETURNING *",
        )
        .bind(current.id)
        .bind(neighbor_position)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            %table_id, %column_id, from = current.position, to = neighbor_position,
            "Moved column"
        );
        Ok(moved)
    }

    /// Re-apply the table type's managed columns; see
    /// [`ensure_required_columns_on`].
    pub async fn ensure_required_columns(
        &self,
        table_id: Uuid,
    ) -> Result<u32, ColumnRepositoryError> {
        let table_type = self.table_type(table_id).await?;

        let mut tx = self.pool.begin().await?;
        let added = ensure_required_columns_on(&mut tx, table_id, table_type).await?;
        tx.commit().await?;

        Ok(added)
    }
}
