//! Table repository.
//!
//! Covers table CRUD, the bulk mass-action executor and structural
//! ("hollow") cloning. Column-level operations live in the column
//! repository; creating a table delegates to it for the auto-managed
//! columns of sale/rent types.

use std::collections::HashSet;

use sqlx::PgPool;
use uuid::Uuid;

use crate::core::access::{OwnerIdentity, Visibility};
use crate::core::db::models::{CreateColumn, CreateTable, TableColumn, UpdateTable, UserTable};
use crate::core::db::repositories::column::ensure_required_columns_on;
use crate::core::validation::{
    ValidationError, find_duplicate_name, validate_description, validate_name,
};

const TABLE_COLUMNS_SQL: &str = "id, name, description, owner_kind, owner_id, visibility, \
     table_type, product_id_column, rental_period, created_at, updated_at";

/// Table repository error types.
#[derive(Debug, thiserror::Error)]
pub enum TableRepositoryError {
    #[error("Table not found")]
    NotFound,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Bulk operation applied to a set of table ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MassAction {
    MakePublic,
    MakePrivate,
    MakeShared,
    Delete,
}

impl MassAction {
    /// The visibility this action sets, or None for delete.
    pub fn visibility(&self) -> Option<Visibility> {
        match self {
            MassAction::MakePublic => Some(Visibility::Public),
            MassAction::MakePrivate => Some(Visibility::Private),
            MassAction::MakeShared => Some(Visibility::Shared),
            MassAction::Delete => None,
        }
    }
}

impl std::str::FromStr for MassAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "make_public" => Ok(MassAction::MakePublic),
            "make_private" => Ok(MassAction::MakePrivate),
            "make_shared" => Ok(MassAction::MakeShared),
            "delete" => Ok(MassAction::Delete),
            _ => Err(format!("Invalid mass action: {}", s)),
        }
    }
}

impl std::fmt::Display for MassAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MassAction::MakePublic => "make_public",
            MassAction::MakePrivate => "make_private",
            MassAction::MakeShared => "make_shared",
            MassAction::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// Resolve the position of every column in a definition: explicit where
/// given, definition index otherwise. Collisions between the two are a
/// validation error, not a constraint trip.
fn assign_positions(columns: &[CreateColumn]) -> Result<Vec<i32>, ValidationError> {
    let mut seen = HashSet::new();
    let mut positions = Vec::with_capacity(columns.len());

    for (index, col) in columns.iter().enumerate() {
        let position = col.position.unwrap_or(index as i32);
        if position < 0 {
            return Err(ValidationError::NegativePosition(position));
        }
        if !seen.insert(position) {
            return Err(ValidationError::DuplicatePosition(position));
        }
        positions.push(position);
    }

    Ok(positions)
}

/// Pick a free clone name: "X Copy", then "X Copy 2", "X Copy 3", ...
fn copy_name(base: &str, existing: &[String]) -> String {
    let taken: HashSet<&str> = existing.iter().map(String::as_str).collect();

    let first = format!("{} Copy", base);
    if !taken.contains(first.as_str()) {
        return first;
    }

    let mut n = 2u32;
    loop {
        let candidate = format!("{} Copy {}", base, n);
        if !taken.contains(candidate.as_str()) {
            return candidate;
        }
        n += 1;
    }
}

/// Table repository for database operations.
#[derive(Clone)]
pub struct TableRepository {
    pool: PgPool,
}

impl TableRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a table together with its initial columns.
    ///
    /// Positions come from definition order unless a column carries an
    /// explicit position. Sale/rent tables get their auto-managed columns
    /// in the same transaction.
    pub async fn create(
        &self,
        dto: &CreateTable,
        owner: &OwnerIdentity,
    ) -> Result<(UserTable, Vec<TableColumn>), TableRepositoryError> {
        validate_name(&dto.name)?;
        validate_description(dto.description.as_deref())?;
        for col in &dto.columns {
            validate_name(&col.name)?;
        }
        if let Some(dup) = find_duplicate_name(dto.columns.iter().map(|c| c.name.as_str())) {
            return Err(ValidationError::DuplicateColumnName(dup).into());
        }
        let positions = assign_positions(&dto.columns)?;

        let mut tx = self.pool.begin().await?;

        let table = sqlx::query_as::<_, UserTable>(&format!(
            r#"
            INSERT INTO user_tables
                (name, description, owner_kind, owner_id, visibility, table_type,
                 product_id_column, rental_period)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {TABLE_COLUMNS_SQL}
            "#
        ))
        .bind(dto.name.trim())
        .bind(&dto.description)
        .bind(owner.kind())
        .bind(owner.id())
        .bind(dto.visibility)
        .bind(dto.table_type)
        .bind(dto.product_id_column)
        .bind(dto.rental_period)
        .fetch_one(&mut *tx)
        .await?;

        for (col, position) in dto.columns.iter().zip(positions) {
            sqlx::query(
                r#"
                INSERT INTO table_columns
                    (table_id, name, column_type, is_required, allow_duplicates,
                     default_value, position)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(table.id)
            .bind(col.name.trim())
            .bind(col.column_type)
            .bind(col.is_required)
            .bind(col.allow_duplicates)
            .bind(&col.default_value)
            .bind(position)
            .execute(&mut *tx)
            .await?;
        }

        ensure_required_columns_on(&mut tx, table.id, table.table_type).await?;

        let columns = sqlx::query_as::<_, TableColumn>(
            "SELECT * FROM table_columns WHERE table_id = $1 ORDER BY position ASC",
        )
        .bind(table.id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((table, columns))
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<UserTable>, TableRepositoryError> {
        let table = sqlx::query_as::<_, UserTable>(&format!(
            "SELECT {TABLE_COLUMNS_SQL} FROM user_tables WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(table)
    }

    /// List tables owned by an identity, most recently updated first.
    pub async fn list_by_owner(
        &self,
        owner: &OwnerIdentity,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UserTable>, TableRepositoryError> {
        let tables = sqlx::query_as::<_, UserTable>(&format!(
            r#"
            SELECT {TABLE_COLUMNS_SQL} FROM user_tables
            WHERE owner_kind = $1 AND owner_id = $2
            ORDER BY updated_at DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(owner.kind())
        .bind(owner.id())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(tables)
    }

    /// List every table regardless of owner (admin listing).
    pub async fn list_all(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UserTable>, TableRepositoryError> {
        let tables = sqlx::query_as::<_, UserTable>(&format!(
            r#"
            SELECT {TABLE_COLUMNS_SQL} FROM user_tables
            ORDER BY updated_at DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(tables)
    }

    /// Sparse update; only supplied fields are mutated, `updated_at` is
    /// always refreshed. A type change ensures the new type's protected
    /// columns in the same transaction.
    pub async fn update(
        &self,
        id: Uuid,
        updates: &UpdateTable,
    ) -> Result<UserTable, TableRepositoryError> {
        if let Some(ref name) = updates.name {
            validate_name(name)?;
        }
        if let Some(Some(ref desc)) = updates.description {
            validate_description(Some(desc))?;
        }

        let mut tx = self.pool.begin().await?;

        let table = sqlx::query_as::<_, UserTable>(&format!(
            r#"
            UPDATE user_tables
            SET
                name = COALESCE($2, name),
                description = CASE WHEN $3::boolean THEN $4 ELSE description END,
                visibility = COALESCE($5, visibility),
                table_type = COALESCE($6, table_type),
                product_id_column = CASE WHEN $7::boolean THEN $8 ELSE product_id_column END,
                rental_period = CASE WHEN $9::boolean THEN $10 ELSE rental_period END,
                updated_at = now()
            WHERE id = $1
            RETURNING {TABLE_COLUMNS_SQL}
            "#
        ))
        .bind(id)
        .bind(updates.name.as_deref().map(str::trim))
        .bind(updates.description.is_some())
        .bind(updates.description.as_ref().and_then(|d| d.as_deref()))
        .bind(updates.visibility)
        .bind(updates.table_type)
        .bind(updates.product_id_column.is_some())
        .bind(updates.product_id_column.flatten())
        .bind(updates.rental_period.is_some())
        .bind(updates.rental_period.flatten())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(TableRepositoryError::NotFound)?;

        // A switch to sale/rent adds any missing protected columns; a
        // switch to default lifts protection without touching data.
        if updates.table_type.is_some() {
            ensure_required_columns_on(&mut tx, table.id, table.table_type).await?;
        }

        tx.commit().await?;

        Ok(table)
    }

    /// Delete a table; columns and rows cascade.
    pub async fn delete(&self, id: Uuid) -> Result<(), TableRepositoryError> {
        let result = sqlx::query("DELETE FROM user_tables WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(TableRepositoryError::NotFound);
        }

        Ok(())
    }

    /// Apply a bulk action to a set of table ids in one statement.
    ///
    /// Non-admin requesters are silently restricted to tables they own;
    /// ids outside their ownership are excluded, not rejected. Returns
    /// the number of tables actually affected.
    pub async fn mass_action(
        &self,
        action: MassAction,
        ids: &[Uuid],
        requester: &OwnerIdentity,
        is_admin: bool,
    ) -> Result<u64, TableRepositoryError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = match (action.visibility(), is_admin) {
            (Some(visibility), true) => {
                sqlx::query(
                    "UPDATE user_tables SET visibility = $1, updated_at = now() \
                     WHERE id = ANY($2)",
                )
                .bind(visibility)
                .bind(ids)
                .execute(&self.pool)
                .await?
            }
            (Some(visibility), false) => {
                sqlx::query(
                    "UPDATE user_tables SET visibility = $1, updated_at = now() \
                     WHERE id = ANY($2) AND owner_kind = $3 AND owner_id = $4",
                )
                .bind(visibility)
                .bind(ids)
                .bind(requester.kind())
                .bind(requester.id())
                .execute(&self.pool)
                .await?
            }
            (None, true) => {
                sqlx::query("DELETE FROM user_tables WHERE id = ANY($1)")
                    .bind(ids)
                    .execute(&self.pool)
                    .await?
            }
            (None, false) => {
                sqlx::query(
                    "DELETE FROM user_tables \
                     WHERE id = ANY($1) AND owner_kind = $2 AND owner_id = $3",
                )
                .bind(ids)
                .bind(requester.kind())
                .bind(requester.id())
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected())
    }

    /// Structural ("hollow") clone: same type, visibility and columns,
    /// disambiguated name, zero rows.
    pub async fn clone_table(&self, id: Uuid) -> Result<UserTable, TableRepositoryError> {
        let source = self
            .find_by_id(id)
            .await?
            .ok_or(TableRepositoryError::NotFound)?;

        let existing_names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM user_tables WHERE owner_kind = $1 AND owner_id = $2",
        )
        .bind(source.owner_kind)
        .bind(source.owner_id)
        .fetch_all(&self.pool)
        .await?;

        let name = copy_name(&source.name, &existing_names);

        let mut tx = self.pool.begin().await?;

        let clone = sqlx::query_as::<_, UserTable>(&format!(
            r#"
            INSERT INTO user_tables
                (name, description, owner_kind, owner_id, visibility, table_type,
                 rental_period)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {TABLE_COLUMNS_SQL}
            "#
        ))
        .bind(&name)
        .bind(&source.description)
        .bind(source.owner_kind)
        .bind(source.owner_id)
        .bind(source.visibility)
        .bind(source.table_type)
        .bind(source.rental_period)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO table_columns
                (table_id, name, column_type, is_required, allow_duplicates,
                 default_value, position)
            SELECT $1, name, column_type, is_required, allow_duplicates,
                   default_value, position
            FROM table_columns
            WHERE table_id = $2
            "#,
        )
        .bind(clone.id)
        .bind(source.id)
        .execute(&mut *tx)
        .await?;

        // The product-id reference points at a source column; remap it to
        // the clone's same-named column.
        if let Some(product_column) = source.product_id_column {
            sqlx::query(
                r#"
                UPDATE user_tables
                SET product_id_column = (
                    SELECT nc.id
                    FROM table_columns nc
                    JOIN table_columns oc ON lower(oc.name) = lower(nc.name)
                    WHERE nc.table_id = $1 AND oc.id = $2
                )
                WHERE id = $1
                "#,
            )
            .bind(clone.id)
            .bind(product_column)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        // Re-read so the returned entity carries the remapped reference.
        self.find_by_id(clone.id)
            .await?
            .ok_or(TableRepositoryError::NotFound)
    }
}
