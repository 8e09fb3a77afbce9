//! Database models for the dynamic table engine.
//!
//! Entity structs map 1:1 to the PostgreSQL tables created by the
//! migrations; the Create/Update structs are the DTOs the repositories
//! accept.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::core::access::{IdentityKind, OwnerIdentity, Visibility};
use crate::core::protection::{RentalPeriod, TableType};

/// Helper module for deserializing Option<Option<T>> where:
/// - Missing field -> None (don't update)
/// - Field with null -> Some(None) (set to null)
/// - Field with value -> Some(Some(value)) (set to value)
pub mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        // Only called when the field is present, so wrap in Some().
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

// ============================================================================
// Column types
// ============================================================================

/// Declared type of a column; row values are validated against it at
/// write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    Text,
    Number,
    Date,
    Boolean,
    Email,
    Url,
    Country,
    Phone,
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ColumnType::Text => "text",
            ColumnType::Number => "number",
            ColumnType::Date => "date",
            ColumnType::Boolean => "boolean",
            ColumnType::Email => "email",
            ColumnType::Url => "url",
            ColumnType::Country => "country",
            ColumnType::Phone => "phone",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Table model
// ============================================================================

/// A user-defined table definition.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserTable {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner_kind: IdentityKind,
    pub owner_id: Uuid,
    pub visibility: Visibility,
    pub table_type: TableType,
    pub product_id_column: Option<Uuid>,
    pub rental_period: Option<RentalPeriod>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserTable {
    pub fn owner(&self) -> OwnerIdentity {
        OwnerIdentity::new(self.owner_kind, self.owner_id)
    }
}

/// Table data for creation, including the initial column definitions.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTable {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub table_type: TableType,
    pub product_id_column: Option<Uuid>,
    pub rental_period: Option<RentalPeriod>,
    #[serde(default)]
    pub columns: Vec<CreateColumn>,
}

/// Table data for sparse updates; only supplied fields are mutated.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateTable {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option::deserialize")]
    pub description: Option<Option<String>>,
    pub visibility: Option<Visibility>,
    pub table_type: Option<TableType>,
    #[serde(default, deserialize_with = "double_option::deserialize")]
    pub product_id_column: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option::deserialize")]
    pub rental_period: Option<Option<RentalPeriod>>,
}

impl UpdateTable {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.visibility.is_none()
            && self.table_type.is_none()
            && self.product_id_column.is_none()
            && self.rental_period.is_none()
    }
}

// ============================================================================
// Column model
// ============================================================================

/// A column definition within a table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TableColumn {
    pub id: Uuid,
    pub table_id: Uuid,
    pub name: String,
    pub column_type: ColumnType,
    pub is_required: bool,
    pub allow_duplicates: bool,
    pub default_value: Option<String>,
    pub position: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column data for creation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateColumn {
    pub name: String,
    #[serde(default, alias = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default = "default_true")]
    pub allow_duplicates: bool,
    pub default_value: Option<String>,
    pub position: Option<i32>,
}

fn default_true() -> bool {
    true
}

/// Column data for sparse updates.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateColumn {
    pub name: Option<String>,
    #[serde(alias = "type")]
    pub column_type: Option<ColumnType>,
    pub is_required: Option<bool>,
    pub allow_duplicates: Option<bool>,
    #[serde(default, deserialize_with = "double_option::deserialize")]
    pub default_value: Option<Option<String>>,
}

// ============================================================================
// Row model
// ============================================================================

/// A row of semi-structured data stored against a table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TableRow {
    pub id: Uuid,
    pub table_id: Uuid,
    pub data: sqlx::types::Json<serde_json::Map<String, serde_json::Value>>,
    pub created_by_kind: IdentityKind,
    pub created_by_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TableRow {
    pub fn created_by(&self) -> OwnerIdentity {
        OwnerIdentity::new(self.created_by_kind, self.created_by_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_minimal_deserialization() {
        let json = r#"{"name": "Items"}"#;
        let create: CreateTable = serde_json::from_str(json).unwrap();

        assert_eq!(create.name, "Items");
        assert_eq!(create.visibility, Visibility::Private);
        assert_eq!(create.table_type, TableType::Default);
        assert!(create.columns.is_empty());
        assert!(create.rental_period.is_none());
    }

    #[test]
    fn test_create_table_with_columns() {
        let json = r#"{
            "name": "Rentals",
            "table_type": "rent",
            "rental_period": "week",
            "columns": [
                {"name": "title", "type": "text", "is_required": true},
                {"name": "serial", "type": "text", "allow_duplicates": false}
            ]
        }"#;
        let create: CreateTable = serde_json::from_str(json).unwrap();

        assert_eq!(create.table_type, TableType::Rent);
        assert_eq!(create.rental_period, Some(RentalPeriod::Week));
        assert_eq!(create.columns.len(), 2);
        assert!(create.columns[0].is_required);
        assert!(create.columns[0].allow_duplicates);
        assert!(!create.columns[1].allow_duplicates);
        assert!(create.columns[1].position.is_none());
    }

    #[test]
    fn test_update_table_partial() {
        let json = r#"{"visibility": "shared"}"#;
        let update: UpdateTable = serde_json::from_str(json).unwrap();

        assert_eq!(update.visibility, Some(Visibility::Shared));
        assert!(update.name.is_none());
        assert!(update.description.is_none());
        assert!(!update.is_empty());
        assert!(UpdateTable::default().is_empty());
    }

    #[test]
    fn test_update_table_clear_description() {
        // null clears, absence leaves untouched
        let update: UpdateTable = serde_json::from_str(r#"{"description": null}"#).unwrap();
        assert_eq!(update.description, Some(None));

        let update: UpdateTable = serde_json::from_str(r#"{"name": "x"}"#).unwrap();
        assert_eq!(update.description, None);
    }

    #[test]
    fn test_column_type_serde() {
        let ty: ColumnType = serde_json::from_str(r#""email""#).unwrap();
        assert_eq!(ty, ColumnType::Email);
        assert_eq!(serde_json::to_string(&ColumnType::Boolean).unwrap(), r#""boolean""#);
        assert_eq!(ColumnType::Url.to_string(), "url");
    }

    #[test]
    fn test_create_column_accepts_type_alias() {
        let col: CreateColumn = serde_json::from_str(r#"{"name": "n", "type": "number"}"#).unwrap();
        assert_eq!(col.column_type, ColumnType::Number);

        let col: CreateColumn =
            serde_json::from_str(r#"{"name": "n", "column_type": "date"}"#).unwrap();
        assert_eq!(col.column_type, ColumnType::Date);
    }

    #[test]
    fn test_table_owner_accessor() {
        let table = UserTable {
            id: Uuid::new_v4(),
            name: "Items".to_string(),
            description: None,
            owner_kind: IdentityKind::ApiToken,
            owner_id: Uuid::new_v4(),
            visibility: Visibility::Private,
            table_type: TableType::Default,
            product_id_column: None,
            rental_period: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert_eq!(table.owner(), OwnerIdentity::ApiToken(table.owner_id));
    }

    #[test]
    fn test_row_data_is_plain_map() {
        let mut data = serde_json::Map::new();
        data.insert("price".to_string(), serde_json::json!(10));

        let row = TableRow {
            id: Uuid::new_v4(),
            table_id: Uuid::new_v4(),
            data: sqlx::types::Json(data),
            created_by_kind: IdentityKind::User,
            created_by_id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains(r#""price":10"#));
        assert_eq!(row.created_by(), OwnerIdentity::User(row.created_by_id));
    }
}
