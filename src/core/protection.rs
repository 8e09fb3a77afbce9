//! Protected-column policy.
//!
//! Sale and rent tables carry auto-managed inventory columns that cannot
//! be renamed or deleted while the type is active. Switching a table back
//! to `default` lifts the protection but never deletes the columns or
//! their data.

use serde::{Deserialize, Serialize};

use crate::core::db::models::ColumnType;

/// E-commerce type of a table; determines which columns are protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TableType {
    #[default]
    Default,
    Sale,
    Rent,
}

impl std::fmt::Display for TableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableType::Default => write!(f, "default"),
            TableType::Sale => write!(f, "sale"),
            TableType::Rent => write!(f, "rent"),
        }
    }
}

impl std::str::FromStr for TableType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" => Ok(TableType::Default),
            "sale" => Ok(TableType::Sale),
            "rent" => Ok(TableType::Rent),
            _ => Err(format!("Invalid table type: {}", s)),
        }
    }
}

/// Billing period for rent-type tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RentalPeriod {
    Day,
    Week,
    Month,
}

/// Specification of one auto-managed column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequiredColumn {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub is_required: bool,
    pub default_value: Option<&'static str>,
}

/// Protected columns are created at the tail with positions starting here
/// so they always render after user-defined columns.
pub const PROTECTED_POSITION_BASE: i32 = 1000;

const SALE_COLUMNS: &[RequiredColumn] = &[
    RequiredColumn {
        name: "price",
        column_type: ColumnType::Number,
        is_required: true,
        default_value: None,
    },
    RequiredColumn {
        name: "qty",
        column_type: ColumnType::Number,
        is_required: true,
        default_value: Some("1"),
    },
];

const RENT_COLUMNS: &[RequiredColumn] = &[
    RequiredColumn {
        name: "price",
        column_type: ColumnType::Number,
        is_required: true,
        default_value: None,
    },
    RequiredColumn {
        name: "fee",
        column_type: ColumnType::Number,
        is_required: true,
        default_value: Some("0"),
    },
    RequiredColumn {
        name: "used",
        column_type: ColumnType::Boolean,
        is_required: true,
        default_value: Some("false"),
    },
    RequiredColumn {
        name: "available",
        column_type: ColumnType::Boolean,
        is_required: true,
        default_value: Some("true"),
    },
];

/// Columns mandated by the given table type.
pub fn required_columns_for(table_type: TableType) -> &'static [RequiredColumn] {
    match table_type {
        TableType::Default => &[],
        TableType::Sale => SALE_COLUMNS,
        TableType::Rent => RENT_COLUMNS,
    }
}

/// True iff the table type requires a column with this exact name.
pub fn is_protected_name(table_type: TableType, name: &str) -> bool {
    required_columns_for(table_type)
        .iter()
        .any(|col| col.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_type_has_no_required_columns() {
        assert!(required_columns_for(TableType::Default).is_empty());
    }

    #[test]
    fn test_sale_required_columns() {
        let cols = required_columns_for(TableType::Sale);
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].name, "price");
        assert!(cols[0].is_required);
        assert!(cols[0].default_value.is_none());
        assert_eq!(cols[1].name, "qty");
        assert_eq!(cols[1].default_value, Some("1"));
    }

    #[test]
    fn test_rent_required_columns() {
        let cols = required_columns_for(TableType::Rent);
        let names: Vec<&str> = cols.iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["price", "fee", "used", "available"]);

        let available = cols.iter().find(|c| c.name == "available").unwrap();
        assert_eq!(available.column_type, ColumnType::Boolean);
        assert_eq!(available.default_value, Some("true"));

        let fee = cols.iter().find(|c| c.name == "fee").unwrap();
        assert_eq!(fee.default_value, Some("0"));
    }

    #[test]
    fn test_price_protected_only_for_commerce_types() {
        assert!(is_protected_name(TableType::Sale, "price"));
        assert!(is_protected_name(TableType::Rent, "price"));
        assert!(!is_protected_name(TableType::Default, "price"));
    }

    #[test]
    fn test_protection_matches_exact_name() {
        assert!(!is_protected_name(TableType::Sale, "Price"));
        assert!(!is_protected_name(TableType::Sale, "qty "));
        assert!(is_protected_name(TableType::Sale, "qty"));
        assert!(!is_protected_name(TableType::Sale, "used"));
        assert!(is_protected_name(TableType::Rent, "used"));
    }

    #[test]
    fn test_table_type_parse_and_display() {
        assert_eq!("sale".parse::<TableType>().unwrap(), TableType::Sale);
        assert_eq!("RENT".parse::<TableType>().unwrap(), TableType::Rent);
        assert!("auction".parse::<TableType>().is_err());
        assert_eq!(TableType::Default.to_string(), "default");
    }

    #[test]
    fn test_rental_period_serde() {
        let json = serde_json::to_string(&RentalPeriod::Week).unwrap();
        assert_eq!(json, r#""week""#);
        let back: RentalPeriod = serde_json::from_str(r#""month""#).unwrap();
        assert_eq!(back, RentalPeriod::Month);
    }
}
