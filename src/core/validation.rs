//! Validation for table/column names and row values.
//!
//! Names are display names, not SQL identifiers: anything non-empty up to
//! the length limits is accepted. Row values are checked at write time
//! against the declared column type as a tagged [`CellValue`]; values
//! written before a column's type existed are never re-validated.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::core::db::models::ColumnType;

/// Maximum length for table and column names.
pub const MAX_NAME_LENGTH: usize = 100;

/// Maximum length for table descriptions.
pub const MAX_DESCRIPTION_LENGTH: usize = 500;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").unwrap());

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9][0-9 ()\-]{5,19}$").unwrap());

static COUNTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z .'\-]{1,55}$").unwrap());

/// Validation error types.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Name cannot be empty")]
    EmptyName,

    #[error("Name is too long ({actual} chars, max {max})")]
    NameTooLong { max: usize, actual: usize },

    #[error("Description is too long ({actual} chars, max {max})")]
    DescriptionTooLong { max: usize, actual: usize },

    #[error("Duplicate column name: '{0}'")]
    DuplicateColumnName(String),

    #[error("Duplicate column position: {0}")]
    DuplicatePosition(i32),

    #[error("Column position cannot be negative: {0}")]
    NegativePosition(i32),

    #[error("Column '{0}' does not exist in this table")]
    UnknownColumn(String),

    #[error("Required column '{0}' is missing")]
    MissingRequired(String),

    #[error("Value for column '{column}' is not a valid {expected}")]
    TypeMismatch {
        column: String,
        expected: ColumnType,
    },
}

/// Validate a table or column display name.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::NameTooLong {
            max: MAX_NAME_LENGTH,
            actual: trimmed.chars().count(),
        });
    }
    Ok(())
}

/// Validate an optional table description.
pub fn validate_description(description: Option<&str>) -> Result<(), ValidationError> {
    if let Some(desc) = description
        && desc.chars().count() > MAX_DESCRIPTION_LENGTH
    {
        return Err(ValidationError::DescriptionTooLong {
            max: MAX_DESCRIPTION_LENGTH,
            actual: desc.chars().count(),
        });
    }
    Ok(())
}

/// First case-insensitive duplicate among the given names, if any.
pub fn find_duplicate_name<'a, I>(names: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = std::collections::HashSet::new();
    for name in names {
        if !seen.insert(name.trim().to_lowercase()) {
            return Some(name.to_string());
        }
    }
    None
}

/// A row value validated against its declared column type.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDate),
}

impl CellValue {
    /// Canonical JSON representation for storage. Integral numbers are
    /// stored as JSON integers so `data ->> col` renders them the same
    /// way [`CellValue::as_text`] does.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Text(s) => serde_json::Value::String(s.clone()),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    serde_json::Value::Number((*n as i64).into())
                } else {
                    serde_json::json!(n)
                }
            }
            CellValue::Bool(b) => serde_json::Value::Bool(*b),
            CellValue::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
        }
    }

    /// Text form used for duplicate-value comparison (`data ->> name`).
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            CellValue::Bool(b) => b.to_string(),
            CellValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Validate a single value against the declared column type.
///
/// Form clients submit everything as strings, so numeric, boolean and
/// date columns also accept their string spellings.
pub fn check_value(
    column: &str,
    column_type: ColumnType,
    value: &serde_json::Value,
) -> Result<CellValue, ValidationError> {
    let mismatch = || ValidationError::TypeMismatch {
        column: column.to_string(),
        expected: column_type,
    };

    match column_type {
        ColumnType::Text => match value.as_str() {
            Some(s) => Ok(CellValue::Text(s.to_string())),
            None => Ok(CellValue::Text(value.to_string())),
        },
        ColumnType::Number => {
            if let Some(n) = value.as_f64() {
                return Ok(CellValue::Number(n));
            }
            value
                .as_str()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .map(CellValue::Number)
                .ok_or_else(mismatch)
        }
        ColumnType::Boolean => {
            if let Some(b) = value.as_bool() {
                return Ok(CellValue::Bool(b));
            }
            match value.as_str().map(|s| s.trim().to_lowercase()) {
                Some(s) if s == "true" => Ok(CellValue::Bool(true)),
                Some(s) if s == "false" => Ok(CellValue::Bool(false)),
                _ => Err(mismatch()),
            }
        }
        ColumnType::Date => value
            .as_str()
            .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
            .map(CellValue::Date)
            .ok_or_else(mismatch),
        ColumnType::Email => pattern_value(column, column_type, value, &EMAIL_RE),
        ColumnType::Url => pattern_value(column, column_type, value, &URL_RE),
        ColumnType::Phone => pattern_value(column, column_type, value, &PHONE_RE),
        ColumnType::Country => pattern_value(column, column_type, value, &COUNTRY_RE),
    }
}

fn pattern_value(
    column: &str,
    column_type: ColumnType,
    value: &serde_json::Value,
    pattern: &Regex,
) -> Result<CellValue, ValidationError> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| pattern.is_match(s))
        .map(|s| CellValue::Text(s.to_string()))
        .ok_or_else(|| ValidationError::TypeMismatch {
            column: column.to_string(),
            expected: column_type,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_names() {
        assert!(validate_name("Products").is_ok());
        assert!(validate_name("  padded  ").is_ok());
        assert!(validate_name("Цены на прокат").is_ok());
        assert!(validate_name(&"a".repeat(100)).is_ok());
    }

    #[test]
    fn test_empty_name() {
        assert_eq!(validate_name(""), Err(ValidationError::EmptyName));
        assert_eq!(validate_name("   "), Err(ValidationError::EmptyName));
    }

    #[test]
    fn test_name_too_long() {
        let err = validate_name(&"a".repeat(101)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::NameTooLong {
                max: 100,
                actual: 101
            }
        );
    }

    #[test]
    fn test_description_limits() {
        assert!(validate_description(None).is_ok());
        assert!(validate_description(Some(&"d".repeat(500))).is_ok());
        assert!(validate_description(Some(&"d".repeat(501))).is_err());
    }

    #[test]
    fn test_duplicate_names_case_insensitive() {
        assert_eq!(
            find_duplicate_name(["price", "qty", "Price"]),
            Some("Price".to_string())
        );
        assert_eq!(find_duplicate_name(["price", "qty"]), None);
        assert_eq!(
            find_duplicate_name(["name", " NAME "]),
            Some(" NAME ".to_string())
        );
    }

    #[test]
    fn test_number_values() {
        assert_eq!(
            check_value("qty", ColumnType::Number, &json!(3)).unwrap(),
            CellValue::Number(3.0)
        );
        assert_eq!(
            check_value("qty", ColumnType::Number, &json!("12.5")).unwrap(),
            CellValue::Number(12.5)
        );
        assert!(check_value("qty", ColumnType::Number, &json!("twelve")).is_err());
        assert!(check_value("qty", ColumnType::Number, &json!(true)).is_err());
    }

    #[test]
    fn test_boolean_values() {
        assert_eq!(
            check_value("used", ColumnType::Boolean, &json!(false)).unwrap(),
            CellValue::Bool(false)
        );
        assert_eq!(
            check_value("used", ColumnType::Boolean, &json!("TRUE")).unwrap(),
            CellValue::Bool(true)
        );
        assert!(check_value("used", ColumnType::Boolean, &json!(1)).is_err());
    }

    #[test]
    fn test_date_values() {
        assert_eq!(
            check_value("bought", ColumnType::Date, &json!("2024-02-29")).unwrap(),
            CellValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert!(check_value("bought", ColumnType::Date, &json!("2023-02-29")).is_err());
        assert!(check_value("bought", ColumnType::Date, &json!("29/02/2024")).is_err());
    }

    #[test]
    fn test_email_pattern() {
        assert!(check_value("contact", ColumnType::Email, &json!("a@b.co")).is_ok());
        assert!(check_value("contact", ColumnType::Email, &json!("not-an-email")).is_err());
        assert!(check_value("contact", ColumnType::Email, &json!("a b@c.co")).is_err());
    }

    #[test]
    fn test_url_pattern() {
        assert!(check_value("site", ColumnType::Url, &json!("https://example.com/x")).is_ok());
        assert!(check_value("site", ColumnType::Url, &json!("ftp://example.com")).is_err());
        assert!(check_value("site", ColumnType::Url, &json!("example.com")).is_err());
    }

    #[test]
    fn test_phone_pattern() {
        assert!(check_value("phone", ColumnType::Phone, &json!("+1 (555) 010-2030")).is_ok());
        assert!(check_value("phone", ColumnType::Phone, &json!("call me")).is_err());
    }

    #[test]
    fn test_country_pattern() {
        assert!(check_value("country", ColumnType::Country, &json!("New Zealand")).is_ok());
        assert!(check_value("country", ColumnType::Country, &json!("US")).is_ok());
        assert!(check_value("country", ColumnType::Country, &json!("42")).is_err());
    }

    #[test]
    fn test_text_accepts_anything() {
        assert_eq!(
            check_value("note", ColumnType::Text, &json!("hello")).unwrap(),
            CellValue::Text("hello".to_string())
        );
        // Non-string JSON is stored in its serialized form.
        assert_eq!(
            check_value("note", ColumnType::Text, &json!(42)).unwrap(),
            CellValue::Text("42".to_string())
        );
    }

    #[test]
    fn test_canonical_json_and_text_forms() {
        assert_eq!(CellValue::Number(1.0).to_json(), json!(1));
        assert_eq!(CellValue::Number(1.5).to_json(), json!(1.5));
        assert_eq!(CellValue::Number(1.0).as_text(), "1");
        assert_eq!(CellValue::Number(1.5).as_text(), "1.5");
        assert_eq!(CellValue::Bool(true).as_text(), "true");
        assert_eq!(
            CellValue::Date(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()).as_text(),
            "2024-01-05"
        );
    }

    #[test]
    fn test_validation_error_display() {
        assert_eq!(
            ValidationError::EmptyName.to_string(),
            "Name cannot be empty"
        );
        assert_eq!(
            ValidationError::MissingRequired("price".to_string()).to_string(),
            "Required column 'price' is missing"
        );
        assert_eq!(
            ValidationError::DuplicatePosition(1).to_string(),
            "Duplicate column position: 1"
        );
        assert_eq!(
            ValidationError::NegativePosition(-2).to_string(),
            "Column position cannot be negative: -2"
        );
        assert_eq!(
            ValidationError::TypeMismatch {
                column: "qty".to_string(),
                expected: ColumnType::Number
            }
            .to_string(),
            "Value for column 'qty' is not a valid number"
        );
    }
}
