use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::constants;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The five raw entities the pipeline ingests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Product,
    Warehouse,
    Order,
    Delivery,
    Movement,
}

impl Entity {
    pub const ALL: [Entity; 5] = [
        Entity::Product,
        Entity::Warehouse,
        Entity::Order,
        Entity::Delivery,
        Entity::Movement,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Entity::Product => "product",
            Entity::Warehouse => "warehouse",
            Entity::Order => "order",
            Entity::Delivery => "delivery",
            Entity::Movement => "movement",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Entity::Product => constants::PRODUCT_FILE,
            Entity::Warehouse => constants::WAREHOUSE_FILE,
            Entity::Order => constants::ORDER_FILE,
            Entity::Delivery => constants::DELIVERY_FILE,
            Entity::Movement => constants::MOVEMENT_FILE,
        }
    }

    /// Field delimiter of the entity's export. Declared, never sniffed.
    pub fn delimiter(&self) -> u8 {
        match self {
            Entity::Product | Entity::Warehouse | Entity::Order => b',',
            Entity::Delivery | Entity::Movement => b';',
        }
    }

    pub fn staging_table(&self) -> &'static str {
        match self {
            Entity::Product => constants::DIM_PRODUCT_TABLE,
            Entity::Warehouse => constants::DIM_WAREHOUSE_TABLE,
            Entity::Order => constants::STG_ORDERS_TABLE,
            Entity::Delivery => constants::STG_DELIVERIES_TABLE,
            Entity::Movement => constants::STG_MOVEMENTS_TABLE,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Timestamp,
    Date,
    Boolean,
}

impl ColumnType {
    /// Declared type used when the column is created in a SQL store.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer | ColumnType::Boolean => "INTEGER",
            ColumnType::Float => "REAL",
            ColumnType::Text | ColumnType::Timestamp | ColumnType::Date => "TEXT",
        }
    }

    /// Narrowest type that describes every non-null value of a column.
    pub fn infer_from_values<'a>(values: impl IntoIterator<Item = &'a Value>) -> ColumnType {
        let mut inferred: Option<ColumnType> = None;
        for value in values {
            let current = match value.column_type() {
                Some(t) => t,
                None => continue,
            };
            inferred = Some(match (inferred, current) {
                (None, t) => t,
                (Some(a), b) if a == b => a,
                (Some(ColumnType::Integer), ColumnType::Float)
                | (Some(ColumnType::Float), ColumnType::Integer) => ColumnType::Float,
                (Some(ColumnType::Date), ColumnType::Timestamp)
                | (Some(ColumnType::Timestamp), ColumnType::Date) => ColumnType::Timestamp,
                _ => ColumnType::Text,
            });
        }
        inferred.unwrap_or(ColumnType::Text)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Date => "date",
            ColumnType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// A single cell.
///
/// Equality and hashing are structural (floats by bit pattern) so rows can be
/// deduplicated through a `HashSet`.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Boolean(bool),
}

impl Value {
    /// Null, or text made only of whitespace.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(ColumnType::Integer),
            Value::Float(_) => Some(ColumnType::Float),
            Value::Text(_) => Some(ColumnType::Text),
            Value::Timestamp(_) => Some(ColumnType::Timestamp),
            Value::Date(_) => Some(ColumnType::Date),
            Value::Boolean(_) => Some(ColumnType::Boolean),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Store representation of temporal values: ISO-8601 text.
    pub fn to_iso_text(&self) -> Option<String> {
        match self {
            Value::Timestamp(ts) => Some(ts.format(TIMESTAMP_FORMAT).to_string()),
            Value::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(_) | Value::Date(_) => {
                serde_json::Value::String(self.to_iso_text().unwrap_or_default())
            }
            Value::Boolean(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Timestamp(ts) => ts.hash(state),
            Value::Date(d) => d.hash(state),
            Value::Boolean(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::Timestamp(_) | Value::Date(_) => {
                f.write_str(&self.to_iso_text().unwrap_or_default())
            }
            Value::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// An ordered, named-column record set. Raw entities, staging tables and fact
/// tables all travel through the pipeline in this shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.rows = rows;
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Column name to inferred type, in column order.
    pub fn source_schema(&self) -> Vec<(&str, ColumnType)> {
        self.columns
            .iter()
            .map(|c| (c.name.as_str(), c.column_type))
            .collect()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// All values of one column, top to bottom.
    pub fn column_values(&self, column: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(column)?;
        Some(self.rows.iter().filter_map(|r| r.get(idx)).collect())
    }

    /// Re-derives every column type from the values it holds.
    pub fn infer_column_types(&mut self) {
        for (idx, column) in self.columns.iter_mut().enumerate() {
            column.column_type =
                ColumnType::infer_from_values(self.rows.iter().filter_map(|r| r.get(idx)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_entity_delimiters_are_declared() {
        let semicolon: Vec<Entity> = Entity::ALL
            .into_iter()
            .filter(|e| e.delimiter() == b';')
            .collect();
        assert_eq!(semicolon, vec![Entity::Delivery, Entity::Movement]);
        assert_eq!(Entity::Delivery.file_name(), "livrasion.csv");
        assert_eq!(Entity::Warehouse.staging_table(), "dim_entrepot");
    }

    #[test]
    fn test_value_hash_dedups_rows() {
        let mut seen = HashSet::new();
        assert!(seen.insert(vec![Value::from("P1"), Value::Float(2.5), Value::Null]));
        assert!(!seen.insert(vec![Value::from("P1"), Value::Float(2.5), Value::Null]));
        assert!(seen.insert(vec![Value::from("P1"), Value::Float(2.5), Value::Integer(0)]));
        assert_ne!(Value::Integer(1), Value::Float(1.0));
    }

    #[test]
    fn test_blank_values() {
        assert!(Value::Null.is_blank());
        assert!(Value::from("   ").is_blank());
        assert!(!Value::Integer(0).is_blank());
        assert!(!Value::from("x").is_blank());
    }

    #[test]
    fn test_infer_from_values_widens() {
        let values = [Value::Integer(1), Value::Null, Value::Float(2.5)];
        assert_eq!(ColumnType::infer_from_values(values.iter()), ColumnType::Float);

        let date = NaiveDate::from_ymd_opt(2025, 5, 9).unwrap();
        let values = [
            Value::Date(date),
            Value::Timestamp(date.and_hms_opt(8, 0, 0).unwrap()),
        ];
        assert_eq!(ColumnType::infer_from_values(values.iter()), ColumnType::Timestamp);

        let values = [Value::Integer(1), Value::from("a")];
        assert_eq!(ColumnType::infer_from_values(values.iter()), ColumnType::Text);

        assert_eq!(ColumnType::infer_from_values([Value::Null].iter()), ColumnType::Text);
    }

    #[test]
    fn test_temporal_values_serialize_as_iso_text() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        assert_eq!(Value::Date(date).to_json(), serde_json::json!("2025-01-31"));
        let ts = date.and_hms_opt(14, 5, 0).unwrap();
        assert_eq!(Value::Timestamp(ts).to_string(), "2025-01-31 14:05:00");
        assert_eq!(Value::Float(f64::NAN).to_json(), serde_json::Value::Null);
    }
}
