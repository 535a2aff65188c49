use chrono::{NaiveDate, NaiveDateTime};

use crate::types::{ColumnType, Value};

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"];
const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

fn parse_bool(raw: &str) -> Option<bool> {
    if raw.eq_ignore_ascii_case("true") {
        Some(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Tracks which scalar types every non-blank cell seen so far still fits.
#[derive(Debug, Clone)]
pub struct TypeCandidates {
    seen: bool,
    boolean: bool,
    integer: bool,
    float: bool,
    date: bool,
    temporal: bool,
}

impl Default for TypeCandidates {
    fn default() -> Self {
        Self {
            seen: false,
            boolean: true,
            integer: true,
            float: true,
            date: true,
            temporal: true,
        }
    }
}

impl TypeCandidates {
    pub fn observe(&mut self, raw: &str) {
        let cell = raw.trim();
        if cell.is_empty() {
            return;
        }
        self.seen = true;
        self.boolean &= parse_bool(cell).is_some();
        self.integer &= cell.parse::<i64>().is_ok();
        self.float &= cell.parse::<f64>().is_ok();
        let is_date = parse_date(cell).is_some();
        self.date &= is_date;
        self.temporal &= is_date || parse_datetime(cell).is_some();
    }

    pub fn resolve(&self) -> ColumnType {
        if !self.seen {
            ColumnType::Text
        } else if self.boolean {
            ColumnType::Boolean
        } else if self.integer {
            ColumnType::Integer
        } else if self.float {
            ColumnType::Float
        } else if self.date {
            ColumnType::Date
        } else if self.temporal {
            ColumnType::Timestamp
        } else {
            ColumnType::Text
        }
    }
}

/// Converts one raw cell into a value of an already-inferred column type.
/// Blank cells become `Null`; a cell that does not fit falls back to text.
pub fn parse_cell(raw: &str, column_type: ColumnType) -> Value {
    let cell = raw.trim();
    if cell.is_empty() {
        return Value::Null;
    }
    let parsed = match column_type {
        ColumnType::Boolean => parse_bool(cell).map(Value::Boolean),
        ColumnType::Integer => cell.parse::<i64>().ok().map(Value::Integer),
        ColumnType::Float => cell.parse::<f64>().ok().map(Value::Float),
        ColumnType::Date => parse_date(cell).map(Value::Date),
        ColumnType::Timestamp => parse_datetime(cell)
            .or_else(|| parse_date(cell).and_then(|d| d.and_hms_opt(0, 0, 0)))
            .map(Value::Timestamp),
        ColumnType::Text => None,
    };
    parsed.unwrap_or_else(|| Value::Text(raw.to_string()))
}
