use chrono::{Local, NaiveDate};
use std::collections::HashSet;
use tracing::debug;

use crate::constants::LOAD_TIMESTAMP_COLUMN;
use crate::metrics;
use crate::types::{Column, ColumnType, Table, Value};

/// Counts of what a normalization pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub input_rows: usize,
    pub empty_dropped: usize,
    pub duplicates_dropped: usize,
}

/// Cleans raw tables before they are staged.
///
/// Steps run in order over the whole table: drop fully-empty rows, drop exact
/// duplicates (first occurrence wins), then stamp `load_timestamp`.
///
/// The stamp is the run's calendar date, not a business date. Normalizing an
/// already-normalized table is a no-op except for that column, which is
/// overwritten with the new load date.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    load_date: NaiveDate,
}

impl Normalizer {
    pub fn new(load_date: NaiveDate) -> Self {
        Self { load_date }
    }

    /// Normalizer stamping the local calendar date at the time of the call.
    pub fn for_today() -> Self {
        Self::new(Local::now().date_naive())
    }

    pub fn load_date(&self) -> NaiveDate {
        self.load_date
    }

    pub fn normalize(&self, table: Table) -> Table {
        self.normalize_with_stats(table).0
    }

    pub fn normalize_with_stats(&self, mut table: Table) -> (Table, NormalizeStats) {
        let mut stats = NormalizeStats {
            input_rows: table.len(),
            ..Default::default()
        };
        let stamp_idx = table.column_index(LOAD_TIMESTAMP_COLUMN);

        // load_timestamp never counts as content
        table.rows.retain(|row| {
            row.iter()
                .enumerate()
                .any(|(idx, value)| Some(idx) != stamp_idx && !value.is_blank())
        });
        stats.empty_dropped = stats.input_rows - table.len();

        let before_dedup = table.len();
        // A previous stamp is about to be overwritten, so it is not part of the key
        let mut seen: HashSet<Vec<Value>> = HashSet::with_capacity(before_dedup);
        table.rows.retain(|row| {
            let key = row
                .iter()
                .enumerate()
                .filter(|(idx, _)| Some(*idx) != stamp_idx)
                .map(|(_, value)| value.clone())
                .collect();
            seen.insert(key)
        });
        stats.duplicates_dropped = before_dedup - table.len();

        let stamp = Value::Date(self.load_date);
        match stamp_idx {
            Some(idx) => {
                table.columns[idx].column_type = ColumnType::Date;
                for row in &mut table.rows {
                    row[idx] = stamp.clone();
                }
            }
            None => {
                table
                    .columns
                    .push(Column::new(LOAD_TIMESTAMP_COLUMN, ColumnType::Date));
                for row in &mut table.rows {
                    row.push(stamp.clone());
                }
            }
        }

        metrics::normalize::rows_dropped(&table.name, "empty", stats.empty_dropped);
        metrics::normalize::rows_dropped(&table.name, "duplicate", stats.duplicates_dropped);
        debug!(
            table = %table.name,
            input = stats.input_rows,
            empty_dropped = stats.empty_dropped,
            duplicates_dropped = stats.duplicates_dropped,
            load_date = %self.load_date,
            "Normalized table"
        );

        (table, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 9).unwrap()
    }

    fn two_column_table(rows: Vec<Vec<Value>>) -> Table {
        Table::new(
            "t",
            vec![
                Column::new("col1", ColumnType::Integer),
                Column::new("col2", ColumnType::Integer),
            ],
        )
        .with_rows(rows)
    }

    #[test]
    fn test_drops_duplicates_and_stamps_every_row() {
        let r = vec![Value::Integer(1), Value::Integer(1)];
        let r2 = vec![Value::Integer(1), Value::Integer(2)];
        let table = two_column_table(vec![r.clone(), r.clone(), r2.clone()]);

        let (normalized, stats) = Normalizer::new(load_date()).normalize_with_stats(table);

        assert_eq!(stats.duplicates_dropped, 1);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized.column_names(), vec!["col1", "col2", "load_timestamp"]);
        assert_eq!(normalized.rows[0][..2], r[..]);
        assert_eq!(normalized.rows[1][..2], r2[..]);
        for idx in 0..normalized.len() {
            assert_eq!(
                normalized.value(idx, LOAD_TIMESTAMP_COLUMN),
                Some(&Value::Date(load_date()))
            );
        }
    }

    #[test]
    fn test_matches_reference_cleaning_case() {
        let table = two_column_table(vec![
            vec![Value::Integer(1), Value::Integer(1)],
            vec![Value::Null, Value::Null],
            vec![Value::Null, Value::Null],
            vec![Value::Integer(1), Value::Integer(1)],
            vec![Value::Integer(1), Value::Integer(2)],
        ]);

        let normalized = Normalizer::new(load_date()).normalize(table);

        assert_eq!(normalized.len(), 2);
        assert!(normalized.rows.iter().flatten().all(|v| !v.is_blank()));
    }

    #[test]
    fn test_keeps_row_with_a_single_value() {
        let table = two_column_table(vec![
            vec![Value::Null, Value::from("  ")],
            vec![Value::Null, Value::Integer(7)],
        ]);

        let (normalized, stats) = Normalizer::new(load_date()).normalize_with_stats(table);

        assert_eq!(stats.empty_dropped, 1);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized.value(0, "col2"), Some(&Value::Integer(7)));
    }

    #[test]
    fn test_renormalizing_only_moves_the_stamp() {
        let table = two_column_table(vec![
            vec![Value::Integer(1), Value::Integer(1)],
            vec![Value::Integer(2), Value::Null],
        ]);
        let first = Normalizer::new(load_date()).normalize(table);

        let next_day = load_date().succ_opt().unwrap();
        let second = Normalizer::new(next_day).normalize(first.clone());

        assert_eq!(second.columns, first.columns);
        assert_eq!(second.len(), first.len());
        for (a, b) in first.rows.iter().zip(&second.rows) {
            assert_eq!(a[..2], b[..2]);
            assert_eq!(b[2], Value::Date(next_day));
        }
    }

    #[test]
    fn test_rows_differing_only_by_old_stamp_collapse() {
        let mut table = Table::new(
            "dim_produit",
            vec![
                Column::new("id_produit", ColumnType::Text),
                Column::new(LOAD_TIMESTAMP_COLUMN, ColumnType::Date),
            ],
        );
        table.rows = vec![
            vec![Value::from("P1"), Value::Date(NaiveDate::from_ymd_opt(2025, 5, 1).unwrap())],
            vec![Value::from("P1"), Value::Date(NaiveDate::from_ymd_opt(2025, 5, 2).unwrap())],
        ];

        let (normalized, stats) = Normalizer::new(load_date()).normalize_with_stats(table);

        assert_eq!(stats.duplicates_dropped, 1);
        assert_eq!(
            normalized.rows,
            vec![vec![Value::from("P1"), Value::Date(load_date())]]
        );
        let unique: HashSet<&Vec<Value>> = normalized.rows.iter().collect();
        assert_eq!(unique.len(), normalized.len());
    }

    #[test]
    fn test_row_with_only_a_stamp_is_empty() {
        let mut table = two_column_table(vec![vec![Value::Null, Value::Null]]);
        table.columns.push(Column::new(LOAD_TIMESTAMP_COLUMN, ColumnType::Date));
        table.rows[0].push(Value::Date(load_date()));

        let normalized = Normalizer::new(load_date()).normalize(table);
        assert!(normalized.is_empty());
    }
}
