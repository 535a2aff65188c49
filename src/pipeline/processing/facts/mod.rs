pub mod queries;

use std::fmt;
use tracing::{info, instrument};

use crate::constants;
use crate::error::Result;
use crate::pipeline::storage::AnalyticStore;
use crate::types::Table;

/// The three derived fact tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactKind {
    /// Grain: order line.
    Orders,
    /// Grain: delivery line.
    Deliveries,
    /// Grain: stock movement line.
    Movements,
}

impl FactKind {
    pub const ALL: [FactKind; 3] = [FactKind::Movements, FactKind::Deliveries, FactKind::Orders];

    pub fn table_name(&self) -> &'static str {
        match self {
            FactKind::Orders => constants::FACT_ORDERS_TABLE,
            FactKind::Deliveries => constants::FACT_DELIVERIES_TABLE,
            FactKind::Movements => constants::FACT_MOVEMENTS_TABLE,
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            FactKind::Orders => queries::FACT_ORDERS_SQL,
            FactKind::Deliveries => queries::FACT_DELIVERIES_SQL,
            FactKind::Movements => queries::FACT_MOVEMENTS_SQL,
        }
    }
}

impl fmt::Display for FactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// A complete set of fact tables from one derivation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct FactSet {
    pub orders: Table,
    pub deliveries: Table,
    pub movements: Table,
}

impl FactSet {
    /// Tables in publish order.
    pub fn tables(&self) -> [&Table; 3] {
        [&self.movements, &self.deliveries, &self.orders]
    }

    pub fn into_tables(self) -> Vec<Table> {
        vec![self.movements, self.deliveries, self.orders]
    }
}

/// Runs the fact queries against whatever the staging store currently holds.
/// Callers must have finished the staging load first.
#[derive(Debug, Default, Clone, Copy)]
pub struct FactDerivation;

impl FactDerivation {
    pub fn new() -> Self {
        Self
    }

    pub async fn derive_one(&self, store: &dyn AnalyticStore, kind: FactKind) -> Result<Table> {
        let table = store.query(kind.table_name(), kind.sql()).await?;
        info!(fact = %kind, rows = table.len(), "Derived fact table");
        Ok(table)
    }

    /// All three facts or an error; a partial set is never returned.
    #[instrument(skip_all)]
    pub async fn derive(&self, store: &dyn AnalyticStore) -> Result<FactSet> {
        let movements = self.derive_one(store, FactKind::Movements).await?;
        let deliveries = self.derive_one(store, FactKind::Deliveries).await?;
        let orders = self.derive_one(store, FactKind::Orders).await?;
        Ok(FactSet {
            orders,
            deliveries,
            movements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EtlError;
    use crate::pipeline::storage::{SqliteStore, StagingSink};
    use crate::types::{Column, ColumnType, Value};

    fn text(s: &str) -> Value {
        Value::from(s)
    }

    fn table(name: &str, columns: &[(&str, ColumnType)], rows: Vec<Vec<Value>>) -> Table {
        Table::new(
            name,
            columns.iter().map(|(n, t)| Column::new(*n, *t)).collect(),
        )
        .with_rows(rows)
    }

    async fn store_with(tables: Vec<Table>) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        for t in tables {
            store.replace(&t.name.clone(), &t).await.unwrap();
        }
        store
    }

    fn dims(products: &[&str], warehouses: &[&str]) -> Vec<Table> {
        vec![
            table(
                "dim_produit",
                &[("id_produit", ColumnType::Text)],
                products.iter().map(|p| vec![text(p)]).collect(),
            ),
            table(
                "dim_entrepot",
                &[("id_entrepot", ColumnType::Text)],
                warehouses.iter().map(|w| vec![text(w)]).collect(),
            ),
        ]
    }

    fn orders(rows: &[(&str, &str, &str, &str, i64, f64)]) -> Table {
        table(
            "stg_commandes",
            &[
                ("id_commande", ColumnType::Text),
                ("id_produit", ColumnType::Text),
                ("id_entrepot", ColumnType::Text),
                ("date_commande", ColumnType::Text),
                ("quantite", ColumnType::Integer),
                ("prix_total", ColumnType::Float),
            ],
            rows.iter()
                .map(|(c, p, w, d, q, t)| {
                    vec![text(c), text(p), text(w), text(d), Value::Integer(*q), Value::Float(*t)]
                })
                .collect(),
        )
    }

    fn movements(rows: &[(&str, &str, &str, i64)]) -> Table {
        table(
            "stg_mouvements",
            &[
                ("id_produit", ColumnType::Text),
                ("id_entrepot", ColumnType::Text),
                ("type_mouvement", ColumnType::Text),
                ("quantite", ColumnType::Integer),
                ("date_mouvement", ColumnType::Text),
            ],
            rows.iter()
                .map(|(p, w, t, q)| {
                    vec![text(p), text(w), text(t), Value::Integer(*q), text("2025-05-01")]
                })
                .collect(),
        )
    }

    fn deliveries(rows: &[(i64, i64, &str, i64, &str, &str)]) -> Table {
        table(
            "stg_livrasion",
            &[
                ("entrepot_source", ColumnType::Integer),
                ("id_produit", ColumnType::Integer),
                ("id_client", ColumnType::Text),
                ("statut_livraison", ColumnType::Text),
                ("quantite", ColumnType::Integer),
                ("date_commande", ColumnType::Text),
                ("date_livraison", ColumnType::Text),
            ],
            rows.iter()
                .map(|(w, p, status, q, ordered, delivered)| {
                    vec![
                        Value::Integer(*w),
                        Value::Integer(*p),
                        text("CL1"),
                        text(status),
                        Value::Integer(*q),
                        text(ordered),
                        text(delivered),
                    ]
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_whole_table_aggregates_are_broadcast() {
        let mut tables = dims(&["A", "B"], &["E1"]);
        tables.push(orders(&[
            ("C1", "A", "E1", "2025-05-09", 2, 10.0),
            ("C2", "B", "E1", "2025-12-01", 1, 5.0),
        ]));
        let store = store_with(tables).await;

        let facts = FactDerivation::new()
            .derive_one(&store, FactKind::Orders)
            .await
            .unwrap();

        assert_eq!(facts.len(), 2);
        for row in 0..2 {
            assert_eq!(facts.value(row, "CA"), Some(&Value::Float(15.0)));
            assert_eq!(facts.value(row, "nombre_total_commandes"), Some(&Value::Integer(2)));
        }
        assert_eq!(facts.value(0, "Month_Name"), Some(&text("MAY")));
        assert_eq!(facts.value(1, "Month_Name"), Some(&text("DECEMBER")));
        assert_eq!(facts.value(0, "Year_name"), Some(&text("2025")));
    }

    #[tokio::test]
    async fn test_quantity_sold_is_partitioned_by_product() {
        let mut tables = dims(&["A", "B"], &["E1"]);
        tables.push(orders(&[
            ("C1", "A", "E1", "2025-05-09", 2, 10.0),
            ("C2", "B", "E1", "2025-05-10", 1, 5.0),
            ("C3", "A", "E1", "2025-05-11", 4, 20.0),
        ]));
        let store = store_with(tables).await;

        let facts = FactDerivation::new()
            .derive_one(&store, FactKind::Orders)
            .await
            .unwrap();

        let sold: Vec<&Value> = facts.column_values("quantite_vendu_par_produit").unwrap();
        assert_eq!(sold, vec![&Value::Integer(6), &Value::Integer(1), &Value::Integer(6)]);
        let ids: Vec<&Value> = facts.column_values("id_commande").unwrap();
        assert_eq!(ids, vec![&text("C1"), &text("C2"), &text("C3")]);
    }

    #[tokio::test]
    async fn test_theoretical_stock_per_product_and_warehouse() {
        let mut tables = dims(&["A", "B"], &["E1", "E2"]);
        tables.push(movements(&[
            ("A", "E1", "réception", 100),
            ("A", "E1", "expédition", 30),
            ("B", "E1", "réception", 10),
            ("B", "E2", "expédition", 4),
        ]));
        let store = store_with(tables).await;

        let facts = FactDerivation::new()
            .derive_one(&store, FactKind::Movements)
            .await
            .unwrap();

        let by_product = facts.column_values("Stock_théorique_par_produit").unwrap();
        assert_eq!(
            by_product,
            vec![&Value::Integer(70), &Value::Integer(70), &Value::Integer(6), &Value::Integer(6)]
        );
        let by_warehouse = facts.column_values("Stock_théorique_par_entrepot").unwrap();
        assert_eq!(
            by_warehouse,
            vec![&Value::Integer(80), &Value::Integer(80), &Value::Integer(80), &Value::Integer(-4)]
        );
        assert_eq!(facts.value(0, "Total_réceptionné_par_produit"), Some(&Value::Integer(100)));
        assert_eq!(facts.value(0, "Total_expéditié_par_produit"), Some(&Value::Integer(30)));
    }

    #[tokio::test]
    async fn test_missing_dimension_keeps_fact_row() {
        let mut tables = dims(&["A"], &["E1"]);
        tables.push(movements(&[
            ("A", "E1", "réception", 5),
            ("GHOST", "E9", "réception", 7),
        ]));
        let store = store_with(tables).await;

        let facts = FactDerivation::new()
            .derive_one(&store, FactKind::Movements)
            .await
            .unwrap();

        assert_eq!(facts.len(), 2);
        assert_eq!(facts.value(1, "id_produit"), Some(&Value::Null));
        assert_eq!(facts.value(1, "id_entrepot"), Some(&Value::Null));
        // partitions still follow the staging key
        assert_eq!(facts.value(1, "Stock_théorique_par_produit"), Some(&Value::Integer(7)));
    }

    #[tokio::test]
    async fn test_delivery_counts_flags_and_lead_time() {
        let mut tables = vec![
            table(
                "dim_produit",
                &[("id_produit", ColumnType::Integer)],
                vec![vec![Value::Integer(1)]],
            ),
            table(
                "dim_entrepot",
                &[("id_entrepot", ColumnType::Text)],
                vec![vec![text("10")]],
            ),
        ];
        tables.push(deliveries(&[
            (10, 1, "livré", 5, "2025-05-01", "2025-05-04"),
            (10, 1, "en retard", 3, "2025-05-01", "2025-05-10"),
            (10, 2, "en transit", -2, "2025-05-05", "2025-05-03"),
            (11, 1, "Livré", 1, "2025-05-01", "2025-05-01"),
            (10, 1, "livre", 1, "2025-05-01 09:30:00", "2025-05-02 08:00:00"),
        ]));
        let store = store_with(tables).await;

        let facts = FactDerivation::new()
            .derive_one(&store, FactKind::Deliveries)
            .await
            .unwrap();

        assert_eq!(facts.len(), 5);
        for row in 0..5 {
            // "Livré" and "livre" match nothing
            assert_eq!(facts.value(row, "nbre_commandes_livré"), Some(&Value::Integer(1)));
            assert_eq!(facts.value(row, "nbre_commandes_en_retard"), Some(&Value::Integer(1)));
            assert_eq!(facts.value(row, "nbre_commandes_en_transit"), Some(&Value::Integer(1)));
            assert_eq!(facts.value(row, "quantite_livré"), Some(&Value::Integer(8)));
        }

        let flags = facts.column_values("Anomalies_livraisons").unwrap();
        assert_eq!(flags[2], &text("Anomalies_livraisons"));
        assert_eq!(flags[0], &text("Pas anomalie"));

        let lead = facts.column_values("délai_livraison").unwrap();
        assert_eq!(
            lead,
            vec![
                &Value::Integer(3),
                &Value::Integer(9),
                &Value::Integer(-2),
                &Value::Integer(0),
                &Value::Integer(1)
            ]
        );

        // integer staging keys still join text dimension keys
        assert_eq!(facts.value(0, "id_entrepot"), Some(&text("10")));
        assert_eq!(facts.value(0, "id_produit"), Some(&Value::Integer(1)));
        assert_eq!(facts.value(2, "id_produit"), Some(&Value::Null));
        assert_eq!(facts.value(3, "id_entrepot"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_missing_staging_table_fails_the_whole_set() {
        let mut tables = dims(&["A"], &["E1"]);
        tables.push(movements(&[("A", "E1", "réception", 5)]));
        let store = store_with(tables).await;

        let err = FactDerivation::new().derive(&store).await.unwrap_err();
        match err {
            EtlError::DerivationQuery { query, reason } => {
                assert_eq!(query, "FACT_Livraison");
                assert!(reason.contains("stg_livrasion"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
