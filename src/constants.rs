// Source files (names and delimiters are part of the upstream export contract)
pub const PRODUCT_FILE: &str = "produit.csv";
pub const WAREHOUSE_FILE: &str = "entrepots.csv";
pub const ORDER_FILE: &str = "commandes.csv";
pub const DELIVERY_FILE: &str = "livrasion.csv";
pub const MOVEMENT_FILE: &str = "mouvements.csv";

// Staging tables
pub const DIM_PRODUCT_TABLE: &str = "dim_produit";
pub const DIM_WAREHOUSE_TABLE: &str = "dim_entrepot";
pub const STG_ORDERS_TABLE: &str = "stg_commandes";
pub const STG_DELIVERIES_TABLE: &str = "stg_livrasion";
pub const STG_MOVEMENTS_TABLE: &str = "stg_mouvements";

// Fact tables
pub const FACT_ORDERS_TABLE: &str = "FACT_commandes";
pub const FACT_DELIVERIES_TABLE: &str = "FACT_Livraison";
pub const FACT_MOVEMENTS_TABLE: &str = "FACT_Mouvement";

/// Column appended by normalization. Always holds the date the run happened,
/// so it is the one field that changes when the same data is normalized twice.
pub const LOAD_TIMESTAMP_COLUMN: &str = "load_timestamp";

// Delivery status vocabulary, matched byte-for-byte (case and accents included)
pub const STATUS_DELIVERED: &str = "livré";
pub const STATUS_LATE: &str = "en retard";
pub const STATUS_IN_TRANSIT: &str = "en transit";

// Movement type vocabulary
pub const MOVEMENT_RECEIVED: &str = "réception";
pub const MOVEMENT_SHIPPED: &str = "expédition";

// Anomaly flag values on FACT_Livraison
pub const DELIVERY_ANOMALY: &str = "Anomalies_livraisons";
pub const DELIVERY_NO_ANOMALY: &str = "Pas anomalie";

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CONFIG_FILE: &str = "etl.toml";
pub const DEFAULT_WAREHOUSE_PATH: &str = "warehouse";

/// Upper bound on bound parameters in a single multi-row INSERT.
pub const MAX_BIND_PARAMS: usize = 999;

/// Every table that ends up in both stores, in publish order.
pub const PUBLISHED_TABLES: [&str; 8] = [
    DIM_PRODUCT_TABLE,
    DIM_WAREHOUSE_TABLE,
    STG_ORDERS_TABLE,
    STG_DELIVERIES_TABLE,
    STG_MOVEMENTS_TABLE,
    FACT_MOVEMENTS_TABLE,
    FACT_DELIVERIES_TABLE,
    FACT_ORDERS_TABLE,
];
