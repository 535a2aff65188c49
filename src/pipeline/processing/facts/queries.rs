//! Analytic queries behind the three fact tables.
//!
//! Every aggregate is a window aggregate: `OVER ()` broadcasts one whole-table
//! value to every row, `OVER (PARTITION BY ...)` broadcasts one value per
//! partition. No query groups rows. Dimension joins are LEFT JOINs so a fact
//! row survives a missing dimension key with the dimension columns left NULL.
//! Partitions use the staging keys, not the (possibly NULL) dimension keys.

/// Upper-case English month name of an ISO date column.
macro_rules! month_name {
    ($col:literal) => {
        concat!(
            "CASE strftime('%m', ", $col, ") ",
            "WHEN '01' THEN 'JANUARY' WHEN '02' THEN 'FEBRUARY' WHEN '03' THEN 'MARCH' ",
            "WHEN '04' THEN 'APRIL' WHEN '05' THEN 'MAY' WHEN '06' THEN 'JUNE' ",
            "WHEN '07' THEN 'JULY' WHEN '08' THEN 'AUGUST' WHEN '09' THEN 'SEPTEMBER' ",
            "WHEN '10' THEN 'OCTOBER' WHEN '11' THEN 'NOVEMBER' WHEN '12' THEN 'DECEMBER' END"
        )
    };
}

pub const FACT_ORDERS_SQL: &str = concat!(
    "SELECT stg_com.id_commande, prod.id_produit, dim.id_entrepot,\n",
    "    ",
    month_name!("stg_com.date_commande"),
    " AS Month_Name,\n",
    r#"    strftime('%Y', stg_com.date_commande) AS Year_name,
    COUNT(*) OVER () AS nombre_total_commandes,
    SUM(stg_com.prix_total) OVER () AS CA,
    SUM(stg_com.quantite) OVER (PARTITION BY stg_com.id_produit) AS quantite_vendu_par_produit
FROM stg_commandes AS stg_com
LEFT JOIN dim_entrepot AS dim ON dim.id_entrepot = stg_com.id_entrepot
LEFT JOIN dim_produit AS prod ON prod.id_produit = stg_com.id_produit
ORDER BY stg_com.rowid"#
);

// Status literals must stay in sync with constants::STATUS_*.
pub const FACT_DELIVERIES_SQL: &str = r#"SELECT dim.id_entrepot, prod.id_produit, stg_liv.id_client,
    SUM(CASE WHEN stg_liv.statut_livraison = 'livré' THEN 1 ELSE 0 END) OVER () AS "nbre_commandes_livré",
    SUM(CASE WHEN stg_liv.statut_livraison = 'en retard' THEN 1 ELSE 0 END) OVER () AS nbre_commandes_en_retard,
    SUM(CASE WHEN stg_liv.statut_livraison = 'en transit' THEN 1 ELSE 0 END) OVER () AS nbre_commandes_en_transit,
    SUM(stg_liv.quantite) OVER () AS "quantite_livré",
    CASE WHEN stg_liv.quantite < 0 THEN 'Anomalies_livraisons' ELSE 'Pas anomalie' END AS Anomalies_livraisons,
    CAST(julianday(date(stg_liv.date_livraison)) - julianday(date(stg_liv.date_commande)) AS INTEGER) AS "délai_livraison"
FROM stg_livrasion AS stg_liv
LEFT JOIN dim_entrepot AS dim ON dim.id_entrepot = CAST(stg_liv.entrepot_source AS TEXT)
LEFT JOIN dim_produit AS prod ON prod.id_produit = CAST(stg_liv.id_produit AS TEXT)
ORDER BY stg_liv.rowid"#;

// Movement literals must stay in sync with constants::MOVEMENT_*.
pub const FACT_MOVEMENTS_SQL: &str = r#"SELECT stg_m.date_mouvement, prod.id_produit, entr.id_entrepot,
    SUM(CASE WHEN stg_m.type_mouvement = 'réception' THEN stg_m.quantite ELSE 0 END) OVER by_product AS "Total_réceptionné_par_produit",
    SUM(CASE WHEN stg_m.type_mouvement = 'expédition' THEN stg_m.quantite ELSE 0 END) OVER by_product AS "Total_expéditié_par_produit",
    SUM(CASE WHEN stg_m.type_mouvement = 'réception' THEN stg_m.quantite ELSE 0 END) OVER by_product
        - SUM(CASE WHEN stg_m.type_mouvement = 'expédition' THEN stg_m.quantite ELSE 0 END) OVER by_product
        AS "Stock_théorique_par_produit",
    SUM(CASE WHEN stg_m.type_mouvement = 'réception' THEN stg_m.quantite ELSE 0 END) OVER by_warehouse
        - SUM(CASE WHEN stg_m.type_mouvement = 'expédition' THEN stg_m.quantite ELSE 0 END) OVER by_warehouse
        AS "Stock_théorique_par_entrepot"
FROM stg_mouvements AS stg_m
LEFT JOIN dim_produit AS prod ON stg_m.id_produit = prod.id_produit
LEFT JOIN dim_entrepot AS entr ON stg_m.id_entrepot = entr.id_entrepot
WINDOW by_product AS (PARTITION BY stg_m.id_produit),
       by_warehouse AS (PARTITION BY stg_m.id_entrepot)
ORDER BY stg_m.rowid"#;
