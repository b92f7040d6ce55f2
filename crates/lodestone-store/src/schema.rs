//! Database schema definitions and column families.
//!
//! A logical table maps onto two `RocksDB` column families: the records
//! themselves and an index of info records by lifecycle state.

/// Suffix of the state index column family.
const STATE_INDEX_SUFFIX: &str = ".info_by_state";

/// Primary records, keyed by `server_id || 0x00 || record_type`.
#[must_use]
pub fn records_cf(table: &str) -> String {
    table.to_string()
}

/// Index: info records by state, keyed by `state || server_id`.
#[must_use]
pub fn state_index_cf(table: &str) -> String {
    format!("{table}{STATE_INDEX_SUFFIX}")
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families(table: &str) -> Vec<String> {
    vec![records_cf(table), state_index_cf(table)]
}
