//! Per-station production tallies accumulated from `production.report`.

use crate::{error::StoreError, keys, store::Store};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionTallyRow {
    pub station_id: String,
    pub cat_id: String,
    pub count: i64,
}

impl Store {
    /// Add a reported count to the running tally, returning the new total.
    pub fn add_production(
        &self,
        station_id: &str,
        cat_id: &str,
        count: i64,
    ) -> Result<i64, StoreError> {
        let key = keys::tally(station_id, cat_id);
        let mut row = self.get::<ProductionTallyRow>(&key)?.unwrap_or(ProductionTallyRow {
            station_id: station_id.to_string(),
            cat_id: cat_id.to_string(),
            count: 0,
        });
        row.count += count;
        self.put(&key, &row)?;
        Ok(row.count)
    }

    pub fn production_tally(&self, station_id: &str, cat_id: &str) -> Result<i64, StoreError> {
        Ok(self
            .get::<ProductionTallyRow>(&keys::tally(station_id, cat_id))?
            .map(|row| row.count)
            .unwrap_or(0))
    }
}
