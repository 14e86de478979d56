//! Append-only audit log.

use crate::{error::StoreError, keys, store::Store};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl Store {
    pub fn append_audit(
        &self,
        entity_type: &str,
        entity_id: &str,
        action: &str,
        detail: &str,
    ) -> Result<AuditRecord, StoreError> {
        let record = AuditRecord {
            id: self.next_id()?,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            action: action.to_string(),
            detail: detail.to_string(),
            at: Utc::now(),
        };
        self.put(&keys::audit(record.id), &record)?;
        Ok(record)
    }

    /// Audit rows for one entity, oldest first.
    pub fn audit_for(&self, entity_type: &str, entity_id: &str) -> Result<Vec<AuditRecord>, StoreError> {
        let rows: Vec<AuditRecord> = self.scan(keys::AUDIT)?;
        Ok(rows
            .into_iter()
            .filter(|row| row.entity_type == entity_type && row.entity_id == entity_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_rows_accumulate_in_order() {
        let store = Store::temporary().unwrap();
        store.append_audit("order", "1", "received", "retrieve PART-A").unwrap();
        store.append_audit("order", "1", "failed", "no_source").unwrap();
        store.append_audit("order", "2", "received", "").unwrap();

        let rows = store.audit_for("order", "1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].action, "received");
        assert_eq!(rows[1].action, "failed");
    }
}
