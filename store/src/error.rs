use crate::order::OrderStatus;
use thiserror::Error;
use uuid::Uuid;

/// Errors produced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage: {0}")]
    Db(#[from] sled::Error),

    #[error("row codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("order uuid already exists: {0}")]
    DuplicateUuid(Uuid),

    #[error("payload {payload} already claimed by order {claimed_by}")]
    ClaimConflict { payload: i64, claimed_by: i64 },

    #[error("order {order} is terminal, refusing transition to {to}")]
    Terminal { order: i64, to: OrderStatus },

    #[error("order {order}: invalid transition {from} -> {to}")]
    InvalidTransition {
        order: i64,
        from: OrderStatus,
        to: OrderStatus,
    },
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}
