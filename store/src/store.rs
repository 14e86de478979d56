//! Store handle and shared row codec helpers.

use crate::error::StoreError;
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::Path;

/// Handle on the backing sled tree. Cheap to clone; all clones share the
/// same underlying database.
#[derive(Debug, Clone)]
pub struct Store {
    db: sled::Db,
    tree: sled::Tree,
}

impl Store {
    /// Open (or create) the store at the provided path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let tree = db.open_tree("shingo")?;
        Ok(Self { db, tree })
    }

    /// Open an ephemeral store that is dropped with the handle. Test use.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        let tree = db.open_tree("shingo")?;
        Ok(Self { db, tree })
    }

    pub(crate) fn tree(&self) -> &sled::Tree {
        &self.tree
    }

    /// Monotonic id source shared by all entities.
    pub(crate) fn next_id(&self) -> Result<i64, StoreError> {
        Ok(self.db.generate_id()? as i64)
    }

    pub(crate) fn get<T>(&self, key: &[u8]) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned,
    {
        self.tree
            .get(key)?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(StoreError::from))
            .transpose()
    }

    pub(crate) fn put<T>(&self, key: &[u8], value: &T) -> Result<(), StoreError>
    where
        T: Serialize,
    {
        self.tree.insert(key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    /// Decode every row under `prefix`, in key order.
    pub(crate) fn scan<T>(&self, prefix: impl AsRef<[u8]>) -> Result<Vec<T>, StoreError>
    where
        T: DeserializeOwned,
    {
        let mut rows = Vec::new();
        for entry in self.tree.scan_prefix(prefix) {
            let (_, bytes) = entry?;
            rows.push(serde_json::from_slice(&bytes)?);
        }
        Ok(rows)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.tree.flush()?;
        Ok(())
    }
}

/// Collapse the sled transaction wrapper back into [`StoreError`].
pub(crate) fn unwrap_tx<T>(result: Result<T, TransactionError<StoreError>>) -> Result<T, StoreError> {
    result.map_err(|err| match err {
        TransactionError::Abort(inner) => inner,
        TransactionError::Storage(err) => StoreError::Db(err),
    })
}

pub(crate) fn abort<T>(err: StoreError) -> Result<T, ConflictableTransactionError<StoreError>> {
    Err(ConflictableTransactionError::Abort(err))
}

pub(crate) fn tx_encode<T>(value: &T) -> Result<Vec<u8>, ConflictableTransactionError<StoreError>>
where
    T: Serialize,
{
    serde_json::to_vec(value).map_err(|err| ConflictableTransactionError::Abort(err.into()))
}

pub(crate) fn tx_decode<T>(bytes: &[u8]) -> Result<T, ConflictableTransactionError<StoreError>>
where
    T: DeserializeOwned,
{
    serde_json::from_slice(bytes).map_err(|err| ConflictableTransactionError::Abort(err.into()))
}
