//! Transaction handle
//!
//! A [`WriteTxn`] borrows the store and issues provisional writes under one
//! transaction id. Dropping a handle that was neither committed nor rolled
//! back aborts the transaction.

use crate::sharded::ShardedLogStore;
use strata_core::{LogPosition, LogicalTimestamp, Result, RowChange, TableId, TxnId, Value};
use tracing::warn;

/// Open transaction on a [`ShardedLogStore`]
pub struct WriteTxn<'a> {
    store: &'a ShardedLogStore,
    id: TxnId,
    finished: bool,
}

impl<'a> WriteTxn<'a> {
    pub(crate) fn new(store: &'a ShardedLogStore, id: TxnId) -> Self {
        Self {
            store,
            id,
            finished: false,
        }
    }

    /// Transaction id
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Provisional write of an arbitrary row change
    pub fn write(&self, row: RowChange) -> Result<LogPosition> {
        self.store.txn_write(self.id, row)
    }

    /// Provisional insert
    pub fn insert(&self, table: &str, key: Value, row: Vec<Value>) -> Result<LogPosition> {
        self.write(RowChange::insert(TableId::new(table), key, row))
    }

    /// Provisional update
    pub fn update(
        &self,
        table: &str,
        key: Value,
        before: Vec<Value>,
        after: Vec<Value>,
    ) -> Result<LogPosition> {
        self.write(RowChange::update(TableId::new(table), key, before, after))
    }

    /// Provisional delete
    pub fn delete(&self, table: &str, key: Value, before: Vec<Value>) -> Result<LogPosition> {
        self.write(RowChange::delete(TableId::new(table), key, before))
    }

    /// Commit and apply on every participant
    pub fn commit(mut self) -> Result<LogicalTimestamp> {
        self.finished = true;
        self.store.commit(self.id)
    }

    /// Decide commit, leaving the apply to [`ShardedLogStore::apply_commit`]
    pub fn decide_commit(mut self) -> Result<LogicalTimestamp> {
        self.finished = true;
        self.store.decide_commit(self.id)
    }

    /// Roll back
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.store.abort(self.id)
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.store.abort(self.id) {
                warn!(txn = %self.id, error = %e, "abort of dropped transaction failed");
            }
        }
    }
}

impl std::fmt::Debug for WriteTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTxn")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish()
    }
}
