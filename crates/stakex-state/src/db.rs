use crate::keys::Table;
use stakex_core::StakexError;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Persistent state database backed by sled.
///
/// One named tree per [`Table`]. Primary tables map a fixed-width key to a
/// bincode record; index tables map a sortable key to an empty value (the
/// primary key is the key's suffix).
pub struct StateDb {
    db: sled::Db,
    trees: HashMap<Table, sled::Tree>,
}

/// Pending writes, grouped per table. `None` marks a deletion.
pub type WriteSet = BTreeMap<Table, BTreeMap<Vec<u8>, Option<Vec<u8>>>>;

impl StateDb {
    /// Open or create the state database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StakexError> {
        let db = sled::open(path).map_err(|e| StakexError::Storage(e.to_string()))?;
        let mut trees = HashMap::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            let tree = db
                .open_tree(table.tree_name())
                .map_err(|e| StakexError::Storage(e.to_string()))?;
            trees.insert(table, tree);
        }
        Ok(Self { db, trees })
    }

    fn tree(&self, table: Table) -> Result<&sled::Tree, StakexError> {
        self.trees
            .get(&table)
            .ok_or_else(|| StakexError::Storage(format!("tree {} not open", table.tree_name())))
    }

    pub fn get_raw(&self, table: Table, key: &[u8]) -> Result<Option<Vec<u8>>, StakexError> {
        let value = self
            .tree(table)?
            .get(key)
            .map_err(|e| StakexError::Storage(e.to_string()))?;
        Ok(value.map(|v| v.to_vec()))
    }

    /// Up to `limit` committed entries whose key starts with `prefix`, in key order.
    pub fn scan_raw(
        &self,
        table: Table,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StakexError> {
        let mut out = Vec::new();
        for item in self.tree(table)?.scan_prefix(prefix) {
            if out.len() >= limit {
                break;
            }
            let (k, v) = item.map_err(|e| StakexError::Storage(e.to_string()))?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    /// Apply a write set atomically across every tree it touches.
    pub fn apply(&self, writes: WriteSet) -> Result<(), StakexError> {
        self.commit(writes, |_| Ok(()))
    }

    /// Commit `writes` in one sled transaction. `check` runs per tree inside
    /// the transaction; an error from it aborts the whole commit.
    fn commit<F>(&self, writes: WriteSet, check: F) -> Result<(), StakexError>
    where
        F: Fn(Table) -> Result<(), StakexError>,
    {
        if writes.is_empty() {
            return Ok(());
        }
        let mut tables = Vec::with_capacity(writes.len());
        let mut trees = Vec::with_capacity(writes.len());
        let mut batches = Vec::with_capacity(writes.len());
        for (table, entries) in writes {
            let mut batch = sled::Batch::default();
            for (key, value) in entries {
                match value {
                    Some(bytes) => batch.insert(key, bytes),
                    None => batch.remove(key),
                }
            }
            tables.push(table);
            trees.push(self.tree(table)?);
            batches.push(batch);
        }

        trees
            .as_slice()
            .transaction(|txs| {
                for ((tx, batch), table) in txs.iter().zip(&batches).zip(&tables) {
                    check(*table).map_err(ConflictableTransactionError::Abort)?;
                    tx.apply_batch(batch)?;
                }
                Ok(())
            })
            .map_err(|e: TransactionError<StakexError>| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => StakexError::Storage(e.to_string()),
            })
    }

    pub fn flush(&self) -> Result<(), StakexError> {
        self.db.flush().map_err(|e| StakexError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db(name: &str) -> StateDb {
        let dir = std::env::temp_dir().join(format!("stakex_db_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        StateDb::open(&dir).expect("open temp db")
    }

    #[test]
    fn batch_applies_inserts_and_deletes() {
        let db = temp_db("batch");
        let mut writes = WriteSet::new();
        writes
            .entry(Table::Voters)
            .or_default()
            .extend([(b"a".to_vec(), Some(b"1".to_vec())), (b"b".to_vec(), Some(b"2".to_vec()))]);
        db.apply(writes).unwrap();

        let mut writes = WriteSet::new();
        writes.entry(Table::Voters).or_default().insert(b"a".to_vec(), None);
        db.apply(writes).unwrap();

        assert_eq!(db.get_raw(Table::Voters, b"a").unwrap(), None);
        assert_eq!(db.get_raw(Table::Voters, b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(db.get_raw(Table::Producers, b"b").unwrap(), None);
    }

    #[test]
    fn scan_respects_prefix_and_limit() {
        let db = temp_db("scan");
        let mut writes = WriteSet::new();
        let entries = writes.entry(Table::LoansByOwner).or_default();
        for k in [b"x1", b"x2", b"x3", b"y1"] {
            entries.insert(k.to_vec(), Some(Vec::new()));
        }
        db.apply(writes).unwrap();

        let hits = db.scan_raw(Table::LoansByOwner, b"x", 2).unwrap();
        let keys: Vec<_> = hits.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"x1".to_vec(), b"x2".to_vec()]);
    }

    #[test]
    fn failure_on_a_later_tree_commits_nothing() {
        let db = temp_db("abort");
        let mut writes = WriteSet::new();
        writes.entry(Table::Singletons).or_default().insert(b"g".to_vec(), Some(b"1".to_vec()));
        writes.entry(Table::Voters).or_default().insert(b"v".to_vec(), Some(b"2".to_vec()));
        writes.entry(Table::Refunds).or_default().insert(b"r".to_vec(), Some(b"3".to_vec()));

        let err = db
            .commit(writes, |table| match table {
                Table::Voters => Err(StakexError::Storage("disk full".into())),
                _ => Ok(()),
            })
            .unwrap_err();
        assert!(matches!(err, StakexError::Storage(msg) if msg == "disk full"));

        assert_eq!(db.get_raw(Table::Singletons, b"g").unwrap(), None);
        assert_eq!(db.get_raw(Table::Voters, b"v").unwrap(), None);
        assert_eq!(db.get_raw(Table::Refunds, b"r").unwrap(), None);
    }

    #[test]
    fn empty_write_set_is_a_noop() {
        let db = temp_db("empty");
        db.apply(WriteSet::new()).unwrap();
        assert!(db.scan_raw(Table::Voters, &[], 10).unwrap().is_empty());
    }
}
