//! Transactional ordered key/value storage over SQLite.
//!
//! One `kv` table keyed by BLOB; SQLite compares BLOBs with memcmp, which is
//! exactly the ordering the key codec produces. Cursor access is exposed as
//! ordered prefix scans and a seek-to-last, which is all the index needs.

use crate::codec::KeyReader;
use crate::error::EfsError;
use crate::schema::Table;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;

/// Write mode for [`Txn::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Fail with [`EfsError::KeyExists`] if the key is already present.
    NoOverwrite,
    /// Replace any existing value.
    Overwrite,
}

/// A handle on the repository's KV store. One SQLite connection; open more
/// handles for more threads.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, EfsError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store, test use only.
    pub fn open_in_memory() -> Result<Self, EfsError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, EfsError> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS kv (
                k BLOB PRIMARY KEY,
                v BLOB NOT NULL
            ) WITHOUT ROWID;
            ",
        )?;
        Ok(Self { conn })
    }

    /// Begin a write transaction (`BEGIN IMMEDIATE`).
    pub fn begin(&mut self) -> Result<Txn<'_>, EfsError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Txn { tx })
    }

    /// Begin a read-only snapshot (deferred; never takes the write lock
    /// unless a write sneaks in, which callers must not do).
    pub fn begin_read(&mut self) -> Result<Txn<'_>, EfsError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Deferred)?;
        Ok(Txn { tx })
    }
}

/// An open transaction. Dropping without [`Txn::commit`] rolls back.
pub struct Txn<'conn> {
    tx: rusqlite::Transaction<'conn>,
}

impl<'conn> Txn<'conn> {
    pub fn commit(self) -> Result<(), EfsError> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn abort(self) -> Result<(), EfsError> {
        self.tx.rollback()?;
        Ok(())
    }

    pub fn put(&self, key: &[u8], value: &[u8], mode: PutMode) -> Result<(), EfsError> {
        let sql = match mode {
            PutMode::NoOverwrite => "INSERT INTO kv (k, v) VALUES (?1, ?2)",
            PutMode::Overwrite => "INSERT OR REPLACE INTO kv (k, v) VALUES (?1, ?2)",
        };
        match self.tx.execute(sql, params![key, value]) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(EfsError::KeyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EfsError> {
        let v = self
            .tx
            .query_row("SELECT v FROM kv WHERE k = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(v)
    }

    pub fn exists(&self, key: &[u8]) -> Result<bool, EfsError> {
        Ok(self.get(key)?.is_some())
    }

    /// All `(key, value)` rows whose key starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, EfsError> {
        let mut rows = Vec::new();
        match prefix_upper_bound(prefix) {
            Some(upper) => {
                let mut stmt = self
                    .tx
                    .prepare_cached("SELECT k, v FROM kv WHERE k >= ?1 AND k < ?2 ORDER BY k")?;
                let mapped = stmt.query_map(params![prefix, upper], |row| {
                    Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?;
                for row in mapped {
                    rows.push(row?);
                }
            }
            None => {
                let mut stmt = self
                    .tx
                    .prepare_cached("SELECT k, v FROM kv WHERE k >= ?1 ORDER BY k")?;
                let mapped = stmt.query_map(params![prefix], |row| {
                    Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?;
                for row in mapped {
                    rows.push(row?);
                }
            }
        }
        Ok(rows)
    }

    /// Seek-to-last: the greatest key starting with `prefix`, if any.
    pub fn last_in_prefix(&self, prefix: &[u8]) -> Result<Option<Vec<u8>>, EfsError> {
        let key = match prefix_upper_bound(prefix) {
            Some(upper) => self
                .tx
                .query_row(
                    "SELECT k FROM kv WHERE k >= ?1 AND k < ?2 ORDER BY k DESC LIMIT 1",
                    params![prefix, upper],
                    |row| row.get(0),
                )
                .optional()?,
            None => self
                .tx
                .query_row(
                    "SELECT k FROM kv WHERE k >= ?1 ORDER BY k DESC LIMIT 1",
                    params![prefix],
                    |row| row.get(0),
                )
                .optional()?,
        };
        Ok(key)
    }

    /// Allocate the next id under `table`: largest existing id + 1, starting
    /// at 1. The id is reserved only within this transaction; rollback
    /// releases it.
    pub fn next_id(&self, table: Table) -> Result<u64, EfsError> {
        let prefix = table.prefix();
        match self.last_in_prefix(&prefix)? {
            Some(key) => {
                let mut r = KeyReader::new(&key);
                r.read_u64()?; // table tag
                Ok(r.read_u64()? + 1)
            }
            None => Ok(1),
        }
    }
}

/// Smallest byte string greater than every key with `prefix`. `None` when the
/// prefix is all 0xff (scan to the end instead).
fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(&last) = upper.last() {
        if last == 0xff {
            upper.pop();
        } else {
            *upper.last_mut().unwrap() = last + 1;
            return Some(upper);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    #[test]
    fn no_overwrite_reports_key_exists() {
        let mut store = Store::open_in_memory().unwrap();
        let txn = store.begin().unwrap();
        txn.put(b"a", b"1", PutMode::NoOverwrite).unwrap();
        assert!(matches!(
            txn.put(b"a", b"2", PutMode::NoOverwrite),
            Err(EfsError::KeyExists)
        ));
        // Original value survives the failed put.
        assert_eq!(txn.get(b"a").unwrap().unwrap(), b"1");
        txn.put(b"a", b"3", PutMode::Overwrite).unwrap();
        assert_eq!(txn.get(b"a").unwrap().unwrap(), b"3");
    }

    #[test]
    fn abort_leaves_no_rows() {
        let mut store = Store::open_in_memory().unwrap();
        let txn = store.begin().unwrap();
        txn.put(b"a", b"1", PutMode::NoOverwrite).unwrap();
        txn.abort().unwrap();

        let txn = store.begin_read().unwrap();
        assert!(txn.get(b"a").unwrap().is_none());
    }

    #[test]
    fn scan_prefix_is_ordered_and_bounded() {
        let mut store = Store::open_in_memory().unwrap();
        let txn = store.begin().unwrap();
        for key in [&b"ab"[..], b"aa", b"a", b"b", b"a\xff"] {
            txn.put(key, b"", PutMode::NoOverwrite).unwrap();
        }
        let rows = txn.scan_prefix(b"a").unwrap();
        let keys: Vec<&[u8]> = rows.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![&b"a"[..], b"a\xff", b"aa", b"ab"]);
        assert_eq!(txn.last_in_prefix(b"a").unwrap().unwrap(), b"ab");
    }

    #[test]
    fn next_id_counts_up_from_one() {
        let mut store = Store::open_in_memory().unwrap();
        let txn = store.begin().unwrap();
        assert_eq!(txn.next_id(schema::Table::MetaFileById).unwrap(), 1);

        txn.put(&schema::metafile_by_id(1), b"", PutMode::NoOverwrite)
            .unwrap();
        txn.put(&schema::metafile_by_id(2), b"", PutMode::NoOverwrite)
            .unwrap();
        assert_eq!(txn.next_id(schema::Table::MetaFileById).unwrap(), 3);
        // Ids in other tables do not bleed in.
        txn.put(&schema::file_by_id(9), b"", PutMode::NoOverwrite)
            .unwrap();
        assert_eq!(txn.next_id(schema::Table::MetaFileById).unwrap(), 3);
    }
}
