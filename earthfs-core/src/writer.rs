//! Index writer: applies the schema within one transaction.

use crate::error::EfsError;
use crate::kv::{PutMode, Txn};
use crate::query;
use crate::schema::{self, FileRecord, MetaFileRecord, Table};

/// Writes index rows into a borrowed transaction. Everything commits or
/// rolls back with the caller's transaction; the writer itself holds no
/// state beyond the borrow.
pub struct IndexWriter<'t, 'c> {
    txn: &'t Txn<'c>,
}

impl<'t, 'c> IndexWriter<'t, 'c> {
    pub fn new(txn: &'t Txn<'c>) -> Self {
        Self { txn }
    }

    /// Create the primary meta-file record plus its two secondary rows.
    ///
    /// The primary key must be fresh; `KeyExists` here means the id
    /// allocator handed out a duplicate and is propagated as fatal.
    pub fn write_metafile(&self, file_id: u64, target_uri: &str) -> Result<u64, EfsError> {
        let metafile_id = self.txn.next_id(Table::MetaFileById)?;
        let record = MetaFileRecord {
            file_id,
            target_uri: target_uri.to_string(),
        };
        self.txn.put(
            &schema::metafile_by_id(metafile_id),
            &record.encode(),
            PutMode::NoOverwrite,
        )?;
        self.txn.put(
            &schema::file_id_and_metafile_id(file_id, metafile_id),
            &[],
            PutMode::NoOverwrite,
        )?;
        self.txn.put(
            &schema::target_uri_and_metafile_id(target_uri, metafile_id),
            &[],
            PutMode::NoOverwrite,
        )?;
        Ok(metafile_id)
    }

    /// Insert forward and reverse rows for one `(field, value)` pair.
    /// Duplicate pairs within a meta-file collapse; empty values are a no-op.
    pub fn write_field(&self, metafile_id: u64, field: &str, value: &str) -> Result<(), EfsError> {
        if value.is_empty() {
            return Ok(());
        }
        self.put_idempotent(&schema::forward_field(metafile_id, field, value))?;
        self.put_idempotent(&schema::reverse_field(field, value, metafile_id))?;
        Ok(())
    }

    /// Insert one posting-list row. Position is carried in the key but
    /// currently always written as 0; repeats of a term within a document
    /// collapse onto the same row.
    pub fn write_term(
        &self,
        metafile_id: u64,
        term: &str,
        position: u64,
    ) -> Result<(), EfsError> {
        self.put_idempotent(&schema::term_posting(term, metafile_id, position))
    }

    /// Record a file and its URIs, allocating a `FileID` if the primary URI
    /// is new. Alias URIs map onto the same id.
    pub fn ensure_file(&self, record: &FileRecord, aliases: &[&str]) -> Result<u64, EfsError> {
        if let Some(file_id) = query::file_id_for_uri(self.txn, &record.primary_uri)? {
            for alias in aliases {
                self.put_idempotent(&schema::uri_and_file_id(alias, file_id))?;
            }
            return Ok(file_id);
        }
        let file_id = self.txn.next_id(Table::FileById)?;
        self.txn.put(
            &schema::file_by_id(file_id),
            &record.encode(),
            PutMode::NoOverwrite,
        )?;
        self.txn.put(
            &schema::uri_and_file_id(&record.primary_uri, file_id),
            &[],
            PutMode::NoOverwrite,
        )?;
        for alias in aliases {
            self.put_idempotent(&schema::uri_and_file_id(alias, file_id))?;
        }
        Ok(file_id)
    }

    fn put_idempotent(&self, key: &[u8]) -> Result<(), EfsError> {
        match self.txn.put(key, &[], PutMode::NoOverwrite) {
            Err(EfsError::KeyExists) => Ok(()),
            other => other,
        }
    }
}
