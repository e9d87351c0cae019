//! Index schema: table tags and the key/value tuples stored under them.
//!
//! Table tags are a closed set; values are stable and must never be reused.
//! All key construction goes through this module so the forward and reverse
//! encodings cannot drift apart.

use crate::codec::{KeyReader, KeyWriter};
use crate::error::EfsError;

/// Table tag prefixed to every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum Table {
    /// `(metafile_id) -> (file_id, target_uri)`
    MetaFileById = 0,
    /// `(file_id, metafile_id) -> ()`
    FileIdAndMetaFileId = 1,
    /// `(target_uri, metafile_id) -> ()`
    TargetUriAndMetaFileId = 2,
    /// `(metafile_id, field, value) -> ()`
    MetaFileIdFieldAndValue = 3,
    /// `(field, value, metafile_id) -> ()`
    FieldValueAndMetaFileId = 4,
    /// `(term, metafile_id, position) -> ()`
    TermMetaFileIdAndPosition = 5,
    /// `(file_id) -> (primary_uri, size, content_type)`
    FileById = 6,
    /// `(uri, file_id) -> ()`
    UriAndFileId = 7,
}

impl Table {
    pub fn tag(self) -> u64 {
        self as u64
    }

    /// Key prefix selecting every row in this table.
    pub fn prefix(self) -> Vec<u8> {
        KeyWriter::new().put_u64(self.tag()).into_bytes()
    }
}

/// Primary meta-file record, the only non-empty value in the meta tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaFileRecord {
    pub file_id: u64,
    pub target_uri: String,
}

impl MetaFileRecord {
    pub fn encode(&self) -> Vec<u8> {
        KeyWriter::new()
            .put_u64(self.file_id)
            .put_str(&self.target_uri)
            .into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, EfsError> {
        let mut r = KeyReader::new(buf);
        let file_id = r.read_u64()?;
        let target_uri = r.read_str()?.to_string();
        Ok(Self { file_id, target_uri })
    }
}

/// Primary file record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub primary_uri: String,
    pub size: u64,
    pub content_type: String,
}

impl FileRecord {
    pub fn encode(&self) -> Vec<u8> {
        KeyWriter::new()
            .put_str(&self.primary_uri)
            .put_u64(self.size)
            .put_str(&self.content_type)
            .into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, EfsError> {
        let mut r = KeyReader::new(buf);
        let primary_uri = r.read_str()?.to_string();
        let size = r.read_u64()?;
        let content_type = r.read_str()?.to_string();
        Ok(Self { primary_uri, size, content_type })
    }
}

pub fn metafile_by_id(metafile_id: u64) -> Vec<u8> {
    KeyWriter::new()
        .put_u64(Table::MetaFileById.tag())
        .put_u64(metafile_id)
        .into_bytes()
}

pub fn file_id_and_metafile_id(file_id: u64, metafile_id: u64) -> Vec<u8> {
    KeyWriter::new()
        .put_u64(Table::FileIdAndMetaFileId.tag())
        .put_u64(file_id)
        .put_u64(metafile_id)
        .into_bytes()
}

pub fn target_uri_and_metafile_id(target_uri: &str, metafile_id: u64) -> Vec<u8> {
    KeyWriter::new()
        .put_u64(Table::TargetUriAndMetaFileId.tag())
        .put_str(target_uri)
        .put_u64(metafile_id)
        .into_bytes()
}

pub fn forward_field(metafile_id: u64, field: &str, value: &str) -> Vec<u8> {
    KeyWriter::new()
        .put_u64(Table::MetaFileIdFieldAndValue.tag())
        .put_u64(metafile_id)
        .put_str(field)
        .put_str(value)
        .into_bytes()
}

pub fn reverse_field(field: &str, value: &str, metafile_id: u64) -> Vec<u8> {
    KeyWriter::new()
        .put_u64(Table::FieldValueAndMetaFileId.tag())
        .put_str(field)
        .put_str(value)
        .put_u64(metafile_id)
        .into_bytes()
}

pub fn term_posting(term: &str, metafile_id: u64, position: u64) -> Vec<u8> {
    KeyWriter::new()
        .put_u64(Table::TermMetaFileIdAndPosition.tag())
        .put_str(term)
        .put_u64(metafile_id)
        .put_u64(position)
        .into_bytes()
}

pub fn file_by_id(file_id: u64) -> Vec<u8> {
    KeyWriter::new()
        .put_u64(Table::FileById.tag())
        .put_u64(file_id)
        .into_bytes()
}

pub fn uri_and_file_id(uri: &str, file_id: u64) -> Vec<u8> {
    KeyWriter::new()
        .put_u64(Table::UriAndFileId.tag())
        .put_str(uri)
        .put_u64(file_id)
        .into_bytes()
}

// Prefixes for range scans.

pub fn prefix_metafiles_of_file(file_id: u64) -> Vec<u8> {
    KeyWriter::new()
        .put_u64(Table::FileIdAndMetaFileId.tag())
        .put_u64(file_id)
        .into_bytes()
}

pub fn prefix_metafiles_for_target(target_uri: &str) -> Vec<u8> {
    KeyWriter::new()
        .put_u64(Table::TargetUriAndMetaFileId.tag())
        .put_str(target_uri)
        .into_bytes()
}

pub fn prefix_fields_of(metafile_id: u64) -> Vec<u8> {
    KeyWriter::new()
        .put_u64(Table::MetaFileIdFieldAndValue.tag())
        .put_u64(metafile_id)
        .into_bytes()
}

pub fn prefix_field_value(field: &str, value: &str) -> Vec<u8> {
    KeyWriter::new()
        .put_u64(Table::FieldValueAndMetaFileId.tag())
        .put_str(field)
        .put_str(value)
        .into_bytes()
}

pub fn prefix_term(term: &str) -> Vec<u8> {
    KeyWriter::new()
        .put_u64(Table::TermMetaFileIdAndPosition.tag())
        .put_str(term)
        .into_bytes()
}

pub fn prefix_uris(uri: &str) -> Vec<u8> {
    KeyWriter::new()
        .put_u64(Table::UriAndFileId.tag())
        .put_str(uri)
        .into_bytes()
}

/// Decode the trailing `u64` of a key after a known prefix. Used by the
/// query helpers to pull the metafile/file id out of secondary-index keys.
pub fn trailing_id(key: &[u8], prefix_len: usize) -> Result<u64, EfsError> {
    let mut r = KeyReader::new(&key[prefix_len.min(key.len())..]);
    r.read_u64()
}
