//! Meta-file parsing and ingestion.
//!
//! A meta-file body is a target URI, a blank-line delimiter, and a JSON
//! object whose fields are strings or arrays of strings. Parsing is
//! two-phase: the JSON is validated into a flat event list first, and index
//! rows are written only if validation succeeds, so a malformed meta-file
//! never leaves partial rows behind.

use crate::error::EfsError;
use crate::kv::Txn;
use crate::tokenizer::Tokenizer;
use crate::uri::URI_MAX;
use crate::writer::IndexWriter;
use serde::de::{self, DeserializeSeed, MapAccess, SeqAccess, Visitor};
use serde::Deserializer;
use std::fmt;
use tracing::warn;

/// Media type marking a file as a meta-file.
pub const META_TYPE: &str = "text/efs-meta+json; charset=utf-8";

/// Bytes of a meta-file body retained for parsing; the rest is dropped at
/// write time.
pub const META_MAX: usize = 1024 * 100;

/// Field name whose values are tokenized instead of indexed verbatim.
const FULLTEXT_FIELD: &str = "fulltext";

/// Buffered meta-file body, filled incrementally and stored in one shot.
pub struct MetaFile {
    buf: Vec<u8>,
}

impl MetaFile {
    /// `None` unless `content_type` is the meta-file media type.
    pub fn create(content_type: &str) -> Option<Self> {
        if !content_type.eq_ignore_ascii_case(META_TYPE) {
            return None;
        }
        Some(Self { buf: Vec::with_capacity(4096) })
    }

    /// Append body bytes, silently dropping anything past [`META_MAX`].
    pub fn write(&mut self, chunk: &[u8]) {
        if self.buf.len() >= META_MAX {
            return;
        }
        let take = (META_MAX - self.buf.len()).min(chunk.len());
        self.buf.extend_from_slice(&chunk[..take]);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Parse the buffered body and write all index rows for it inside the
    /// caller's transaction.
    ///
    /// Returns the allocated `MetaFileID`, or `None` (with a warning logged)
    /// when the body is not a usable meta-file. `None` writes nothing.
    pub fn store(
        &self,
        txn: &Txn,
        file_id: u64,
        file_uri: &str,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Option<u64>, EfsError> {
        let Some((target_uri, body)) = split_frame(&self.buf) else {
            warn!(file_uri, "invalid meta-file (missing target URI)");
            return Ok(None);
        };

        let events = match parse_fields(body) {
            Ok(events) => events,
            Err(err) => {
                warn!(file_uri, %err, "invalid meta-file (unparseable JSON)");
                return Ok(None);
            }
        };

        let writer = IndexWriter::new(txn);
        let metafile_id = writer.write_metafile(file_id, target_uri)?;
        for (field, value) in &events {
            if field == FULLTEXT_FIELD {
                for token in tokenizer.tokenize(value) {
                    // Positions are read from the tokenizer but stored as 0;
                    // the posting key collapses repeats per document.
                    writer.write_term(metafile_id, &token.term, 0)?;
                }
            } else {
                writer.write_field(metafile_id, field, value)?;
            }
        }
        Ok(Some(metafile_id))
    }
}

/// Split `<target-uri><EOL><EOL><json>`. The delimiter is any of
/// `CRLF CRLF`, `CR CR`, `LF LF` within the first `URI_MAX + 1` bytes; the
/// URI must be at least 8 bytes of UTF-8. The body starts right after the
/// first delimiter byte; the rest of the delimiter is JSON whitespace.
fn split_frame(buf: &[u8]) -> Option<(&str, &[u8])> {
    if buf.len() < 3 {
        return None;
    }
    let limit = (URI_MAX + 1).min(buf.len() - 3);
    for i in 0..limit {
        let crlfcrlf = buf[i..].starts_with(b"\r\n\r\n");
        let crcr = buf[i..].starts_with(b"\r\r");
        let lflf = buf[i..].starts_with(b"\n\n");
        if !crlfcrlf && !crcr && !lflf {
            continue;
        }
        if i < 8 {
            return None; // too short to be a valid URI
        }
        let uri = std::str::from_utf8(&buf[..i]).ok()?;
        return Some((uri, &buf[i + 1..]));
    }
    None
}

/// Validate the JSON object and flatten it to `(field, value)` events in
/// document order. Arrays flatten one event per element; any null, boolean,
/// number, or nested container is an error. A body truncated mid-value
/// (the `META_MAX` cut) keeps the events parsed before the cut.
fn parse_fields(body: &[u8]) -> Result<Vec<(String, String)>, serde_json::Error> {
    let mut events = Vec::new();
    let mut de = serde_json::Deserializer::from_slice(body);
    match de.deserialize_map(FieldEvents { out: &mut events }) {
        Ok(()) => Ok(events),
        Err(err) if err.is_eof() => Ok(events),
        Err(err) => Err(err),
    }
}

struct FieldEvents<'a> {
    out: &'a mut Vec<(String, String)>,
}

impl<'de, 'a> Visitor<'de> for FieldEvents<'a> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object of string or string-array fields")
    }

    fn visit_map<M: MapAccess<'de>>(self, mut map: M) -> Result<(), M::Error> {
        while let Some(field) = map.next_key::<String>()? {
            map.next_value_seed(FieldValue { field, out: &mut *self.out })?;
        }
        Ok(())
    }
}

struct FieldValue<'a> {
    field: String,
    out: &'a mut Vec<(String, String)>,
}

impl<'de, 'a> DeserializeSeed<'de> for FieldValue<'a> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de, 'a> Visitor<'de> for FieldValue<'a> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a string or an array of strings")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<(), E> {
        self.out.push((self.field, v.to_string()));
        Ok(())
    }

    fn visit_seq<S: SeqAccess<'de>>(self, mut seq: S) -> Result<(), S::Error> {
        while let Some(v) = seq.next_element::<String>()? {
            self.out.push((self.field.clone(), v));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Store;
    use crate::query;
    use crate::schema;
    use crate::tokenizer::UnicodeWords;

    fn meta_from(body: &[u8]) -> MetaFile {
        let mut meta = MetaFile::create(META_TYPE).unwrap();
        meta.write(body);
        meta
    }

    fn store_body(store: &mut Store, body: &[u8], file_id: u64) -> Option<u64> {
        let meta = meta_from(body);
        let txn = store.begin().unwrap();
        let tok = UnicodeWords::new();
        let id = meta.store(&txn, file_id, "sha256://self", &tok).unwrap();
        txn.commit().unwrap();
        id
    }

    fn row_count(store: &mut Store) -> usize {
        let txn = store.begin_read().unwrap();
        txn.scan_prefix(&[]).unwrap().len()
    }

    #[test]
    fn content_type_gate() {
        assert!(MetaFile::create(META_TYPE).is_some());
        assert!(MetaFile::create("TEXT/EFS-META+JSON; CHARSET=UTF-8").is_some());
        assert!(MetaFile::create("text/plain").is_none());
        assert!(MetaFile::create("text/efs-meta+json").is_none());
    }

    #[test]
    fn single_field_single_value() {
        let mut store = Store::open_in_memory().unwrap();
        let id = store_body(&mut store, b"hash://deadbeef\r\n\r\n{\"title\":\"hello\"}", 100);
        assert_eq!(id, Some(1));

        let txn = store.begin_read().unwrap();
        let record = query::metafile(&txn, 1).unwrap().unwrap();
        assert_eq!(record.file_id, 100);
        assert_eq!(record.target_uri, "hash://deadbeef");
        assert!(txn.exists(&schema::forward_field(1, "title", "hello")).unwrap());
        assert!(txn.exists(&schema::reverse_field("title", "hello", 1)).unwrap());
        assert!(txn.exists(&schema::file_id_and_metafile_id(100, 1)).unwrap());
        assert!(txn
            .exists(&schema::target_uri_and_metafile_id("hash://deadbeef", 1))
            .unwrap());
    }

    #[test]
    fn array_values_flatten_and_collapse() {
        let mut store = Store::open_in_memory().unwrap();
        let id = store_body(&mut store, b"hash://deadbeef\r\n\r\n{\"tag\":[\"a\",\"b\",\"a\"]}", 1)
            .unwrap();

        let txn = store.begin_read().unwrap();
        assert_eq!(
            query::fields_of(&txn, id).unwrap(),
            vec![
                ("tag".to_string(), "a".to_string()),
                ("tag".to_string(), "b".to_string()),
            ]
        );
        assert_eq!(query::find_field_value(&txn, "tag", "a").unwrap(), vec![id]);
    }

    #[test]
    fn fulltext_yields_term_rows() {
        let mut store = Store::open_in_memory().unwrap();
        let id = store_body(
            &mut store,
            b"hash://deadbeef\r\n\r\n{\"fulltext\":\"The quick brown fox\"}",
            1,
        )
        .unwrap();

        let txn = store.begin_read().unwrap();
        for term in ["the", "quick", "brown", "fox"] {
            assert!(
                txn.exists(&schema::term_posting(term, id, 0)).unwrap(),
                "missing posting for {term}"
            );
        }
        assert!(query::fields_of(&txn, id).unwrap().is_empty());
    }

    #[test]
    fn empty_fulltext_writes_nothing() {
        let mut store = Store::open_in_memory().unwrap();
        store_body(&mut store, b"hash://deadbeef\r\n\r\n{\"fulltext\":\"\"}", 1).unwrap();

        let txn = store.begin_read().unwrap();
        assert!(txn
            .scan_prefix(&schema::Table::TermMetaFileIdAndPosition.prefix())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn missing_delimiter_is_skipped() {
        let mut store = Store::open_in_memory().unwrap();
        assert_eq!(store_body(&mut store, b"hash://deadbeef", 1), None);
        assert_eq!(row_count(&mut store), 0);
    }

    #[test]
    fn uri_length_boundary() {
        let mut store = Store::open_in_memory().unwrap();
        // 8-byte URI: accepted.
        assert!(store_body(&mut store, b"hash://x\n\n{}", 1).is_some());
        // 7-byte URI: rejected.
        assert_eq!(store_body(&mut store, b"hash://\n\n{}", 2), None);
    }

    #[test]
    fn delimiter_variants() {
        let mut store = Store::open_in_memory().unwrap();
        assert!(store_body(&mut store, b"hash://aaaa\r\r{\"k\":\"v\"}", 1).is_some());
        assert!(store_body(&mut store, b"hash://bbbb\n\n{\"k\":\"v\"}", 2).is_some());
        assert!(store_body(&mut store, b"hash://cccc\r\n\r\n{\"k\":\"v\"}", 3).is_some());
    }

    #[test]
    fn non_string_values_are_rejected_without_rows() {
        let mut store = Store::open_in_memory().unwrap();
        for body in [
            &b"hash://deadbeef\n\n{\"k\":{\"nested\":\"x\"}}"[..],
            b"hash://deadbeef\n\n{\"k\":5}",
            b"hash://deadbeef\n\n{\"k\":null}",
            b"hash://deadbeef\n\n{\"k\":true}",
            b"hash://deadbeef\n\n{\"k\":[[\"x\"]]}",
            b"hash://deadbeef\n\n[\"not\",\"an\",\"object\"]",
        ] {
            assert_eq!(store_body(&mut store, body, 1), None, "{body:?}");
        }
        assert_eq!(row_count(&mut store), 0);
    }

    #[test]
    fn truncated_trailing_value_keeps_earlier_fields() {
        let mut store = Store::open_in_memory().unwrap();
        let id = store_body(&mut store, b"hash://deadbeef\n\n{\"a\":\"x\",\"b\":\"trunc", 1)
            .unwrap();

        let txn = store.begin_read().unwrap();
        assert_eq!(
            query::fields_of(&txn, id).unwrap(),
            vec![("a".to_string(), "x".to_string())]
        );
    }

    #[test]
    fn write_caps_at_meta_max() {
        let mut meta = MetaFile::create(META_TYPE).unwrap();
        meta.write(&vec![b'x'; META_MAX - 10]);
        meta.write(&[b'y'; 100]);
        assert_eq!(meta.len(), META_MAX);
        meta.write(b"more");
        assert_eq!(meta.len(), META_MAX);
    }

    #[test]
    fn reingest_allocates_new_id_without_duplicate_rows() {
        let mut store = Store::open_in_memory().unwrap();
        let body: &[u8] = b"hash://deadbeef\r\n\r\n{\"tag\":[\"a\",\"a\"]}";
        let first = store_body(&mut store, body, 1).unwrap();
        let second = store_body(&mut store, body, 2).unwrap();
        assert!(second > first);

        let txn = store.begin_read().unwrap();
        // One reverse row per meta-file, none duplicated within either.
        assert_eq!(
            query::find_field_value(&txn, "tag", "a").unwrap(),
            vec![first, second]
        );
        assert_eq!(query::fields_of(&txn, first).unwrap().len(), 1);
        assert_eq!(query::fields_of(&txn, second).unwrap().len(), 1);
    }
}
