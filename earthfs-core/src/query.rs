//! Read-side lookups over the index: forward/reverse field queries, tag
//! scans, and full-text term search.

use crate::codec::KeyReader;
use crate::error::EfsError;
use crate::kv::Txn;
use crate::schema::{self, FileRecord, MetaFileRecord};
use crate::tokenizer::Tokenizer;
use std::collections::BTreeSet;

pub fn metafile(txn: &Txn, metafile_id: u64) -> Result<Option<MetaFileRecord>, EfsError> {
    match txn.get(&schema::metafile_by_id(metafile_id))? {
        Some(value) => Ok(Some(MetaFileRecord::decode(&value)?)),
        None => Ok(None),
    }
}

pub fn file(txn: &Txn, file_id: u64) -> Result<Option<FileRecord>, EfsError> {
    match txn.get(&schema::file_by_id(file_id))? {
        Some(value) => Ok(Some(FileRecord::decode(&value)?)),
        None => Ok(None),
    }
}

/// Resolve any known URI (primary or alias) to its file id.
pub fn file_id_for_uri(txn: &Txn, uri: &str) -> Result<Option<u64>, EfsError> {
    let prefix = schema::prefix_uris(uri);
    let rows = txn.scan_prefix(&prefix)?;
    match rows.first() {
        Some((key, _)) => Ok(Some(schema::trailing_id(key, prefix.len())?)),
        None => Ok(None),
    }
}

/// Meta-files annotating `target_uri`, in id order.
pub fn metafiles_for_target(txn: &Txn, target_uri: &str) -> Result<Vec<u64>, EfsError> {
    trailing_ids(txn, &schema::prefix_metafiles_for_target(target_uri))
}

/// Meta-files authored by `file_id`, in id order.
pub fn metafiles_of_file(txn: &Txn, file_id: u64) -> Result<Vec<u64>, EfsError> {
    trailing_ids(txn, &schema::prefix_metafiles_of_file(file_id))
}

/// Reverse lookup: meta-files carrying `field = value`, in id order.
pub fn find_field_value(txn: &Txn, field: &str, value: &str) -> Result<Vec<u64>, EfsError> {
    trailing_ids(txn, &schema::prefix_field_value(field, value))
}

/// Forward lookup: every `(field, value)` pair of one meta-file.
pub fn fields_of(txn: &Txn, metafile_id: u64) -> Result<Vec<(String, String)>, EfsError> {
    let rows = txn.scan_prefix(&schema::prefix_fields_of(metafile_id))?;
    let mut fields = Vec::with_capacity(rows.len());
    for (key, _) in rows {
        let mut r = KeyReader::new(&key);
        r.read_u64()?; // table tag
        r.read_u64()?; // metafile id
        let field = r.read_str()?.to_string();
        let value = r.read_str()?.to_string();
        fields.push((field, value));
    }
    Ok(fields)
}

/// Posting-list scan: distinct meta-files containing `term` (already
/// normalized).
pub fn metafiles_with_term(txn: &Txn, term: &str) -> Result<Vec<u64>, EfsError> {
    let prefix = schema::prefix_term(term);
    let mut ids = BTreeSet::new();
    for (key, _) in txn.scan_prefix(&prefix)? {
        ids.insert(schema::trailing_id(&key, prefix.len())?);
    }
    Ok(ids.into_iter().collect())
}

/// Full-text search: normalize `query` through the repository tokenizer and
/// intersect the per-term posting lists. Empty query matches nothing.
pub fn search(
    txn: &Txn,
    tokenizer: &dyn Tokenizer,
    query: &str,
) -> Result<Vec<u64>, EfsError> {
    let mut result: Option<BTreeSet<u64>> = None;
    for token in tokenizer.tokenize(query) {
        let ids: BTreeSet<u64> = metafiles_with_term(txn, &token.term)?.into_iter().collect();
        result = Some(match result {
            Some(acc) => acc.intersection(&ids).copied().collect(),
            None => ids,
        });
        if result.as_ref().is_some_and(|set| set.is_empty()) {
            break;
        }
    }
    Ok(result.unwrap_or_default().into_iter().collect())
}

fn trailing_ids(txn: &Txn, prefix: &[u8]) -> Result<Vec<u64>, EfsError> {
    let rows = txn.scan_prefix(prefix)?;
    let mut ids = Vec::with_capacity(rows.len());
    for (key, _) in rows {
        ids.push(schema::trailing_id(&key, prefix.len())?);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Store;
    use crate::tokenizer::UnicodeWords;
    use crate::writer::IndexWriter;

    fn seed(store: &mut Store) -> (u64, u64) {
        let txn = store.begin().unwrap();
        let writer = IndexWriter::new(&txn);
        let first = writer.write_metafile(10, "hash://one").unwrap();
        writer.write_field(first, "title", "hello").unwrap();
        writer.write_field(first, "tag", "a").unwrap();
        writer.write_term(first, "quick", 0).unwrap();
        writer.write_term(first, "fox", 0).unwrap();

        let second = writer.write_metafile(11, "hash://one").unwrap();
        writer.write_field(second, "tag", "a").unwrap();
        writer.write_term(second, "quick", 0).unwrap();
        txn.commit().unwrap();
        (first, second)
    }

    #[test]
    fn forward_and_reverse_lookups_agree() {
        let mut store = Store::open_in_memory().unwrap();
        let (first, second) = seed(&mut store);

        let txn = store.begin_read().unwrap();
        assert_eq!(
            fields_of(&txn, first).unwrap(),
            vec![
                ("tag".to_string(), "a".to_string()),
                ("title".to_string(), "hello".to_string()),
            ]
        );
        assert_eq!(find_field_value(&txn, "tag", "a").unwrap(), vec![first, second]);
        assert_eq!(find_field_value(&txn, "title", "hello").unwrap(), vec![first]);
        assert!(find_field_value(&txn, "title", "nope").unwrap().is_empty());
    }

    #[test]
    fn target_scans_return_all_annotating_metafiles() {
        let mut store = Store::open_in_memory().unwrap();
        let (first, second) = seed(&mut store);

        let txn = store.begin_read().unwrap();
        assert_eq!(
            metafiles_for_target(&txn, "hash://one").unwrap(),
            vec![first, second]
        );
        assert_eq!(metafiles_of_file(&txn, 10).unwrap(), vec![first]);
    }

    #[test]
    fn term_search_intersects() {
        let mut store = Store::open_in_memory().unwrap();
        let (first, second) = seed(&mut store);

        let txn = store.begin_read().unwrap();
        let tok = UnicodeWords::new();
        assert_eq!(search(&txn, &tok, "Quick").unwrap(), vec![first, second]);
        assert_eq!(search(&txn, &tok, "quick fox").unwrap(), vec![first]);
        assert!(search(&txn, &tok, "quick missing").unwrap().is_empty());
        assert!(search(&txn, &tok, "").unwrap().is_empty());
    }
}
