//! Submissions: buffered payloads traveling from a fetch (or a local caller)
//! into the store transaction.

use crate::blobs::{sha256_uri, BlobStore};
use crate::error::EfsError;
use crate::kv::Txn;
use crate::metafile::MetaFile;
use crate::query;
use crate::schema::FileRecord;
use crate::tokenizer::Tokenizer;
use crate::uri::ContentUri;
use crate::writer::IndexWriter;

/// One unit of work for the store transaction. A fetched meta-file becomes
/// two submissions: its raw bytes as a `Blob`, and a `Meta` that indexes the
/// same bytes against the file once it exists.
pub enum Submission {
    Blob {
        content_type: String,
        body: Vec<u8>,
        /// Canonical (computed) content address of `body`.
        uri: ContentUri,
        /// URI the content was requested under, recorded as an alias when it
        /// differs from the computed address.
        source_uri: Option<ContentUri>,
    },
    Meta {
        file_uri: ContentUri,
        meta: MetaFile,
    },
}

impl Submission {
    /// Build the blob submission for `body` and, when `content_type` marks a
    /// meta-file, its companion meta submission.
    pub fn pair(
        content_type: &str,
        body: Vec<u8>,
        source_uri: Option<ContentUri>,
    ) -> (Submission, Option<Submission>) {
        let uri = sha256_uri(&body);
        let meta = MetaFile::create(content_type).map(|mut meta| {
            meta.write(&body);
            Submission::Meta { file_uri: uri.clone(), meta }
        });
        let blob = Submission::Blob {
            content_type: content_type.to_string(),
            body,
            uri,
            source_uri,
        };
        (blob, meta)
    }

    /// Canonical URI of the file this submission concerns.
    pub fn uri(&self) -> &ContentUri {
        match self {
            Submission::Blob { uri, .. } => uri,
            Submission::Meta { file_uri, .. } => file_uri,
        }
    }

    /// Apply this submission inside `txn`. Blob bytes go to the blob store
    /// (append-only, harmless on rollback) and all index rows join the
    /// caller's transaction.
    pub fn store(
        &self,
        txn: &Txn,
        blobs: &BlobStore,
        tokenizer: &dyn Tokenizer,
    ) -> Result<Option<u64>, EfsError> {
        let writer = IndexWriter::new(txn);
        match self {
            Submission::Blob { content_type, body, uri, source_uri } => {
                blobs.put(uri, body)?;
                let record = FileRecord {
                    primary_uri: uri.to_string(),
                    size: body.len() as u64,
                    content_type: content_type.clone(),
                };
                let alias = source_uri.as_ref().map(ContentUri::to_string);
                let aliases: Vec<&str> = alias
                    .as_deref()
                    .filter(|a| *a != record.primary_uri)
                    .into_iter()
                    .collect();
                let file_id = writer.ensure_file(&record, &aliases)?;
                Ok(Some(file_id))
            }
            Submission::Meta { file_uri, meta } => {
                let uri = file_uri.to_string();
                let file_id = query::file_id_for_uri(txn, &uri)?.ok_or_else(|| {
                    EfsError::Corrupt(format!("meta-file for unknown file {uri}"))
                })?;
                meta.store(txn, file_id, &uri, tokenizer)
            }
        }
    }
}
