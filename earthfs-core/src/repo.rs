//! Repository facade: owns the canonical paths, the KV handle, the blob
//! store, and the tokenizer, and hands out transactions.

use crate::blobs::BlobStore;
use crate::config::{Config, CONFIG_FILE, DEFAULT_CONFIG};
use crate::error::EfsError;
use crate::kv::{Store, Txn};
use crate::query;
use crate::submission::Submission;
use crate::tokenizer::{Tokenizer, UnicodeWords};
use crate::uri::ContentUri;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Result of a local ingest.
#[derive(Debug)]
pub struct IngestReceipt {
    pub file_id: u64,
    pub uri: ContentUri,
    /// Present when the body was a meta-file that parsed cleanly.
    pub metafile_id: Option<u64>,
}

/// A repository directory: `config.toml`, `data/` (blobs), `repo.db` (index).
pub struct Repository {
    root: PathBuf,
    data_path: PathBuf,
    db_path: PathBuf,
    config: Config,
    store: Store,
    blobs: BlobStore,
    tokenizer: Arc<dyn Tokenizer>,
}

impl Repository {
    /// Initialize a new repository directory.
    pub fn create(root: &Path) -> Result<Self, EfsError> {
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            return Err(EfsError::Config(format!(
                "repository already initialized at {}",
                root.display()
            )));
        }
        fs::create_dir_all(root)?;
        fs::write(&config_path, DEFAULT_CONFIG)?;
        info!(root = %root.display(), "initialized repository");
        Self::open(root)
    }

    /// Open a repository, creating the store and data directory on first
    /// use. Missing config falls back to defaults.
    pub fn open(root: &Path) -> Result<Self, EfsError> {
        let config_path = root.join(CONFIG_FILE);
        let config = if config_path.exists() {
            Config::load(&config_path)?
        } else {
            Config::default()
        };
        let tokenizer: Arc<dyn Tokenizer> = Arc::new(UnicodeWords::with_stop_words(
            config.tokenizer.stop_words.iter().cloned(),
        ));
        Self::open_with_tokenizer(root, config, tokenizer)
    }

    /// Open with an injected tokenizer (the default is a Unicode word
    /// splitter configured from the repo config).
    pub fn open_with_tokenizer(
        root: &Path,
        config: Config,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Self, EfsError> {
        let root = root.to_path_buf();
        let data_path = root.join("data");
        let db_path = root.join("repo.db");
        fs::create_dir_all(&root)?;
        let blobs = BlobStore::open(&data_path)?;
        let store = Store::open(&db_path)?;
        Ok(Self {
            root,
            data_path,
            db_path,
            config,
            store,
            blobs,
            tokenizer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> {
        &self.tokenizer
    }

    /// Open an additional KV handle on `repo.db`. Each worker thread of the
    /// pull pipeline gets its own.
    pub fn connect(&self) -> Result<Store, EfsError> {
        Store::open(&self.db_path)
    }

    pub fn begin(&mut self) -> Result<Txn<'_>, EfsError> {
        self.store.begin()
    }

    pub fn begin_read(&mut self) -> Result<Txn<'_>, EfsError> {
        self.store.begin_read()
    }

    /// Ingest a body supplied by a local caller: blob store append, file
    /// rows, and (for meta-files) metadata indexing, all in one transaction.
    pub fn ingest(&mut self, content_type: &str, body: Vec<u8>) -> Result<IngestReceipt, EfsError> {
        let (blob, meta) = Submission::pair(content_type, body, None);
        let uri = blob.uri().clone();

        let txn = self.store.begin()?;
        let file_id = blob
            .store(&txn, &self.blobs, self.tokenizer.as_ref())?
            .ok_or_else(|| EfsError::Corrupt("blob submission yielded no file id".into()))?;
        let metafile_id = match &meta {
            Some(meta) => meta.store(&txn, &self.blobs, self.tokenizer.as_ref())?,
            None => None,
        };
        txn.commit()?;

        Ok(IngestReceipt { file_id, uri, metafile_id })
    }

    /// Full-text search over all indexed meta-files.
    pub fn search(&mut self, text: &str) -> Result<Vec<u64>, EfsError> {
        let txn = self.store.begin_read()?;
        query::search(&txn, self.tokenizer.as_ref(), text)
    }

    /// Reverse field lookup.
    pub fn find(&mut self, field: &str, value: &str) -> Result<Vec<u64>, EfsError> {
        let txn = self.store.begin_read()?;
        query::find_field_value(&txn, field, value)
    }

    /// Meta-files annotating a target URI.
    pub fn metafiles_for_target(&mut self, target_uri: &str) -> Result<Vec<u64>, EfsError> {
        let txn = self.store.begin_read()?;
        query::metafiles_for_target(&txn, target_uri)
    }

    /// All `(field, value)` pairs of one meta-file.
    pub fn metafile_fields(&mut self, metafile_id: u64) -> Result<Vec<(String, String)>, EfsError> {
        let txn = self.store.begin_read()?;
        query::fields_of(&txn, metafile_id)
    }

    /// Primary record of one meta-file.
    pub fn metafile(
        &mut self,
        metafile_id: u64,
    ) -> Result<Option<crate::schema::MetaFileRecord>, EfsError> {
        let txn = self.store.begin_read()?;
        query::metafile(&txn, metafile_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metafile::META_TYPE;
    use tempfile::TempDir;

    #[test]
    fn create_lays_out_the_repository() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("repo");
        let repo = Repository::create(&root).unwrap();

        assert!(root.join(CONFIG_FILE).is_file());
        assert!(repo.db_path().is_file());
        assert_eq!(repo.data_path(), root.join("data"));
        assert!(matches!(
            Repository::create(&root),
            Err(EfsError::Config(_))
        ));
    }

    #[test]
    fn ingest_then_query_end_to_end() {
        let dir = TempDir::new().unwrap();
        let mut repo = Repository::create(dir.path().join("repo").as_path()).unwrap();

        let body =
            b"hash://deadbeef\r\n\r\n{\"title\":\"hello\",\"fulltext\":\"quick brown fox\"}"
                .to_vec();
        let receipt = repo.ingest(META_TYPE, body).unwrap();
        let metafile_id = receipt.metafile_id.unwrap();

        assert!(repo.blobs().contains(&receipt.uri));
        assert_eq!(repo.search("Quick FOX").unwrap(), vec![metafile_id]);
        assert_eq!(repo.find("title", "hello").unwrap(), vec![metafile_id]);
        assert_eq!(
            repo.metafiles_for_target("hash://deadbeef").unwrap(),
            vec![metafile_id]
        );
        assert_eq!(
            repo.metafile_fields(metafile_id).unwrap(),
            vec![("title".to_string(), "hello".to_string())]
        );
    }

    #[test]
    fn ingest_of_plain_file_skips_metadata() {
        let dir = TempDir::new().unwrap();
        let mut repo = Repository::create(dir.path().join("repo").as_path()).unwrap();

        let receipt = repo.ingest("text/plain", b"just bytes".to_vec()).unwrap();
        assert!(receipt.metafile_id.is_none());
        assert!(repo.blobs().contains(&receipt.uri));
    }

    #[test]
    fn stop_words_flow_from_config() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("repo");
        Repository::create(&root).unwrap();
        fs::write(
            root.join(CONFIG_FILE),
            "[tokenizer]\nstop_words = [\"the\"]\n",
        )
        .unwrap();

        let mut repo = Repository::open(&root).unwrap();
        let body = b"hash://deadbeef\n\n{\"fulltext\":\"the quick fox\"}".to_vec();
        let receipt = repo.ingest(META_TYPE, body).unwrap();

        assert!(repo.search("the").unwrap().is_empty());
        assert_eq!(repo.search("quick").unwrap(), vec![receipt.metafile_id.unwrap()]);
    }
}
