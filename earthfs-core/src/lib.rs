//! EarthFS Core - Content-addressed file repository with structured metadata
//!
//! This library provides the data model and ingestion engine: a sorted
//! key/value index over SQLite, the meta-file parser, the content-addressed
//! blob store, and the repository facade tying them together.

pub mod blobs;
pub mod codec;
pub mod config;
pub mod error;
pub mod kv;
pub mod metafile;
pub mod query;
pub mod repo;
pub mod schema;
pub mod submission;
pub mod tokenizer;
pub mod uri;
pub mod writer;

pub use blobs::{sha256_uri, BlobStore};
pub use config::{Config, PullConfig, CONFIG_FILE, DEFAULT_CONFIG};
pub use error::EfsError;
pub use kv::{PutMode, Store, Txn};
pub use metafile::{MetaFile, META_MAX, META_TYPE};
pub use repo::{IngestReceipt, Repository};
pub use schema::{FileRecord, MetaFileRecord, Table};
pub use submission::Submission;
pub use tokenizer::{Token, Tokenizer, UnicodeWords};
pub use uri::{ContentUri, URI_MAX};
pub use writer::IndexWriter;

/// Result type alias for EarthFS operations
pub type Result<T> = std::result::Result<T, EfsError>;
