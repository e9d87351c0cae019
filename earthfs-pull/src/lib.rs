//! EarthFS Pull - Federated replication from a remote peer
//!
//! A pull job streams the peer's query results, dereferences unknown URIs in
//! parallel, and commits the resulting submissions in batches: N reader
//! threads feed a bounded reservation ring, one writer thread drains it in
//! stream order inside a single transaction per batch.

pub mod remote;
pub mod ring;

pub use remote::{Fetch, HttpPeer, Peer, RemoteFile, UriStream};
pub use ring::{Ring, QUEUE_SIZE};

use earthfs_core::{
    query, BlobStore, ContentUri, EfsError, Repository, Store, Submission, Tokenizer,
};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reader threads per pull job.
pub const READER_COUNT: usize = 16;

/// Delay between retries of a failed connect, fetch, or commit.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Knobs the tests turn; production uses the defaults.
pub struct PullOptions {
    pub readers: usize,
    pub retry: Duration,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self { readers: READER_COUNT, retry: RETRY_DELAY }
    }
}

struct Shared {
    ring: Ring,
    stop: std::sync::atomic::AtomicBool,
    /// Connection mutex: guards the single upstream query stream. Held only
    /// while reading one line and reserving queue slots.
    conn: Mutex<Box<dyn UriStream>>,
    retry: Duration,
    tokenizer: Arc<dyn Tokenizer>,
    data_path: PathBuf,
}

impl Shared {
    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Sleep the retry delay, waking early on shutdown.
    fn snooze(&self) {
        let mut left = self.retry;
        while !self.stopping() && !left.is_zero() {
            let step = left.min(Duration::from_millis(100));
            thread::sleep(step);
            left -= step;
        }
    }
}

/// A running pull job. Dropping it requests shutdown and joins every worker.
pub struct Pull {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl Pull {
    /// Spawn the reader pool and the writer against `peer`. Each worker gets
    /// its own KV handle; the blob store is opened by the writer.
    pub fn start(
        repo: &Repository,
        peer: &dyn Peer,
        options: PullOptions,
    ) -> Result<Pull, EfsError> {
        let shared = Arc::new(Shared {
            ring: Ring::new(),
            stop: std::sync::atomic::AtomicBool::new(false),
            conn: Mutex::new(peer.stream()),
            retry: options.retry,
            tokenizer: repo.tokenizer().clone(),
            data_path: repo.data_path().to_path_buf(),
        });

        let mut handles = Vec::with_capacity(options.readers + 1);
        for i in 0..options.readers {
            let store = repo.connect()?;
            let fetcher = peer.fetcher();
            let shared = shared.clone();
            handles.push(
                thread::Builder::new()
                    .name(format!("efs-pull-reader-{i}"))
                    .spawn(move || reader(shared, store, fetcher))?,
            );
        }
        let store = repo.connect()?;
        let writer_shared = shared.clone();
        handles.push(
            thread::Builder::new()
                .name("efs-pull-writer".to_string())
                .spawn(move || writer(writer_shared, store))?,
        );

        info!(readers = options.readers, "pull started");
        Ok(Pull { shared, handles })
    }

    /// Request shutdown and wait for every reader and the writer to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        self.shared.stop.store(true, Ordering::Relaxed);
        self.shared.ring.wake_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        info!("pull stopped");
    }
}

impl Drop for Pull {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn reader(shared: Arc<Shared>, mut store: Store, mut fetcher: Box<dyn Fetch>) {
    'outer: loop {
        if shared.stopping() {
            break;
        }

        // Read one URI and reserve its two slots under the connection lock,
        // so queue positions are assigned in stream order. The fetch happens
        // after the lock is released.
        let reserved = {
            let mut conn = shared.conn.lock().unwrap();
            match conn.read_uri() {
                Ok(line) => match shared.ring.reserve_pair(&shared.stop) {
                    Some(pos) => Some((line, pos)),
                    None => break 'outer,
                },
                Err(err) => {
                    debug!(%err, "pull stream interrupted");
                    loop {
                        if shared.stopping() {
                            break;
                        }
                        match conn.reconnect() {
                            Ok(()) => break,
                            Err(err) => {
                                warn!(%err, "pull reconnect failed");
                                shared.snooze();
                            }
                        }
                    }
                    None
                }
            }
        };
        let Some((line, pos)) = reserved else {
            continue;
        };

        loop {
            match import(&shared, &mut store, fetcher.as_mut(), &line, pos) {
                Ok(()) => break,
                Err(err) => {
                    warn!(uri = %line, %err, "pull import failed");
                    if shared.stopping() {
                        break 'outer;
                    }
                    shared.snooze();
                    if shared.stopping() {
                        break 'outer;
                    }
                }
            }
        }
    }
    debug!("pull reader exiting");
}

/// Dereference one URI into the reserved slot pair. Known or unusable URIs
/// still fill their slots with bubbles so the stream order is preserved and
/// the writer never blocks behind them.
fn import(
    shared: &Shared,
    store: &mut Store,
    fetcher: &mut dyn Fetch,
    line: &str,
    pos: usize,
) -> Result<(), EfsError> {
    let uri: ContentUri = match line.parse() {
        Ok(uri) => uri,
        Err(err) => {
            debug!(%err, "skipping unparseable pull line");
            shared.ring.fill(pos, None, None);
            return Ok(());
        }
    };

    if known_locally(store, &uri)? {
        shared.ring.fill(pos, None, None);
        return Ok(());
    }

    debug!(%uri, "pulling");
    let fetched = fetcher.fetch(&uri)?;
    let (blob, meta) = Submission::pair(&fetched.content_type, fetched.body, Some(uri.clone()));

    if uri.algo == blob.uri().algo && uri.hash != blob.uri().hash {
        warn!(%uri, got = %blob.uri(), "digest mismatch from peer");
        shared.ring.fill(pos, None, None);
        return Ok(());
    }

    if shared.stopping() {
        // Leave the slots unfilled; the writer unwinds on the stop flag.
        return Err(EfsError::Transient("shutting down".into()));
    }
    shared.ring.fill(pos, Some(blob), meta);
    Ok(())
}

fn known_locally(store: &mut Store, uri: &ContentUri) -> Result<bool, EfsError> {
    let txn = store.begin_read()?;
    let known = query::file_id_for_uri(&txn, &uri.to_string())?.is_some();
    txn.abort()?;
    Ok(known)
}

fn writer(shared: Arc<Shared>, mut store: Store) {
    let blobs = match BlobStore::open(&shared.data_path) {
        Ok(blobs) => blobs,
        Err(err) => {
            error!(%err, "pull writer could not open the blob store");
            return;
        }
    };

    loop {
        if shared.stopping() {
            break;
        }
        let Some(drained) = shared.ring.drain(&shared.stop, QUEUE_SIZE) else {
            break;
        };

        loop {
            match commit_batch(&mut store, &blobs, shared.tokenizer.as_ref(), &drained.batch) {
                Ok(()) => {
                    debug!(
                        submissions = drained.batch.len(),
                        skipped = drained.bubbles,
                        "pull batch committed"
                    );
                    break;
                }
                Err(err) => {
                    warn!(%err, "pull batch failed; will retry");
                    if shared.stopping() {
                        break;
                    }
                    shared.snooze();
                    if shared.stopping() {
                        break;
                    }
                }
            }
        }
        // Submissions drop here, after commit (or on shutdown).
    }
    debug!("pull writer exiting");
}

/// Store the whole batch in one transaction; any error rolls back every
/// submission so no partial metadata becomes visible.
fn commit_batch(
    store: &mut Store,
    blobs: &BlobStore,
    tokenizer: &dyn Tokenizer,
    batch: &[Submission],
) -> Result<(), EfsError> {
    let txn = store.begin()?;
    for submission in batch {
        submission.store(&txn, blobs, tokenizer)?;
    }
    txn.commit()
}
