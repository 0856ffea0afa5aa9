//! JSON-lines file store.
//!
//! Every line of the file is one serialized [`DataPoint`] including its `id`. The store keeps a
//! cache of parsed rows and the byte offset it has read up to; before each operation it reads
//! whatever other writers have appended since. Partial trailing lines (a writer mid-append) are
//! left for the next refresh.
//!
//! Inserts made through a handle wake that handle's `wait_for_insert` at once. Rows appended by
//! other processes are noticed by re-reading the file every [`EXTERNAL_POLL`].

use crate::core::{DataPoint, DataQuery, DataStore};
use crate::error::{ActionError, AppResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// How often `wait_for_insert` re-reads the file for rows written by other processes.
pub const EXTERNAL_POLL: Duration = Duration::from_millis(250);

#[derive(Default)]
struct FileCache {
    rows: Vec<DataPoint>,
    offset: u64,
    /// Highest id reported by the previous `wait_for_insert`.
    waited_max: i64,
}

impl FileCache {
    fn max_id(&self) -> Option<i64> {
        self.rows.iter().filter_map(|row| row.id).max()
    }
}

/// Data store backed by an append-only JSON-lines file.
pub struct JsonlStore {
    path: PathBuf,
    cache: Mutex<FileCache>,
    inserted: Notify,
}

impl JsonlStore {
    /// Opens (creating if needed) the file at `path` and loads its rows.
    pub async fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let store = Self {
            path,
            cache: Mutex::new(FileCache::default()),
            inserted: Notify::new(),
        };
        {
            let mut cache = store.cache.lock().await;
            store.refresh(&mut cache).await?;
            cache.waited_max = cache.max_id().unwrap_or(0);
            tracing::debug!(
                path = %store.path.display(),
                rows = cache.rows.len(),
                "Opened JSON-lines store"
            );
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and parses any complete lines appended since the last refresh.
    /// Returns the number of new rows.
    async fn refresh(&self, cache: &mut FileCache) -> AppResult<usize> {
        let mut file = OpenOptions::new().read(true).open(&self.path).await?;
        file.seek(SeekFrom::Start(cache.offset)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;

        let complete = match buf.iter().rposition(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None => return Ok(0),
        };

        let mut added = 0;
        for line in buf[..complete].split(|&b| b == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let point: DataPoint = serde_json::from_slice(line)?;
            if point.id.is_none() {
                return Err(ActionError::Store(format!(
                    "row without id in {}",
                    self.path.display()
                )));
            }
            cache.rows.push(point);
            added += 1;
        }
        cache.offset += complete as u64;
        Ok(added)
    }
}

#[async_trait]
impl DataStore for JsonlStore {
    async fn insert(&self, point: &DataPoint) -> AppResult<i64> {
        let mut cache = self.cache.lock().await;
        self.refresh(&mut cache).await?;

        let id = cache.max_id().unwrap_or(0) + 1;
        let mut line = serde_json::to_vec(&point.with_id(id))?;
        line.push(b'\n');

        let mut file = OpenOptions::new().append(true).open(&self.path).await?;
        file.write_all(&line).await?;
        file.flush().await?;

        self.refresh(&mut cache).await?;
        drop(cache);

        self.inserted.notify_waiters();
        Ok(id)
    }

    async fn query(&self, query: &DataQuery) -> AppResult<Vec<DataPoint>> {
        let mut cache = self.cache.lock().await;
        self.refresh(&mut cache).await?;

        let mut rows: Vec<_> = cache
            .rows
            .iter()
            .filter(|row| query.matches(row))
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.id);
        Ok(rows)
    }

    async fn max_id(&self) -> AppResult<Option<i64>> {
        let mut cache = self.cache.lock().await;
        self.refresh(&mut cache).await?;
        Ok(cache.max_id())
    }

    async fn commit(&self) -> AppResult<()> {
        let _cache = self.cache.lock().await;
        let file = OpenOptions::new().append(true).open(&self.path).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Resolves `true` once the file holds an id above the one seen by the previous call,
    /// whichever handle or process wrote it.
    async fn wait_for_insert(&self, timeout: Duration) -> AppResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inserted.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut cache = self.cache.lock().await;
                self.refresh(&mut cache).await?;
                let max = cache.max_id().unwrap_or(0);
                if max > cache.waited_max {
                    cache.waited_max = max;
                    return Ok(true);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let poll = (deadline - now).min(EXTERNAL_POLL);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}
