//! In-memory data store.

use crate::core::{DataPoint, DataQuery, DataStore};
use crate::error::AppResult;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, RwLock};

/// Data store keeping every row in memory, ordered by identifier.
///
/// Identifiers start at 1 and increase by one per insert. `commit` has nothing to flush, it
/// only counts calls so tests can observe the source's transaction boundaries.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<DataPoint>>,
    inserted: Notify,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `points`, assigned identifiers `1..=n` in order.
    pub fn with_points(points: impl IntoIterator<Item = DataPoint>) -> Self {
        let rows = points
            .into_iter()
            .enumerate()
            .map(|(index, point)| point.with_id(index as i64 + 1))
            .collect();
        Self {
            rows: RwLock::new(rows),
            ..Self::default()
        }
    }

    /// Number of rows currently stored.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Snapshot of every stored row.
    pub async fn rows(&self) -> Vec<DataPoint> {
        self.rows.read().await.clone()
    }

    /// How many times `commit` has been called.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn insert(&self, point: &DataPoint) -> AppResult<i64> {
        let id = {
            let mut rows = self.rows.write().await;
            let id = rows.last().and_then(|row| row.id).unwrap_or(0) + 1;
            rows.push(point.with_id(id));
            id
        };
        self.inserted.notify_one();
        Ok(id)
    }

    async fn query(&self, query: &DataQuery) -> AppResult<Vec<DataPoint>> {
        let rows = self.rows.read().await;
        Ok(rows.iter().filter(|row| query.matches(row)).cloned().collect())
    }

    async fn max_id(&self) -> AppResult<Option<i64>> {
        Ok(self.rows.read().await.last().and_then(|row| row.id))
    }

    async fn commit(&self) -> AppResult<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_for_insert(&self, timeout: Duration) -> AppResult<bool> {
        Ok(tokio::time::timeout(timeout, self.inserted.notified())
            .await
            .is_ok())
    }
}
