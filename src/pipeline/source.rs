//! The ongoing source: an endless, resumable feed of data points from the store.
//!
//! Each cycle:
//!
//! 1. starts the minimum cycle timer,
//! 2. yields anything waiting on the feedback queue,
//! 3. queries every row above the watermark (ascending id, one global order) and yields them,
//! 4. yields the feedback queue again until it is empty,
//! 5. commits the store,
//! 6. waits for the timer, or in [`Wakeup::Notify`] mode for the store to report an insert.
//!
//! Feedback points never move the watermark. The source never finishes on its own; a run stops
//! it by dropping it.

use crate::core::{DataPoint, DataQuery, DataStore};
use crate::error::AppResult;
use crate::pipeline::context::{FeedbackReceiver, RunContext};
use futures::Stream;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Minimum time between the start of two polling cycles.
pub const DEFAULT_MIN_CYCLE: Duration = Duration::from_secs(30);
/// How often notify mode re-checks for inserts it may have missed.
pub const DEFAULT_NOTIFY_RECHECK: Duration = Duration::from_secs(15);

/// How the source decides to start the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// Poll on a fixed cadence of at least `min_cycle`.
    Interval,
    /// Sleep until the store reports an insert or a point is re-fed, checking every `recheck`.
    Notify { recheck: Duration },
}

#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Replay the whole store instead of starting at its current maximum id.
    pub historical: bool,
    pub min_cycle: Duration,
    pub wakeup: Wakeup,
    /// Filters forwarded to every store query. `after_id` is managed by the source.
    pub query: DataQuery,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            historical: false,
            min_cycle: DEFAULT_MIN_CYCLE,
            wakeup: Wakeup::Interval,
            query: DataQuery::default(),
        }
    }
}

enum Queued {
    Ingested(DataPoint),
    Feedback(DataPoint),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Begin,
    Query,
    Drain,
    Commit,
    Wait,
}

/// Endless producer of data points backed by a [`DataStore`].
///
/// [`next`](Self::next) is cancel safe. A point is either returned or still queued inside the
/// source, and the watermark only moves when an ingested point is returned.
pub struct OngoingSource {
    store: Arc<dyn DataStore>,
    feedback: FeedbackReceiver,
    options: SourceOptions,
    last_id: i64,
    phase: Phase,
    pending: VecDeque<Queued>,
    cycle_deadline: Instant,
    cycles: u64,
}

impl OngoingSource {
    /// Opens the source on the context's store, consuming the context's feedback receiver.
    ///
    /// In live mode the watermark starts at the store's current maximum id, so pre-existing
    /// rows are skipped. In historical mode it starts at 0.
    pub async fn open(
        context: &RunContext,
        feedback: FeedbackReceiver,
        options: SourceOptions,
    ) -> AppResult<Self> {
        let store = context.store();
        let last_id = if options.historical {
            0
        } else {
            store.max_id().await?.unwrap_or(0)
        };
        tracing::info!(
            watermark = last_id,
            historical = options.historical,
            "Opened ongoing source"
        );

        Ok(Self {
            store,
            feedback,
            options,
            last_id,
            phase: Phase::Begin,
            pending: VecDeque::new(),
            cycle_deadline: Instant::now(),
            cycles: 0,
        })
    }

    /// Highest store id yielded so far (or the starting watermark).
    pub fn watermark(&self) -> i64 {
        self.last_id
    }

    /// Number of cycles that have started.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Waits for and returns the next data point.
    ///
    /// Only store errors end the sequence; the caller decides whether to retry.
    pub async fn next(&mut self) -> AppResult<DataPoint> {
        loop {
            if let Some(queued) = self.pending.pop_front() {
                return Ok(self.emit(queued));
            }

            match self.phase {
                Phase::Begin => {
                    self.cycles += 1;
                    self.cycle_deadline = Instant::now() + self.options.min_cycle;
                    self.take_feedback();
                    self.phase = Phase::Query;
                }
                Phase::Query => {
                    let query = self.options.query.after(self.last_id);
                    let rows = self.store.query(&query).await?;
                    tracing::debug!(
                        watermark = self.last_id,
                        rows = rows.len(),
                        "Queried store for new data"
                    );
                    self.pending.extend(rows.into_iter().map(Queued::Ingested));
                    self.phase = Phase::Drain;
                }
                Phase::Drain => {
                    if !self.take_feedback() {
                        self.phase = Phase::Commit;
                    }
                }
                Phase::Commit => {
                    self.store.commit().await?;
                    self.phase = Phase::Wait;
                }
                Phase::Wait => {
                    self.wait().await?;
                    tracing::info!(cycle = self.cycles + 1, "Getting next group of data");
                    self.phase = Phase::Begin;
                }
            }
        }
    }

    /// Turns the source into a `Stream` yielding the same sequence as repeated [`next`] calls.
    ///
    /// [`next`]: Self::next
    pub fn into_stream(self) -> impl Stream<Item = AppResult<DataPoint>> {
        futures::stream::unfold(self, |mut source| async move {
            let item = source.next().await;
            Some((item, source))
        })
    }

    fn emit(&mut self, queued: Queued) -> DataPoint {
        match queued {
            Queued::Ingested(point) => {
                if let Some(id) = point.id {
                    if id > self.last_id {
                        self.last_id = id;
                    }
                }
                point
            }
            Queued::Feedback(point) => point,
        }
    }

    /// Moves everything on the feedback queue into the pending buffer. Returns whether anything
    /// was taken.
    fn take_feedback(&mut self) -> bool {
        let points = self.feedback.drain();
        if points.is_empty() {
            return false;
        }
        tracing::info!(count = points.len(), "Passing refeed queue");
        self.pending.extend(points.into_iter().map(Queued::Feedback));
        true
    }

    async fn wait(&mut self) -> AppResult<()> {
        match self.options.wakeup {
            Wakeup::Interval => {
                tokio::time::sleep_until(self.cycle_deadline).await;
            }
            Wakeup::Notify { recheck } => loop {
                tokio::select! {
                    inserted = self.store.wait_for_insert(recheck) => {
                        if inserted? {
                            break;
                        }
                        tracing::trace!("No insert notification, rechecking");
                    }
                    Some(point) = self.feedback.recv() => {
                        self.pending.push_back(Queued::Feedback(point));
                        break;
                    }
                }
            },
        }
        Ok(())
    }
}
