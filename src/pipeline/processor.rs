//! `DataProcessor`: one trigger, one action, and the worker task that joins them.
//!
//! A processor moves through `uninitialized -> running -> ended`. While running it owns a
//! bounded queue drained by a single worker in strict FIFO order. Each dequeued point goes
//! through `Trigger::handle` and, if that yields a derived point, through `Action::handle`.
//!
//! ## Failure
//!
//! A worker that hits an error publishes it before marking the point done and exits. From then
//! on `push` and `idle` return [`ActionError::Stopped`] carrying that same error, so a crashed
//! worker stays observable instead of stalling its producer.
//!
//! ## Statistics
//!
//! The worker is the only writer of its counters. It publishes them over a `watch` channel
//! after each point, which is what [`StatsHandle`] reads from other tasks.

use crate::core::DataPoint;
use crate::error::{ActionError, AppResult, TriggerError};
use crate::pipeline::action::Action;
use crate::pipeline::trigger::Trigger;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Bound on points waiting in a processor's queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
/// How long `push` waits for queue space before reporting backpressure.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(30);
/// Number of recent latencies averaged by `stats()`.
pub const DEFAULT_STATS_WINDOW: usize = 10;

/// Tunables for a [`DataProcessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorOptions {
    pub queue_capacity: usize,
    pub push_timeout: Duration,
    pub stats_window: usize,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
            stats_window: DEFAULT_STATS_WINDOW,
        }
    }
}

/// Point-in-time view of a processor's counters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatsSnapshot {
    /// Points dequeued by the worker.
    pub total_in: u64,
    /// Points for which the action reported success.
    pub total_out: u64,
    /// Mean latency of the most recent successful points.
    pub mean_latency: Duration,
    /// Points pushed but not yet dequeued.
    pub waiting: usize,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.total_in == 0 {
            return write!(f, "Not yet started");
        }
        write!(
            f,
            "{:.3} seconds per item. {} in, {} out, {} waiting.",
            self.mean_latency.as_secs_f64(),
            self.total_in,
            self.total_out,
            self.waiting
        )
    }
}

/// What the worker publishes after every point.
#[derive(Debug, Clone, Default)]
struct Progress {
    total_in: u64,
    total_out: u64,
    mean_latency: Duration,
    failure: Option<Arc<ActionError>>,
}

/// Cloneable read-only view of a processor's statistics, usable from any task.
#[derive(Debug, Clone)]
pub struct StatsHandle {
    name: String,
    progress: watch::Receiver<Progress>,
    queued: Arc<AtomicUsize>,
}

impl StatsHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        snapshot(&self.progress, &self.queued)
    }

    /// Same text as [`DataProcessor::stats`].
    pub fn stats(&self) -> String {
        self.snapshot().to_string()
    }
}

fn snapshot(progress: &watch::Receiver<Progress>, queued: &AtomicUsize) -> StatsSnapshot {
    let progress = progress.borrow();
    StatsSnapshot {
        total_in: progress.total_in,
        total_out: progress.total_out,
        mean_latency: progress.mean_latency,
        waiting: queued.load(Ordering::Acquire),
    }
}

/// Object-safe view of a [`Trigger`], so processors can hold any trigger regardless of its
/// value type.
#[async_trait]
trait ErasedTrigger: Send {
    fn name(&self) -> &str;
    async fn start(&mut self) -> anyhow::Result<()>;
    async fn handle(&mut self, point: &DataPoint) -> Result<Option<DataPoint>, TriggerError>;
}

#[async_trait]
impl<T: Trigger> ErasedTrigger for T {
    fn name(&self) -> &str {
        Trigger::name(self)
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        Trigger::start(self).await
    }

    async fn handle(&mut self, point: &DataPoint) -> Result<Option<DataPoint>, TriggerError> {
        Trigger::handle(self, point).await
    }
}

struct Parts {
    trigger: Box<dyn ErasedTrigger>,
    action: Box<dyn Action>,
    progress: watch::Sender<Progress>,
}

struct Worker {
    tx: mpsc::Sender<DataPoint>,
    task: JoinHandle<()>,
}

enum State {
    Uninitialized(Parts),
    Running(Worker),
    /// The worker exited; holds its terminal error if it had one.
    Failed(Option<Arc<ActionError>>),
    Ended,
}

/// A running pipeline instance pairing one trigger with one action.
pub struct DataProcessor {
    name: String,
    options: ProcessorOptions,
    state: State,
    progress: watch::Receiver<Progress>,
    queued: Arc<AtomicUsize>,
    unfinished: Arc<watch::Sender<usize>>,
}

impl fmt::Debug for DataProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Uninitialized(_) => "uninitialized",
            State::Running(_) => "running",
            State::Failed(_) => "failed",
            State::Ended => "ended",
        };
        f.debug_struct("DataProcessor")
            .field("name", &self.name)
            .field("state", &state)
            .field("options", &self.options)
            .finish()
    }
}

impl DataProcessor {
    pub fn new<T, A>(name: impl Into<String>, trigger: T, action: A) -> Self
    where
        T: Trigger + 'static,
        A: Action + 'static,
    {
        Self::with_options(name, trigger, action, ProcessorOptions::default())
    }

    pub fn with_options<T, A>(
        name: impl Into<String>,
        trigger: T,
        action: A,
        options: ProcessorOptions,
    ) -> Self
    where
        T: Trigger + 'static,
        A: Action + 'static,
    {
        let (progress_tx, progress_rx) = watch::channel(Progress::default());
        let (unfinished, _) = watch::channel(0usize);
        Self {
            name: name.into(),
            options,
            state: State::Uninitialized(Parts {
                trigger: Box::new(trigger),
                action: Box::new(action),
                progress: progress_tx,
            }),
            progress: progress_rx,
            queued: Arc::new(AtomicUsize::new(0)),
            unfinished: Arc::new(unfinished),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ProcessorOptions {
        &self.options
    }

    /// Starts the trigger and action concurrently, then launches the worker.
    ///
    /// If either start fails the processor stays uninitialized and may be started again.
    pub async fn start(&mut self) -> AppResult<()> {
        let parts = match std::mem::replace(&mut self.state, State::Ended) {
            State::Uninitialized(parts) => parts,
            other => {
                let ended = matches!(other, State::Ended);
                self.state = other;
                return Err(if ended {
                    ActionError::Ended(self.name.clone())
                } else {
                    ActionError::AlreadyStarted(self.name.clone())
                });
            }
        };
        let Parts {
            mut trigger,
            mut action,
            progress,
        } = parts;

        let started = futures::try_join!(
            async {
                trigger
                    .start()
                    .await
                    .map_err(|e| ActionError::Trigger(TriggerError::Failed(e)))
            },
            action.start()
        );
        if let Err(e) = started {
            self.state = State::Uninitialized(Parts {
                trigger,
                action,
                progress,
            });
            return Err(e);
        }

        let (tx, rx) = mpsc::channel(self.options.queue_capacity.max(1));
        let worker = WorkerLoop {
            name: self.name.clone(),
            trigger,
            action,
            rx,
            progress,
            queued: Arc::clone(&self.queued),
            unfinished: Arc::clone(&self.unfinished),
            window: VecDeque::with_capacity(self.options.stats_window),
            window_size: self.options.stats_window.max(1),
        };
        let task = tokio::spawn(worker.run());
        self.state = State::Running(Worker { tx, task });

        tracing::debug!(processor = %self.name, "Processor started");
        Ok(())
    }

    /// Enqueues `point` for the worker.
    ///
    /// Waits for queue space for at most `push_timeout`, then fails with
    /// [`ActionError::PushTimeout`]. The point is dropped in that case.
    pub async fn push(&mut self, point: DataPoint) -> AppResult<()> {
        let tx = self.running().await?.tx.clone();
        let pending = PendingPush::new(&self.unfinished, &self.queued);

        match tokio::time::timeout(self.options.push_timeout, tx.send(point)).await {
            Ok(Ok(())) => {
                pending.commit();
                Ok(())
            }
            Ok(Err(_)) => {
                drop(pending);
                self.running().await?;
                Err(ActionError::Stopped {
                    name: self.name.clone(),
                    cause: None,
                })
            }
            Err(_) => {
                tracing::warn!(
                    processor = %self.name,
                    timeout = ?self.options.push_timeout,
                    "Processor queue is full"
                );
                Err(ActionError::PushTimeout {
                    name: self.name.clone(),
                    timeout: self.options.push_timeout,
                })
            }
        }
    }

    /// Resolves once every point pushed so far has been fully processed.
    pub async fn idle(&mut self) -> AppResult<()> {
        let unfinished = self.unfinished.subscribe();
        let progress = self.progress.clone();
        let worker = self.running().await?;

        let joined = tokio::select! {
            _ = drained(unfinished) => None,
            _ = failed(progress) => None,
            joined = &mut worker.task => Some(joined),
        };
        if let Some(joined) = joined {
            self.state = State::Failed(exit_cause(joined, &self.progress));
        }

        self.running().await.map(|_| ())
    }

    /// Cancels the worker. Any point it was processing is dropped.
    pub async fn end(&mut self) {
        if let State::Running(worker) = std::mem::replace(&mut self.state, State::Ended) {
            worker.task.abort();
            let _ = worker.task.await;
            tracing::debug!(processor = %self.name, "Processor ended");
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        snapshot(&self.progress, &self.queued)
    }

    /// Human-readable statistics line.
    pub fn stats(&self) -> String {
        self.snapshot().to_string()
    }

    pub fn stats_handle(&self) -> StatsHandle {
        StatsHandle {
            name: self.name.clone(),
            progress: self.progress.clone(),
            queued: Arc::clone(&self.queued),
        }
    }

    /// The running worker, after folding a finished or failed worker into `State::Failed`.
    async fn running(&mut self) -> AppResult<&mut Worker> {
        if let State::Running(worker) = &mut self.state {
            let failure = self.progress.borrow().failure.clone();
            let cause = if failure.is_some() {
                worker.task.abort();
                Some(failure)
            } else if worker.task.is_finished() {
                let joined = (&mut worker.task).await;
                Some(exit_cause(joined, &self.progress))
            } else {
                None
            };
            if let Some(cause) = cause {
                self.state = State::Failed(cause);
            }
        }

        match &mut self.state {
            State::Running(worker) => Ok(worker),
            State::Uninitialized(_) => Err(ActionError::NotStarted(self.name.clone())),
            State::Failed(cause) => Err(ActionError::Stopped {
                name: self.name.clone(),
                cause: cause.clone(),
            }),
            State::Ended => Err(ActionError::Ended(self.name.clone())),
        }
    }
}

impl Drop for DataProcessor {
    fn drop(&mut self) {
        if let State::Running(worker) = &self.state {
            worker.task.abort();
        }
    }
}

fn exit_cause(
    joined: Result<(), tokio::task::JoinError>,
    progress: &watch::Receiver<Progress>,
) -> Option<Arc<ActionError>> {
    match joined {
        Err(e) if e.is_panic() => Some(Arc::new(ActionError::WorkerPanicked(e.to_string()))),
        _ => progress.borrow().failure.clone(),
    }
}

async fn drained(mut unfinished: watch::Receiver<usize>) {
    let _ = unfinished.wait_for(|n| *n == 0).await;
}

async fn failed(mut progress: watch::Receiver<Progress>) {
    let _ = progress.wait_for(|p| p.failure.is_some()).await;
}

/// Counts a point as queued and unfinished until the send either completes or is abandoned.
struct PendingPush<'a> {
    unfinished: &'a watch::Sender<usize>,
    queued: &'a AtomicUsize,
    committed: bool,
}

impl<'a> PendingPush<'a> {
    fn new(unfinished: &'a watch::Sender<usize>, queued: &'a AtomicUsize) -> Self {
        unfinished.send_modify(|n| *n += 1);
        queued.fetch_add(1, Ordering::AcqRel);
        Self {
            unfinished,
            queued,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingPush<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            self.unfinished.send_modify(|n| *n = n.saturating_sub(1));
        }
    }
}

/// Marks one dequeued point as done, whatever happened to it.
struct Done<'a>(&'a watch::Sender<usize>);

impl Drop for Done<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

struct WorkerLoop {
    name: String,
    trigger: Box<dyn ErasedTrigger>,
    action: Box<dyn Action>,
    rx: mpsc::Receiver<DataPoint>,
    progress: watch::Sender<Progress>,
    queued: Arc<AtomicUsize>,
    unfinished: Arc<watch::Sender<usize>>,
    window: VecDeque<Duration>,
    window_size: usize,
}

impl WorkerLoop {
    async fn run(mut self) {
        let mut total_in = 0u64;
        let mut total_out = 0u64;

        while let Some(point) = self.rx.recv().await {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            let unfinished = Arc::clone(&self.unfinished);
            let done = Done(&unfinished);

            let started = Instant::now();
            total_in += 1;

            let outcome = self.process(&point).await;
            let failure = match outcome {
                Ok(true) => {
                    total_out += 1;
                    if self.window.len() == self.window_size {
                        self.window.pop_front();
                    }
                    self.window.push_back(started.elapsed());
                    None
                }
                Ok(false) => None,
                Err(e) => {
                    tracing::error!(
                        processor = %self.name,
                        trigger = self.trigger.name(),
                        sensor = %point.sensor_name,
                        error = %e,
                        "Processor worker stopped"
                    );
                    Some(Arc::new(e))
                }
            };

            let stop = failure.is_some();
            self.progress.send_replace(Progress {
                total_in,
                total_out,
                mean_latency: self.mean_latency(),
                failure,
            });
            drop(done);

            if stop {
                return;
            }
        }
    }

    async fn process(&mut self, point: &DataPoint) -> AppResult<bool> {
        let Some(derived) = self.trigger.handle(point).await? else {
            return Ok(false);
        };
        self.action.handle(derived).await
    }

    fn mean_latency(&self) -> Duration {
        if self.window.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.window.iter().sum();
        total / self.window.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::action::SaveToStoreAction;
    use crate::pipeline::context::RunContext;
    use crate::pipeline::trigger::{Comparator, Extracted, ValueThresholdTrigger};
    use crate::pipeline::wrappers::OnlyOnValue;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn point(sensor: &str, data: serde_json::Value) -> DataPoint {
        DataPoint::new(sensor, Some(data), Uuid::nil(), Utc::now())
    }

    /// Emits every point's data unchanged.
    struct PassThrough;

    #[async_trait]
    impl Trigger for PassThrough {
        type Value = serde_json::Value;

        fn name(&self) -> &str {
            "PassThrough"
        }

        async fn matches(&self, _point: &DataPoint) -> Result<bool, TriggerError> {
            Ok(true)
        }

        async fn extract(
            &mut self,
            point: &DataPoint,
        ) -> Result<Extracted<serde_json::Value>, TriggerError> {
            Ok(Extracted::Value(point.data.clone().unwrap_or_default()))
        }
    }

    /// Records the data of every point it receives.
    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<serde_json::Value>>>);

    #[async_trait]
    impl Action for Recorder {
        async fn handle(&mut self, point: DataPoint) -> AppResult<bool> {
            self.0.lock().unwrap().push(point.data.unwrap_or_default());
            Ok(true)
        }
    }

    /// Sleeps for `data` seconds, then succeeds.
    struct Sleeper;

    #[async_trait]
    impl Action for Sleeper {
        async fn handle(&mut self, point: DataPoint) -> AppResult<bool> {
            let seconds = point.data.and_then(|d| d.as_u64()).unwrap_or(0);
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            Ok(true)
        }
    }

    /// Never completes.
    struct Stuck;

    #[async_trait]
    impl Action for Stuck {
        async fn handle(&mut self, _point: DataPoint) -> AppResult<bool> {
            futures::future::pending::<()>().await;
            Ok(true)
        }
    }

    #[tokio::test]
    async fn counts_in_and_out() {
        let store = Arc::new(MemoryStore::new());
        let context = RunContext::without_feedback(store.clone());
        let trigger =
            ValueThresholdTrigger::new("TemperatureBelow18", "Temperature", Comparator::Lt, 18.0);
        let action = OnlyOnValue::new(SaveToStoreAction::new(&context), json!(true));
        let mut processor = DataProcessor::new("TemperatureBelow18", trigger, action);
        processor.start().await.unwrap();

        let readings = [
            ("Temperature", 17.0),
            ("RelativeHumidity", 40.0),
            ("Temperature", 19.0),
            ("Temperature", 16.5),
            ("RelativeHumidity", 10.0),
            ("Temperature", 12.0),
        ];
        for (sensor, value) in readings {
            processor.push(point(sensor, json!(value))).await.unwrap();
        }
        processor.idle().await.unwrap();

        let snapshot = processor.snapshot();
        assert_eq!(snapshot.total_in, 6);
        assert_eq!(snapshot.total_out, 3);
        assert_eq!(snapshot.waiting, 0);
        assert_eq!(store.len().await, 3);
        processor.end().await;
    }

    #[tokio::test]
    async fn push_requires_start() {
        let mut processor = DataProcessor::new("p", PassThrough, Recorder::default());
        let err = processor.push(point("a", json!(1))).await.unwrap_err();
        assert!(matches!(err, ActionError::NotStarted(name) if name == "p"));
        assert!(matches!(
            processor.idle().await,
            Err(ActionError::NotStarted(_))
        ));
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let mut processor = DataProcessor::new("p", PassThrough, Recorder::default());
        processor.start().await.unwrap();
        assert!(matches!(
            processor.start().await,
            Err(ActionError::AlreadyStarted(_))
        ));
    }

    #[tokio::test]
    async fn incompatible_data_stops_worker() {
        let store = Arc::new(MemoryStore::new());
        let context = RunContext::without_feedback(store.clone());
        let trigger = ValueThresholdTrigger::new("t", "Temperature", Comparator::Gt, 21.0);
        let mut processor =
            DataProcessor::new("t", trigger, SaveToStoreAction::new(&context));
        processor.start().await.unwrap();

        processor.push(point("Temperature", json!("hot"))).await.unwrap();
        let err = processor.idle().await.unwrap_err();
        match err.stopped_cause() {
            Some(ActionError::Trigger(TriggerError::Incompatible(_))) => {}
            other => panic!("unexpected cause: {:?}", other),
        }
        assert!(store.is_empty().await);
        assert_eq!(processor.snapshot().total_in, 1);
        assert_eq!(processor.snapshot().total_out, 0);

        // Every later caller sees the same failure
        let err = processor.push(point("Temperature", json!(22.0))).await.unwrap_err();
        assert!(matches!(
            err.stopped_cause(),
            Some(ActionError::Trigger(TriggerError::Incompatible(_)))
        ));
    }

    #[tokio::test]
    async fn push_after_end_fails() {
        let mut processor = DataProcessor::new("p", PassThrough, Recorder::default());
        processor.start().await.unwrap();
        processor.end().await;

        let err = processor.push(point("a", json!(1))).await.unwrap_err();
        assert!(matches!(err, ActionError::Ended(_)));
        assert!(matches!(
            processor.start().await,
            Err(ActionError::Ended(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_times_out() {
        let options = ProcessorOptions {
            queue_capacity: 1,
            ..Default::default()
        };
        let mut processor = DataProcessor::with_options("slow", PassThrough, Stuck, options);
        processor.start().await.unwrap();

        // The worker takes the first point and never finishes it; the second fills the queue
        processor.push(point("a", json!(1))).await.unwrap();
        processor.push(point("a", json!(2))).await.unwrap();

        let started = Instant::now();
        let err = processor.push(point("a", json!(3))).await.unwrap_err();
        assert!(err.is_backpressure());
        assert!(started.elapsed() >= DEFAULT_PUSH_TIMEOUT);
        assert_eq!(processor.snapshot().waiting, 1);

        // Backpressure does not kill the processor
        assert!(matches!(
            processor.push(point("a", json!(4))).await,
            Err(ActionError::PushTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn points_are_processed_in_push_order() {
        let recorder = Recorder::default();
        let seen = Arc::clone(&recorder.0);
        let mut processor = DataProcessor::new("fifo", PassThrough, recorder);
        processor.start().await.unwrap();

        for n in 0..200 {
            processor.push(point("a", json!(n))).await.unwrap();
        }
        processor.idle().await.unwrap();

        let expected: Vec<_> = (0..200).map(|n| json!(n)).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_report_counts_and_latency() {
        let trigger = ValueThresholdTrigger::new("t", "Temperature", Comparator::Gt, 0.0);
        let action = OnlyOnValue::new(Recorder::default(), json!(true));
        let mut processor = DataProcessor::new("t", trigger, action);
        assert_eq!(processor.stats(), "Not yet started");

        processor.start().await.unwrap();
        let handle = processor.stats_handle();
        for value in [1.0, -1.0, 2.0] {
            processor.push(point("Temperature", json!(value))).await.unwrap();
        }
        processor.idle().await.unwrap();

        assert_eq!(
            processor.stats(),
            "0.000 seconds per item. 3 in, 2 out, 0 waiting."
        );
        assert_eq!(handle.stats(), processor.stats());
        assert_eq!(handle.name(), "t");
    }

    #[tokio::test(start_paused = true)]
    async fn latency_window_keeps_latest_entries() {
        let options = ProcessorOptions {
            stats_window: 2,
            ..Default::default()
        };
        let mut processor = DataProcessor::with_options("sleepy", PassThrough, Sleeper, options);
        processor.start().await.unwrap();

        for seconds in [1, 2, 3] {
            processor.push(point("a", json!(seconds))).await.unwrap();
        }
        processor.idle().await.unwrap();

        // Only the 2s and 3s latencies remain in the window
        let snapshot = processor.snapshot();
        assert!(snapshot.mean_latency >= Duration::from_millis(2500));
        assert!(snapshot.mean_latency < Duration::from_millis(2510));
        assert!(processor
            .stats()
            .ends_with("seconds per item. 3 in, 3 out, 0 waiting."));
    }
}
