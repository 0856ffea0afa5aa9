//! Per-run shared resources: the store session and the feedback queue.
//!
//! Components that need either resource receive them explicitly from a [`RunContext`] when they
//! are constructed. Two runs in the same process therefore never share a store or a feedback
//! queue unless the caller hands them the same context.

use crate::core::{DataPoint, DataStore};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sending half of the feedback queue, held by refeed actions.
#[derive(Clone, Debug)]
pub struct FeedbackSender {
    tx: mpsc::UnboundedSender<DataPoint>,
}

impl FeedbackSender {
    /// Enqueues `point` for the ongoing source. Returns `false` if the source has gone away.
    pub fn send(&self, point: DataPoint) -> bool {
        self.tx.send(point).is_ok()
    }
}

/// Receiving half of the feedback queue, owned by the ongoing source.
#[derive(Debug)]
pub struct FeedbackReceiver {
    rx: mpsc::UnboundedReceiver<DataPoint>,
}

impl FeedbackReceiver {
    /// Takes every point currently queued, in enqueue order, without waiting.
    pub fn drain(&mut self) -> Vec<DataPoint> {
        let mut points = Vec::new();
        while let Ok(point) = self.rx.try_recv() {
            points.push(point);
        }
        points
    }

    /// Waits for the next point. Returns `None` once every sender is gone.
    ///
    /// Cancel safe: a cancelled call never loses a point.
    pub async fn recv(&mut self) -> Option<DataPoint> {
        self.rx.recv().await
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Creates a connected, unbounded feedback queue.
pub fn feedback_channel() -> (FeedbackSender, FeedbackReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FeedbackSender { tx }, FeedbackReceiver { rx })
}

/// Resources shared by the components of one pipeline run.
#[derive(Clone)]
pub struct RunContext {
    store: Arc<dyn DataStore>,
    feedback: Option<FeedbackSender>,
}

impl RunContext {
    /// Context with a fresh feedback queue. The receiver belongs to the ongoing source.
    pub fn new(store: Arc<dyn DataStore>) -> (Self, FeedbackReceiver) {
        let (tx, rx) = feedback_channel();
        (
            Self {
                store,
                feedback: Some(tx),
            },
            rx,
        )
    }

    /// Context without a feedback queue; refeed actions built from it always fail.
    pub fn without_feedback(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            feedback: None,
        }
    }

    pub fn store(&self) -> Arc<dyn DataStore> {
        Arc::clone(&self.store)
    }

    pub fn feedback(&self) -> Option<FeedbackSender> {
        self.feedback.clone()
    }
}
