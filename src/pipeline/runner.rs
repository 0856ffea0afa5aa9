//! `ActionRunner`: fans the ongoing source out to every processor.
//!
//! Every point is pushed to every processor, one push at a time, so a single slow processor
//! holds back ingestion for all of them. A processor that stops or times out ends the run with
//! that error. On the way out every processor is ended.

use crate::core::DataPoint;
use crate::error::AppResult;
use crate::pipeline::processor::{DataProcessor, StatsHandle};
use crate::pipeline::signals::{os_signals, SignalMonitor};
use crate::pipeline::source::OngoingSource;
use std::future::Future;

pub struct ActionRunner {
    processors: Vec<DataProcessor>,
    started: bool,
}

impl ActionRunner {
    pub fn new(processors: Vec<DataProcessor>) -> Self {
        Self {
            processors,
            started: false,
        }
    }

    pub fn processors(&self) -> &[DataProcessor] {
        &self.processors
    }

    pub fn stats_handles(&self) -> Vec<StatsHandle> {
        self.processors
            .iter()
            .map(DataProcessor::stats_handle)
            .collect()
    }

    /// Starts every processor concurrently. Calling it again is a no-op.
    pub async fn start(&mut self) -> AppResult<()> {
        if self.started {
            return Ok(());
        }
        futures::future::try_join_all(self.processors.iter_mut().map(|p| p.start())).await?;
        self.started = true;
        tracing::info!(processors = self.processors.len(), "Started processors");
        Ok(())
    }

    /// Runs until a confirmed Ctrl+C, printing statistics on status signals and on the first
    /// interrupt.
    pub async fn run(&mut self, source: OngoingSource) -> AppResult<()> {
        let signals = os_signals()?;
        let monitor = SignalMonitor::new(self.stats_handles());
        self.run_until(source, monitor.run(signals)).await
    }

    /// Runs until `shutdown` resolves or a processor fails.
    pub async fn run_until<F>(&mut self, mut source: OngoingSource, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        tokio::pin!(shutdown);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break Ok(()),
                step = Self::step(&mut source, &mut self.processors) => {
                    if let Err(e) = step {
                        tracing::error!(error = %e, "Stopping run");
                        break Err(e);
                    }
                }
            }
        };

        self.end().await;
        outcome
    }

    /// Waits until every processor has worked through its queue.
    pub async fn idle(&mut self) -> AppResult<()> {
        for processor in &mut self.processors {
            processor.idle().await?;
        }
        Ok(())
    }

    pub async fn end(&mut self) {
        for processor in &mut self.processors {
            processor.end().await;
        }
    }

    async fn step(source: &mut OngoingSource, processors: &mut [DataProcessor]) -> AppResult<()> {
        let point = source.next().await?;
        dispatch(processors, point).await
    }
}

async fn dispatch(processors: &mut [DataProcessor], point: DataPoint) -> AppResult<()> {
    for processor in processors.iter_mut() {
        processor.push(point.clone()).await?;
    }
    Ok(())
}
