//! # DAQ Actions
//!
//! Streaming trigger/action pipelines over an ongoing feed of sensor data points.
//!
//! Data points are read from a store as they arrive and fanned out to a set of independently
//! configured processors. Each processor decides whether a point is relevant, derives a value
//! from it, and (after any de-duplication or time gating) performs an action: persist the
//! derived point, log it, call a webhook, or feed it back into the stream.
//!
//! ## Crate Structure
//!
//! - **`core`**: `DataPoint`, store query arguments and the `DataStore` trait.
//! - **`error`**: `ActionError`, the crate-wide error, and `TriggerError`.
//! - **`config`**: figment-based loading and validation of a run's TOML configuration.
//! - **`registry`**: turns processor definitions into running `DataProcessor`s.
//! - **`logging`**: tracing subscriber setup.
//! - **`store`**: in-memory and JSON-lines `DataStore` implementations.
//! - **`pipeline`**: triggers, actions and their wrappers, the processor worker, the ongoing
//!   source, the runner, and signal handling.
//!
//! ## Example
//!
//! ```no_run
//! use daq_actions::pipeline::{
//!     ActionRunner, Comparator, DataProcessor, LoggingAction, OngoingSource, OnlyOnChange,
//!     RunContext, SourceOptions, ValueThresholdTrigger,
//! };
//! use daq_actions::store::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> daq_actions::error::AppResult<()> {
//! let (context, feedback) = RunContext::new(Arc::new(MemoryStore::new()));
//! let processor = DataProcessor::new(
//!     "TemperatureBelow18",
//!     ValueThresholdTrigger::new("TemperatureBelow18", "Temperature", Comparator::Lt, 18.0),
//!     OnlyOnChange::new(LoggingAction),
//! );
//!
//! let source = OngoingSource::open(&context, feedback, SourceOptions::default()).await?;
//! ActionRunner::new(vec![processor]).run(source).await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod store;
