//! The streaming trigger/action pipeline.
//!
//! ```text
//! OngoingSource ──► ActionRunner ──► DataProcessor (queue ► Trigger ► Action) × N
//!       ▲                                                    │
//!       └──────────────── feedback queue ◄── RefeedAction ◄──┘
//! ```
//!
//! - [`trigger`]: relevance checks and value derivation.
//! - [`action`] / [`wrappers`]: side effects and the gates composed around them.
//! - [`processor`]: one worker per trigger/action pair, with backpressure and statistics.
//! - [`source`]: the endless, watermarked feed from the store.
//! - [`runner`]: fan-out from the source to every processor.
//! - [`signals`]: statistics on demand and the double Ctrl+C shutdown.
//! - [`context`]: the store and feedback queue shared by one run.

pub mod action;
pub mod context;
pub mod processor;
pub mod runner;
pub mod signals;
pub mod source;
pub mod trigger;
pub mod wrappers;

pub use action::{Action, LoggingAction, RefeedAction, SaveToStoreAction, WebhookAction};
pub use context::{FeedbackReceiver, FeedbackSender, RunContext};
pub use processor::{DataProcessor, ProcessorOptions, StatsHandle, StatsSnapshot};
pub use runner::ActionRunner;
pub use signals::{ControlSignal, InterruptGate, SignalMonitor};
pub use source::{OngoingSource, SourceOptions, Wakeup};
pub use trigger::{Comparator, Extracted, Trigger, ValueDifferenceTrigger, ValueThresholdTrigger};
pub use wrappers::{OnlyAfterDate, OnlyOnChange, OnlyOnValue};
