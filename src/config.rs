//! Configuration loading using Figment.
//!
//! A run is described by one TOML file, merged with environment variables prefixed
//! `DAQ_ACTIONS_`. Nested keys are separated by a double underscore, so
//! `DAQ_ACTIONS_PROCESSING__QUEUE_CAPACITY=8` overrides `processing.queue_capacity`.
//!
//! # Example
//! ```no_run
//! use daq_actions::config::ActionsConfig;
//!
//! let config = ActionsConfig::load_from("config/actions.toml")?;
//! config.validate()?;
//! println!("{} processors", config.processors.len());
//! # Ok::<(), daq_actions::error::ActionError>(())
//! ```
//!
//! Processors pair one trigger table with one action table. Wrapper actions nest their inner
//! action under `inner`:
//!
//! ```toml
//! [[processors]]
//! name = "TemperatureBelow18"
//! [processors.trigger]
//! type = "threshold"
//! sensor_name = "Temperature"
//! comparator = "<"
//! threshold = 18.0
//! [processors.action]
//! type = "only_on_change"
//! [processors.action.inner]
//! type = "log"
//! ```

use crate::core::DataQuery;
use crate::error::{ActionError, AppResult};
use crate::pipeline::processor::{
    ProcessorOptions, DEFAULT_PUSH_TIMEOUT, DEFAULT_QUEUE_CAPACITY, DEFAULT_STATS_WINDOW,
};
use crate::pipeline::source::{SourceOptions, Wakeup, DEFAULT_MIN_CYCLE, DEFAULT_NOTIFY_RECHECK};
use crate::pipeline::trigger::Comparator;
use chrono::{DateTime, Utc};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "DAQ_ACTIONS_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration of an actions run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionsConfig {
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub processors: Vec<ProcessorDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WakeupMode {
    #[default]
    Interval,
    Notify,
}

/// Ongoing source settings and the filters passed through to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Replay everything already in the store
    #[serde(default)]
    pub historical: bool,
    #[serde(default = "default_min_cycle", with = "humantime_serde")]
    pub min_cycle: Duration,
    #[serde(default)]
    pub wakeup: WakeupMode,
    #[serde(default = "default_notify_recheck", with = "humantime_serde")]
    pub notify_recheck: Duration,
    #[serde(default)]
    pub sensor_name: Option<String>,
    #[serde(default)]
    pub deployment_id: Option<Uuid>,
    #[serde(default)]
    pub collected_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub collected_before: Option<DateTime<Utc>>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            historical: false,
            min_cycle: default_min_cycle(),
            wakeup: WakeupMode::default(),
            notify_recheck: default_notify_recheck(),
            sensor_name: None,
            deployment_id: None,
            collected_after: None,
            collected_before: None,
        }
    }
}

impl SourceConfig {
    pub fn to_options(&self) -> SourceOptions {
        let wakeup = match self.wakeup {
            WakeupMode::Interval => Wakeup::Interval,
            WakeupMode::Notify => Wakeup::Notify {
                recheck: self.notify_recheck,
            },
        };
        SourceOptions {
            historical: self.historical,
            min_cycle: self.min_cycle,
            wakeup,
            query: DataQuery {
                after_id: None,
                sensor_name: self.sensor_name.clone(),
                deployment_id: self.deployment_id,
                collected_after: self.collected_after,
                collected_before: self.collected_before,
            },
        }
    }
}

/// Per-processor queue settings, shared by every processor of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_push_timeout", with = "humantime_serde")]
    pub push_timeout: Duration,
    #[serde(default = "default_stats_window")]
    pub stats_window: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            push_timeout: default_push_timeout(),
            stats_window: default_stats_window(),
        }
    }
}

impl ProcessingConfig {
    pub fn to_options(&self) -> ProcessorOptions {
        ProcessorOptions {
            queue_capacity: self.queue_capacity,
            push_timeout: self.push_timeout,
            stats_window: self.stats_window,
        }
    }
}

/// One trigger/action pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorDefinition {
    pub name: String,
    pub trigger: TriggerDefinition,
    pub action: ActionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerDefinition {
    Threshold {
        /// Name of the derived points; defaults to the processor name
        #[serde(default)]
        name: Option<String>,
        sensor_name: String,
        comparator: Comparator,
        threshold: f64,
        #[serde(default)]
        deployment_id: Option<Uuid>,
    },
    Difference {
        #[serde(default)]
        name: Option<String>,
        sensor_name: String,
        target_deployment_id: Uuid,
        reference_deployment_id: Uuid,
    },
}

impl TriggerDefinition {
    pub fn name(&self) -> Option<&str> {
        match self {
            TriggerDefinition::Threshold { name, .. } | TriggerDefinition::Difference { name, .. } => {
                name.as_deref()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionDefinition {
    Save,
    Log,
    Refeed,
    Webhook {
        uri: String,
    },
    OnlyOnChange {
        inner: Box<ActionDefinition>,
    },
    OnlyOnValue {
        value: serde_json::Value,
        inner: Box<ActionDefinition>,
    },
    OnlyAfterDate {
        after: DateTime<Utc>,
        inner: Box<ActionDefinition>,
    },
}

impl ActionDefinition {
    /// Short description, e.g. `only_on_change(log)`.
    pub fn describe(&self) -> String {
        match self {
            ActionDefinition::Save => "save".to_string(),
            ActionDefinition::Log => "log".to_string(),
            ActionDefinition::Refeed => "refeed".to_string(),
            ActionDefinition::Webhook { uri } => format!("webhook({})", uri),
            ActionDefinition::OnlyOnChange { inner } => {
                format!("only_on_change({})", inner.describe())
            }
            ActionDefinition::OnlyOnValue { value, inner } => {
                format!("only_on_value({}, {})", value, inner.describe())
            }
            ActionDefinition::OnlyAfterDate { after, inner } => {
                format!("only_after_date({}, {})", after.to_rfc3339(), inner.describe())
            }
        }
    }

    fn validate(&self, processor: &str) -> AppResult<()> {
        match self {
            ActionDefinition::Webhook { uri } => {
                if uri.starts_with("http://") || uri.starts_with("https://") {
                    Ok(())
                } else {
                    Err(ActionError::Configuration(format!(
                        "Processor '{}': webhook uri '{}' must be http or https",
                        processor, uri
                    )))
                }
            }
            ActionDefinition::OnlyOnChange { inner }
            | ActionDefinition::OnlyOnValue { inner, .. }
            | ActionDefinition::OnlyAfterDate { inner, .. } => inner.validate(processor),
            ActionDefinition::Save | ActionDefinition::Log | ActionDefinition::Refeed => Ok(()),
        }
    }
}

fn default_name() -> String {
    "daq-actions".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_min_cycle() -> Duration {
    DEFAULT_MIN_CYCLE
}

fn default_notify_recheck() -> Duration {
    DEFAULT_NOTIFY_RECHECK
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_push_timeout() -> Duration {
    DEFAULT_PUSH_TIMEOUT
}

fn default_stats_window() -> usize {
    DEFAULT_STATS_WINDOW
}

impl ActionsConfig {
    /// Load configuration from a TOML file and `DAQ_ACTIONS_` environment variables.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ActionError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        Ok(Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?)
    }

    /// Parse configuration from TOML text, without environment overrides.
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        Ok(Figment::new().merge(Toml::string(toml)).extract()?)
    }

    /// Render the effective configuration, defaults and overrides included.
    pub fn to_toml_string(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| {
            ActionError::Configuration(format!("Failed to render configuration: {}", e))
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ActionError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        if self.processing.queue_capacity == 0 {
            return Err(ActionError::Configuration(
                "processing.queue_capacity must be at least 1".into(),
            ));
        }
        if self.processing.stats_window == 0 {
            return Err(ActionError::Configuration(
                "processing.stats_window must be at least 1".into(),
            ));
        }

        let mut names = HashSet::new();
        for processor in &self.processors {
            if processor.name.trim().is_empty() {
                return Err(ActionError::Configuration(
                    "Processor names must not be empty".into(),
                ));
            }
            if !names.insert(processor.name.as_str()) {
                return Err(ActionError::Configuration(format!(
                    "Duplicate processor name: {}",
                    processor.name
                )));
            }
            if let TriggerDefinition::Difference {
                target_deployment_id,
                reference_deployment_id,
                ..
            } = &processor.trigger
            {
                if target_deployment_id == reference_deployment_id {
                    return Err(ActionError::Configuration(format!(
                        "Processor '{}': difference trigger needs two distinct deployments",
                        processor.name
                    )));
                }
            }
            processor.action.validate(&processor.name)?;
        }

        Ok(())
    }
}
