//! Loading run configuration from files and environment overrides.

use daq_actions::config::{ActionDefinition, ActionsConfig, TriggerDefinition, WakeupMode};
use daq_actions::pipeline::{Comparator, Wakeup};
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const BASIC: &str = r#"
[application]
log_level = "debug"

[source]
wakeup = "notify"
notify_recheck = "5s"
sensor_name = "Temperature"

[[processors]]
name = "TemperatureBelow18"
[processors.trigger]
type = "threshold"
sensor_name = "Temperature"
comparator = "<"
threshold = 18.0
[processors.action]
type = "only_after_date"
after = "2020-04-01T00:00:00Z"
[processors.action.inner]
type = "only_on_change"
[processors.action.inner.inner]
type = "webhook"
uri = "https://maker.example.com/trigger/cold"
"#;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_load_from_file() {
    let file = write_config(BASIC);
    let config = ActionsConfig::load_from(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.application.log_level, "debug");
    assert_eq!(config.source.wakeup, WakeupMode::Notify);
    assert_eq!(config.processing.queue_capacity, 64);
    assert_eq!(config.processors.len(), 1);

    let processor = &config.processors[0];
    assert!(matches!(
        processor.trigger,
        TriggerDefinition::Threshold {
            comparator: Comparator::Lt,
            ..
        }
    ));
    assert!(matches!(
        processor.action,
        ActionDefinition::OnlyAfterDate { .. }
    ));
    assert_eq!(
        processor.action.describe(),
        "only_after_date(2020-04-01T00:00:00+00:00, only_on_change(webhook(https://maker.example.com/trigger/cold)))"
    );

    let options = config.source.to_options();
    assert_eq!(
        options.wakeup,
        Wakeup::Notify {
            recheck: Duration::from_secs(5)
        }
    );
    assert_eq!(options.query.sensor_name.as_deref(), Some("Temperature"));
    assert_eq!(options.query.after_id, None);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(BASIC);
    std::env::set_var("DAQ_ACTIONS_PROCESSING__QUEUE_CAPACITY", "8");
    std::env::set_var("DAQ_ACTIONS_SOURCE__MIN_CYCLE", "5s");

    let result = ActionsConfig::load_from(file.path());

    std::env::remove_var("DAQ_ACTIONS_PROCESSING__QUEUE_CAPACITY");
    std::env::remove_var("DAQ_ACTIONS_SOURCE__MIN_CYCLE");

    let config = result.unwrap();
    assert_eq!(config.processing.queue_capacity, 8);
    assert_eq!(config.processing.to_options().queue_capacity, 8);
    assert_eq!(config.source.min_cycle, Duration::from_secs(5));
}

#[test]
#[serial]
fn test_missing_file_is_reported() {
    let err = ActionsConfig::load_from("/nonexistent/actions.toml").unwrap_err();
    assert!(err.to_string().contains("Configuration file not found"));
}

#[test]
#[serial]
fn test_invalid_file_fails_validation() {
    let file = write_config(
        r#"
[processing]
queue_capacity = 0
"#,
    );
    let config = ActionsConfig::load_from(file.path()).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("queue_capacity"));
}

#[test]
#[serial]
fn test_unknown_action_type_is_rejected() {
    let file = write_config(
        r#"
[[processors]]
name = "Broken"
[processors.trigger]
type = "threshold"
sensor_name = "Temperature"
comparator = "<"
threshold = 18.0
[processors.action]
type = "email"
"#,
    );
    assert!(ActionsConfig::load_from(file.path()).is_err());
}

#[test]
#[serial]
fn test_shipped_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/actions.toml");
    let config = ActionsConfig::load_from(path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.processors[0].name, "TemperatureBelow18");
}
