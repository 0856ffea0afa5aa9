//! Triggers: decide whether a data point is relevant and derive a value from it.
//!
//! A trigger is split into a pure relevance check ([`Trigger::matches`]) and a value derivation
//! ([`Trigger::extract`]). The provided [`Trigger::handle`] composes the two into "maybe a
//! synthetic data point", which is what the processor worker consumes.
//!
//! # Outcomes of `extract`
//!
//! - `Ok(Extracted::Value(v))`: the trigger has a value for this point.
//! - `Ok(Extracted::NoData(_))`: the point is fine but the trigger cannot produce a value yet
//!   (e.g. a difference trigger that has only seen one side). Not an error; `handle` skips it.
//! - `Err(TriggerError::Incompatible(_))`: the payload has a shape this trigger does not
//!   understand. `handle` propagates it and the processor worker stops.

use crate::core::DataPoint;
use crate::error::TriggerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of a successful [`Trigger::extract`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted<T> {
    /// Derived value for the point.
    Value(T),
    /// Nothing to derive from this point yet.
    NoData(String),
}

impl<T> Extracted<T> {
    /// The derived value, if any.
    pub fn value(self) -> Option<T> {
        match self {
            Extracted::Value(value) => Some(value),
            Extracted::NoData(_) => None,
        }
    }
}

/// Trait for a rule that filters and derives values from data points.
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Type of value this trigger derives.
    type Value: Serialize + Send;

    /// Name given to the synthetic points this trigger produces.
    fn name(&self) -> &str;

    /// One-time setup, called before any data flows.
    async fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Whether `point` is of interest to this trigger. Must not have side effects.
    async fn matches(&self, point: &DataPoint) -> Result<bool, TriggerError>;

    /// The value `point` implies for this trigger.
    async fn extract(&mut self, point: &DataPoint)
        -> Result<Extracted<Self::Value>, TriggerError>;

    /// Returns a synthetic point carrying the extracted value, or `None` when the point is not
    /// relevant or there is no value yet.
    async fn handle(&mut self, point: &DataPoint) -> Result<Option<DataPoint>, TriggerError> {
        if !self.matches(point).await? {
            return Ok(None);
        }

        let value = match self.extract(point).await? {
            Extracted::Value(value) => value,
            Extracted::NoData(reason) => {
                tracing::trace!(trigger = self.name(), %reason, "No value for data point");
                return Ok(None);
            }
        };

        let value = serde_json::to_value(value).map_err(|e| TriggerError::Failed(e.into()))?;
        Ok(Some(DataPoint::derived(self.name(), value, point)))
    }
}

/// Reads a numeric measurement from a bare number or a `{magnitude, ...}` object.
pub fn numeric_value(point: &DataPoint) -> Result<f64, TriggerError> {
    let data = match &point.data {
        None | Some(serde_json::Value::Null) => {
            return Err(TriggerError::Incompatible(
                "Datapoint does not contain data".into(),
            ))
        }
        Some(data) => data,
    };

    let number = match data {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::Object(map) => map.get("magnitude").and_then(|m| m.as_f64()),
        _ => None,
    };
    number.ok_or_else(|| TriggerError::Incompatible("Unrecognised data format".into()))
}

/// Ordering relation used by [`ValueThresholdTrigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Comparator {
    /// Evaluates `value <op> threshold`.
    pub fn apply(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Gt => value > threshold,
            Comparator::Ge => value >= threshold,
            Comparator::Lt => value < threshold,
            Comparator::Le => value <= threshold,
            Comparator::Eq => value == threshold,
            Comparator::Ne => value != threshold,
        }
    }
}

/// Emits whether a numeric sensor reading satisfies `value <comparator> threshold`.
#[derive(Debug, Clone)]
pub struct ValueThresholdTrigger {
    pub name: String,
    pub threshold: f64,
    pub comparator: Comparator,
    pub sensor_name: String,
    /// Restricts the trigger to one deployment when set.
    pub deployment_id: Option<Uuid>,
}

impl ValueThresholdTrigger {
    pub fn new(
        name: impl Into<String>,
        sensor_name: impl Into<String>,
        comparator: Comparator,
        threshold: f64,
    ) -> Self {
        Self {
            name: name.into(),
            threshold,
            comparator,
            sensor_name: sensor_name.into(),
            deployment_id: None,
        }
    }

    pub fn for_deployment(mut self, deployment_id: Uuid) -> Self {
        self.deployment_id = Some(deployment_id);
        self
    }
}

#[async_trait]
impl Trigger for ValueThresholdTrigger {
    type Value = bool;

    fn name(&self) -> &str {
        &self.name
    }

    async fn matches(&self, point: &DataPoint) -> Result<bool, TriggerError> {
        if point.sensor_name != self.sensor_name {
            return Ok(false);
        }
        if let Some(deployment_id) = self.deployment_id {
            if point.deployment_id != deployment_id {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn extract(&mut self, point: &DataPoint) -> Result<Extracted<bool>, TriggerError> {
        let value = numeric_value(point)?;
        Ok(Extracted::Value(self.comparator.apply(value, self.threshold)))
    }
}

/// Emits the difference between the latest readings of two deployments for one sensor.
///
/// Only the most recent value of each side is retained. Nothing is emitted until both sides
/// have been seen at least once.
#[derive(Debug, Clone)]
pub struct ValueDifferenceTrigger {
    pub name: String,
    pub sensor_name: String,
    pub target_deployment_id: Uuid,
    pub reference_deployment_id: Uuid,
    last_target: Option<f64>,
    last_reference: Option<f64>,
}

impl ValueDifferenceTrigger {
    pub fn new(
        name: impl Into<String>,
        sensor_name: impl Into<String>,
        target_deployment_id: Uuid,
        reference_deployment_id: Uuid,
    ) -> Self {
        Self {
            name: name.into(),
            sensor_name: sensor_name.into(),
            target_deployment_id,
            reference_deployment_id,
            last_target: None,
            last_reference: None,
        }
    }
}

#[async_trait]
impl Trigger for ValueDifferenceTrigger {
    type Value = f64;

    fn name(&self) -> &str {
        &self.name
    }

    async fn matches(&self, point: &DataPoint) -> Result<bool, TriggerError> {
        Ok(point.sensor_name == self.sensor_name
            && (point.deployment_id == self.target_deployment_id
                || point.deployment_id == self.reference_deployment_id))
    }

    async fn extract(&mut self, point: &DataPoint) -> Result<Extracted<f64>, TriggerError> {
        let value = numeric_value(point)?;

        if point.deployment_id == self.target_deployment_id {
            self.last_target = Some(value);
        } else if point.deployment_id == self.reference_deployment_id {
            self.last_reference = Some(value);
        }

        match (self.last_target, self.last_reference) {
            (Some(target), Some(reference)) => Ok(Extracted::Value(target - reference)),
            _ => Ok(Extracted::NoData("Insufficient data processed".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn point(sensor: &str, data: serde_json::Value, deployment_id: Uuid) -> DataPoint {
        DataPoint::new(
            sensor,
            Some(data),
            deployment_id,
            Utc.with_ymd_and_hms(2020, 4, 1, 12, 0, 0).unwrap(),
        )
    }

    async fn extract_all(trigger: &mut ValueThresholdTrigger, values: &[f64]) -> Vec<bool> {
        let mut out = Vec::new();
        for value in values {
            let dp = point("Temperature", json!(value), Uuid::nil());
            out.push(trigger.extract(&dp).await.unwrap().value().unwrap());
        }
        out
    }

    #[tokio::test]
    async fn threshold_comparators() {
        let inputs = [19.0, 20.0, 21.0, 22.0];

        let mut gt = ValueThresholdTrigger::new("t", "Temperature", Comparator::Gt, 21.0);
        assert_eq!(
            extract_all(&mut gt, &inputs).await,
            vec![false, false, false, true]
        );

        let mut eq = ValueThresholdTrigger::new("t", "Temperature", Comparator::Eq, 21.0);
        assert_eq!(
            extract_all(&mut eq, &inputs).await,
            vec![false, false, true, false]
        );

        let mut le = ValueThresholdTrigger::new("t", "Temperature", Comparator::Le, 21.0);
        assert_eq!(
            extract_all(&mut le, &inputs).await,
            vec![true, true, true, false]
        );
    }

    #[tokio::test]
    async fn threshold_reads_magnitude_objects() {
        let mut trigger = ValueThresholdTrigger::new("t", "Temperature", Comparator::Lt, 18.0);
        let dp = point(
            "Temperature",
            json!({"magnitude": 17.5, "unit": "degC"}),
            Uuid::nil(),
        );
        assert_eq!(trigger.extract(&dp).await.unwrap(), Extracted::Value(true));
    }

    #[tokio::test]
    async fn threshold_rejects_unrecognised_data() {
        let mut trigger = ValueThresholdTrigger::new("t", "Temperature", Comparator::Gt, 21.0);

        let dp = point("Temperature", json!("hot"), Uuid::nil());
        let err = trigger.extract(&dp).await.unwrap_err();
        assert!(matches!(err, TriggerError::Incompatible(_)));

        let mut empty = point("Temperature", json!(null), Uuid::nil());
        empty.data = None;
        let err = trigger.extract(&empty).await.unwrap_err();
        assert!(err.is_not_derivable());

        // handle() must propagate the error rather than skipping the point
        assert!(trigger.handle(&dp).await.is_err());
    }

    #[tokio::test]
    async fn threshold_matches_sensor_and_deployment() {
        let deployment = Uuid::new_v4();
        let trigger = ValueThresholdTrigger::new("t", "Temperature", Comparator::Gt, 21.0)
            .for_deployment(deployment);

        assert!(trigger
            .matches(&point("Temperature", json!(1.0), deployment))
            .await
            .unwrap());
        assert!(!trigger
            .matches(&point("Temperature", json!(1.0), Uuid::nil()))
            .await
            .unwrap());
        assert!(!trigger
            .matches(&point("RelativeHumidity", json!(1.0), deployment))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn handle_skips_irrelevant_points_without_extracting() {
        let mut trigger = ValueThresholdTrigger::new("t", "Temperature", Comparator::Gt, 21.0);
        // Unparseable payload on another sensor: extract would fail if it were called
        let dp = point("SolarCumulativeOutput", json!("n/a"), Uuid::nil());
        assert_eq!(trigger.handle(&dp).await.unwrap(), None);
    }

    #[tokio::test]
    async fn handle_builds_synthetic_point() {
        let deployment = Uuid::new_v4();
        let mut trigger =
            ValueThresholdTrigger::new("TemperatureAbove21", "Temperature", Comparator::Gt, 21.0);
        let dp = point("Temperature", json!(22.0), deployment).with_id(9);

        let out = trigger.handle(&dp).await.unwrap().unwrap();
        assert_eq!(out.sensor_name, "TemperatureAbove21");
        assert_eq!(out.data, Some(json!(true)));
        assert_eq!(out.deployment_id, deployment);
        assert_eq!(out.collected_at, dp.collected_at);
        assert_eq!(out.id, None);
    }

    #[tokio::test]
    async fn difference_waits_for_both_sides() {
        let target = Uuid::new_v4();
        let reference = Uuid::new_v4();
        let mut trigger = ValueDifferenceTrigger::new("Diff", "Temperature", target, reference);

        let first = point("Temperature", json!(20.0), target);
        assert!(matches!(
            trigger.extract(&first).await.unwrap(),
            Extracted::NoData(_)
        ));
        assert_eq!(trigger.handle(&first).await.unwrap(), None);

        let second = point("Temperature", json!(18.5), reference);
        assert_eq!(
            trigger.extract(&second).await.unwrap(),
            Extracted::Value(1.5)
        );

        // Only the latest value per side is kept
        let third = point("Temperature", json!({"magnitude": 23.0}), target);
        assert_eq!(
            trigger.extract(&third).await.unwrap(),
            Extracted::Value(4.5)
        );
    }

    #[tokio::test]
    async fn difference_ignores_other_deployments() {
        let target = Uuid::new_v4();
        let reference = Uuid::new_v4();
        let trigger = ValueDifferenceTrigger::new("Diff", "Temperature", target, reference);

        assert!(!trigger
            .matches(&point("Temperature", json!(1.0), Uuid::new_v4()))
            .await
            .unwrap());
        assert!(!trigger
            .matches(&point("RelativeHumidity", json!(1.0), target))
            .await
            .unwrap());
    }

    #[test]
    fn comparator_parses_symbols() {
        let parsed: Comparator = serde_json::from_value(json!("<=")).unwrap();
        assert_eq!(parsed, Comparator::Le);
        assert!(serde_json::from_value::<Comparator>(json!("~")).is_err());
    }
}
