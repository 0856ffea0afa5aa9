//! Core data types and the store seam for the action pipeline.
use crate::error::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A single timestamped, tagged measurement flowing through the pipeline.
///
/// Points are never mutated once built. Triggers derive new points through
/// [`DataPoint::derived`], which keeps the deployment and collection time of the source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Logical channel; for derived points, the name of the trigger that produced it.
    pub sensor_name: String,
    /// Opaque payload: a bare number, a `{magnitude, unit}` object, or anything else.
    pub data: Option<serde_json::Value>,
    pub deployment_id: Uuid,
    /// When the measurement was taken, not when it was processed.
    pub collected_at: DateTime<Utc>,
    /// Store-assigned identifier. `None` until the point has been persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl DataPoint {
    pub fn new(
        sensor_name: impl Into<String>,
        data: Option<serde_json::Value>,
        deployment_id: Uuid,
        collected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sensor_name: sensor_name.into(),
            data,
            deployment_id,
            collected_at,
            id: None,
        }
    }

    /// Build a synthetic point named `name` carrying `value`, inheriting the deployment and
    /// collection time of `source`.
    pub fn derived(name: &str, value: serde_json::Value, source: &DataPoint) -> Self {
        Self::new(name, Some(value), source.deployment_id, source.collected_at)
    }

    /// Copy of this point with the store-assigned identifier set.
    pub fn with_id(&self, id: i64) -> Self {
        Self {
            id: Some(id),
            ..self.clone()
        }
    }
}

/// Filter arguments for [`DataStore::query`].
///
/// Results are always ordered by ascending `id` and never grouped by sensor or deployment,
/// so the ongoing source sees one global arrival order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQuery {
    /// Only rows with `id` strictly greater than this.
    pub after_id: Option<i64>,
    pub sensor_name: Option<String>,
    pub deployment_id: Option<Uuid>,
    /// Inclusive lower bound on `collected_at`.
    pub collected_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `collected_at`.
    pub collected_before: Option<DateTime<Utc>>,
}

impl DataQuery {
    /// Same filters, restricted to identifiers above `after_id`.
    pub fn after(&self, after_id: i64) -> Self {
        Self {
            after_id: Some(after_id),
            ..self.clone()
        }
    }

    /// Whether `point` passes every filter of this query.
    pub fn matches(&self, point: &DataPoint) -> bool {
        if let Some(after_id) = self.after_id {
            match point.id {
                Some(id) if id > after_id => {}
                _ => return false,
            }
        }
        if let Some(sensor_name) = &self.sensor_name {
            if &point.sensor_name != sensor_name {
                return false;
            }
        }
        if let Some(deployment_id) = self.deployment_id {
            if point.deployment_id != deployment_id {
                return false;
            }
        }
        if let Some(after) = self.collected_after {
            if point.collected_at < after {
                return false;
            }
        }
        if let Some(before) = self.collected_before {
            if point.collected_at >= before {
                return false;
            }
        }
        true
    }
}

/// Trait for the collaborator store holding persisted data points.
///
/// Implementations own whatever session or connection they need; the pipeline shares one
/// store per run through [`RunContext`](crate::pipeline::context::RunContext).
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Persists a point and returns the identifier assigned to it.
    async fn insert(&self, point: &DataPoint) -> AppResult<i64>;

    /// Returns every row matching `query`, ordered by ascending identifier.
    async fn query(&self, query: &DataQuery) -> AppResult<Vec<DataPoint>>;

    /// Highest identifier currently stored, `None` if the store is empty.
    async fn max_id(&self) -> AppResult<Option<i64>>;

    /// Ends the current transaction so later reads observe a consistent boundary.
    async fn commit(&self) -> AppResult<()>;

    /// Waits up to `timeout` for a new row. Returns `true` if one was inserted since the
    /// previous call, `false` on timeout.
    ///
    /// Stores without change notification simply sleep for `timeout`.
    async fn wait_for_insert(&self, timeout: Duration) -> AppResult<bool> {
        tokio::time::sleep(timeout).await;
        Ok(false)
    }
}
