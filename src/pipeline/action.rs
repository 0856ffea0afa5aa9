//! Actions: side effects performed for the points a trigger produces.
//!
//! `handle` reports routine failure (a webhook answering 500, a missing feedback queue) as
//! `Ok(false)`. Only faults that should stop the processor are returned as errors.

use crate::core::{DataPoint, DataStore};
use crate::error::AppResult;
use crate::pipeline::context::{FeedbackSender, RunContext};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Trait for a side effect applied to data points.
#[async_trait]
pub trait Action: Send + Sync {
    /// One-time setup, called before any data flows.
    async fn start(&mut self) -> AppResult<()> {
        Ok(())
    }

    /// Applies `point`, returning whether the action took effect.
    async fn handle(&mut self, point: DataPoint) -> AppResult<bool>;
}

#[async_trait]
impl Action for Box<dyn Action> {
    async fn start(&mut self) -> AppResult<()> {
        (**self).start().await
    }

    async fn handle(&mut self, point: DataPoint) -> AppResult<bool> {
        (**self).handle(point).await
    }
}

/// Persists points to the run's store.
pub struct SaveToStoreAction {
    store: Arc<dyn DataStore>,
}

impl SaveToStoreAction {
    pub fn new(context: &RunContext) -> Self {
        Self {
            store: context.store(),
        }
    }
}

#[async_trait]
impl Action for SaveToStoreAction {
    async fn handle(&mut self, point: DataPoint) -> AppResult<bool> {
        let id = self.store.insert(&point).await?;
        tracing::debug!(sensor = %point.sensor_name, id, "Saved data point");
        Ok(true)
    }
}

/// Logs every point at warning level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingAction;

#[async_trait]
impl Action for LoggingAction {
    async fn handle(&mut self, point: DataPoint) -> AppResult<bool> {
        tracing::warn!(
            sensor = %point.sensor_name,
            deployment = %point.deployment_id,
            collected_at = %point.collected_at,
            data = ?point.data,
            "Data point"
        );
        Ok(true)
    }
}

/// Puts points on the feedback queue so the ongoing source yields them again.
pub struct RefeedAction {
    feedback: Option<FeedbackSender>,
}

impl RefeedAction {
    pub fn new(context: &RunContext) -> Self {
        Self {
            feedback: context.feedback(),
        }
    }
}

#[async_trait]
impl Action for RefeedAction {
    async fn handle(&mut self, point: DataPoint) -> AppResult<bool> {
        let Some(feedback) = &self.feedback else {
            tracing::error!("Refeed queue has not been initialised");
            return Ok(false);
        };
        let description = format!("{} @ {}", point.sensor_name, point.collected_at);
        if feedback.send(point) {
            tracing::info!(point = %description, "Re-fed data point to source");
            Ok(true)
        } else {
            tracing::error!(point = %description, "Refeed queue is closed");
            Ok(false)
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload {
    value1: String,
    value2: String,
    value3: String,
}

impl WebhookPayload {
    fn from_point(point: &DataPoint) -> Self {
        let value = match &point.data {
            None => "None".to_string(),
            Some(serde_json::Value::Bool(true)) => "True".to_string(),
            Some(serde_json::Value::Bool(false)) => "False".to_string(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        Self {
            value1: point.sensor_name.clone(),
            value2: value,
            value3: point.deployment_id.simple().to_string(),
        }
    }
}

/// POSTs a JSON summary of each point to a URI. Succeeds only on HTTP 200.
///
/// The body is `{"value1": sensor name, "value2": stringified data, "value3": deployment id}`,
/// the shape accepted by common webhook relays.
pub struct WebhookAction {
    uri: String,
    http: reqwest::Client,
}

impl WebhookAction {
    pub fn new(uri: impl Into<String>) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            uri: uri.into(),
            http,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

#[async_trait]
impl Action for WebhookAction {
    async fn handle(&mut self, point: DataPoint) -> AppResult<bool> {
        let payload = WebhookPayload::from_point(&point);
        match self.http.post(&self.uri).json(&payload).send().await {
            Ok(response) => {
                let status = response.status();
                tracing::info!(
                    uri = %self.uri,
                    sensor = %point.sensor_name,
                    status = status.as_u16(),
                    "Made webhook request"
                );
                Ok(status == reqwest::StatusCode::OK)
            }
            Err(e) => {
                tracing::warn!(uri = %self.uri, error = %e, "Webhook request failed");
                Ok(false)
            }
        }
    }
}
