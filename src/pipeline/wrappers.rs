//! Action wrappers that gate delegation to an inner action.
//!
//! Each wrapper owns exactly one inner action and is itself an [`Action`], so wrappers nest:
//! `OnlyOnChange::new(OnlyAfterDate::new(SaveToStoreAction::new(&ctx), cutoff))`.
//! A suppressed point returns `Ok(false)` without reaching the inner action.

use crate::core::DataPoint;
use crate::error::AppResult;
use crate::pipeline::action::Action;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Forwards a point only when its `data` differs from the previous point received.
///
/// The comparison is against the last point *received*, forwarded or not. The first point is
/// always forwarded.
pub struct OnlyOnChange<A> {
    inner: A,
    last_value: Option<Option<serde_json::Value>>,
}

impl<A: Action> OnlyOnChange<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            last_value: None,
        }
    }

    pub fn into_inner(self) -> A {
        self.inner
    }
}

#[async_trait]
impl<A: Action> Action for OnlyOnChange<A> {
    async fn start(&mut self) -> AppResult<()> {
        self.last_value = None;
        self.inner.start().await
    }

    async fn handle(&mut self, point: DataPoint) -> AppResult<bool> {
        if self.last_value.as_ref() == Some(&point.data) {
            return Ok(false);
        }
        self.last_value = Some(point.data.clone());
        self.inner.handle(point).await
    }
}

/// Forwards a point only when its `data` equals a fixed value.
pub struct OnlyOnValue<A> {
    inner: A,
    value: serde_json::Value,
}

impl<A: Action> OnlyOnValue<A> {
    pub fn new(inner: A, value: serde_json::Value) -> Self {
        Self { inner, value }
    }
}

#[async_trait]
impl<A: Action> Action for OnlyOnValue<A> {
    async fn start(&mut self) -> AppResult<()> {
        self.inner.start().await
    }

    async fn handle(&mut self, point: DataPoint) -> AppResult<bool> {
        if point.data.as_ref() != Some(&self.value) {
            return Ok(false);
        }
        self.inner.handle(point).await
    }
}

/// Forwards a point only when it was collected strictly after a threshold.
pub struct OnlyAfterDate<A> {
    inner: A,
    threshold: DateTime<Utc>,
}

impl<A: Action> OnlyAfterDate<A> {
    pub fn new(inner: A, threshold: DateTime<Utc>) -> Self {
        Self { inner, threshold }
    }
}

#[async_trait]
impl<A: Action> Action for OnlyAfterDate<A> {
    async fn start(&mut self) -> AppResult<()> {
        self.inner.start().await
    }

    async fn handle(&mut self, point: DataPoint) -> AppResult<bool> {
        if point.collected_at <= self.threshold {
            return Ok(false);
        }
        self.inner.handle(point).await
    }
}
