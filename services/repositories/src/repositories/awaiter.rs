//! Condition awaiter.
//!
//! # Purpose
//! Blocks until a just-written object reaches a terminal state reported by
//! the reconciler, bounded by a deadline.
//!
//! # Key invariants
//! - The passed object is checked before subscribing, closing the race where
//!   the condition became true before the watch was established.
//! - The deadline is measured from the start of the call, so slow watch
//!   establishment counts against it.
//! - An absent or false condition is not terminal unless the predicate says
//!   so. Stream errors and early closure are reported, never retried.
//! - The awaiter performs no writes; a timeout leaves the object in place for
//!   the reconciler.
use crate::errors::AwaitError;
use crate::model::{ConditionStatus, Object, ObjectKey, find_condition};
use crate::observability;
use crate::store::{ObjectClient, WatchEventType};
use std::time::Duration;
use tokio::time::{Instant, timeout_at};

/// Verdict of a predicate over one observed state of the object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwaitOutcome {
    Pending,
    Satisfied,
    Failed { reason: String, message: String },
}

pub trait AwaitPredicate: Send + Sync {
    fn evaluate(&self, object: &Object) -> AwaitOutcome;
}

impl<F> AwaitPredicate for F
where
    F: Fn(&Object) -> AwaitOutcome + Send + Sync,
{
    fn evaluate(&self, object: &Object) -> AwaitOutcome {
        self(object)
    }
}

/// Satisfied once `condition_type` is true; never fails.
pub fn condition_true(condition_type: &str) -> impl AwaitPredicate + use<> {
    let condition_type = condition_type.to_string();
    move |object: &Object| match find_condition(&object.status.conditions, &condition_type) {
        Some(condition) if condition.status == ConditionStatus::True => AwaitOutcome::Satisfied,
        _ => AwaitOutcome::Pending,
    }
}

/// Satisfied once `condition_type` is true; fails fast once it is false.
pub fn condition_true_or_failed(condition_type: &str) -> impl AwaitPredicate + use<> {
    let condition_type = condition_type.to_string();
    move |object: &Object| match find_condition(&object.status.conditions, &condition_type) {
        Some(condition) if condition.status == ConditionStatus::True => AwaitOutcome::Satisfied,
        Some(condition) if condition.status == ConditionStatus::False => AwaitOutcome::Failed {
            reason: condition.reason.clone(),
            message: condition.message.clone(),
        },
        _ => AwaitOutcome::Pending,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConditionAwaiter {
    timeout: Duration,
}

impl ConditionAwaiter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait until `condition_type` is true on `object`.
    pub async fn await_condition(
        &self,
        client: &dyn ObjectClient,
        object: &Object,
        condition_type: &str,
    ) -> Result<Object, AwaitError> {
        self.await_predicate(client, object, condition_true(condition_type))
            .await
    }

    /// Wait until `predicate` reports a terminal outcome for `object`.
    ///
    /// # Errors
    /// - [`AwaitError::Timeout`] when the deadline passes first.
    /// - [`AwaitError::ConditionFailed`] when the predicate reports failure or
    ///   the object is deleted while waiting.
    /// - [`AwaitError::StreamClosed`] / [`AwaitError::Stream`] for watch failures.
    pub async fn await_predicate<P>(
        &self,
        client: &dyn ObjectClient,
        object: &Object,
        predicate: P,
    ) -> Result<Object, AwaitError>
    where
        P: AwaitPredicate,
    {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let key = object.key();

        let result = match predicate.evaluate(object) {
            AwaitOutcome::Satisfied => Ok(object.clone()),
            AwaitOutcome::Failed { reason, message } => {
                Err(AwaitError::ConditionFailed { reason, message })
            }
            AwaitOutcome::Pending => {
                match timeout_at(deadline, watch_until(client, &key, &predicate)).await {
                    Ok(result) => result,
                    Err(_) => Err(AwaitError::Timeout {
                        timeout: self.timeout,
                    }),
                }
            }
        };

        let outcome = match &result {
            Ok(_) => "satisfied",
            Err(AwaitError::ConditionFailed { .. }) => "failed",
            Err(AwaitError::Timeout { .. }) => "timeout",
            Err(AwaitError::StreamClosed) => "stream_closed",
            Err(AwaitError::Stream(_)) => "stream_error",
        };
        metrics::counter!(observability::CONDITION_AWAITS_TOTAL, "outcome" => outcome)
            .increment(1);
        metrics::histogram!(observability::CONDITION_AWAIT_SECONDS)
            .record(started.elapsed().as_secs_f64());
        if let Err(err) = &result {
            tracing::warn!(object = %key, error = %err, "condition await did not succeed");
        }
        result
    }
}

async fn watch_until<P>(
    client: &dyn ObjectClient,
    key: &ObjectKey,
    predicate: &P,
) -> Result<Object, AwaitError>
where
    P: AwaitPredicate,
{
    let mut watch = client.watch(key).await.map_err(AwaitError::Stream)?;
    while let Some(event) = watch.next().await {
        let event = event.map_err(AwaitError::Stream)?;
        if event.event_type == WatchEventType::Deleted {
            return Err(AwaitError::ConditionFailed {
                reason: "Deleted".to_string(),
                message: format!("{key} was deleted"),
            });
        }
        match predicate.evaluate(&event.object) {
            AwaitOutcome::Pending => continue,
            AwaitOutcome::Satisfied => return Ok(event.object),
            AwaitOutcome::Failed { reason, message } => {
                return Err(AwaitError::ConditionFailed { reason, message });
            }
        }
    }
    Err(AwaitError::StreamClosed)
}
