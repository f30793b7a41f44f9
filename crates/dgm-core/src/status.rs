//! # Status Callbacks
//!
//! Observer interface for the lifecycle of a degraphmalize action.
//!
//! Per action: `started` once, then `recompute_started` and
//! `recompute_complete` once per scheduled recompute, then exactly one of
//! `complete` or `exception` when the whole batch has resolved. Callbacks
//! may run on any worker thread.

use crate::degraphmalizer::{DegraphmalizeAction, DegraphmalizeOutcome, DegraphmalizeResult};
use crate::recompute::{RecomputeAction, RecomputeOutcome, RecomputeResult};

/// Receives lifecycle events. Every method defaults to doing nothing.
pub trait DegraphmalizeStatus: Send + Sync {
    fn started(&self, _action: &DegraphmalizeAction) {}

    fn recompute_started(&self, _action: &RecomputeAction) {}

    fn recompute_complete(&self, _result: &RecomputeResult) {}

    fn complete(&self, _result: &DegraphmalizeResult) {}

    fn exception(&self, _result: &DegraphmalizeResult) {}
}

/// Ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStatus;

impl DegraphmalizeStatus for NoopStatus {}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingStatus;

impl DegraphmalizeStatus for LoggingStatus {
    fn started(&self, action: &DegraphmalizeAction) {
        tracing::info!(
            hash = action.hash(),
            action = %action.action_type(),
            id = %action.id(),
            cascade = action.cascade(),
            "degraphmalize started"
        );
    }

    fn recompute_started(&self, action: &RecomputeAction) {
        tracing::debug!(root = %action.root, config = action.config.name(), "recompute started");
    }

    fn recompute_complete(&self, result: &RecomputeResult) {
        match &result.outcome {
            RecomputeOutcome::Success(success) => tracing::info!(
                root = %result.action.root,
                target = %success.index_response,
                "recompute complete"
            ),
            RecomputeOutcome::Expired(ids) => tracing::warn!(
                root = %result.action.root,
                stale = ids.len(),
                "recompute expired"
            ),
            RecomputeOutcome::Exception(error) => tracing::error!(
                root = %result.action.root,
                error = %error,
                "recompute exception"
            ),
            RecomputeOutcome::Failed(reason) => tracing::info!(
                root = %result.action.root,
                reason = ?reason,
                "recompute produced no output"
            ),
        }
    }

    fn complete(&self, result: &DegraphmalizeResult) {
        tracing::info!(
            hash = result.action.hash(),
            recomputes = result.results().len(),
            resubmitted = result.resubmitted.len(),
            "degraphmalize complete"
        );
    }

    fn exception(&self, result: &DegraphmalizeResult) {
        if let DegraphmalizeOutcome::Failed(error) = &result.outcome {
            tracing::error!(hash = result.action.hash(), error = %error, "degraphmalize failed");
        }
    }
}
