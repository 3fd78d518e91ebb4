//! Tracking of objects a scenario creates.

use std::sync::{Mutex, PoisonError};

use crate::domain::errors::ClientError;
use crate::domain::models::{ObjectRef, PropagationPolicy};
use crate::domain::ports::ClusterClient;
use crate::services::{probes, ConvergenceWaiter};

/// Objects to delete when a scenario ends, whatever the outcome.
#[derive(Debug, Default)]
pub struct CleanupRegistry {
    tracked: Mutex<Vec<ObjectRef>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, target: ObjectRef) {
        tracing::debug!(%target, "Tracking for cleanup");
        let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        if !tracked.contains(&target) {
            tracked.push(target);
        }
    }

    /// Stop tracking an object the scenario deleted itself.
    pub fn forget(&self, target: &ObjectRef) -> bool {
        let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        let before = tracked.len();
        tracked.retain(|t| t != target);
        tracked.len() != before
    }

    pub fn tracked(&self) -> Vec<ObjectRef> {
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Delete tracked objects newest first with foreground propagation,
    /// then wait for each to disappear.
    pub async fn release(&self, client: &dyn ClusterClient, waiter: &ConvergenceWaiter) -> Vec<String> {
        let targets: Vec<ObjectRef> = {
            let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
            tracked.drain(..).rev().collect()
        };

        let mut failures = Vec::new();
        let mut deleting = Vec::with_capacity(targets.len());
        for target in targets {
            tracing::info!(%target, "[cleanup] deleting");
            match client.delete_object(&target, PropagationPolicy::Foreground).await {
                Ok(()) | Err(ClientError::NotFound { .. }) => deleting.push(target),
                Err(e) => {
                    tracing::warn!(%target, error = %e, "[cleanup] delete failed");
                    failures.push(format!("{target}: {e}"));
                }
            }
        }

        for target in deleting {
            let target_ref = &target;
            if let Err(e) = waiter
                .eventually(|| probes::object_deleted(client, target_ref))
                .await
            {
                tracing::warn!(%target, error = %e, "[cleanup] object still present");
                failures.push(format!("{target}: {e}"));
            }
        }
        failures
    }
}
