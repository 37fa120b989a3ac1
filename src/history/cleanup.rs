//! Two independent garbage-collection passes over `ChaosExperimentHistory` records
//!: a per-experiment retention limit (count-based, run after every create)
//! and a cluster-wide TTL sweep (age-based, run hourly on its own detached task).
//! Neither blocks a reconcile.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::api::{DeleteParams, ListParams};
use kube::ResourceExt;

use crate::reconciler::context::Dependencies;

/// Default hourly cadence for the TTL sweep.
pub const TTL_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// After a create, list this experiment's records oldest-first and delete until the
/// count is at most `historyRetentionLimit`.
pub async fn cleanup_retention_limit(deps: &Arc<Dependencies>, experiment_name: &str) -> Result<(), crate::Error> {
    let limit = deps.config.history_retention_limit;
    let api = deps.history();
    let lp = ListParams::default().labels(&format!("experiment={experiment_name}"));
    let mut list = api.list(&lp).await.map_err(crate::Error::KubeError)?.items;

    if list.len() <= limit {
        return Ok(());
    }

    list.sort_by_key(|r| r.creation_timestamp().map(|t| t.0).unwrap_or_default());
    let to_delete = list.len() - limit;

    let mut deleted = 0usize;
    for record in list.into_iter().take(to_delete) {
        let name = record.name_any();
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => deleted += 1,
            Err(kube::Error::Api(e)) if e.code == 404 => deleted += 1,
            Err(e) => tracing::warn!(error = %e, record = %name, "failed to delete history record past retention limit"),
        }
    }

    deps.metrics.record_history_cleanup("retention_limit", deleted);
    Ok(())
}

/// Cluster-wide (within the history namespace) age-based sweep. `ttl = None` means TTL
/// cleanup is disabled (`historyTTL=0`).
pub async fn cleanup_ttl(deps: &Arc<Dependencies>) -> Result<(), crate::Error> {
    let Some(ttl) = deps.config.history_ttl() else {
        return Ok(());
    };
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());

    let api = deps.history();
    let list = api.list(&ListParams::default()).await.map_err(crate::Error::KubeError)?;
    let cutoff = Utc::now() - ttl;

    let mut deleted = 0usize;
    for record in list.items {
        let Some(created) = record.creation_timestamp() else { continue };
        if created.0 >= cutoff {
            continue;
        }
        let name = record.name_any();
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => deleted += 1,
            Err(kube::Error::Api(e)) if e.code == 404 => deleted += 1,
            Err(e) => tracing::warn!(error = %e, record = %name, "failed to delete TTL-expired history record"),
        }
    }

    if deleted > 0 {
        deps.metrics.record_history_cleanup("ttl_expired", deleted);
    }
    Ok(())
}

/// Start the hourly TTL sweeper as its own detached background task, independent of the
/// reconcile loop. Runs until the process exits; safe to run concurrently with
/// retention-limit cleanup since both deletes are idempotent (404 ⇒ already gone).
pub fn spawn_ttl_sweeper(deps: Arc<Dependencies>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TTL_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = cleanup_ttl(&deps).await {
                tracing::warn!(error = %e, "TTL sweep failed");
            }
        }
    })
}
