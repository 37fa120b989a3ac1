//! The reconciler dispatcher: one idempotent reconcile per
//! `(experiment, event)` pair. Fetches the experiment, runs the lifecycle/schedule/
//! time-window gates, runs the safety gate, dispatches to the matching action handler,
//! then folds the outcome back into status, metrics, events, and a history record.
//!
//! Everything this module needs is threaded through `Dependencies` (`context.rs`)
//! instead of reached for through globals.

pub mod context;
pub mod lifecycle;
pub mod retry;
pub mod schedule;
pub mod window;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{ListParams, Patch, PatchParams};
use kube::runtime::controller::Action as ReconcileAction;
use kube::runtime::finalizer::{self, Event as FinalizerEvent};
use kube::{Api, ResourceExt};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::actions::{self, ephemeral, node_drain};
use crate::history::{self, ExecutionRecord};
use crate::reconciler::context::Dependencies;
use crate::safety;
use crate::types::{
    Audit, ChaosExperiment, ChaosExperimentStatus, Execution, ExecutionError, ExecutionStatus, FailureReason, Phase,
};

pub const FINALIZER: &str = "chaos.gushchin.dev/finalizer";

/// Default steady-state re-check after any successful handler return.
const STEADY_STATE_REQUEUE: Duration = Duration::from_secs(60);
/// Requeue used when a time window has no further boundary inside the search horizon.
const NO_BOUNDARY_REQUEUE: Duration = Duration::from_secs(24 * 3600);
/// Requeue after a reconcile-level error (e.g. a status-patch conflict); a conflict on
/// the status subresource propagates as an error here and the platform re-schedules
/// rather than this reconcile retrying inline.
const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Entry point wired into `Controller::run` (see `operator.rs`). Wraps `apply`/`on_delete`
/// in the platform finalizer so that deletion is observed exactly once as a `Cleanup`
/// event before the resource is gone.
#[instrument(skip(experiment, deps), fields(experiment.name = %experiment.name_any(), experiment.namespace = tracing::field::Empty, trace_id = %crate::telemetry::get_trace_id()))]
pub async fn reconcile(experiment: Arc<ChaosExperiment>, deps: Arc<Dependencies>) -> Result<ReconcileAction, crate::Error> {
    let namespace = experiment.namespace().unwrap_or_default();
    tracing::Span::current().record("experiment.namespace", namespace.as_str());
    let api: Api<ChaosExperiment> = deps.experiments(&namespace);

    finalizer::finalizer(&api, FINALIZER, experiment, |event| async {
        match event {
            FinalizerEvent::Apply(experiment) => apply(experiment, deps.clone()).await,
            FinalizerEvent::Cleanup(experiment) => on_delete(experiment, deps.clone()).await,
        }
    })
    .await
    .map_err(crate::Error::from)
}

pub fn error_policy(experiment: Arc<ChaosExperiment>, error: &crate::Error, deps: Arc<Dependencies>) -> ReconcileAction {
    warn!(experiment = %experiment.name_any(), error = %error, "reconcile failed");
    deps.metrics.record_error(experiment.spec.action.kind_name(), &experiment.spec.target_namespace, error.classify().as_label());
    ReconcileAction::requeue(ERROR_REQUEUE)
}

/// Deletion is final: history already self-describes the experiment and is never
/// cascade-deleted with it, and ephemeral containers can't be removed from a terminated
/// pod's spec anyway, so there is nothing left to reconcile. Best-effort: release any
/// nodes this experiment still held cordoned.
async fn on_delete(experiment: Arc<ChaosExperiment>, deps: Arc<Dependencies>) -> Result<ReconcileAction, crate::Error> {
    if let Some(status) = &experiment.status {
        for node in &status.cordoned_nodes {
            if let Err(e) = node_drain::uncordon(&deps, node).await {
                warn!(node, error = %e, "failed to uncordon node on experiment deletion");
            }
        }
    }
    Ok(ReconcileAction::await_change())
}

async fn patch_status(api: &Api<ChaosExperiment>, name: &str, status: &ChaosExperimentStatus) -> Result<(), crate::Error> {
    let patch = Patch::Merge(json!({ "status": status }));
    api.patch_status(name, &PatchParams::default(), &patch).await.map_err(crate::Error::KubeError)?;
    Ok(())
}

/// The gate pipeline: pause, lifecycle, schedule, time-window, safety, then action
/// dispatch. `experiment` here has already passed admission (the only path allowed to
/// reject a resource) so this trusts the resource structurally but still re-checks the
/// dynamic invariants that can go stale between admission and reconcile (namespace
/// existence, production guard, live percentage cap).
async fn apply(experiment: Arc<ChaosExperiment>, deps: Arc<Dependencies>) -> Result<ReconcileAction, crate::Error> {
    let name = experiment.name_any();
    let namespace = experiment.namespace().unwrap_or_default();
    let api: Api<ChaosExperiment> = deps.experiments(&namespace);
    let now = Utc::now();

    let mut status = experiment.status.clone().unwrap_or_default();
    let old_phase = status.phase;
    let action_kind = experiment.spec.action.kind_name();

    // Step 3: paused halts execution without clearing state.
    if experiment.spec.paused {
        status.phase = Phase::Paused;
        status.message = Some("paused".to_string());
        deps.metrics.sync_active(action_kind, old_phase, status.phase);
        patch_status(&api, &name, &status).await?;
        return Ok(ReconcileAction::await_change());
    }

    // Step 4: lifecycle gate.
    if status.phase == Phase::Completed {
        return Ok(ReconcileAction::await_change());
    }
    if lifecycle::is_expired(experiment.spec.experiment_duration, status.start_time, now) {
        complete_experiment(&deps, &experiment, &mut status, now).await?;
        deps.metrics.sync_active(action_kind, old_phase, status.phase);
        patch_status(&api, &name, &status).await?;
        return Ok(ReconcileAction::await_change());
    }

    // Step 5: schedule gate.
    let reference_time = status
        .last_scheduled_time
        .or(status.start_time)
        .or_else(|| experiment.meta().creation_timestamp.as_ref().map(|t| t.0))
        .unwrap_or(now);
    let schedule_decision = schedule::check_schedule(experiment.spec.schedule.as_deref(), reference_time, now)
        .map_err(|e| crate::Error::CronError(e.0))?;
    if !schedule_decision.should_run {
        return Ok(ReconcileAction::requeue(schedule_decision.requeue_after));
    }
    if experiment.spec.schedule.is_some() {
        status.last_scheduled_time = Some(now);
        status.next_scheduled_time = schedule_decision.next_scheduled_time;
    }

    // Step 6: time-window gate.
    let window_decision = window::check_time_windows(&experiment.spec.time_windows, now);
    if !window_decision.in_window {
        status.set_condition(
            ChaosExperimentStatus::CONDITION_BLOCKED_BY_TIME_WINDOW,
            true,
            "OutsideWindow",
            window::boundary_message(&window_decision),
            now,
        );
        patch_status(&api, &name, &status).await?;
        let requeue_after = window_decision
            .next_boundary
            .map(|b| (b - now).to_std().unwrap_or(NO_BOUNDARY_REQUEUE))
            .unwrap_or(NO_BOUNDARY_REQUEUE);
        return Ok(ReconcileAction::requeue(requeue_after));
    }
    status.clear_condition(ChaosExperimentStatus::CONDITION_BLOCKED_BY_TIME_WINDOW);

    // First reconcile past every gate: stamp startTime, transition to Running.
    if status.start_time.is_none() {
        status.start_time = Some(now);
        status.phase = Phase::Running;
        deps.events_for(experiment.as_ref()).await.started(&name).await;
    }

    // Step 7: dispatch, guarded by the safety gate.
    let outcome = run_action(&deps, &experiment, &mut status, now).await;

    match outcome {
        Ok(requeue) => {
            deps.metrics.sync_active(action_kind, old_phase, status.phase);
            patch_status(&api, &name, &status).await?;
            Ok(ReconcileAction::requeue(requeue))
        }
        Err(e) => {
            let reason = e.classify();
            let message = failure_message(&e, reason);
            handle_experiment_failure(&deps, &experiment, &mut status, reason, message, e.to_string(), now).await;
            deps.metrics.sync_active(action_kind, old_phase, status.phase);
            patch_status(&api, &name, &status).await?;
            match status.phase {
                Phase::Failed => Ok(ReconcileAction::await_change()),
                _ => Ok(ReconcileAction::requeue(status_retry_delay(&status, now))),
            }
        }
    }
}

fn status_retry_delay(status: &ChaosExperimentStatus, now: DateTime<Utc>) -> Duration {
    status
        .next_retry_time
        .map(|t| (t - now).to_std().unwrap_or(Duration::from_secs(1)))
        .unwrap_or(STEADY_STATE_REQUEUE)
}

/// User-facing message for a permission error includes the reproduction command and
/// remediation hint; other kinds surface the transport error unchanged.
fn failure_message(error: &crate::Error, reason: FailureReason) -> String {
    if reason == FailureReason::PermissionDenied {
        if let Some(detail) = error.permission_detail() {
            return detail.remediation_message();
        }
    }
    error.to_string()
}

/// Safety gate + dispatch + dry-run short-circuit. Returns the
/// requeue-after for a successful (including partial) execution, or an error for the
/// caller to route through `handle_experiment_failure`.
async fn run_action(
    deps: &Arc<Dependencies>,
    experiment: &ChaosExperiment,
    status: &mut ChaosExperimentStatus,
    now: DateTime<Utc>,
) -> Result<Duration, crate::Error> {
    let spec = &experiment.spec;
    let action_kind = spec.action.kind_name();
    let target_namespace = &spec.target_namespace;

    let namespaces = deps.namespaces();
    let Some(ns_obj) = namespaces.get_opt(target_namespace).await.map_err(crate::Error::KubeError)? else {
        return Err(crate::Error::ValidationError(format!("target namespace '{target_namespace}' does not exist")));
    };

    let (mut eligible_pods, mut eligible_nodes): (Vec<Pod>, Vec<Node>) = (Vec::new(), Vec::new());
    let mut excluded_label = 0usize;
    let mut excluded_terminating = 0usize;

    if safety::namespace_excluded(&ns_obj) {
        deps.metrics.record_excluded(action_kind, target_namespace, "namespace");
    } else {
        if !safety::production_guard_allows(&ns_obj, &deps.config, spec) {
            return Err(crate::Error::ValidationError(format!(
                "target namespace '{target_namespace}' is production; set allowProduction=true to proceed"
            )));
        }

        let selector = safety::label_selector(&spec.selector);
        if spec.action.targets_nodes() {
            let nodes = deps.nodes();
            let lp = ListParams::default().labels(&selector);
            let list = nodes.list(&lp).await.map_err(crate::Error::KubeError)?;
            let (survivors, counts) = safety::filter_eligible(list.items);
            excluded_label = counts.excluded_label;
            excluded_terminating = counts.excluded_terminating;
            let seed = safety::shuffle_seed(&experiment.uid().unwrap_or_default(), experiment.meta().generation.unwrap_or(0));
            eligible_nodes = safety::select_targets(survivors, spec.count, spec.max_percentage, seed)
                .map_err(|e| crate::Error::ValidationError(e.to_string()))?;
        } else {
            let pods = deps.pods(target_namespace);
            let lp = ListParams::default().labels(&selector);
            let list = pods.list(&lp).await.map_err(crate::Error::KubeError)?;
            let (survivors, counts) = safety::filter_eligible(list.items);
            excluded_label = counts.excluded_label;
            excluded_terminating = counts.excluded_terminating;
            let seed = safety::shuffle_seed(&experiment.uid().unwrap_or_default(), experiment.meta().generation.unwrap_or(0));
            eligible_pods = safety::select_targets(survivors, spec.count, spec.max_percentage, seed)
                .map_err(|e| crate::Error::ValidationError(e.to_string()))?;
        }
    }

    if excluded_label > 0 {
        deps.metrics.record_excluded(action_kind, target_namespace, "pod");
    }
    if excluded_terminating > 0 {
        deps.metrics.record_excluded(action_kind, target_namespace, "terminating");
    }

    let selected_names: Vec<String> = if spec.action.targets_nodes() {
        eligible_nodes.iter().map(|n| n.name_any()).collect()
    } else {
        eligible_pods.iter().map(|p| p.name_any()).collect()
    };

    // Dry-run: render the preview, write one history record, never mutate.
    // Leaves `phase` as whatever the lifecycle gate already set (Running) rather than
    // stamping Completed — a scheduled or continuous dry-run re-previews on every fire,
    // it doesn't finish after one.
    if spec.dry_run {
        let message = safety::render_dry_run_message(spec.action.dry_run_verb(), &selected_names);
        status.message = Some(message.clone());
        status.affected_pods = selected_names.clone();
        deps.metrics.safety_dryrun_total.with_label_values(&[action_kind, target_namespace]).inc();

        let record = ExecutionRecord {
            execution: Execution {
                start_time: now,
                end_time: now,
                duration_seconds: 0.0,
                status: ExecutionStatus::Success,
                message,
                phase: status.phase,
            },
            affected_resources: Vec::new(),
            audit: Audit {
                initiated_by: "reconciler".to_string(),
                scheduled_execution: spec.schedule.is_some(),
                dry_run: true,
                retry_count: status.retry_count,
                creation_timestamp: now,
            },
            error: None,
        };
        history::record_execution(deps, experiment, record).await?;
        return Ok(STEADY_STATE_REQUEUE);
    }

    let start = now;
    let outcome = actions::dispatch(deps, target_namespace, &spec.action, eligible_pods, eligible_nodes).await?;
    let end = Utc::now();
    let duration_secs = (end - start).num_milliseconds().max(0) as f64 / 1000.0;

    status.affected_pods = outcome.affected_names.clone();
    status.ephemeral_refs.extend(outcome.ephemeral_refs.iter().cloned());
    status.cordoned_nodes.extend(outcome.cordoned_nodes.iter().cloned());
    status.last_run_time = Some(end);
    deps.metrics.resources_affected.with_label_values(&[action_kind, target_namespace, &experiment.name_any()]).set(status.affected_pods.len() as f64);
    deps.metrics.record_execution(action_kind, target_namespace, outcome.status.as_label(), duration_secs);

    let error_record = match outcome.status {
        ExecutionStatus::Failure => {
            let reason = outcome.failure_reason.unwrap_or(FailureReason::Unknown);
            deps.metrics.record_error(action_kind, target_namespace, reason.as_label());
            return Err(classify_batch_failure(reason, outcome.message));
        }
        ExecutionStatus::Partial => {
            let reason = outcome.failure_reason.unwrap_or(FailureReason::Unknown);
            deps.metrics.record_error(action_kind, target_namespace, reason.as_label());
            Some(ExecutionError { message: outcome.message.clone(), last_error: outcome.message.clone(), failure_reason: reason })
        }
        ExecutionStatus::Success => None,
    };

    // Partial success is recorded but not retried; any success clears retry state.
    status.retry_count = 0;
    status.last_error = None;
    status.next_retry_time = None;
    status.message = Some(outcome.message.clone());
    deps.events_for(experiment).await.succeeded(&experiment.name_any(), &outcome.message).await;

    let record = ExecutionRecord {
        execution: Execution { start_time: start, end_time: end, duration_seconds: duration_secs, status: outcome.status, message: outcome.message, phase: status.phase },
        affected_resources: outcome.affected,
        audit: Audit {
            initiated_by: "reconciler".to_string(),
            scheduled_execution: spec.schedule.is_some(),
            dry_run: false,
            retry_count: status.retry_count,
            creation_timestamp: now,
        },
        error: error_record,
    };
    history::record_execution(deps, experiment, record).await?;

    Ok(STEADY_STATE_REQUEUE)
}

/// Wrap a classified batch failure so `apply`'s single `Err` path can route it through
/// `handle_experiment_failure` uniformly, carrying the reason `actions::dispatch` already
/// computed instead of making the caller re-derive it from the message.
fn classify_batch_failure(reason: FailureReason, message: String) -> crate::Error {
    crate::Error::ActionFailure { reason, message }
}

/// `handleExperimentFailure`: classify, decide retry vs terminal failure,
/// and fold the decision into status + events. `ValidationError` is terminal
/// immediately — it is not retried because the underlying invariant (e.g. the live
/// percentage cap) won't self-heal by waiting.
async fn handle_experiment_failure(
    deps: &Arc<Dependencies>,
    experiment: &ChaosExperiment,
    status: &mut ChaosExperimentStatus,
    reason: FailureReason,
    message: String,
    raw_error: String,
    now: DateTime<Utc>,
) {
    let name = experiment.name_any();
    status.last_error = Some(raw_error);
    deps.metrics.record_error(experiment.spec.action.kind_name(), &experiment.spec.target_namespace, reason.as_label());

    if reason == FailureReason::ValidationError {
        status.phase = Phase::Failed;
        status.message = Some(message.clone());
        status.next_retry_time = None;
        info!(experiment = %name, "validation error is terminal; no retry");
        deps.events_for(experiment).await.failed(&name, &message).await;
        return;
    }

    let retry_cfg = &experiment.spec.retry;
    let decision = retry::decide_retry(reason, status.retry_count, retry_cfg.max_retries, retry_cfg.backoff, retry_cfg.retry_delay.as_std());
    match decision {
        retry::RetryDecision::Retry { delay, next_retry_count } => {
            status.phase = Phase::Pending;
            status.retry_count = next_retry_count;
            status.next_retry_time = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
            status.message = Some(message.clone());
            deps.events_for(experiment).await.retrying(&name, next_retry_count, delay).await;
        }
        retry::RetryDecision::Exhausted => {
            status.phase = Phase::Failed;
            status.next_retry_time = None;
            status.message = Some(message.clone());
            deps.events_for(experiment).await.failed(&name, &message).await;
        }
    }
}

/// Experiment-duration completion: uncordon nodes this experiment cordoned
/// (never pre-existing cordons), sweep ephemeral-container refs, clear tracking lists,
/// stamp `completedAt`.
async fn complete_experiment(deps: &Arc<Dependencies>, experiment: &ChaosExperiment, status: &mut ChaosExperimentStatus, now: DateTime<Utc>) -> Result<(), crate::Error> {
    for node in &status.cordoned_nodes {
        if let Err(e) = node_drain::uncordon(deps, node).await {
            warn!(node, error = %e, "failed to uncordon node on experiment completion");
        }
    }
    status.cordoned_nodes.clear();

    if experiment.spec.action.uses_ephemeral_container() && !status.ephemeral_refs.is_empty() {
        // Enumerate for logging (exit code of each terminated container), then clear the
        // whole list regardless of whether a container is still running — a running
        // ephemeral container self-terminates via its own sleep/cleanup script and
        // simply stops being tracked once enumeration is done.
        let _still_running = ephemeral::sweep(deps, &status.ephemeral_refs).await;
        status.ephemeral_refs.clear();
    }

    status.message = Some(lifecycle::completion_message(status.start_time, now));
    status.completed_at = Some(now);
    status.phase = Phase::Completed;
    status.affected_pods.clear();
    deps.events_for(experiment).await.succeeded(&experiment.name_any(), "experiment duration elapsed").await;
    Ok(())
}
