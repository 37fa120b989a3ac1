//! Process bootstrap: builds `Dependencies`, confirms the CRD is installed, starts the
//! hourly history TTL sweep, and drives leader election around the `Controller` run loop.
//! Leader election is a renew/acquire poll loop that spawns the controller task on
//! acquisition and aborts it on loss, rather than trying to cancel mid-reconcile.

use std::sync::Arc;
use std::time::Duration;

use futures::{future::BoxFuture, FutureExt, StreamExt};
use kube::api::ListParams;
use kube::runtime::Controller;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use prometheus::proto::MetricFamily;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::history::cleanup::spawn_ttl_sweeper;
use crate::metrics::Metrics;
use crate::reconciler::context::{Dependencies, Diagnostics};
use crate::reconciler::{error_policy, reconcile};

/// How long a lease is considered valid without renewal.
const LEASE_TTL: Duration = Duration::from_secs(15);
/// How often to attempt renewal; comfortably inside `LEASE_TTL`.
const RENEW_EVERY: Duration = Duration::from_secs(5);

/// Data owned by the operator; the web server reads `diagnostics()`/`metrics()` off this.
#[derive(Clone)]
pub struct Operator {
    deps: Arc<Dependencies>,
}

impl Operator {
    /// Returns an `Operator` for the web server plus a future that runs leader election
    /// and the reconcile loop until cancelled. It's up to `main` to await the returned
    /// future alongside the web server.
    pub async fn new(config: Config) -> (Self, BoxFuture<'static, ()>) {
        let client = Client::try_default().await.expect("create client");
        let metrics = Metrics::new();
        let deps = Arc::new(Dependencies::new(client, config, metrics));

        // Ensure the CRD is installed before loop-watching.
        let _r = deps
            .experiments_all()
            .list(&ListParams::default().limit(1))
            .await
            .expect("Is the crd installed? please run: cargo run --bin crdgen | kubectl apply -f -");

        spawn_ttl_sweeper(deps.clone());

        let driver = run_leader_elected(deps.clone()).boxed();
        (Self { deps }, driver)
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.deps.diagnostics.read().await.clone()
    }

    pub async fn is_ready(&self) -> bool {
        let d = self.deps.diagnostics.read().await;
        d.is_leader && d.has_completed_initial_list
    }

    pub fn metrics(&self) -> Vec<MetricFamily> {
        self.deps.metrics.registry.gather()
    }

    pub fn dependencies(&self) -> Arc<Dependencies> {
        self.deps.clone()
    }
}

/// Identity used for the lease holder field: `POD_NAME` (set via the Downward API in the
/// deployment manifest), falling back to `HOSTNAME`, falling back to a generated name so
/// the binary still runs standalone outside a Pod.
fn holder_id() -> String {
    std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("chaos-operator-{}", uuid::Uuid::new_v4()))
}

/// Runs indefinitely: only the leader runs the `Controller`. On leadership loss the
/// controller task is aborted; on shutdown signal everything is torn down cleanly.
async fn run_leader_elected(deps: Arc<Dependencies>) {
    let leadership = LeaseLock::new(
        deps.client.clone(),
        &deps.config.lease_namespace,
        LeaseLockParams {
            holder_id: holder_id(),
            lease_name: deps.config.lease_name.clone(),
            lease_ttl: LEASE_TTL,
        },
    );

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_signal.cancel();
    });

    let mut controller_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(RENEW_EVERY);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = controller_task.take() {
                    task.abort();
                    let _ = task.await;
                }
                break;
            }
            _ = tick.tick() => {}
        }

        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "leader election renew/acquire failed");
                if let Some(task) = controller_task.take() {
                    task.abort();
                    deps.diagnostics.write().await.is_leader = false;
                }
                continue;
            }
        };

        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if controller_task.is_none() {
                info!("acquired leadership; starting controller");
                deps.diagnostics.write().await.is_leader = true;
                controller_task = Some(tokio::spawn(run_controller(deps.clone())));
            }
        } else if let Some(task) = controller_task.take() {
            warn!("lost leadership; stopping controller");
            task.abort();
            deps.diagnostics.write().await.is_leader = false;
        }
    }
}

async fn run_controller(deps: Arc<Dependencies>) {
    let experiments = deps.experiments_all();
    Controller::new(experiments, ListParams::default())
        .run(reconcile, error_policy, deps.clone())
        .filter_map(|res| {
            let deps = deps.clone();
            async move {
                match res {
                    Ok(_) => {
                        deps.diagnostics.write().await.has_completed_initial_list = true;
                        None::<()>
                    }
                    Err(e) => {
                        warn!(error = %e, "reconcile stream error");
                        None
                    }
                }
            }
        })
        .for_each(|_| futures::future::ready(()))
        .await;
}
