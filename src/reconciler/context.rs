//! `Dependencies`: everything a reconcile needs, threaded explicitly instead of reached
//! for through global statics. Tests build their own `Dependencies` with a fresh
//! `Metrics` registry and a throwaway `Client`-less code path for the pure kernels;
//! only the handlers need a live `Client`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use kube::runtime::events::Reporter;
use kube::{Api, Client};
use tokio::sync::RwLock;

use crate::config::Config;
use crate::events::EventEmitter;
use crate::metrics::Metrics;
use crate::types::{ChaosExperiment, ChaosExperimentHistory};

pub struct Dependencies {
    pub client: Client,
    pub config: Config,
    pub metrics: Metrics,
    pub diagnostics: Arc<RwLock<Diagnostics>>,
}

impl Dependencies {
    pub fn new(client: Client, config: Config, metrics: Metrics) -> Self {
        Self {
            client,
            config,
            metrics,
            diagnostics: Arc::new(RwLock::new(Diagnostics::new())),
        }
    }

    pub fn event_emitter_for<K>(&self, reporter: Reporter, reference: &K) -> EventEmitter
    where
        K: kube::Resource<DynamicType = ()>,
    {
        let recorder = kube::runtime::events::Recorder::new(self.client.clone(), reporter, reference.object_ref(&()));
        EventEmitter::new(recorder)
    }

    /// Convenience over `event_emitter_for` for action handlers emitting per-target
    /// events (`Warning Chaos<Verb>`) against the controller's own reporter.
    pub async fn events_for<K>(&self, reference: &K) -> EventEmitter
    where
        K: kube::Resource<DynamicType = ()>,
    {
        let reporter = self.diagnostics.read().await.reporter.clone();
        self.event_emitter_for(reporter, reference)
    }

    pub fn experiments(&self, namespace: &str) -> Api<ChaosExperiment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn experiments_all(&self) -> Api<ChaosExperiment> {
        Api::all(self.client.clone())
    }

    pub fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Cluster-wide pod listing, used by `node-drain` to find a node's pods regardless
    /// of which namespace they live in.
    pub fn pods_all(&self) -> Api<Pod> {
        Api::all(self.client.clone())
    }

    pub fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    pub fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    /// History records live in `config.history_namespace`, a configurable dedicated
    /// namespace, not the experiment's own namespace.
    pub fn history(&self) -> Api<ChaosExperimentHistory> {
        Api::namespaced(self.client.clone(), &self.config.history_namespace)
    }
}

/// Surfaced on the `/` diagnostics endpoint.
#[derive(Clone, serde::Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
    pub is_leader: bool,
    pub has_completed_initial_list: bool,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "chaos-operator".into(),
            is_leader: false,
            has_completed_initial_list: false,
        }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}
