use thiserror::Error;

use crate::types::FailureReason;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Finalizer error: {0}")]
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("Kubernetes API error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Experiment {0} is missing required field: {1}")]
    MissingField(String, String),

    #[error("Exec into pod failed: {0}")]
    ExecError(String),

    #[error("Cron expression invalid: {0}")]
    CronError(String),

    /// A batch of target executions failed; `reason` is the worst-priority
    /// kind across the batch (`actions::reason_priority`), carried verbatim rather than
    /// re-derived from the message so the retry policy sees the same classification the
    /// action handler already computed.
    #[error("{message}")]
    ActionFailure { reason: FailureReason, message: String },
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Error::KubeError(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e)
    }
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(e: kube::runtime::finalizer::Error<Error>) -> Self {
        Error::FinalizerError(Box::new(e))
    }
}

impl Error {
    /// Classify a transport-level error into the taxonomy of .
    ///
    /// This is deliberately independent of the `Error` enum used for `?`-propagation:
    /// the classifier only cares about what actually came back over the wire.
    pub fn classify(&self) -> FailureReason {
        match self {
            Error::KubeError(kube::Error::Api(resp)) => match resp.code {
                401 | 403 => FailureReason::PermissionDenied,
                400 | 422 => FailureReason::ValidationError,
                404 => FailureReason::ResourceNotFound,
                _ => FailureReason::ExecutionError,
            },
            Error::KubeError(e) if is_transport_timeout(e) => FailureReason::Timeout,
            Error::ValidationError(_) | Error::MissingField(..) => FailureReason::ValidationError,
            Error::CronError(_) => FailureReason::ValidationError,
            Error::ActionFailure { reason, .. } => *reason,
            _ => FailureReason::Unknown,
        }
    }

    /// Extract `(resource, verb, namespace, subresource)` for actionable permission-denied
    /// messages. Best-effort: kube's `ErrorResponse` doesn't always carry a
    /// structured verb, so we parse it out of the message when present.
    pub fn permission_detail(&self) -> Option<PermissionDetail> {
        if let Error::KubeError(kube::Error::Api(resp)) = self {
            if resp.code == 401 || resp.code == 403 {
                return Some(PermissionDetail::from_message(&resp.message));
            }
        }
        None
    }
}

#[derive(Debug, Clone)]
pub struct PermissionDetail {
    pub resource: String,
    pub verb: String,
    pub namespace: Option<String>,
    pub subresource: Option<String>,
}

impl PermissionDetail {
    /// Kube API server forbidden messages look like:
    /// `pods "foo" is forbidden: User "x" cannot delete resource "pods" in API group "" in the namespace "demo"`
    fn from_message(message: &str) -> Self {
        let verb = ["get", "list", "watch", "create", "update", "patch", "delete", "deletecollection"]
            .into_iter()
            .find(|v| message.contains(&format!("cannot {v}")))
            .unwrap_or("unknown")
            .to_string();

        let resource = extract_between(message, "resource \"", "\"").unwrap_or_else(|| "unknown".to_string());
        let namespace = extract_between(message, "in the namespace \"", "\"");
        let subresource = extract_between(message, "subresource \"", "\"");

        PermissionDetail {
            resource,
            verb,
            namespace,
            subresource,
        }
    }

    /// User-facing remediation text: missing resource/verb/subresource, target
    /// namespace, a reproduction command, and a remediation hint.
    pub fn remediation_message(&self) -> String {
        let sub = self
            .subresource
            .as_ref()
            .map(|s| format!("/{s}"))
            .unwrap_or_default();
        let ns = self.namespace.as_deref().unwrap_or("<cluster-scoped>");
        format!(
            "permission denied: missing RBAC grant for {verb} on {resource}{sub} in namespace {ns}. \
             Reproduce with: kubectl auth can-i {verb} {resource}{sub} -n {ns}. \
             Remediation: add a Role/ClusterRole granting '{verb}' on '{resource}{sub}' and bind it \
             to the controller's ServiceAccount.",
            verb = self.verb,
            resource = self.resource,
        )
    }
}

/// `kube::Error` doesn't expose a single stable "was this a timeout" variant across
/// versions; we key off the string rendering of transport-layer variants rather than
/// matching against names that drift between `kube` releases.
fn is_transport_timeout(e: &kube::Error) -> bool {
    !matches!(e, kube::Error::Api(_)) && e.to_string().to_lowercase().contains("timed out")
}

fn extract_between(haystack: &str, start: &str, end: &str) -> Option<String> {
    let after_start = haystack.split_once(start)?.1;
    let (value, _) = after_start.split_once(end)?;
    Some(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_permission_detail_from_forbidden_message() {
        let msg = r#"pods "foo" is forbidden: User "system:serviceaccount:chaos-system:chaos-operator" cannot delete resource "pods" in API group "" in the namespace "demo""#;
        let detail = PermissionDetail::from_message(msg);
        assert_eq!(detail.verb, "delete");
        assert_eq!(detail.resource, "pods");
        assert_eq!(detail.namespace.as_deref(), Some("demo"));
    }

    #[test]
    fn remediation_message_contains_reproduction_command() {
        let detail = PermissionDetail {
            resource: "pods".into(),
            verb: "delete".into(),
            namespace: Some("demo".into()),
            subresource: None,
        };
        let msg = detail.remediation_message();
        assert!(msg.contains("kubectl auth can-i delete pods -n demo"));
    }
}
