pub mod action;
pub mod duration;
pub mod experiment;
pub mod history;
pub mod window;

pub use action::{Action, Direction, MemorySize, Protocol};
pub use duration::ChaosDuration;
pub use experiment::{
    BackoffKind, ChaosExperiment, ChaosExperimentSpec, ChaosExperimentStatus, Phase, RetryPolicySpec,
};
pub use history::{
    AffectedResource, Audit, ChaosExperimentHistory, ChaosExperimentHistorySpec, Execution,
    ExecutionError, ExecutionStatus, ExperimentRef, FailureReason,
};
pub use window::{TimeWindow, Weekday};
