pub mod actions;
pub mod admission;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod metrics;
pub mod operator;
pub mod reconciler;
pub mod safety;
pub mod telemetry;
pub mod types;

pub use error::Error;
