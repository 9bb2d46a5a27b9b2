//! Common types for converge: errors, configuration, conditions and observability

#![deny(missing_docs)]

pub mod annotations;
pub mod condition;
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

pub use annotations::{Annotations, FieldOwner};
pub use condition::{Condition, ConditionStatus};
pub use config::EngineConfig;
pub use error::{Error, RemoteError};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
