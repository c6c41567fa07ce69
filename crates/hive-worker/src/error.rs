// Error types of the worker: parameter resolution, hook outcomes and the
// worker loop itself.

use hive_common::ChannelError;
use thiserror::Error;

/// Failure while reading or resolving a parameter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    /// The parameter name is empty or otherwise unusable.
    #[error("invalid parameter name {0:?}")]
    Name(String),

    /// The parameter is in neither the raw table nor the cache.
    #[error("parameter '{0}' not found")]
    NotFound(String),

    /// A token or expression is malformed, or names an unknown function.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// A token was reached again while it was still being resolved.
    #[error("substitution loop has been detected on {token}. Parameter-substitution stack: {}", .stack.join(" -> "))]
    Cycle { token: String, stack: Vec<String> },

    /// A value cannot take part in substitution at this position.
    #[error("cannot substitute: {0}")]
    SubstitutionType(String),

    /// A required parameter resolved to null.
    #[error("{0} is None")]
    NullParameter(String),

    /// An expression parsed but failed while being evaluated.
    #[error("evaluation error: {0}")]
    Evaluation(String),
}

impl ParamError {
    pub fn syntax(message: impl Into<String>) -> Self {
        ParamError::Syntax(message.into())
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        ParamError::Evaluation(message.into())
    }
}

/// How a lifecycle hook ended, other than by returning `Ok`.
#[derive(Debug, Error)]
pub enum JobError {
    /// The hook asked to end the job early. This is a success.
    #[error("{}", .0.as_deref().unwrap_or("job completed early"))]
    CompleteEarly(Option<String>),

    /// The connection to the parent broke while the hook was talking to it.
    #[error(transparent)]
    LostConnection(ChannelError),

    /// Any other failure.
    #[error(transparent)]
    Failed(anyhow::Error),
}

impl JobError {
    pub fn complete_early(message: impl Into<String>) -> Self {
        JobError::CompleteEarly(Some(message.into()))
    }

    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed(anyhow::anyhow!(message.into()))
    }
}

impl From<ChannelError> for JobError {
    fn from(err: ChannelError) -> Self {
        if err.is_lost_connection() {
            JobError::LostConnection(err)
        } else {
            JobError::Failed(err.into())
        }
    }
}

impl From<ParamError> for JobError {
    fn from(err: ParamError) -> Self {
        JobError::Failed(err.into())
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        JobError::Failed(err)
    }
}

impl From<std::io::Error> for JobError {
    fn from(err: std::io::Error) -> Self {
        JobError::Failed(err.into())
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        JobError::Failed(err.into())
    }
}

/// Failure that ends the worker loop.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The parent sent something that is not a job configuration.
    #[error("invalid job configuration: {0}")]
    InvalidConfig(#[source] serde_json::Error),
}

impl WorkerError {
    pub fn is_lost_connection(&self) -> bool {
        matches!(self, WorkerError::Channel(e) if e.is_lost_connection())
    }
}

/// A runnable name the registry does not know.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown runnable '{name}'. Known runnables: {}", .candidates.join(", "))]
pub struct UnknownRunnable {
    pub name: String,
    /// Registered names, closest to `name` first.
    pub candidates: Vec<String>,
}
