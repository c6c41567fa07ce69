// hive-worker: the eHive guest worker runtime.
//
// A worker process is started by the parent with two stream descriptors. It
// hosts one runnable and runs it over a sequence of jobs, resolving each
// job's parameters lazily through the substitution engine.

pub mod error;
pub mod expressions;
pub mod functions;
pub mod job;
pub mod lifecycle;
pub mod params;
pub mod registry;
pub mod runnable;
pub mod runnables;
pub mod testing;
pub mod worker;

pub use error::{JobError, ParamError, UnknownRunnable, WorkerError};
pub use functions::FunctionRegistry;
pub use job::{Job, JobContext, ParentLink};
pub use lifecycle::{JobLifecycle, JobOutcome};
pub use params::{ParamStore, ParamValue};
pub use registry::RunnableRegistry;
pub use runnable::{Hook, HookResult, HookSet, Runnable};
pub use testing::{RunnableTester, TestEvent, TestFailure};
pub use worker::{Worker, WorkerState};
