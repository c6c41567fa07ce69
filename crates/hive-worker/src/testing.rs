// RunnableTester: runs a runnable's whole life-cycle in-process, without a
// parent, and checks the events it emits against an expected list.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use hive_common::{BranchNameOrCode, ChannelError, DataflowContent, InputJob};
use hive_sdk::{TraceWriter, TracingTraceWriter};
use serde_json::{Map, Value};
use tempfile::TempDir;
use thiserror::Error;

use crate::functions::FunctionRegistry;
use crate::job::{Job, ParentLink};
use crate::lifecycle::{steps_for, JobLifecycle, JobOutcome};
use crate::params::ParamStore;
use crate::runnable::{Hook, Runnable};

/// An event a runnable emits while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TestEvent {
    Warning { message: String, is_error: bool },
    Dataflow { output_ids: Value, branch: BranchNameOrCode },
    CompleteEarly { message: String },
    /// A hook failed. Only the first line of the failure description (the
    /// error message itself) is compared.
    Failure { message: String },
}

impl TestEvent {
    pub fn warning(message: impl Into<String>) -> Self {
        TestEvent::Warning {
            message: message.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        TestEvent::Warning {
            message: message.into(),
            is_error: true,
        }
    }

    pub fn dataflow(output_ids: impl Into<Value>, branch: impl Into<BranchNameOrCode>) -> Self {
        TestEvent::Dataflow {
            output_ids: output_ids.into(),
            branch: branch.into(),
        }
    }

    pub fn complete_early(message: impl Into<String>) -> Self {
        TestEvent::CompleteEarly {
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        TestEvent::Failure {
            message: message.into(),
        }
    }
}

/// Why a tested run did not match expectations.
#[derive(Debug, Error)]
pub enum TestFailure {
    #[error("got {got:?} but was expecting {expected:?}")]
    UnexpectedEvent { got: TestEvent, expected: TestEvent },

    #[error("no more events are expected but {0:?} was emitted")]
    ExtraEvent(TestEvent),

    #[error("the job has now ended and {} events have not been emitted: {:?}", .0.len(), .0)]
    MissingEvents(Vec<TestEvent>),

    #[error("{name} is {actual} but was expecting {expected}")]
    Flag {
        name: &'static str,
        actual: bool,
        expected: bool,
    },

    #[error("cannot create the temporary directory: {0}")]
    TempDirectory(#[source] std::io::Error),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Parent stand-in that records events and serves a real temp directory.
struct RecordingParent {
    events: Vec<TestEvent>,
    temp_dir: TempDir,
}

#[async_trait]
impl ParentLink for RecordingParent {
    async fn announce_step(&mut self, hook: Hook) -> Result<(), ChannelError> {
        tracing::debug!(hook = %hook, "tester: step");
        Ok(())
    }

    async fn warning(&mut self, message: &str, is_error: bool) -> Result<(), ChannelError> {
        self.events.push(TestEvent::Warning {
            message: message.to_string(),
            is_error,
        });
        Ok(())
    }

    async fn dataflow(&mut self, content: DataflowContent) -> Result<Value, ChannelError> {
        self.events.push(TestEvent::Dataflow {
            output_ids: content.output_ids,
            branch: content.branch_name_or_code,
        });
        Ok(Value::Array(Vec::new()))
    }

    async fn worker_temp_directory(&mut self) -> Result<PathBuf, ChannelError> {
        Ok(self.temp_dir.path().to_path_buf())
    }

    async fn complete_early(&mut self, message: &str) -> Result<(), ChannelError> {
        self.events.push(TestEvent::complete_early(message));
        Ok(())
    }

    async fn hook_failed(&mut self, _hook: Hook, description: &str) -> Result<(), ChannelError> {
        let message = description.lines().next().unwrap_or_default();
        self.events.push(TestEvent::failure(message));
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ExpectedFlags {
    autoflow: Option<bool>,
    lethal_for_worker: Option<bool>,
    transient_error: Option<bool>,
}

/// Runs a runnable without a parent process.
///
/// ```ignore
/// RunnableTester::new(Box::new(TestRunnable::default()))
///     .param("alpha", 1)
///     .run(vec![TestEvent::warning("Fetch the world !"), ...])
///     .await?;
/// ```
pub struct RunnableTester {
    runnable: Box<dyn Runnable>,
    parameters: Map<String, Value>,
    is_retry: bool,
    execute_writes: bool,
    expected_flags: ExpectedFlags,
    functions: Arc<FunctionRegistry>,
    trace: Arc<dyn TraceWriter>,
}

impl RunnableTester {
    pub fn new(runnable: Box<dyn Runnable>) -> Self {
        Self {
            runnable,
            parameters: Map::new(),
            is_retry: false,
            execute_writes: true,
            expected_flags: ExpectedFlags::default(),
            functions: Arc::new(FunctionRegistry::builtin()),
            trace: Arc::new(TracingTraceWriter::new("runnable")),
        }
    }

    /// Input parameter, overriding the runnable's default.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn params(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    /// Run as a retry, which adds pre_cleanup.
    pub fn retry(mut self, is_retry: bool) -> Self {
        self.is_retry = is_retry;
        self
    }

    pub fn execute_writes(mut self, execute_writes: bool) -> Self {
        self.execute_writes = execute_writes;
        self
    }

    pub fn expect_autoflow(mut self, expected: bool) -> Self {
        self.expected_flags.autoflow = Some(expected);
        self
    }

    pub fn expect_lethal_for_worker(mut self, expected: bool) -> Self {
        self.expected_flags.lethal_for_worker = Some(expected);
        self
    }

    pub fn expect_transient_error(mut self, expected: bool) -> Self {
        self.expected_flags.transient_error = Some(expected);
        self
    }

    pub fn with_functions(mut self, functions: Arc<FunctionRegistry>) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_trace(mut self, trace: Arc<dyn TraceWriter>) -> Self {
        self.trace = trace;
        self
    }

    /// Run the job and compare what it emitted with `expected`, in order.
    pub async fn run(mut self, expected: Vec<TestEvent>) -> Result<JobOutcome, TestFailure> {
        let mut parameters = self.runnable.param_defaults();
        parameters.extend(std::mem::take(&mut self.parameters));

        let input = InputJob {
            db_id: None,
            input_id: Value::Object(parameters.clone()).to_string(),
            retry_count: u32::from(self.is_retry),
            parameters,
        };
        let job = Job::from_input(&input);
        let params =
            ParamStore::from_json_map(&input.parameters).with_functions(self.functions.clone());
        let steps = steps_for(job.retry_count, self.execute_writes);

        let mut parent = RecordingParent {
            events: Vec::new(),
            temp_dir: tempfile::tempdir().map_err(TestFailure::TempDirectory)?,
        };
        let hooks = self.runnable.hooks();
        let outcome = JobLifecycle::new(self.runnable.as_mut(), hooks, self.trace.clone())
            .run(&mut parent, params, job, &steps)
            .await?;

        compare_events(parent.events, expected)?;
        check_flags(&outcome.job, self.expected_flags)?;
        Ok(outcome)
    }
}

fn compare_events(events: Vec<TestEvent>, expected: Vec<TestEvent>) -> Result<(), TestFailure> {
    let mut expected = expected.into_iter();
    for got in events {
        match expected.next() {
            Some(want) if want == got => {}
            Some(want) => return Err(TestFailure::UnexpectedEvent { got, expected: want }),
            None => return Err(TestFailure::ExtraEvent(got)),
        }
    }
    let missing: Vec<TestEvent> = expected.collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(TestFailure::MissingEvents(missing))
    }
}

fn check_flags(job: &Job, expected: ExpectedFlags) -> Result<(), TestFailure> {
    let checks = [
        ("autoflow", job.autoflow, expected.autoflow),
        ("lethal_for_worker", job.lethal_for_worker, expected.lethal_for_worker),
        ("transient_error", job.transient_error, expected.transient_error),
    ];
    for (name, actual, expected) in checks {
        if let Some(expected) = expected {
            if actual != expected {
                return Err(TestFailure::Flag {
                    name,
                    actual,
                    expected,
                });
            }
        }
    }
    Ok(())
}
