// Job state and the context handed to every lifecycle hook.
//
// `JobContext` gives a runnable its parameters, its job flags and the
// operations that talk to the parent (warnings, dataflow, temp directory).
// The parent side is abstracted by `ParentLink` so the same hooks run under
// the real worker and under `RunnableTester`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use hive_common::{BranchNameOrCode, ChannelError, DataflowContent, InputJob, JobFlags};
use hive_sdk::TraceWriter;
use serde_json::Value;

use crate::error::ParamError;
use crate::params::{ParamStore, ParamValue};
use crate::runnable::Hook;

/// The job being run.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub db_id: Option<i64>,
    pub input_id: String,
    pub retry_count: u32,
    pub autoflow: bool,
    pub lethal_for_worker: bool,
    pub transient_error: bool,
}

impl Job {
    pub fn from_input(input: &InputJob) -> Self {
        let flags = JobFlags::default();
        Self {
            db_id: input.db_id,
            input_id: input.input_id.clone(),
            retry_count: input.retry_count,
            autoflow: flags.autoflow,
            lethal_for_worker: flags.lethal_for_worker,
            transient_error: flags.transient_error,
        }
    }

    /// The flags reported at the end of the job.
    pub fn flags(&self) -> JobFlags {
        JobFlags {
            autoflow: self.autoflow,
            lethal_for_worker: self.lethal_for_worker,
            transient_error: self.transient_error,
        }
    }
}

/// The parent process, as seen by a running job.
#[async_trait]
pub trait ParentLink: Send {
    /// Announce that `hook` is about to run.
    async fn announce_step(&mut self, hook: Hook) -> Result<(), ChannelError>;

    async fn warning(&mut self, message: &str, is_error: bool) -> Result<(), ChannelError>;

    /// Send a dataflow event and return the parent's reply.
    async fn dataflow(&mut self, content: DataflowContent) -> Result<Value, ChannelError>;

    async fn worker_temp_directory(&mut self) -> Result<PathBuf, ChannelError>;

    /// A hook ended the job early.
    async fn complete_early(&mut self, message: &str) -> Result<(), ChannelError> {
        self.warning(message, false).await
    }

    /// A hook failed; `description` carries the error and its trace.
    async fn hook_failed(&mut self, _hook: Hook, description: &str) -> Result<(), ChannelError> {
        self.warning(description, true).await
    }
}

/// Everything a hook can see and do while a job runs.
pub struct JobContext<'a> {
    link: &'a mut dyn ParentLink,
    params: ParamStore,
    job: Job,
    debug: i64,
    trace: Arc<dyn TraceWriter>,
    connection_lost: bool,
}

impl<'a> JobContext<'a> {
    pub fn new(
        link: &'a mut dyn ParentLink,
        params: ParamStore,
        job: Job,
        debug: i64,
        trace: Arc<dyn TraceWriter>,
    ) -> Self {
        Self {
            link,
            params,
            job,
            debug,
            trace,
            connection_lost: false,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn job_mut(&mut self) -> &mut Job {
        &mut self.job
    }

    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.params
    }

    pub fn debug(&self) -> i64 {
        self.debug
    }

    pub fn trace(&self) -> &Arc<dyn TraceWriter> {
        &self.trace
    }

    /// Whether any exchange made on behalf of a hook lost the connection,
    /// even if the hook swallowed the error.
    pub fn connection_lost(&self) -> bool {
        self.connection_lost
    }

    pub(crate) fn link(&mut self) -> &mut dyn ParentLink {
        &mut *self.link
    }

    pub(crate) fn into_parts(self) -> (ParamStore, Job) {
        (self.params, self.job)
    }

    fn note<T>(&mut self, result: Result<T, ChannelError>) -> Result<T, ChannelError> {
        if let Err(e) = &result {
            if e.is_lost_connection() {
                self.connection_lost = true;
            }
        }
        result
    }

    // ---------------------------------------------------------------------
    // Parameters
    // ---------------------------------------------------------------------

    /// Value of a parameter, or null when it cannot be resolved.
    ///
    /// Resolution errors are reported through the trace writer, never
    /// returned.
    pub fn param(&mut self, name: &str) -> ParamValue {
        match self.params.get(name) {
            Ok(value) => value,
            Err(e) => {
                self.trace.warning(&format!(
                    "Parameter '{name}' cannot be initialized because {e}. Setting it to None"
                ));
                ParamValue::Null
            }
        }
    }

    /// Store a value and return it.
    pub fn set_param(&mut self, name: &str, value: impl Into<ParamValue>) -> Result<ParamValue, ParamError> {
        self.params.set(name, value.into())
    }

    /// Value of a parameter that must be present and non-null.
    ///
    /// While the parameter is resolved the job is marked as not transient, so
    /// a failure here is not retried. The previous flag is restored only on
    /// success.
    pub fn param_required(&mut self, name: &str) -> Result<ParamValue, ParamError> {
        let previous = self.job.transient_error;
        self.job.transient_error = false;
        let value = self.params.get(name)?;
        if value.is_null() {
            return Err(ParamError::NullParameter(name.to_string()));
        }
        self.job.transient_error = previous;
        Ok(value)
    }

    /// Whether the parameter exists and resolves.
    ///
    /// `Some(false)` when it is absent, `None` when it is present but fails
    /// to resolve.
    pub fn param_exists(&mut self, name: &str) -> Result<Option<bool>, ParamError> {
        if !self.params.has(name)? {
            return Ok(Some(false));
        }
        match self.params.get(name) {
            Ok(_) => Ok(Some(true)),
            Err(_) => Ok(None),
        }
    }

    /// Like `param_exists`, and additionally requires a non-null value.
    pub fn param_is_defined(&mut self, name: &str) -> Result<Option<bool>, ParamError> {
        match self.param_exists(name)? {
            Some(true) => {}
            other => return Ok(other),
        }
        match self.params.get(name) {
            Ok(value) => Ok(Some(!value.is_null())),
            Err(_) => Ok(Some(false)),
        }
    }

    // ---------------------------------------------------------------------
    // Parent interactions
    // ---------------------------------------------------------------------

    /// Send a warning, or an error message when `is_error` is set.
    pub async fn warning(&mut self, message: &str, is_error: bool) -> Result<(), ChannelError> {
        let result = self.link.warning(message, is_error).await;
        self.note(result)
    }

    /// Send `output_ids` to `branch` and return the parent's reply.
    ///
    /// Flowing on branch 1 turns off the job's autoflow.
    pub async fn dataflow(
        &mut self,
        output_ids: impl Into<Value>,
        branch: impl Into<BranchNameOrCode>,
    ) -> Result<Value, ChannelError> {
        let branch_name_or_code = branch.into();
        if branch_name_or_code.is_autoflow() {
            self.job.autoflow = false;
        }
        let content = DataflowContent {
            output_ids: output_ids.into(),
            branch_name_or_code,
            params: self.params.snapshot(),
        };
        let result = self.link.dataflow(content).await;
        self.note(result)
    }

    /// Path of the worker's temporary directory, asked from the parent once
    /// per worker process.
    pub async fn worker_temp_directory(&mut self) -> Result<PathBuf, ChannelError> {
        let result = self.link.worker_temp_directory().await;
        self.note(result)
    }
}

impl std::fmt::Debug for JobContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job", &self.job)
            .field("params", &self.params)
            .field("debug", &self.debug)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hive_common::ParamsSnapshot;
    use hive_sdk::{CollectingTraceWriter, TraceLevel};
    use serde_json::json;
    use std::io;

    /// A parent that records everything and answers from a script.
    #[derive(Default)]
    pub(crate) struct RecordingLink {
        pub(crate) steps: Vec<Hook>,
        pub(crate) warnings: Vec<(String, bool)>,
        pub(crate) dataflows: Vec<DataflowContent>,
        pub(crate) temp_dir_requests: usize,
        pub(crate) disconnected: bool,
    }

    fn lost() -> ChannelError {
        ChannelError::lost("write_pipe", io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
    }

    #[async_trait]
    impl ParentLink for RecordingLink {
        async fn announce_step(&mut self, hook: Hook) -> Result<(), ChannelError> {
            self.steps.push(hook);
            Ok(())
        }

        async fn warning(&mut self, message: &str, is_error: bool) -> Result<(), ChannelError> {
            if self.disconnected {
                return Err(lost());
            }
            self.warnings.push((message.to_string(), is_error));
            Ok(())
        }

        async fn dataflow(&mut self, content: DataflowContent) -> Result<Value, ChannelError> {
            if self.disconnected {
                return Err(lost());
            }
            self.dataflows.push(content);
            Ok(json!([self.dataflows.len()]))
        }

        async fn worker_temp_directory(&mut self) -> Result<PathBuf, ChannelError> {
            self.temp_dir_requests += 1;
            Ok(PathBuf::from("/tmp/worker_test"))
        }
    }

    fn job() -> Job {
        Job::from_input(&InputJob::default())
    }

    fn params(raw: Value) -> ParamStore {
        match raw {
            Value::Object(map) => ParamStore::from_json_map(&map),
            _ => ParamStore::default(),
        }
    }

    #[test]
    fn test_job_defaults() {
        let job = job();
        assert_eq!(job.flags(), JobFlags::default());
        assert_eq!(job.retry_count, 0);
    }

    #[test]
    fn test_param_reports_errors_and_returns_null() {
        let mut link = RecordingLink::default();
        let trace = Arc::new(CollectingTraceWriter::new());
        let mut ctx = JobContext::new(&mut link, params(json!({"a": "#b#"})), job(), 0, trace.clone());

        assert!(ctx.param("a").is_null());
        let warnings = trace.messages_at(TraceLevel::Warning);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("'a' cannot be initialized"));
    }

    #[test]
    fn test_param_required() {
        let mut link = RecordingLink::default();
        let trace = Arc::new(CollectingTraceWriter::new());
        let mut ctx = JobContext::new(
            &mut link,
            params(json!({"present": 1, "empty": null})),
            job(),
            0,
            trace,
        );

        assert_eq!(ctx.param_required("present").unwrap(), ParamValue::Int(1));
        assert!(ctx.job().transient_error);

        assert_eq!(
            ctx.param_required("empty"),
            Err(ParamError::NullParameter("empty".into()))
        );
        assert!(!ctx.job().transient_error);

        ctx.job_mut().transient_error = true;
        assert!(matches!(ctx.param_required("missing"), Err(ParamError::NotFound(_))));
        assert!(!ctx.job().transient_error);
    }

    #[test]
    fn test_param_exists_and_is_defined() {
        let mut link = RecordingLink::default();
        let trace = Arc::new(CollectingTraceWriter::new());
        let mut ctx = JobContext::new(
            &mut link,
            params(json!({"a": 0, "b": null, "broken": "#nowhere#"})),
            job(),
            0,
            trace,
        );

        assert_eq!(ctx.param_exists("a").unwrap(), Some(true));
        assert_eq!(ctx.param_exists("b").unwrap(), Some(true));
        assert_eq!(ctx.param_exists("c").unwrap(), Some(false));
        assert_eq!(ctx.param_exists("broken").unwrap(), None);
        assert!(matches!(ctx.param_exists(""), Err(ParamError::Name(_))));

        assert_eq!(ctx.param_is_defined("a").unwrap(), Some(true));
        assert_eq!(ctx.param_is_defined("b").unwrap(), Some(false));
        assert_eq!(ctx.param_is_defined("c").unwrap(), Some(false));
        assert_eq!(ctx.param_is_defined("broken").unwrap(), None);
    }

    #[tokio::test]
    async fn test_dataflow_on_branch_one_disables_autoflow() {
        let mut link = RecordingLink::default();
        let trace = Arc::new(CollectingTraceWriter::new());
        let mut ctx = JobContext::new(&mut link, params(json!({"x": 1})), job(), 0, trace);

        let reply = ctx.dataflow(json!({"a": 1}), 2i64).await.unwrap();
        assert_eq!(reply, json!([1]));
        assert!(ctx.job().autoflow);

        ctx.dataflow(json!([{"a": 2}]), BranchNameOrCode::AUTOFLOW).await.unwrap();
        assert!(!ctx.job().autoflow);

        drop(ctx);
        assert_eq!(link.dataflows.len(), 2);
        assert_eq!(link.dataflows[0].branch_name_or_code, BranchNameOrCode::Code(2));
        assert_eq!(
            link.dataflows[1].params,
            ParamsSnapshot {
                substituted: serde_json::Map::new(),
                unsubstituted: json!({"x": 1}).as_object().cloned().unwrap_or_default(),
            }
        );
    }

    #[tokio::test]
    async fn test_lost_connection_is_remembered() {
        let mut link = RecordingLink {
            disconnected: true,
            ..Default::default()
        };
        let trace = Arc::new(CollectingTraceWriter::new());
        let mut ctx = JobContext::new(&mut link, ParamStore::default(), job(), 0, trace);

        assert!(!ctx.connection_lost());
        let _ignored = ctx.warning("hello", false).await;
        assert!(ctx.connection_lost());
    }
}
