// Worker: the process-level controller.
//
// Announces the protocol version and the runnable's parameter defaults, then
// waits for job configurations and runs one job life-cycle per configuration
// until the parent sends a configuration without a job.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use hive_common::constants::{events, PROTOCOL_VERSION, RESPONSE_OK};
use hive_common::{
    ChannelError, DataflowContent, InputJob, JobConfig, JobEndContent, MessageChannel,
    WarningContent,
};
use hive_sdk::{TraceWriter, TracingTraceWriter};
use serde_json::Value;

use crate::error::WorkerError;
use crate::functions::FunctionRegistry;
use crate::job::{Job, ParentLink};
use crate::lifecycle::{steps_for, JobLifecycle};
use crate::params::ParamStore;
use crate::runnable::{Hook, HookSet, Runnable};

/// Where the worker is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    AwaitingJob,
    RunningJob,
    Terminated,
}

/// `ParentLink` over the real message channel.
///
/// The temporary directory is asked once and kept for the life of the process.
struct ChannelLink {
    channel: MessageChannel,
    temp_directory: Option<PathBuf>,
}

#[async_trait]
impl ParentLink for ChannelLink {
    async fn announce_step(&mut self, hook: Hook) -> Result<(), ChannelError> {
        self.channel
            .send_message_and_wait_for_ok(events::JOB_STATUS_UPDATE, hook.as_str())
            .await
    }

    async fn warning(&mut self, message: &str, is_error: bool) -> Result<(), ChannelError> {
        let content = WarningContent {
            message: message.to_string(),
            is_error,
        };
        self.channel
            .send_message_and_wait_for_ok(events::WARNING, &content)
            .await
    }

    async fn dataflow(&mut self, content: DataflowContent) -> Result<Value, ChannelError> {
        self.channel.send_message(events::DATAFLOW, &content).await?;
        self.channel.read_response().await
    }

    async fn worker_temp_directory(&mut self) -> Result<PathBuf, ChannelError> {
        if let Some(dir) = &self.temp_directory {
            return Ok(dir.clone());
        }
        self.channel
            .send_message(events::WORKER_TEMP_DIRECTORY, &Value::Null)
            .await?;
        let dir = match self.channel.read_response().await? {
            Value::String(path) => PathBuf::from(path),
            other => return Err(ChannelError::UnexpectedResponse(other)),
        };
        self.temp_directory = Some(dir.clone());
        Ok(dir)
    }
}

/// Drives one runnable for the whole life of the process.
pub struct Worker {
    runnable: Box<dyn Runnable>,
    hooks: HookSet,
    link: ChannelLink,
    functions: Arc<FunctionRegistry>,
    trace: Arc<dyn TraceWriter>,
    debug: i64,
    state: WorkerState,
}

impl Worker {
    pub fn new(runnable: Box<dyn Runnable>, channel: MessageChannel) -> Self {
        let hooks = runnable.hooks();
        Self {
            runnable,
            hooks,
            link: ChannelLink {
                channel,
                temp_directory: None,
            },
            functions: Arc::new(FunctionRegistry::builtin()),
            trace: Arc::new(TracingTraceWriter::new("runnable")),
            debug: 0,
            state: WorkerState::Starting,
        }
    }

    pub fn with_functions(mut self, functions: Arc<FunctionRegistry>) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_trace(mut self, trace: Arc<dyn TraceWriter>) -> Self {
        self.trace = trace;
        self
    }

    /// Debug level from the command line. Above 1, every message is echoed.
    pub fn with_debug(mut self, debug: i64) -> Self {
        self.debug = debug;
        self.link.channel.set_echo(debug > 1);
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn hooks(&self) -> HookSet {
        self.hooks
    }

    /// Handshake, then serve jobs until told to stop. Returns the number of
    /// jobs run.
    pub async fn run(&mut self) -> Result<usize, WorkerError> {
        let result = self.serve().await;
        self.state = WorkerState::Terminated;
        if let Err(e) = &result {
            tracing::error!("worker stopped: {}", e);
        }
        result
    }

    async fn serve(&mut self) -> Result<usize, WorkerError> {
        self.handshake().await?;

        let mut jobs = 0;
        loop {
            self.state = WorkerState::AwaitingJob;
            tracing::debug!("waiting for instructions");
            let message = self.link.channel.read_message().await?;
            let config: JobConfig =
                serde_json::from_value(message).map_err(WorkerError::InvalidConfig)?;
            let Some(input) = config.input_job else {
                tracing::debug!("no job in the configuration, this is the end of the worker");
                return Ok(jobs);
            };
            self.run_job(input, config.debug, config.execute_writes).await?;
            jobs += 1;
        }
    }

    async fn handshake(&mut self) -> Result<(), WorkerError> {
        let channel = &mut self.link.channel;
        channel
            .send_message_and_wait_for_ok(events::VERSION, PROTOCOL_VERSION)
            .await?;
        channel
            .send_message_and_wait_for_ok(events::PARAM_DEFAULTS, &self.runnable.param_defaults())
            .await?;
        Ok(())
    }

    async fn run_job(
        &mut self,
        input: InputJob,
        debug: i64,
        execute_writes: bool,
    ) -> Result<(), WorkerError> {
        let debug = debug.max(self.debug);
        hive_common::set_debug_level(debug);
        self.link.channel.set_echo(debug > 1);

        let job = Job::from_input(&input);
        let params =
            ParamStore::from_json_map(&input.parameters).with_functions(self.functions.clone());
        let steps = steps_for(job.retry_count, execute_writes);
        tracing::debug!(
            db_id = ?job.db_id,
            retry_count = job.retry_count,
            "steps to run: {:?}",
            steps.iter().map(|h| h.as_str()).collect::<Vec<_>>()
        );
        self.link.channel.send_response(RESPONSE_OK).await?;

        self.state = WorkerState::RunningJob;
        let outcome = JobLifecycle::new(self.runnable.as_mut(), self.hooks, self.trace.clone())
            .with_debug(debug)
            .run(&mut self.link, params, job, &steps)
            .await?;

        let content = JobEndContent {
            complete: outcome.complete,
            job: outcome.job.flags(),
            params: outcome.params,
        };
        self.link
            .channel
            .send_message_and_wait_for_ok(events::JOB_END, &content)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("hooks", &self.hooks)
            .field("debug", &self.debug)
            .field("state", &self.state)
            .finish()
    }
}
