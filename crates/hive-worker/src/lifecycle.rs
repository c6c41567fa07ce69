// Job lifecycle: runs the hooks of one job in order and decides how it ended.
//
// Steps: pre_cleanup (retries only), fetch_input, run, then write_output and
// post_healthcheck when writes are enabled. The first step that completes
// early or fails stops the sequence; post_cleanup is attempted in every case.
// Hook panics are caught and treated as failures.

use std::any::Any;
use std::backtrace::BacktraceStatus;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use hive_common::{ChannelError, ParamsSnapshot};
use hive_sdk::TraceWriter;

use crate::error::JobError;
use crate::job::{Job, JobContext, ParentLink};
use crate::params::ParamStore;
use crate::runnable::{call_hook, Hook, HookSet, Runnable};

/// Message used when a hook completes early without saying why.
pub const DEFAULT_COMPLETE_EARLY_MESSAGE: &str = "Job completed early";

/// Frames of the worker's own machinery, dropped from failure traces.
const CONTROLLER_FRAMES: [&str; 8] = [
    "hive_worker::lifecycle",
    "hive_worker::worker",
    "hive_worker::testing",
    "anyhow::",
    "<anyhow::",
    "tokio::",
    "futures_util::",
    "std::",
];

/// The steps a job goes through, before filtering on implemented hooks.
pub fn steps_for(retry_count: u32, execute_writes: bool) -> Vec<Hook> {
    let mut steps = Vec::with_capacity(5);
    if retry_count > 0 {
        steps.push(Hook::PreCleanup);
    }
    steps.push(Hook::FetchInput);
    steps.push(Hook::Run);
    if execute_writes {
        steps.push(Hook::WriteOutput);
        steps.push(Hook::PostHealthcheck);
    }
    steps
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    /// False when any hook failed.
    pub complete: bool,
    pub job: Job,
    pub params: ParamsSnapshot,
}

enum StepOutcome {
    Success,
    CompleteEarly(String),
    Failure(String),
}

/// Drives the hooks of one job against a parent link.
pub struct JobLifecycle<'r> {
    runnable: &'r mut dyn Runnable,
    hooks: HookSet,
    debug: i64,
    trace: Arc<dyn TraceWriter>,
}

impl<'r> JobLifecycle<'r> {
    pub fn new(runnable: &'r mut dyn Runnable, hooks: HookSet, trace: Arc<dyn TraceWriter>) -> Self {
        Self {
            runnable,
            hooks,
            debug: 0,
            trace,
        }
    }

    pub fn with_debug(mut self, debug: i64) -> Self {
        self.debug = debug;
        self
    }

    /// Run `steps` then post_cleanup.
    ///
    /// Only a lost connection is returned as an error; every other problem is
    /// reported to the parent and reflected in the outcome.
    pub async fn run(
        &mut self,
        link: &mut dyn ParentLink,
        params: ParamStore,
        job: Job,
        steps: &[Hook],
    ) -> Result<JobOutcome, ChannelError> {
        let mut ctx = JobContext::new(link, params, job, self.debug, self.trace.clone());
        let mut died = false;
        let hooks = self.hooks;

        for &hook in steps.iter().filter(|h| hooks.contains(**h)) {
            match self.step(hook, &mut ctx).await? {
                StepOutcome::Success => {}
                StepOutcome::CompleteEarly(message) => {
                    self.trace.info(&format!("job completed early in {hook}: {message}"));
                    ctx.link().complete_early(&message).await?;
                    break;
                }
                StepOutcome::Failure(description) => {
                    self.trace.error(&format!("{hook} failed: {description}"));
                    died = true;
                    ctx.link().hook_failed(hook, &description).await?;
                    break;
                }
            }
        }

        if hooks.contains(Hook::PostCleanup) {
            match self.step(Hook::PostCleanup, &mut ctx).await? {
                StepOutcome::Success => {}
                StepOutcome::CompleteEarly(message) => {
                    self.trace.info(&format!("job completed early in post_cleanup: {message}"));
                    ctx.link().complete_early(&message).await?;
                }
                StepOutcome::Failure(description) => {
                    self.trace.error(&format!("post_cleanup failed: {description}"));
                    died = true;
                    ctx.link().hook_failed(Hook::PostCleanup, &description).await?;
                }
            }
        }

        let (params, job) = ctx.into_parts();
        Ok(JobOutcome {
            complete: !died,
            job,
            params: params.snapshot(),
        })
    }

    async fn step(
        &mut self,
        hook: Hook,
        ctx: &mut JobContext<'_>,
    ) -> Result<StepOutcome, ChannelError> {
        ctx.link().announce_step(hook).await?;
        self.trace.verbose(&format!("running {hook}"));

        let result = AssertUnwindSafe(call_hook(&mut *self.runnable, hook, ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(JobError::Failed(anyhow::anyhow!(
                    "{} panicked: {}",
                    hook,
                    panic_message(panic.as_ref())
                )))
            });

        if ctx.connection_lost() {
            return Err(ChannelError::lost(
                "write_pipe",
                std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    format!("the connection was lost during {hook}"),
                ),
            ));
        }

        match result {
            Ok(()) => Ok(StepOutcome::Success),
            Err(JobError::CompleteEarly(message)) => Ok(StepOutcome::CompleteEarly(
                message.unwrap_or_else(|| DEFAULT_COMPLETE_EARLY_MESSAGE.to_string()),
            )),
            Err(JobError::LostConnection(e)) => Err(e),
            Err(JobError::Failed(e)) => Ok(StepOutcome::Failure(describe_failure(&e))),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Error message, its causes, and the captured backtrace without the
/// worker's own frames.
pub fn describe_failure(err: &anyhow::Error) -> String {
    let mut out = err.to_string();
    for cause in err.chain().skip(1) {
        out.push_str("\nCaused by: ");
        out.push_str(&cause.to_string());
    }
    let backtrace = err.backtrace();
    if backtrace.status() == BacktraceStatus::Captured {
        let frames = trim_backtrace(&backtrace.to_string());
        if !frames.is_empty() {
            out.push_str("\nStack backtrace:\n");
            out.push_str(&frames);
        }
    }
    out
}

/// Drop the frames whose symbol belongs to the worker's own machinery.
///
/// Frames look like `  12: symbol` followed by `at file:line` lines.
fn trim_backtrace(rendered: &str) -> String {
    let mut kept = Vec::new();
    let mut keep_current = false;
    for line in rendered.lines() {
        let trimmed = line.trim_start();
        let symbol = trimmed
            .split_once(": ")
            .filter(|(index, _)| !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()))
            .map(|(_, symbol)| symbol);
        if let Some(symbol) = symbol {
            keep_current = !CONTROLLER_FRAMES.iter().any(|p| symbol.starts_with(p));
        }
        if keep_current {
            kept.push(line);
        }
    }
    kept.join("\n")
}
