// Runnable: the user-supplied unit of work driven through the job lifecycle.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::error::JobError;
use crate::job::JobContext;

/// Result of one lifecycle hook.
pub type HookResult = Result<(), JobError>;

/// The lifecycle hooks, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    PreCleanup,
    FetchInput,
    Run,
    WriteOutput,
    PostHealthcheck,
    PostCleanup,
}

impl Hook {
    pub const ALL: [Hook; 6] = [
        Hook::PreCleanup,
        Hook::FetchInput,
        Hook::Run,
        Hook::WriteOutput,
        Hook::PostHealthcheck,
        Hook::PostCleanup,
    ];

    /// Name announced to the parent in `JOB_STATUS_UPDATE`.
    pub fn as_str(self) -> &'static str {
        match self {
            Hook::PreCleanup => "pre_cleanup",
            Hook::FetchInput => "fetch_input",
            Hook::Run => "run",
            Hook::WriteOutput => "write_output",
            Hook::PostHealthcheck => "post_healthcheck",
            Hook::PostCleanup => "post_cleanup",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl std::fmt::Display for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The hooks a runnable actually implements. Hooks outside the set are
/// neither announced nor called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookSet(u8);

impl HookSet {
    pub const fn empty() -> Self {
        HookSet(0)
    }

    pub fn all() -> Self {
        Hook::ALL.into_iter().collect()
    }

    pub fn with(self, hook: Hook) -> Self {
        HookSet(self.0 | hook.bit())
    }

    pub fn contains(self, hook: Hook) -> bool {
        self.0 & hook.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Hook> {
        Hook::ALL.into_iter().filter(move |h| self.contains(*h))
    }
}

impl FromIterator<Hook> for HookSet {
    fn from_iter<I: IntoIterator<Item = Hook>>(iter: I) -> Self {
        iter.into_iter().fold(HookSet::empty(), HookSet::with)
    }
}

/// A unit of work the worker can drive.
///
/// Every hook defaults to doing nothing. `hooks()` declares which ones the
/// runnable implements; it is asked once, when the worker starts.
#[async_trait]
pub trait Runnable: Send {
    /// Hooks this runnable implements.
    fn hooks(&self) -> HookSet;

    /// Raw parameter defaults announced to the parent at startup.
    fn param_defaults(&self) -> Map<String, Value> {
        Map::new()
    }

    async fn pre_cleanup(&mut self, _job: &mut JobContext<'_>) -> HookResult {
        Ok(())
    }

    async fn fetch_input(&mut self, _job: &mut JobContext<'_>) -> HookResult {
        Ok(())
    }

    async fn run(&mut self, _job: &mut JobContext<'_>) -> HookResult {
        Ok(())
    }

    async fn write_output(&mut self, _job: &mut JobContext<'_>) -> HookResult {
        Ok(())
    }

    async fn post_healthcheck(&mut self, _job: &mut JobContext<'_>) -> HookResult {
        Ok(())
    }

    async fn post_cleanup(&mut self, _job: &mut JobContext<'_>) -> HookResult {
        Ok(())
    }
}

/// Call `hook` on `runnable`.
pub(crate) fn call_hook<'a, 'b: 'a>(
    runnable: &'a mut dyn Runnable,
    hook: Hook,
    job: &'a mut JobContext<'b>,
) -> BoxFuture<'a, HookResult> {
    match hook {
        Hook::PreCleanup => runnable.pre_cleanup(job),
        Hook::FetchInput => runnable.fetch_input(job),
        Hook::Run => runnable.run(job),
        Hook::WriteOutput => runnable.write_output(job),
        Hook::PostHealthcheck => runnable.post_healthcheck(job),
        Hook::PostCleanup => runnable.post_cleanup(job),
    }
}
