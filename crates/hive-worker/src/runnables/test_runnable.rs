// TestRunnable: a small runnable touching every parent interaction, used to
// check an installation end to end.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::error::JobError;
use crate::expressions::{self, Fragment};
use crate::job::JobContext;
use crate::runnable::{Hook, HookResult, HookSet, Runnable};

#[derive(Debug, Default)]
pub struct TestRunnable {
    temp_dir: Option<PathBuf>,
    greeting_path: Option<PathBuf>,
}

#[async_trait]
impl Runnable for TestRunnable {
    fn hooks(&self) -> HookSet {
        [Hook::FetchInput, Hook::Run, Hook::WriteOutput].into_iter().collect()
    }

    fn param_defaults(&self) -> Map<String, Value> {
        let mut defaults = Map::new();
        defaults.insert("alpha".to_string(), json!(37));
        defaults.insert("beta".to_string(), json!(78));
        defaults
    }

    async fn fetch_input(&mut self, job: &mut JobContext<'_>) -> HookResult {
        job.warning("Fetch the world !", false).await?;
        let alpha = job.param_required("alpha")?;
        tracing::info!("alpha is {}", alpha);
        let beta = job.param_required("beta")?;
        tracing::info!("beta is {}", beta);
        let dir = job.worker_temp_directory().await?;
        tracing::info!("my directory name is {}", dir.display());
        self.temp_dir = Some(dir);
        Ok(())
    }

    async fn run(&mut self, job: &mut JobContext<'_>) -> HookResult {
        job.warning("Run the world !", false).await?;
        let sum = [
            Fragment::Value(job.param("alpha")),
            Fragment::Source("+".to_string()),
            Fragment::Value(job.param("beta")),
        ];
        let gamma = expressions::evaluate(&sum, job.params().functions())?;
        tracing::info!("set gamma to {}", gamma);
        job.set_param("gamma", gamma)?;

        let dir = self
            .temp_dir
            .as_ref()
            .ok_or_else(|| JobError::failed("no temporary directory, fetch_input did not run"))?;
        let path = dir.join("hello");
        tokio::fs::write(&path, b"").await?;
        self.greeting_path = Some(path);
        Ok(())
    }

    async fn write_output(&mut self, job: &mut JobContext<'_>) -> HookResult {
        job.warning("Write to the world !", false).await?;
        let gamma = job.param("gamma");
        tracing::info!("gamma is {}", gamma);
        job.dataflow(json!({ "gamma": gamma }), 2i64).await?;
        let in_place = self.greeting_path.as_ref().is_some_and(|p| p.exists());
        tracing::info!("Greetings in place: {}", in_place);
        Ok(())
    }
}
