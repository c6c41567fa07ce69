// Runnable registry: resolves the runnable named on the command line.

use std::collections::BTreeMap;

use hive_sdk::StringUtil;

use crate::error::UnknownRunnable;
use crate::runnable::Runnable;
use crate::runnables::{Dummy, TestRunnable};

type Factory = Box<dyn Fn() -> Box<dyn Runnable> + Send + Sync>;

/// Closed map from runnable name to a factory.
#[derive(Default)]
pub struct RunnableRegistry {
    factories: BTreeMap<String, Factory>,
}

impl RunnableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the runnables shipped with the worker.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("TestRunnable", || Box::new(TestRunnable::default()));
        registry.register("Dummy", || Box::new(Dummy));
        registry
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Runnable> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build a new instance of the runnable called `name`.
    ///
    /// A fully qualified name (`a.b.Name`) falls back to its last component.
    pub fn create(&self, name: &str) -> Result<Box<dyn Runnable>, UnknownRunnable> {
        let factory = self
            .factories
            .get(name)
            .or_else(|| {
                self.factories
                    .get(StringUtil::sub_string_after_last(name, '.'))
            })
            .ok_or_else(|| {
                let mut candidates: Vec<String> =
                    self.factories.keys().cloned().collect();
                StringUtil::sort_by_similarity(name, &mut candidates);
                UnknownRunnable {
                    name: name.to_string(),
                    candidates,
                }
            })?;
        tracing::debug!(runnable = name, "creating runnable");
        Ok(factory())
    }
}

impl std::fmt::Debug for RunnableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableRegistry")
            .field("names", &self.names())
            .finish()
    }
}
