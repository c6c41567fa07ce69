use crate::runnable::{HookSet, Runnable};

/// Implements no hook. Every job it is given completes immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct Dummy;

impl Runnable for Dummy {
    fn hooks(&self) -> HookSet {
        HookSet::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RunnableTester;

    #[tokio::test]
    async fn test_emits_nothing() {
        let outcome = RunnableTester::new(Box::new(Dummy))
            .param("anything", 1)
            .expect_autoflow(true)
            .run(Vec::new())
            .await
            .unwrap();
        assert!(outcome.complete);
    }
}
