// Runnables shipped with the worker binary.

mod dummy;
mod test_runnable;

pub use dummy::Dummy;
pub use test_runnable::TestRunnable;
