// hive-common: Wire layer shared by the eHive guest worker crates.
// Protocol constants and message shapes, the newline-delimited JSON channel
// between the worker and its parent, and logging setup.

pub mod constants;
pub mod error;
pub mod logging;
pub mod process_channel;
pub mod protocol;

// ---------------------------------------------------------------------------
// Re-exports for convenient access
// ---------------------------------------------------------------------------

pub use error::ChannelError;
pub use logging::{init_logging, set_debug_level, LoggingConfig};
pub use process_channel::MessageChannel;
pub use protocol::{
    BranchNameOrCode, DataflowContent, InputJob, JobConfig, JobEndContent, JobFlags,
    ParamsSnapshot, WarningContent,
};
