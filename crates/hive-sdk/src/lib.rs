// hive-sdk: Foundation layer for the eHive guest worker.
// This crate has ZERO dependencies on other hive crates and provides
// the diagnostic trait and string helpers used throughout the worker.

pub mod string_util;
pub mod trace;

// Re-export commonly used items at crate root
pub use string_util::StringUtil;
pub use trace::{CollectingTraceWriter, NullTraceWriter, TraceLevel, TraceWriter, TracingTraceWriter};
