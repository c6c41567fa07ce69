// Protocol constants shared by the worker and anything that talks to it.

/// Version announced in the `VERSION` handshake message.
pub const PROTOCOL_VERSION: &str = "5.0";

/// The only acknowledgment the parent is expected to send back.
pub const RESPONSE_OK: &str = "OK";

/// Substituted for any value that cannot be represented in JSON.
pub const UNSERIALIZABLE_PLACEHOLDER: &str = "UNSERIALIZABLE OBJECT";

/// Event names of worker → parent messages.
pub mod events {
    pub const VERSION: &str = "VERSION";
    pub const PARAM_DEFAULTS: &str = "PARAM_DEFAULTS";
    pub const JOB_STATUS_UPDATE: &str = "JOB_STATUS_UPDATE";
    pub const WARNING: &str = "WARNING";
    pub const DATAFLOW: &str = "DATAFLOW";
    pub const WORKER_TEMP_DIRECTORY: &str = "WORKER_TEMP_DIRECTORY";
    pub const JOB_END: &str = "JOB_END";
}

/// Environment variables read by the worker binary.
pub mod variables {
    /// Debug level, same meaning as `--debug`.
    pub const DEBUG: &str = "HIVE_DEBUG";
    /// Set to `json` to emit structured log lines.
    pub const LOG_FORMAT: &str = "HIVE_LOG_FORMAT";
}
