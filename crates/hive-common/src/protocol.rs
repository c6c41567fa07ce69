// Message shapes exchanged between the worker and its parent.
//
// Outbound messages are always `{"event": ..., "content": ...}`; the content
// structs below describe the non-trivial payloads. Inbound messages are either
// `{"response": ...}` or a job configuration.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Configuration of one job, sent by the parent while the worker is idle.
///
/// A configuration without `input_job` tells the worker to exit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub input_job: Option<InputJob>,

    /// Debug level requested by the parent for this job.
    #[serde(default)]
    pub debug: i64,

    /// Whether `write_output` and `post_healthcheck` should run.
    #[serde(default, deserialize_with = "deserialize_truthy")]
    pub execute_writes: bool,
}

/// The job part of a [`JobConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputJob {
    /// Database id of the job; absent for standalone jobs.
    #[serde(rename = "dbID", default)]
    pub db_id: Option<i64>,

    /// Serialized input payload of the job.
    #[serde(default)]
    pub input_id: String,

    #[serde(default)]
    pub retry_count: u32,

    /// Unsubstituted parameters of the job.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Content of a `WARNING` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningContent {
    pub message: String,
    pub is_error: bool,
}

/// Both views of the parameters of the running job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamsSnapshot {
    pub substituted: Map<String, Value>,
    pub unsubstituted: Map<String, Value>,
}

/// Branch targeted by a dataflow event, either a numeric code or a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BranchNameOrCode {
    Code(i64),
    Name(String),
}

impl BranchNameOrCode {
    /// Branch 1 is the default branch that autoflow would otherwise use.
    pub const AUTOFLOW: BranchNameOrCode = BranchNameOrCode::Code(1);

    pub fn is_autoflow(&self) -> bool {
        matches!(self, BranchNameOrCode::Code(1))
    }
}

impl Default for BranchNameOrCode {
    fn default() -> Self {
        Self::AUTOFLOW
    }
}

impl From<i64> for BranchNameOrCode {
    fn from(code: i64) -> Self {
        BranchNameOrCode::Code(code)
    }
}

impl From<&str> for BranchNameOrCode {
    fn from(name: &str) -> Self {
        BranchNameOrCode::Name(name.to_string())
    }
}

impl From<String> for BranchNameOrCode {
    fn from(name: String) -> Self {
        BranchNameOrCode::Name(name)
    }
}

impl std::fmt::Display for BranchNameOrCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BranchNameOrCode::Code(code) => write!(f, "{code}"),
            BranchNameOrCode::Name(name) => write!(f, "{name}"),
        }
    }
}

/// Content of a `DATAFLOW` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataflowContent {
    pub output_ids: Value,
    pub branch_name_or_code: BranchNameOrCode,
    pub params: ParamsSnapshot,
}

/// The job flags a runnable may change while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFlags {
    pub autoflow: bool,
    pub lethal_for_worker: bool,
    pub transient_error: bool,
}

impl Default for JobFlags {
    fn default() -> Self {
        Self {
            autoflow: true,
            lethal_for_worker: false,
            transient_error: true,
        }
    }
}

/// Content of the `JOB_END` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEndContent {
    pub complete: bool,
    pub job: JobFlags,
    pub params: ParamsSnapshot,
}

/// Accepts JSON booleans as well as numbers and strings the way a Perl
/// parent encodes them (`0`/`1`, `""`/`"0"`).
fn deserialize_truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => false,
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !(s.is_empty() || s == "0"),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_job_config() {
        let json = r##"{
            "input_job": {"dbID": 12, "input_id": "{'a' => 1}", "retry_count": 2,
                          "parameters": {"a": 1, "b": "#a#"}},
            "debug": 3,
            "execute_writes": 1
        }"##;
        let config: JobConfig = serde_json::from_str(json).unwrap();
        let job = config.input_job.unwrap();
        assert_eq!(job.db_id, Some(12));
        assert_eq!(job.input_id, "{'a' => 1}");
        assert_eq!(job.retry_count, 2);
        assert_eq!(job.parameters.get("b"), Some(&json!("#a#")));
        assert_eq!(config.debug, 3);
        assert!(config.execute_writes);
    }

    #[test]
    fn test_config_without_job_means_shutdown() {
        let config: JobConfig = serde_json::from_str("{}").unwrap();
        assert!(config.input_job.is_none());
        assert!(!config.execute_writes);
        assert_eq!(config.debug, 0);
    }

    #[test]
    fn test_execute_writes_accepts_perl_values() {
        for (raw, expected) in [
            ("true", true),
            ("false", false),
            ("0", false),
            ("1", true),
            ("\"\"", false),
            ("\"0\"", false),
            ("null", false),
        ] {
            let json = format!(r#"{{"execute_writes": {raw}}}"#);
            let config: JobConfig = serde_json::from_str(&json).unwrap();
            assert_eq!(config.execute_writes, expected, "execute_writes = {raw}");
        }
    }

    #[test]
    fn test_branch_serialization() {
        assert_eq!(serde_json::to_value(BranchNameOrCode::Code(2)).unwrap(), json!(2));
        assert_eq!(
            serde_json::to_value(BranchNameOrCode::from("failed")).unwrap(),
            json!("failed")
        );
        assert!(BranchNameOrCode::default().is_autoflow());
        assert!(!BranchNameOrCode::from("1").is_autoflow());
    }

    #[test]
    fn test_job_end_shape() {
        let content = JobEndContent {
            complete: true,
            job: JobFlags::default(),
            params: ParamsSnapshot::default(),
        };
        assert_eq!(
            serde_json::to_value(&content).unwrap(),
            json!({
                "complete": true,
                "job": {"autoflow": true, "lethal_for_worker": false, "transient_error": true},
                "params": {"substituted": {}, "unsubstituted": {}}
            })
        );
    }
}
