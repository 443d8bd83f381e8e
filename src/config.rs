//! Launch configuration and source-breakpoint-request data model,
//! plus the caller-facing validation rules that live alongside it:
//! exactly one of `program`/`module`, and extension-based family
//! auto-detection when `type` is left empty.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Immutable launch configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfig {
    /// Adapter type selector; empty means auto-detect from `program`.
    #[serde(default)]
    pub r#type: Option<String>,
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub runtime_executable: Option<String>,
    #[serde(default)]
    pub runtime_args: Vec<String>,
    /// Family-A only.
    pub python_path: Option<String>,
    /// Family-A only; mutually exclusive with `program`.
    pub module: Option<String>,
}

impl LaunchConfig {
    /// Enforces the "exactly one of `program`/`module`" rule.
    pub fn validate(&self) -> crate::Result<()> {
        match (&self.program, &self.module) {
            (Some(_), Some(_)) => Err(crate::Error::Configuration(
                "exactly one of program or module must be set, not both".to_string(),
            )),
            (None, None) => Err(crate::Error::Configuration(
                "one of program or module is required".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// A breakpoint request from the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpointRequest {
    pub line: i64,
    pub column: Option<i64>,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
}
