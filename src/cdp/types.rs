use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Outgoing CDP request: `{id, method, params}`.
#[derive(Debug, Clone, Serialize)]
pub struct CdpRequest {
    pub id: i64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CdpError {
    pub message: String,
}

/// Incoming response: `{id, result?, error?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CdpResponse {
    pub id: i64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<CdpError>,
}

/// Incoming event: `{method, params}`, no `id`.
#[derive(Debug, Clone, Deserialize)]
pub struct CdpEvent {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// CDP frames aren't tagged like DAP's `type` field; responses and events
/// are told apart by the presence of `id`.
#[derive(Debug, Clone)]
pub enum CdpMessage {
    Response(CdpResponse),
    Event(CdpEvent),
}

impl<'de> Deserialize<'de> for CdpMessage {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if value.get("id").is_some() {
            serde_json::from_value(value)
                .map(CdpMessage::Response)
                .map_err(serde::de::Error::custom)
        } else {
            serde_json::from_value(value)
                .map(CdpMessage::Event)
                .map_err(serde::de::Error::custom)
        }
    }
}

/// One target returned by the `GET /json` discovery endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryTarget {
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub target_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptParsedParams {
    #[serde(rename = "scriptId")]
    pub script_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Location {
    #[serde(rename = "scriptId")]
    pub script_id: String,
    #[serde(rename = "lineNumber")]
    pub line_number: i64,
    #[serde(rename = "columnNumber", default)]
    pub column_number: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallFrame {
    #[serde(rename = "callFrameId")]
    pub call_frame_id: String,
    #[serde(rename = "functionName")]
    pub function_name: String,
    pub location: Location,
    #[serde(rename = "scopeChain")]
    pub scope_chain: Vec<Scope>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scope {
    #[serde(rename = "type")]
    pub type_: String,
    pub object: RemoteObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PausedParams {
    #[serde(rename = "callFrames")]
    pub call_frames: Vec<CallFrame>,
    pub reason: String,
}

/// CDP's `Runtime.RemoteObject`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteObject {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "objectId", default)]
    pub object_id: Option<String>,
    #[serde(default)]
    pub preview: Option<ObjectPreview>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectPreview {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub overflow: bool,
    #[serde(default)]
    pub properties: Vec<PreviewPropertyDescriptor>,
    #[serde(default)]
    pub subtype: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewPropertyDescriptor {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(default)]
    pub value: Option<RemoteObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetPropertiesResult {
    pub result: Vec<PropertyDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetBreakpointByUrlResult {
    #[serde(rename = "breakpointId")]
    pub breakpoint_id: String,
    #[serde(default)]
    pub locations: Vec<Location>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluateResult {
    pub result: RemoteObject,
}
