use super::{Adapter, BreakpointResult, StackFrameInfo, StopLocation, StopResult, StopSync, VariableInfo};
use crate::cdp::transport::discover_websocket_url;
use crate::cdp::types::{CallFrame, PausedParams, RemoteObject, ScriptParsedParams};
use crate::cdp::CdpClient;
use crate::config::{LaunchConfig, SourceBreakpointRequest};
use crate::net::port::{find_free_port, wait_for_port};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};

const DISCOVERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
const DEFAULT_MAX_DEPTH: i64 = 1;

/// CDP adapter (C8): launches a natively-inspectable debuggee (family B)
/// and drives it over the CDP correlator, mirroring `DapAdapter`'s
/// surrounding plumbing (process spawn, port allocation, stop-sync,
/// disconnect) but speaking the Inspector Protocol's own method and
/// event shapes.
pub struct CdpAdapter {
    client: RwLock<Option<Arc<CdpClient>>>,
    stop_sync: Arc<StopSync>,
    initial_rx: Mutex<Option<oneshot::Receiver<StopResult>>>,
    /// `scriptId -> file path`, populated from `Debugger.scriptParsed`.
    scripts: Arc<RwLock<HashMap<String, String>>>,
    /// `file path -> scriptId`, the reverse of `scripts`.
    file_to_script: Arc<RwLock<HashMap<String, String>>>,
    /// Call frames from the most recent `Debugger.paused`; cleared on
    /// `Debugger.resumed`. Frame "ids" handed out on the `Adapter` trait
    /// are indices into this vector.
    paused_frames: Arc<RwLock<Vec<CallFrame>>>,
    /// CDP breakpoint ids currently set for each file, so `set_breakpoints`
    /// can remove-then-reset (CDP has no atomic replace).
    bp_ids: Mutex<HashMap<String, Vec<String>>>,
    exit_watcher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Default for CdpAdapter {
    fn default() -> Self {
        Self {
            client: RwLock::new(None),
            stop_sync: Arc::new(StopSync::new()),
            initial_rx: Mutex::new(None),
            scripts: Arc::new(RwLock::new(HashMap::new())),
            file_to_script: Arc::new(RwLock::new(HashMap::new())),
            paused_frames: Arc::new(RwLock::new(Vec::new())),
            bp_ids: Mutex::new(HashMap::new()),
            exit_watcher: Mutex::new(None),
        }
    }
}

impl CdpAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self) -> Result<Arc<CdpClient>> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Internal("CDP adapter used before start()".to_string()))
    }

    fn build_env(config: &LaunchConfig) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = std::env::vars().collect();
        for (k, v) in &config.env {
            env.insert(k.clone(), v.clone());
        }
        env
    }

    fn file_to_url(file: &str) -> String {
        format!("file://{file}")
    }

    fn url_to_file(url: &str) -> Option<String> {
        url.strip_prefix("file://").map(|s| s.to_string())
    }

    /// Value-formatter rules, applied in order.
    fn format_value(obj: &RemoteObject) -> String {
        if obj.type_ == "undefined" {
            return "undefined".to_string();
        }
        if obj.type_ == "string" {
            let s = obj.value.as_ref().and_then(|v| v.as_str()).unwrap_or("");
            return serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""));
        }
        if obj.type_ == "number" || obj.type_ == "boolean" {
            if let Some(v) = &obj.value {
                return v.to_string();
            }
        }
        if obj.subtype.as_deref() == Some("null") {
            return "null".to_string();
        }
        if let Some(description) = &obj.description {
            return description.clone();
        }
        if let Some(preview) = &obj.preview {
            let is_array = preview.subtype.as_deref() == Some("array");
            if !preview.properties.is_empty() || (preview.properties.is_empty() && !preview.overflow) {
                let rendered: Vec<String> = preview
                    .properties
                    .iter()
                    .map(|p| format!("{}: {}", p.name, p.value.as_deref().unwrap_or("undefined")))
                    .collect();
                if is_array {
                    return format!("[{}]", rendered.join(", "));
                }
                if !rendered.is_empty() {
                    return format!("{{{}}}", rendered.join(", "));
                }
            }
            if let Some(description) = &preview.description {
                return description.clone();
            }
        }
        obj.type_.clone()
    }

    fn is_expandable(obj: &RemoteObject, depth: i64, max_depth: i64) -> bool {
        obj.object_id.is_some()
            && (obj.type_ == "object" || obj.subtype.as_deref() == Some("array"))
            && depth < max_depth
    }

    async fn stack_frame_info(&self, index: usize, frame: &CallFrame) -> StackFrameInfo {
        let scripts = self.scripts.read().await;
        let file = scripts.get(&frame.location.script_id).cloned();
        StackFrameInfo {
            id: index as i64,
            name: frame.function_name.clone(),
            file,
            line: frame.location.line_number + 1,
            column: frame.location.column_number.unwrap_or(0) + 1,
        }
    }

}

#[async_trait]
impl Adapter for CdpAdapter {
    async fn start(&self, config: &LaunchConfig) -> Result<()> {
        config.validate()?;
        let program = config
            .program
            .clone()
            .ok_or_else(|| Error::Configuration("program is required for the CDP adapter".to_string()))?;

        let port = find_free_port()?;
        let runtime = config
            .runtime_executable
            .as_deref()
            .map(|r| shellexpand::tilde(r).into_owned())
            .unwrap_or_else(|| "node".to_string());

        let mut args: Vec<String> = config.runtime_args.clone();
        args.push(format!("--inspect-brk=127.0.0.1:{port}"));
        args.push(program);
        args.extend(config.args.iter().cloned());

        info!(port, "CDP adapter: spawning debuggee");

        // Armed before spawn: the entry pause can fire as soon
        // as `Runtime.enable` lands, before this function returns.
        let initial_rx = self.stop_sync.arm().await;

        let mut command = Command::new(&runtime);
        command.args(&args).envs(Self::build_env(config)).kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            command.current_dir(cwd);
        }
        let mut child = command
            .spawn()
            .map_err(|e| Error::Process(format!("failed to spawn {runtime}: {e}")))?;

        wait_for_port(port, Some(DISCOVERY_TIMEOUT)).await?;
        let ws_url = discover_websocket_url("127.0.0.1", port).await?;
        let client = Arc::new(CdpClient::connect(&ws_url).await?);

        let scripts = self.scripts.clone();
        let file_to_script = self.file_to_script.clone();
        client
            .on_event("Debugger.scriptParsed", move |event| {
                let scripts = scripts.clone();
                let file_to_script = file_to_script.clone();
                let Some(params) = event.params.clone() else { return };
                tokio::spawn(async move {
                    let Ok(parsed) = serde_json::from_value::<ScriptParsedParams>(params) else {
                        return;
                    };
                    let Some(path) = Self::url_to_file(&parsed.url) else { return };
                    scripts.write().await.insert(parsed.script_id.clone(), path.clone());
                    file_to_script.write().await.insert(path, parsed.script_id);
                });
            })
            .await;

        let stop_sync = self.stop_sync.clone();
        let paused_frames = self.paused_frames.clone();
        let scripts_for_pause = self.scripts.clone();
        client
            .on_event("Debugger.paused", move |event| {
                let stop_sync = stop_sync.clone();
                let paused_frames = paused_frames.clone();
                let scripts_for_pause = scripts_for_pause.clone();
                let Some(params) = event.params.clone() else { return };
                tokio::spawn(async move {
                    let Ok(parsed) = serde_json::from_value::<PausedParams>(params) else {
                        return;
                    };
                    *paused_frames.write().await = parsed.call_frames.clone();

                    let location = if let Some(frame) = parsed.call_frames.first() {
                        let file = scripts_for_pause.read().await.get(&frame.location.script_id).cloned();
                        Some(StopLocation {
                            file: file.unwrap_or_default(),
                            line: frame.location.line_number + 1,
                            column: Some(frame.location.column_number.unwrap_or(0) + 1),
                            name: Some(frame.function_name.clone()),
                        })
                    } else {
                        None
                    };

                    stop_sync
                        .fire(StopResult {
                            reason: parsed.reason,
                            thread_id: Some(1),
                            location,
                            terminated: false,
                        })
                        .await;
                });
            })
            .await;

        let paused_frames_for_resume = self.paused_frames.clone();
        client
            .on_event("Debugger.resumed", move |_event| {
                let paused_frames = paused_frames_for_resume.clone();
                tokio::spawn(async move {
                    paused_frames.write().await.clear();
                });
            })
            .await;

        client.enable_debugger().await?;
        client.enable_runtime().await?;

        let exit_stop_sync = self.stop_sync.clone();
        let exit_watcher = tokio::spawn(async move {
            let _ = child.wait().await;
            debug!("CDP adapter: debuggee process exited");
            exit_stop_sync.fire(StopResult::terminated()).await;
        });

        *self.exit_watcher.lock().await = Some(exit_watcher);
        *self.client.write().await = Some(client);
        *self.initial_rx.lock().await = Some(initial_rx);

        Ok(())
    }

    async fn wait_for_initial_pause(&self) -> Result<StopResult> {
        let rx = self.initial_rx.lock().await.take();
        match rx {
            Some(rx) => self.stop_sync.wait_for_initial_pause(rx).await,
            None => {
                let (_tx, rx) = oneshot::channel();
                self.stop_sync.wait_for_initial_pause(rx).await
            }
        }
    }

    async fn set_breakpoints(
        &self,
        file: &str,
        breakpoints: Vec<SourceBreakpointRequest>,
    ) -> Result<Vec<BreakpointResult>> {
        let client = self.client().await?;
        let mut bp_ids = self.bp_ids.lock().await;

        if let Some(existing) = bp_ids.remove(file) {
            for id in existing {
                if let Err(e) = client.remove_breakpoint(&id).await {
                    warn!("CDP adapter: failed to remove stale breakpoint {id}: {e}");
                }
            }
        }

        let url = Self::file_to_url(file);
        let mut results = Vec::with_capacity(breakpoints.len());
        let mut new_ids = Vec::with_capacity(breakpoints.len());

        for bp in breakpoints {
            let set_result = client
                .set_breakpoint_by_url(
                    &url,
                    bp.line - 1,
                    bp.column.map(|c| c - 1),
                    bp.condition.as_deref(),
                )
                .await?;

            let verified = !set_result.locations.is_empty();
            let line = set_result
                .locations
                .first()
                .map(|l| l.line_number + 1)
                .unwrap_or(bp.line);

            new_ids.push(set_result.breakpoint_id.clone());
            results.push(BreakpointResult {
                line,
                verified,
                id: Some(set_result.breakpoint_id),
                message: None,
                condition: bp.condition,
                hit_condition: bp.hit_condition,
                log_message: bp.log_message,
            });
        }

        bp_ids.insert(file.to_string(), new_ids);
        Ok(results)
    }

    async fn continue_execution(&self, _thread_id: Option<i64>) -> Result<StopResult> {
        let client = self.client().await?;
        let rx = self.stop_sync.arm().await;
        client.resume().await?;
        self.stop_sync.wait(rx, None).await
    }

    async fn step_over(&self, _thread_id: Option<i64>) -> Result<StopResult> {
        let client = self.client().await?;
        let rx = self.stop_sync.arm().await;
        client.step_over().await?;
        self.stop_sync.wait(rx, None).await
    }

    async fn step_in(&self, _thread_id: Option<i64>) -> Result<StopResult> {
        let client = self.client().await?;
        let rx = self.stop_sync.arm().await;
        client.step_into().await?;
        self.stop_sync.wait(rx, None).await
    }

    async fn step_out(&self, _thread_id: Option<i64>) -> Result<StopResult> {
        let client = self.client().await?;
        let rx = self.stop_sync.arm().await;
        client.step_out().await?;
        self.stop_sync.wait(rx, None).await
    }

    async fn get_call_stack(&self, _thread_id: Option<i64>) -> Result<Vec<StackFrameInfo>> {
        let frames = self.paused_frames.read().await;
        let mut out = Vec::with_capacity(frames.len());
        for (i, frame) in frames.iter().enumerate() {
            out.push(self.stack_frame_info(i, frame).await);
        }
        Ok(out)
    }

    async fn get_variables(
        &self,
        frame_id: Option<i64>,
        scope: Option<String>,
        max_depth: Option<i64>,
    ) -> Result<Vec<VariableInfo>> {
        let client = self.client().await?;
        let max_depth = max_depth.unwrap_or(DEFAULT_MAX_DEPTH);
        let frames = self.paused_frames.read().await;
        let index = frame_id.unwrap_or(0) as usize;
        let frame = frames
            .get(index)
            .ok_or_else(|| Error::Cdp("no paused call frame at that index".to_string()))?;

        let wanted = scope.map(|s| s.to_lowercase());
        let matching: Vec<_> = frame
            .scope_chain
            .iter()
            .filter(|s| match &wanted {
                Some(name) => s.type_.to_lowercase() == *name,
                None => s.type_ == "local" || s.type_ == "closure",
            })
            .collect();

        let mut variables = Vec::new();
        for scope in matching {
            let Some(object_id) = &scope.object.object_id else { continue };
            let properties = client.get_properties(object_id).await?;
            for prop in properties {
                if prop.name == "__proto__" {
                    continue;
                }
                let Some(value) = prop.value else { continue };
                let expandable = Self::is_expandable(&value, 0, max_depth);
                variables.push(VariableInfo {
                    name: prop.name,
                    value: Self::format_value(&value),
                    type_: Some(value.type_.clone()),
                    variables_reference: if expandable { 1 } else { 0 },
                });
            }
        }
        Ok(variables)
    }

    async fn evaluate(&self, expression: &str, frame_id: Option<i64>) -> Result<String> {
        let client = self.client().await?;
        let frames = self.paused_frames.read().await;
        let index = frame_id.unwrap_or(0) as usize;

        let result = if let Some(frame) = frames.get(index) {
            client.evaluate_on_call_frame(&frame.call_frame_id, expression).await?
        } else {
            drop(frames);
            client.evaluate(expression).await?
        };
        Ok(Self::format_value(&result))
    }

    async fn disconnect(&self) -> Result<()> {
        self.client.write().await.take();
        // Resolve any step/continue still waiting on a pause before tearing
        // down the watcher that would otherwise have been its only source
        // of a terminated result: CDP has no wire `terminated` event, so
        // without this an in-flight listener blocks for the full 30s
        // timeout instead of observing `terminated:true`.
        self.stop_sync.fire(StopResult::terminated()).await;
        if let Some(watcher) = self.exit_watcher.lock().await.take() {
            watcher.abort();
        }
        Ok(())
    }

    async fn on_stopped(&self, cb: Box<dyn Fn(StopResult) + Send + Sync>) {
        self.stop_sync.add_listener(move |result| cb(result)).await;
    }
}
