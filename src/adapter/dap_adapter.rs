use super::{Adapter, BreakpointResult, StackFrameInfo, StopResult, StopSync, VariableInfo};
use crate::config::{LaunchConfig, SourceBreakpointRequest};
use crate::dap::types::{Source, SourceBreakpoint};
use crate::dap::DapClient;
use crate::net::port::{find_free_port, wait_for_port};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};

const PREREQUISITE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
const PORT_WAIT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// DAP adapter (C7): launches a `debugpy`-speaking debuggee and drives it
/// over the DAP correlator, using the command/args shape `debugpy`
/// expects and the `DapClient::initialize_and_launch` handshake sequence.
pub struct DapAdapter {
    client: RwLock<Option<Arc<DapClient>>>,
    stop_sync: Arc<StopSync>,
    initial_rx: Mutex<Option<oneshot::Receiver<StopResult>>>,
    current_thread_id: Arc<Mutex<Option<i64>>>,
    last_frame_id: Mutex<Option<i64>>,
    exit_watcher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Default for DapAdapter {
    fn default() -> Self {
        Self {
            client: RwLock::new(None),
            stop_sync: Arc::new(StopSync::new()),
            initial_rx: Mutex::new(None),
            current_thread_id: Arc::new(Mutex::new(None)),
            last_frame_id: Mutex::new(None),
            exit_watcher: Mutex::new(None),
        }
    }
}

impl DapAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self) -> Result<Arc<DapClient>> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Internal("DAP adapter used before start()".to_string()))
    }

    async fn check_prerequisite(python_path: &str) -> Result<()> {
        let output = tokio::time::timeout(
            PREREQUISITE_TIMEOUT,
            Command::new(python_path).arg("-c").arg("import debugpy").output(),
        )
        .await
        .map_err(|_| {
            Error::Prerequisite(format!(
                "timed out checking for debugpy; install with `{python_path} -m pip install debugpy`"
            ))
        })?
        .map_err(|e| Error::Process(format!("failed to run {python_path}: {e}")))?;

        if !output.status.success() {
            return Err(Error::Prerequisite(format!(
                "debugpy is not importable under {python_path}; install with `{python_path} -m pip install debugpy`"
            )));
        }
        Ok(())
    }

    fn build_env(config: &LaunchConfig) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = std::env::vars().collect();
        for (k, v) in &config.env {
            env.insert(k.clone(), v.clone());
        }
        env
    }

    /// Resolve a frame id for variable/eval requests that didn't supply
    /// one: prefer the caller's `frame_id`, then the id cached by the most
    /// recent `get_call_stack`, and otherwise fetch the stack trace for
    /// the currently stopped thread and default to its top frame (mirrors
    /// the CDP adapter's `paused_frames[0]` default).
    async fn resolve_frame_id(&self, frame_id: Option<i64>) -> Result<i64> {
        if let Some(id) = frame_id {
            return Ok(id);
        }
        if let Some(id) = *self.last_frame_id.lock().await {
            return Ok(id);
        }

        let client = self.client().await?;
        let tid = (*self.current_thread_id.lock().await)
            .ok_or_else(|| Error::Dap("no stopped thread to read a stack frame from".to_string()))?;
        let frames = client.stack_trace(tid as i32).await?;
        let top = frames
            .first()
            .ok_or_else(|| Error::Dap("stack trace returned no frames".to_string()))?;
        let id = top.id as i64;
        *self.last_frame_id.lock().await = Some(id);
        Ok(id)
    }
}

#[async_trait]
impl Adapter for DapAdapter {
    async fn start(&self, config: &LaunchConfig) -> Result<()> {
        config.validate()?;
        let python_path = config
            .python_path
            .as_deref()
            .map(|p| shellexpand::tilde(p).into_owned())
            .unwrap_or_else(|| "python3".to_string());
        Self::check_prerequisite(&python_path).await?;

        let port = find_free_port()?;
        let mut args: Vec<String> = vec![
            "-m".to_string(),
            "debugpy".to_string(),
            "--listen".to_string(),
            format!("127.0.0.1:{port}"),
            "--wait-for-client".to_string(),
            "--".to_string(),
        ];
        if let Some(module) = &config.module {
            args.push("-m".to_string());
            args.push(module.clone());
        } else if let Some(program) = &config.program {
            args.push(program.clone());
        } else {
            return Err(Error::Configuration("program or module is required".to_string()));
        }
        args.extend(config.args.iter().cloned());

        info!(port, "DAP adapter: spawning debuggee");
        let mut command = Command::new(&python_path);
        command.args(&args).envs(Self::build_env(config)).kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            command.current_dir(cwd);
        }
        let mut child = command
            .spawn()
            .map_err(|e| Error::Process(format!("failed to spawn {python_path}: {e}")))?;

        wait_for_port(port, Some(PORT_WAIT_TIMEOUT)).await?;

        let client = Arc::new(DapClient::connect("127.0.0.1", port).await?);

        let stop_sync = self.stop_sync.clone();
        let ctid = self.current_thread_id.clone();
        client
            .on_event("stopped", move |event| {
                let stop_sync = stop_sync.clone();
                let ctid = ctid.clone();
                let body = event.body.clone();
                tokio::spawn(async move {
                    let reason = body
                        .as_ref()
                        .and_then(|b| b.get("reason"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown")
                        .to_string();
                    let thread_id = body.as_ref().and_then(|b| b.get("threadId")).and_then(|v| v.as_i64());
                    *ctid.lock().await = thread_id;
                    stop_sync
                        .fire(StopResult {
                            reason,
                            thread_id,
                            location: None,
                            terminated: false,
                        })
                        .await;
                });
            })
            .await;

        let stop_sync_terminated = self.stop_sync.clone();
        client
            .on_event("terminated", move |_event| {
                let stop_sync = stop_sync_terminated.clone();
                tokio::spawn(async move {
                    stop_sync.fire(StopResult::terminated()).await;
                });
            })
            .await;

        let initial_rx = self.stop_sync.arm().await;

        let mut launch_args = json!({
            "stopOnEntry": true,
            "justMyCode": true,
            "args": config.args,
        });
        if let Some(program) = &config.program {
            launch_args["program"] = json!(program);
        }
        if let Some(module) = &config.module {
            launch_args["module"] = json!(module);
        }
        if let Some(cwd) = &config.cwd {
            launch_args["cwd"] = json!(cwd);
        }
        if !config.env.is_empty() {
            launch_args["env"] = json!(config.env);
        }

        client.initialize_and_launch("debugpy", launch_args).await?;

        let exit_stop_sync = self.stop_sync.clone();
        let exit_watcher = tokio::spawn(async move {
            let _ = child.wait().await;
            debug!("DAP adapter: debuggee process exited");
            exit_stop_sync.fire(StopResult::terminated()).await;
        });

        // `child` lives inside `exit_watcher` from here on; disconnect
        // aborts the watcher, dropping the child (spawned with
        // `kill_on_drop`).
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
        let name = std::path::Path::new(file)
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string());

        let source = Source {
            name,
            path: Some(file.to_string()),
            source_reference: None,
        };

        let dap_breakpoints: Vec<SourceBreakpoint> = breakpoints
            .iter()
            .map(|bp| SourceBreakpoint {
                line: bp.line as i32,
                column: bp.column.map(|c| c as i32),
                condition: bp.condition.clone(),
                hit_condition: bp.hit_condition.clone(),
                log_message: bp.log_message.clone(),
            })
            .collect();

        let results = client.set_breakpoints(source, dap_breakpoints).await?;

        Ok(results
            .into_iter()
            .zip(breakpoints.into_iter())
            .map(|(result, request)| BreakpointResult {
                line: result.line.map(|l| l as i64).unwrap_or(request.line),
                verified: result.verified,
                id: result.id.map(|i| i.to_string()),
                message: result.message,
                condition: request.condition,
                hit_condition: request.hit_condition,
                log_message: request.log_message,
            })
            .collect())
    }

    async fn continue_execution(&self, thread_id: Option<i64>) -> Result<StopResult> {
        let client = self.client().await?;
        let tid = thread_id
            .or(*self.current_thread_id.lock().await)
            .ok_or_else(|| Error::Dap("no stopped thread to continue".to_string()))?;

        let rx = self.stop_sync.arm().await;
        client.continue_execution(tid as i32).await?;
        self.stop_sync.wait(rx, None).await
    }

    async fn step_over(&self, thread_id: Option<i64>) -> Result<StopResult> {
        let client = self.client().await?;
        let tid = thread_id
            .or(*self.current_thread_id.lock().await)
            .ok_or_else(|| Error::Dap("no stopped thread to step".to_string()))?;

        let rx = self.stop_sync.arm().await;
        client.next(tid as i32).await?;
        self.stop_sync.wait(rx, None).await
    }

    async fn step_in(&self, thread_id: Option<i64>) -> Result<StopResult> {
        let client = self.client().await?;
        let tid = thread_id
            .or(*self.current_thread_id.lock().await)
            .ok_or_else(|| Error::Dap("no stopped thread to step".to_string()))?;

        let rx = self.stop_sync.arm().await;
        client.step_in(tid as i32).await?;
        self.stop_sync.wait(rx, None).await
    }

    async fn step_out(&self, thread_id: Option<i64>) -> Result<StopResult> {
        let client = self.client().await?;
        let tid = thread_id
            .or(*self.current_thread_id.lock().await)
            .ok_or_else(|| Error::Dap("no stopped thread to step".to_string()))?;

        let rx = self.stop_sync.arm().await;
        client.step_out(tid as i32).await?;
        self.stop_sync.wait(rx, None).await
    }

    async fn get_call_stack(&self, thread_id: Option<i64>) -> Result<Vec<StackFrameInfo>> {
        let client = self.client().await?;
        let tid = thread_id
            .or(*self.current_thread_id.lock().await)
            .ok_or_else(|| Error::Dap("no stopped thread for stack trace".to_string()))?;

        let frames = client.stack_trace(tid as i32).await?;
        if let Some(first) = frames.first() {
            *self.last_frame_id.lock().await = Some(first.id as i64);
        }

        Ok(frames
            .into_iter()
            .map(|f| StackFrameInfo {
                id: f.id as i64,
                name: f.name,
                file: f.source.and_then(|s| s.path),
                line: f.line as i64,
                column: f.column as i64,
            })
            .collect())
    }

    async fn get_variables(
        &self,
        frame_id: Option<i64>,
        scope: Option<String>,
        _max_depth: Option<i64>,
    ) -> Result<Vec<VariableInfo>> {
        let client = self.client().await?;
        let frame_id = self.resolve_frame_id(frame_id).await?;

        let scopes = client.scopes(frame_id as i32).await?;
        let wanted = scope.map(|s| s.to_lowercase());
        let matching: Vec<_> = scopes
            .into_iter()
            .filter(|s| match &wanted {
                Some(name) => s.name.to_lowercase().contains(name.as_str()),
                None => s.name.to_lowercase().contains("local"),
            })
            .collect();

        let mut variables = Vec::new();
        for scope in matching {
            let scope_vars = client.variables(scope.variables_reference).await?;
            variables.extend(scope_vars.into_iter().map(|v| VariableInfo {
                name: v.name,
                value: v.value,
                type_: v.type_,
                variables_reference: v.variables_reference as i64,
            }));
        }
        Ok(variables)
    }

    async fn evaluate(&self, expression: &str, frame_id: Option<i64>) -> Result<String> {
        let client = self.client().await?;
        // Falls back to a frameless (global) evaluate when no frame can be
        // resolved, rather than failing outright: DAP's `evaluate` is legal
        // without a frame in "repl" context.
        let frame_id = self.resolve_frame_id(frame_id).await.ok();
        client.evaluate(expression, frame_id.map(|f| f as i32)).await
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(client) = self.client.write().await.take() {
            if let Err(e) = client.disconnect().await {
                warn!("DAP adapter: disconnect errored, ignoring: {e}");
            }
        }
        // Resolve any step/continue still waiting on a pause before tearing
        // down the watcher that would otherwise have been its only source
        // of a terminated result: without this, a listener armed during an
        // in-flight step blocks for the full 30s timeout instead of
        // observing `terminated:true`.
        self.stop_sync.fire(StopResult::terminated()).await;
        if let Some(watcher) = self.exit_watcher.lock().await.take() {
            // Aborting drops the watcher's owned `Child`, which was
            // spawned with `kill_on_drop(true)`.
            watcher.abort();
        }
        Ok(())
    }

    async fn on_stopped(&self, cb: Box<dyn Fn(StopResult) + Send + Sync>) {
        self.stop_sync.add_listener(move |result| cb(result)).await;
    }
}
