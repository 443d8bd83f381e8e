use super::transport::DapTransport;
use super::transport_trait::DapTransportTrait;
use super::types::*;
use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, warn};

type ResponseSender = oneshot::Sender<std::result::Result<Response, Error>>;
type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// DAP correlator (C3): assigns monotonic `seq`s, matches responses back to
/// pending requests via a oneshot table, and fans named events out to every
/// handler registered for them, in registration order.
pub struct DapClient {
    transport: Arc<Mutex<Box<dyn DapTransportTrait>>>,
    seq_counter: AtomicI32,
    pending: Arc<Mutex<HashMap<i32, ResponseSender>>>,
    event_callbacks: Arc<RwLock<HashMap<String, Vec<EventCallback>>>>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl Drop for DapClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

impl DapClient {
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::Process(format!("failed to connect to DAP adapter: {e}")))?;
        Ok(Self::new_with_transport(Box::new(DapTransport::new(stream))))
    }

    /// Build a client over any transport, real or mocked. The background
    /// reader task is spawned immediately and holds the only reference to
    /// the transport that does reads; writers take the same lock briefly
    /// per call.
    pub fn new_with_transport(transport: Box<dyn DapTransportTrait>) -> Self {
        let transport = Arc::new(Mutex::new(transport));
        let pending: Arc<Mutex<HashMap<i32, ResponseSender>>> = Arc::new(Mutex::new(HashMap::new()));
        let event_callbacks: Arc<RwLock<HashMap<String, Vec<EventCallback>>>> =
            Arc::new(RwLock::new(HashMap::new()));

        let reader_task = tokio::spawn(Self::message_reader(
            transport.clone(),
            pending.clone(),
            event_callbacks.clone(),
        ));

        Self {
            transport,
            seq_counter: AtomicI32::new(1),
            pending,
            event_callbacks,
            reader_task,
        }
    }

    /// Owns reading for the lifetime of the connection. On any read error
    /// the transport is considered closed: every pending request is failed
    /// with `ConnectionClosed` and the table is cleared, matching the
    /// correlator invariant that no request waits forever.
    async fn message_reader(
        transport: Arc<Mutex<Box<dyn DapTransportTrait>>>,
        pending: Arc<Mutex<HashMap<i32, ResponseSender>>>,
        event_callbacks: Arc<RwLock<HashMap<String, Vec<EventCallback>>>>,
    ) {
        loop {
            let msg = {
                let mut transport = transport.lock().await;
                transport.read_message().await
            };

            match msg {
                Ok(Message::Response(resp)) => {
                    let mut pending = pending.lock().await;
                    if let Some(sender) = pending.remove(&resp.request_seq) {
                        let _ = sender.send(Ok(resp));
                    } else {
                        warn!(seq = resp.request_seq, "DAP: response for unknown request");
                    }
                }
                Ok(Message::Event(event)) => {
                    debug!(event = %event.event, "DAP: event received");
                    let callbacks = event_callbacks.read().await;
                    if let Some(handlers) = callbacks.get(&event.event) {
                        for handler in handlers {
                            handler(event.clone());
                        }
                    }
                }
                Ok(Message::Request(req)) => {
                    warn!(command = %req.command, "DAP: reverse requests are not supported");
                }
                Err(_) => {
                    let mut pending = pending.lock().await;
                    for (_, sender) in pending.drain() {
                        let _ = sender.send(Err(Error::ConnectionClosed));
                    }
                    return;
                }
            }
        }
    }

    /// Register a callback invoked on every occurrence of `event_name`.
    /// Multiple registrations for the same name all fire, in the order
    /// they were registered.
    pub async fn on_event<F>(&self, event_name: &str, callback: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let mut callbacks = self.event_callbacks.write().await;
        callbacks
            .entry(event_name.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    pub async fn send_request(&self, command: &str, arguments: Option<Value>) -> Result<Response> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
        let request = Request {
            seq,
            command: command.to_string(),
            arguments,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(seq, tx);

        {
            let mut transport = self.transport.lock().await;
            transport.write_message(&Message::Request(request)).await?;
        }

        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    async fn checked(&self, command: &str, arguments: Option<Value>) -> Result<Response> {
        let response = self.send_request(command, arguments).await?;
        if !response.success {
            return Err(Error::Dap(
                response
                    .message
                    .unwrap_or_else(|| format!("{command} request failed")),
            ));
        }
        Ok(response)
    }

    pub async fn initialize(&self, adapter_id: &str) -> Result<Capabilities> {
        let args = InitializeRequestArguments {
            client_id: Some("debug-orchestrator".to_string()),
            client_name: Some("debug-orchestrator".to_string()),
            adapter_id: adapter_id.to_string(),
            locale: Some("en-US".to_string()),
            lines_start_at_1: Some(true),
            columns_start_at_1: Some(true),
            path_format: Some("path".to_string()),
        };

        let response = self.checked("initialize", Some(serde_json::to_value(args)?)).await?;
        let body = response
            .body
            .ok_or_else(|| Error::Dap("no capabilities in initialize response".to_string()))?;
        Ok(serde_json::from_value(body)?)
    }

    pub async fn launch(&self, args: Value) -> Result<()> {
        self.checked("launch", Some(args)).await?;
        Ok(())
    }

    pub async fn configuration_done(&self) -> Result<()> {
        self.checked("configurationDone", None).await?;
        Ok(())
    }

    /// Runs the `initialize -> register 'initialized' handler -> launch
    /// (fire and forget) -> wait for 'initialized' -> configurationDone`
    /// handshake. The handler is registered before `launch` is sent so the
    /// event can never arrive unobserved.
    pub async fn initialize_and_launch(&self, adapter_id: &str, launch_args: Value) -> Result<()> {
        let capabilities = self.initialize(adapter_id).await?;
        let config_done_supported = capabilities.supports_configuration_done_request.unwrap_or(false);

        let (init_tx, init_rx) = oneshot::channel();
        let init_tx = Arc::new(Mutex::new(Some(init_tx)));
        self.on_event("initialized", move |_event| {
            let init_tx = init_tx.clone();
            tokio::spawn(async move {
                if let Some(sender) = init_tx.lock().await.take() {
                    let _ = sender.send(());
                }
            });
        })
        .await;

        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
        let request = Request {
            seq,
            command: "launch".to_string(),
            arguments: Some(launch_args),
        };
        let (launch_tx, launch_rx) = oneshot::channel();
        self.pending.lock().await.insert(seq, launch_tx);
        {
            let mut transport = self.transport.lock().await;
            transport.write_message(&Message::Request(request)).await?;
        }

        if config_done_supported {
            tokio::time::timeout(std::time::Duration::from_secs(5), init_rx)
                .await
                .map_err(|_| Error::Timeout("waiting for 'initialized' event".to_string()))?
                .map_err(|_| Error::Dap("'initialized' signal was cancelled".to_string()))?;

            self.configuration_done().await?;
        }

        let response = launch_rx.await.map_err(|_| Error::ConnectionClosed)??;
        if !response.success {
            return Err(Error::Dap(
                response.message.unwrap_or_else(|| "launch request failed".to_string()),
            ));
        }
        Ok(())
    }

    pub async fn set_breakpoints(
        &self,
        source: Source,
        breakpoints: Vec<SourceBreakpoint>,
    ) -> Result<Vec<Breakpoint>> {
        let args = SetBreakpointsArguments {
            source,
            breakpoints: Some(breakpoints),
            source_modified: Some(false),
        };
        let response = self
            .checked("setBreakpoints", Some(serde_json::to_value(args)?))
            .await?;

        #[derive(serde::Deserialize)]
        struct Body {
            breakpoints: Vec<Breakpoint>,
        }
        let body: Body = serde_json::from_value(
            response
                .body
                .ok_or_else(|| Error::Dap("no breakpoints in response".to_string()))?,
        )?;
        Ok(body.breakpoints)
    }

    pub async fn continue_execution(&self, thread_id: i32) -> Result<()> {
        let args = ContinueArguments { thread_id };
        self.checked("continue", Some(serde_json::to_value(args)?)).await?;
        Ok(())
    }

    pub async fn next(&self, thread_id: i32) -> Result<()> {
        let args = NextArguments { thread_id };
        self.checked("next", Some(serde_json::to_value(args)?)).await?;
        Ok(())
    }

    pub async fn step_in(&self, thread_id: i32) -> Result<()> {
        let args = StepInArguments { thread_id };
        self.checked("stepIn", Some(serde_json::to_value(args)?)).await?;
        Ok(())
    }

    pub async fn step_out(&self, thread_id: i32) -> Result<()> {
        let args = StepOutArguments { thread_id };
        self.checked("stepOut", Some(serde_json::to_value(args)?)).await?;
        Ok(())
    }

    pub async fn stack_trace(&self, thread_id: i32) -> Result<Vec<StackFrame>> {
        let args = StackTraceArguments {
            thread_id,
            start_frame: Some(0),
            levels: Some(50),
        };
        let response = self.checked("stackTrace", Some(serde_json::to_value(args)?)).await?;

        #[derive(serde::Deserialize)]
        struct Body {
            #[serde(rename = "stackFrames")]
            stack_frames: Vec<StackFrame>,
        }
        let body: Body = serde_json::from_value(
            response
                .body
                .ok_or_else(|| Error::Dap("no stack frames in response".to_string()))?,
        )?;
        Ok(body.stack_frames)
    }

    pub async fn scopes(&self, frame_id: i32) -> Result<Vec<Scope>> {
        let args = ScopesArguments { frame_id };
        let response = self.checked("scopes", Some(serde_json::to_value(args)?)).await?;

        #[derive(serde::Deserialize)]
        struct Body {
            scopes: Vec<Scope>,
        }
        let body: Body = serde_json::from_value(
            response
                .body
                .ok_or_else(|| Error::Dap("no scopes in response".to_string()))?,
        )?;
        Ok(body.scopes)
    }

    pub async fn variables(&self, variables_reference: i32) -> Result<Vec<Variable>> {
        let response = self
            .checked(
                "variables",
                Some(serde_json::json!({ "variablesReference": variables_reference })),
            )
            .await?;

        #[derive(serde::Deserialize)]
        struct Body {
            variables: Vec<Variable>,
        }
        let body: Body = serde_json::from_value(
            response
                .body
                .ok_or_else(|| Error::Dap("no variables in response".to_string()))?,
        )?;
        Ok(body.variables)
    }

    pub async fn evaluate(&self, expression: &str, frame_id: Option<i32>) -> Result<String> {
        let args = EvaluateArguments {
            expression: expression.to_string(),
            frame_id,
            context: Some("repl".to_string()),
        };
        let response = self.checked("evaluate", Some(serde_json::to_value(args)?)).await?;

        #[derive(serde::Deserialize)]
        struct Body {
            result: String,
        }
        let body: Body = serde_json::from_value(
            response
                .body
                .ok_or_else(|| Error::Dap("no result in evaluate response".to_string()))?,
        )?;
        Ok(body.result)
    }

    /// Best-effort: send `disconnect` with `terminateDebuggee`, ignoring
    /// adapter-reported failure. Disconnect never blocks session teardown.
    pub async fn disconnect(&self) -> Result<()> {
        match self
            .send_request("disconnect", Some(serde_json::json!({ "terminateDebuggee": true })))
            .await
        {
            Ok(resp) if !resp.success => {
                warn!(message = ?resp.message, "DAP: disconnect reported failure, ignoring");
            }
            Err(e) => warn!("DAP: disconnect errored, ignoring: {e}"),
            _ => {}
        }
        Ok(())
    }

    /// False once the reader task has observed the transport close.
    pub fn is_connected(&self) -> bool {
        !self.reader_task.is_finished()
    }
}
