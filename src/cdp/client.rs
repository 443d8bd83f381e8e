use super::transport::{CdpTransport, CdpTransportTrait};
use super::types::*;
use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, warn};

type ResponseSender = oneshot::Sender<std::result::Result<CdpResponse, Error>>;
type EventCallback = Arc<dyn Fn(CdpEvent) + Send + Sync>;

/// CDP correlator (C5): same shape as the DAP correlator, keyed by `id`
/// instead of `seq`, with a `{message}`-only error body.
pub struct CdpClient {
    transport: Arc<Mutex<Box<dyn CdpTransportTrait>>>,
    id_counter: AtomicI64,
    pending: Arc<Mutex<HashMap<i64, ResponseSender>>>,
    event_callbacks: Arc<RwLock<HashMap<String, Vec<EventCallback>>>>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

impl CdpClient {
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let transport = CdpTransport::connect(ws_url).await?;
        Ok(Self::new_with_transport(Box::new(transport)))
    }

    pub fn new_with_transport(transport: Box<dyn CdpTransportTrait>) -> Self {
        let transport = Arc::new(Mutex::new(transport));
        let pending: Arc<Mutex<HashMap<i64, ResponseSender>>> = Arc::new(Mutex::new(HashMap::new()));
        let event_callbacks: Arc<RwLock<HashMap<String, Vec<EventCallback>>>> =
            Arc::new(RwLock::new(HashMap::new()));

        let reader_task = tokio::spawn(Self::message_reader(
            transport.clone(),
            pending.clone(),
            event_callbacks.clone(),
        ));

        Self {
            transport,
            id_counter: AtomicI64::new(1),
            pending,
            event_callbacks,
            reader_task,
        }
    }

    async fn message_reader(
        transport: Arc<Mutex<Box<dyn CdpTransportTrait>>>,
        pending: Arc<Mutex<HashMap<i64, ResponseSender>>>,
        event_callbacks: Arc<RwLock<HashMap<String, Vec<EventCallback>>>>,
    ) {
        loop {
            let msg = {
                let mut transport = transport.lock().await;
                transport.read_message().await
            };

            match msg {
                Ok(CdpMessage::Response(resp)) => {
                    let mut pending = pending.lock().await;
                    if let Some(sender) = pending.remove(&resp.id) {
                        let _ = sender.send(Ok(resp));
                    } else {
                        warn!(id = resp.id, "CDP: response for unknown request");
                    }
                }
                Ok(CdpMessage::Event(event)) => {
                    debug!(method = %event.method, "CDP: event received");
                    let callbacks = event_callbacks.read().await;
                    if let Some(handlers) = callbacks.get(&event.method) {
                        for handler in handlers {
                            handler(event.clone());
                        }
                    }
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

    pub async fn on_event<F>(&self, method: &str, callback: F)
    where
        F: Fn(CdpEvent) + Send + Sync + 'static,
    {
        let mut callbacks = self.event_callbacks.write().await;
        callbacks.entry(method.to_string()).or_default().push(Arc::new(callback));
    }

    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let request = CdpRequest {
            id,
            method: method.to_string(),
            params,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        {
            let mut transport = self.transport.lock().await;
            transport.write_request(&request).await?;
        }

        let response = rx.await.map_err(|_| Error::ConnectionClosed)??;
        if let Some(error) = response.error {
            return Err(Error::Cdp(error.message));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    pub async fn enable_debugger(&self) -> Result<()> {
        self.send("Debugger.enable", None).await?;
        Ok(())
    }

    pub async fn enable_runtime(&self) -> Result<()> {
        self.send("Runtime.enable", None).await?;
        Ok(())
    }

    pub async fn set_breakpoint_by_url(
        &self,
        url: &str,
        line_number: i64,
        column_number: Option<i64>,
        condition: Option<&str>,
    ) -> Result<SetBreakpointByUrlResult> {
        let mut params = serde_json::json!({
            "url": url,
            "lineNumber": line_number,
        });
        if let Some(col) = column_number {
            params["columnNumber"] = serde_json::json!(col);
        }
        if let Some(cond) = condition {
            params["condition"] = serde_json::json!(cond);
        }
        let result = self.send("Debugger.setBreakpointByUrl", Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn remove_breakpoint(&self, breakpoint_id: &str) -> Result<()> {
        self.send(
            "Debugger.removeBreakpoint",
            Some(serde_json::json!({ "breakpointId": breakpoint_id })),
        )
        .await?;
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        self.send("Debugger.resume", None).await?;
        Ok(())
    }

    pub async fn step_over(&self) -> Result<()> {
        self.send("Debugger.stepOver", None).await?;
        Ok(())
    }

    pub async fn step_into(&self) -> Result<()> {
        self.send("Debugger.stepInto", None).await?;
        Ok(())
    }

    pub async fn step_out(&self) -> Result<()> {
        self.send("Debugger.stepOut", None).await?;
        Ok(())
    }

    pub async fn get_properties(&self, object_id: &str) -> Result<Vec<PropertyDescriptor>> {
        let result = self
            .send(
                "Runtime.getProperties",
                Some(serde_json::json!({
                    "objectId": object_id,
                    "ownProperties": true,
                    "generatePreview": true,
                })),
            )
            .await?;
        let parsed: GetPropertiesResult = serde_json::from_value(result)?;
        Ok(parsed.result)
    }

    pub async fn evaluate_on_call_frame(&self, call_frame_id: &str, expression: &str) -> Result<RemoteObject> {
        let result = self
            .send(
                "Debugger.evaluateOnCallFrame",
                Some(serde_json::json!({
                    "callFrameId": call_frame_id,
                    "expression": expression,
                    "generatePreview": true,
                })),
            )
            .await?;
        let parsed: EvaluateResult = serde_json::from_value(result)?;
        Ok(parsed.result)
    }

    pub async fn evaluate(&self, expression: &str) -> Result<RemoteObject> {
        let result = self
            .send(
                "Runtime.evaluate",
                Some(serde_json::json!({
                    "expression": expression,
                    "generatePreview": true,
                })),
            )
            .await?;
        let parsed: EvaluateResult = serde_json::from_value(result)?;
        Ok(parsed.result)
    }

    pub fn is_connected(&self) -> bool {
        !self.reader_task.is_finished()
    }
}
