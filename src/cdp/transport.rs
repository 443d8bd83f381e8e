use super::types::{CdpMessage, CdpRequest, DiscoveryTarget};
use crate::{Error, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

const DISCOVERY_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);
const DISCOVERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Poll `http://host:port/json` until a target with a `webSocketDebuggerUrl`
/// shows up or the discovery timeout elapses. The runtime doesn't start
/// listening on the inspector port instantaneously after spawn, hence the
/// poll rather than a single request.
pub async fn discover_websocket_url(host: &str, port: u16) -> Result<String> {
    let url = format!("http://{host}:{port}/json");
    let deadline = tokio::time::Instant::now() + DISCOVERY_TIMEOUT;

    loop {
        let attempt = reqwest::get(&url).await.and_then(|r| r.error_for_status());
        match attempt {
            Ok(response) => match response.json::<Vec<DiscoveryTarget>>().await {
                Ok(targets) => {
                    if let Some(target) = targets
                        .into_iter()
                        .find_map(|t| t.web_socket_debugger_url)
                    {
                        debug!(%target, "CDP: discovered debugger websocket URL");
                        return Ok(target);
                    }
                }
                Err(e) => warn!("CDP: discovery response was not valid JSON: {e}"),
            },
            Err(_) if tokio::time::Instant::now() < deadline => {}
            Err(e) => {
                return Err(Error::Timeout(format!(
                    "timed out discovering CDP debugger URL at {url}: {e}"
                )));
            }
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(Error::Timeout(format!(
                "timed out discovering a CDP target with webSocketDebuggerUrl at {url}"
            )));
        }
        tokio::time::sleep(DISCOVERY_POLL_INTERVAL).await;
    }
}

#[async_trait]
pub trait CdpTransportTrait: Send + Sync {
    async fn read_message(&mut self) -> Result<CdpMessage>;
    async fn write_request(&mut self, request: &CdpRequest) -> Result<()>;
}

pub struct CdpTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl CdpTransport {
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (stream, _response) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| Error::Cdp(format!("failed to open websocket to {ws_url}: {e}")))?;
        Ok(Self { stream })
    }
}

#[async_trait]
impl CdpTransportTrait for CdpTransport {
    async fn read_message(&mut self) -> Result<CdpMessage> {
        loop {
            let frame = self
                .stream
                .next()
                .await
                .ok_or(Error::ConnectionClosed)?
                .map_err(|e| Error::Cdp(format!("websocket read error: {e}")))?;

            match frame {
                WsMessage::Text(text) => {
                    return serde_json::from_str(&text)
                        .map_err(|e| Error::Cdp(format!("malformed CDP frame: {e}")));
                }
                WsMessage::Close(_) => return Err(Error::ConnectionClosed),
                _ => continue,
            }
        }
    }

    async fn write_request(&mut self, request: &CdpRequest) -> Result<()> {
        let text = serde_json::to_string(request)?;
        self.stream
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| Error::Cdp(format!("websocket write error: {e}")))
    }
}
