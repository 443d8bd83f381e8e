pub mod client;
pub mod transport;
pub mod types;

pub use client::CdpClient;
pub use transport::{discover_websocket_url, CdpTransportTrait};
