use super::transport_trait::DapTransportTrait;
use super::types::Message;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// Incremental decoder for the `Content-Length: N\r\n\r\n<N bytes of JSON>`
/// framing used by DAP. Feed it bytes as they arrive over the wire; it
/// buffers any trailing partial message and discards malformed frames
/// (missing header, or a body that fails to parse as JSON), resuming
/// framing at the next header boundary rather than giving up.
#[derive(Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

const SEPARATOR: &[u8] = b"\r\n\r\n";
const SEPARATOR_LEN: usize = 4;

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(SEPARATOR_LEN).position(|w| w == SEPARATOR)
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pull the next complete, well-formed message out of the buffer, if
    /// any. Skips past malformed frames internally; only returns `None`
    /// when the remaining buffer holds no complete frame at all.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            let Some(header_end) = find_header_terminator(&self.buf) else {
                return Ok(None);
            };

            let header_text = String::from_utf8_lossy(&self.buf[..header_end]).into_owned();
            let content_length = header_text
                .lines()
                .find_map(|line| line.strip_prefix("Content-Length:"))
                .and_then(|v| v.trim().parse::<usize>().ok());

            let Some(content_length) = content_length else {
                warn!("DAP: dropping frame with no Content-Length header");
                self.buf.split_to(header_end + SEPARATOR_LEN);
                continue;
            };

            let body_start = header_end + SEPARATOR_LEN;
            let body_end = body_start + content_length;
            if self.buf.len() < body_end {
                // Partial body; wait for more bytes, leaving the buffer intact.
                return Ok(None);
            }

            let body = self.buf[body_start..body_end].to_vec();
            self.buf.split_to(body_end);

            match serde_json::from_slice::<Message>(&body) {
                Ok(msg) => {
                    trace!(bytes = content_length, "DAP: decoded frame");
                    return Ok(Some(msg));
                }
                Err(e) => {
                    warn!("DAP: dropping frame with unparsable JSON body: {e}");
                    continue;
                }
            }
        }
    }
}

pub fn encode(msg: &Message) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(msg)?;
    let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    out.extend_from_slice(&body);
    Ok(out)
}

/// DAP transport over a TCP stream. Framing lives in `FrameDecoder`; this
/// type owns the socket halves and feeds/drains bytes across them.
pub struct DapTransport {
    reader: ReadHalf<TcpStream>,
    writer: WriteHalf<TcpStream>,
    decoder: FrameDecoder,
    read_buf: [u8; 8192],
}

impl DapTransport {
    pub fn new(stream: TcpStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader,
            writer,
            decoder: FrameDecoder::new(),
            read_buf: [0u8; 8192],
        }
    }

    pub async fn read_message(&mut self) -> Result<Message> {
        loop {
            if let Some(msg) = self.decoder.next_message()? {
                return Ok(msg);
            }

            let n = self.reader.read(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.decoder.feed(&self.read_buf[..n]);
        }
    }

    pub async fn write_message(&mut self, msg: &Message) -> Result<()> {
        let bytes = encode(msg)?;
        debug!(len = bytes.len(), "DAP: writing frame");
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl DapTransportTrait for DapTransport {
    async fn read_message(&mut self) -> Result<Message> {
        self.read_message().await
    }

    async fn write_message(&mut self, msg: &Message) -> Result<()> {
        self.write_message(msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::types::{Event, Request, Response};
    use serde_json::json;

    fn response_frame(seq: i32, request_seq: i32) -> Vec<u8> {
        let msg = Message::Response(Response {
            seq,
            request_seq,
            command: "launch".to_string(),
            success: true,
            message: None,
            body: None,
        });
        encode(&msg).unwrap()
    }

    #[test]
    fn round_trips_a_request() {
        let msg = Message::Request(Request {
            seq: 7,
            command: "initialize".to_string(),
            arguments: Some(json!({"clientID": "x"})),
        });
        let bytes = encode(&msg).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes);
        let decoded = decoder.next_message().unwrap().unwrap();
        match decoded {
            Message::Request(r) => assert_eq!(r.seq, 7),
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn buffers_a_partial_frame_until_more_bytes_arrive() {
        let bytes = response_frame(1, 1);
        let (head, tail) = bytes.split_at(bytes.len() - 5);

        let mut decoder = FrameDecoder::new();
        decoder.feed(head);
        assert!(decoder.next_message().unwrap().is_none());

        decoder.feed(tail);
        assert!(decoder.next_message().unwrap().is_some());
    }

    #[test]
    fn skips_a_malformed_frame_and_recovers_the_next_one() {
        // No Content-Length header, followed by a valid response to seq 7.
        let malformed = b"X-Bogus-Header: true\r\n\r\n".to_vec();
        let valid = response_frame(1, 7);

        let mut decoder = FrameDecoder::new();
        decoder.feed(&malformed);
        decoder.feed(&valid);

        let msg = decoder.next_message().unwrap().unwrap();
        match msg {
            Message::Response(r) => assert_eq!(r.request_seq, 7),
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn skips_a_frame_with_unparsable_json_body() {
        let bogus = b"Content-Length: 5\r\n\r\ngarbl".to_vec();
        let valid = response_frame(2, 9);

        let mut decoder = FrameDecoder::new();
        decoder.feed(&bogus);
        decoder.feed(&valid);

        let msg = decoder.next_message().unwrap().unwrap();
        match msg {
            Message::Response(r) => assert_eq!(r.request_seq, 9),
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn decodes_multiple_messages_fed_in_one_chunk() {
        let mut bytes = response_frame(1, 1);
        bytes.extend(response_frame(2, 2));

        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes);

        let first = decoder.next_message().unwrap().unwrap();
        let second = decoder.next_message().unwrap().unwrap();
        assert!(matches!(first, Message::Response(r) if r.request_seq == 1));
        assert!(matches!(second, Message::Response(r) if r.request_seq == 2));
        assert!(decoder.next_message().unwrap().is_none());
    }

    #[test]
    fn decodes_an_event() {
        let msg = Message::Event(Event {
            seq: 3,
            event: "stopped".to_string(),
            body: Some(json!({"reason": "breakpoint", "threadId": 1})),
        });
        let bytes = encode(&msg).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes);
        let decoded = decoder.next_message().unwrap().unwrap();
        assert!(matches!(decoded, Message::Event(e) if e.event == "stopped"));
    }
}
