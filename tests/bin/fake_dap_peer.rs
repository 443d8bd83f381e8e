//! Minimal DAP-speaking TCP server for manual exercising of the DAP
//! transport and client. Listens on the port given as its first argument,
//! accepts one connection, and answers enough of the protocol (initialize,
//! launch, setBreakpoints, configurationDone, continue, stackTrace,
//! scopes, variables, evaluate, disconnect) to drive a session through a
//! single breakpoint hit. Doesn't actually run any debuggee.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;

#[derive(Debug, serde::Deserialize)]
struct Message {
    seq: Option<i64>,
    #[serde(rename = "type")]
    msg_type: String,
    command: Option<String>,
    arguments: Option<Value>,
}

struct FakePeer {
    seq: i64,
    breakpoints: HashMap<String, Vec<i64>>,
}

impl FakePeer {
    fn new() -> Self {
        Self {
            seq: 1,
            breakpoints: HashMap::new(),
        }
    }

    fn write_message(&mut self, stream: &mut impl Write, msg: &Value) {
        let body = serde_json::to_vec(msg).unwrap();
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        stream.write_all(header.as_bytes()).unwrap();
        stream.write_all(&body).unwrap();
        stream.flush().unwrap();
    }

    fn send_response(&mut self, stream: &mut impl Write, request_seq: i64, command: &str, success: bool, body: Option<Value>) {
        let seq = self.seq;
        self.seq += 1;
        self.write_message(
            stream,
            &json!({
                "seq": seq,
                "type": "response",
                "request_seq": request_seq,
                "command": command,
                "success": success,
                "body": body,
            }),
        );
    }

    fn send_event(&mut self, stream: &mut impl Write, event: &str, body: Option<Value>) {
        let seq = self.seq;
        self.seq += 1;
        self.write_message(
            stream,
            &json!({
                "seq": seq,
                "type": "event",
                "event": event,
                "body": body,
            }),
        );
    }

    fn handle(&mut self, stream: &mut impl Write, msg: Message) {
        let request_seq = msg.seq.unwrap_or(0);
        let command = msg.command.as_deref().unwrap_or("");
        match command {
            "initialize" => {
                self.send_response(
                    stream,
                    request_seq,
                    "initialize",
                    true,
                    Some(json!({"supportsConfigurationDoneRequest": true})),
                );
                self.send_event(stream, "initialized", None);
            }
            "launch" => {
                self.send_response(stream, request_seq, "launch", true, None);
            }
            "setBreakpoints" => {
                let args = msg.arguments.unwrap_or_default();
                let path = args
                    .get("source")
                    .and_then(|s| s.get("path"))
                    .and_then(|p| p.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let breakpoints: Vec<Value> = args
                    .get("breakpoints")
                    .and_then(|b| b.as_array())
                    .map(|arr| {
                        arr.iter()
                            .enumerate()
                            .map(|(id, bp)| {
                                let line = bp.get("line").and_then(|l| l.as_i64()).unwrap_or(0);
                                self.breakpoints.entry(path.clone()).or_default().push(line);
                                json!({"id": id + 1, "verified": true, "line": line})
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                self.send_response(
                    stream,
                    request_seq,
                    "setBreakpoints",
                    true,
                    Some(json!({"breakpoints": breakpoints})),
                );
            }
            "configurationDone" => {
                self.send_response(stream, request_seq, "configurationDone", true, None);
            }
            "continue" => {
                self.send_response(stream, request_seq, "continue", true, Some(json!({"allThreadsContinued": true})));
                self.send_event(
                    stream,
                    "stopped",
                    Some(json!({"reason": "breakpoint", "threadId": 1, "allThreadsStopped": true})),
                );
            }
            "stackTrace" => {
                self.send_response(
                    stream,
                    request_seq,
                    "stackTrace",
                    true,
                    Some(json!({
                        "stackFrames": [
                            {"id": 1, "name": "main", "source": {"name": "a.py", "path": "/tmp/a.py"}, "line": 10, "column": 1},
                        ],
                        "totalFrames": 1,
                    })),
                );
            }
            "scopes" => {
                self.send_response(
                    stream,
                    request_seq,
                    "scopes",
                    true,
                    Some(json!({"scopes": [{"name": "Locals", "variablesReference": 100, "expensive": false}]})),
                );
            }
            "variables" => {
                self.send_response(
                    stream,
                    request_seq,
                    "variables",
                    true,
                    Some(json!({"variables": [{"name": "x", "value": "42", "type": "int", "variablesReference": 0}]})),
                );
            }
            "evaluate" => {
                self.send_response(
                    stream,
                    request_seq,
                    "evaluate",
                    true,
                    Some(json!({"result": "42", "type": "int", "variablesReference": 0})),
                );
            }
            "disconnect" | "terminate" => {
                self.send_response(stream, request_seq, command, true, None);
                self.send_event(stream, "terminated", None);
            }
            other => {
                self.send_response(stream, request_seq, other, false, None);
            }
        }
    }

    fn run(&mut self, stream: std::net::TcpStream) {
        let mut reader = stream.try_clone().unwrap();
        let mut writer = stream;
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            let header_end = loop {
                if let Some(pos) = find_header_end(&buf) {
                    break pos;
                }
                let n = reader.read(&mut chunk).unwrap_or(0);
                if n == 0 {
                    return;
                }
                buf.extend_from_slice(&chunk[..n]);
            };

            let header_text = String::from_utf8_lossy(&buf[..header_end]).into_owned();
            let content_length: usize = header_text
                .lines()
                .find_map(|line| line.strip_prefix("Content-Length:"))
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0);

            let body_start = header_end + 4;
            while buf.len() < body_start + content_length {
                let n = reader.read(&mut chunk).unwrap_or(0);
                if n == 0 {
                    return;
                }
                buf.extend_from_slice(&chunk[..n]);
            }

            let body = buf[body_start..body_start + content_length].to_vec();
            buf.drain(..body_start + content_length);

            if let Ok(msg) = serde_json::from_slice::<Message>(&body) {
                if msg.msg_type == "request" {
                    self.handle(&mut writer, msg);
                }
            }
        }
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn main() {
    let port: u16 = std::env::args()
        .nth(1)
        .expect("usage: fake_dap_peer <port>")
        .parse()
        .expect("port must be a u16");

    let listener = TcpListener::bind(("127.0.0.1", port)).expect("failed to bind");
    let (stream, _) = listener.accept().expect("failed to accept");
    FakePeer::new().run(stream);
}
