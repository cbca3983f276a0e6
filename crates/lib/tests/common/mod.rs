//! Minimal stand-in for the Ollama HTTP API: `/api/tags` and streaming `/api/chat`.
//! Each connection is served on its own thread and closed after one response.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
pub struct FakeConfig {
    /// Names returned by /api/tags.
    pub models: Vec<String>,
    /// NDJSON lines streamed by /api/chat, each followed by "\n".
    pub chat_lines: Vec<String>,
    /// Pause before each chat line.
    pub line_delay: Duration,
    /// Non-200 status for /api/chat, with this body.
    pub chat_failure: Option<(u16, String)>,
}

pub struct FakeOllama {
    pub base_url: String,
    bodies: Arc<Mutex<Vec<String>>>,
}

impl FakeOllama {
    pub fn start(config: FakeConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake ollama");
        let port = listener.local_addr().expect("local_addr").port();
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let server_bodies = bodies.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let config = config.clone();
                let bodies = server_bodies.clone();
                std::thread::spawn(move || {
                    let _ = serve(stream, &config, &bodies);
                });
            }
        });
        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            bodies,
        }
    }

    pub fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    /// Request bodies received on /api/chat, oldest first.
    pub fn chat_bodies(&self) -> Vec<serde_json::Value> {
        self.bodies
            .lock()
            .expect("bodies lock")
            .iter()
            .map(|b| serde_json::from_str(b).expect("request body is JSON"))
            .collect()
    }
}

pub fn chat_line(content: &str) -> String {
    serde_json::json!({ "message": { "role": "assistant", "content": content }, "done": false })
        .to_string()
}

pub fn done_line() -> String {
    serde_json::json!({ "done": true }).to_string()
}

fn serve(
    stream: TcpStream,
    config: &FakeConfig,
    bodies: &Mutex<Vec<String>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();

    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        reader.read_line(&mut header)?;
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;

    let mut out = stream;
    match path.as_str() {
        "/api/tags" => {
            let models: Vec<_> = config
                .models
                .iter()
                .map(|m| serde_json::json!({ "name": m, "size": 1 }))
                .collect();
            let json = serde_json::json!({ "models": models }).to_string();
            write!(
                out,
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                json.len(),
                json
            )?;
        }
        "/api/chat" => {
            bodies
                .lock()
                .expect("bodies lock")
                .push(String::from_utf8_lossy(&body).into_owned());
            if let Some((status, text)) = &config.chat_failure {
                write!(
                    out,
                    "HTTP/1.1 {} Error\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    text.len(),
                    text
                )?;
            } else {
                write!(
                    out,
                    "HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nConnection: close\r\n\r\n"
                )?;
                out.flush()?;
                for line in &config.chat_lines {
                    if !config.line_delay.is_zero() {
                        std::thread::sleep(config.line_delay);
                    }
                    out.write_all(line.as_bytes())?;
                    out.write_all(b"\n")?;
                    out.flush()?;
                }
            }
        }
        _ => {
            write!(
                out,
                "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            )?;
        }
    }
    out.flush()?;
    out.shutdown(std::net::Shutdown::Both)
}
