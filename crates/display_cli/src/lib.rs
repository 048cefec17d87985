//! Line-oriented client for the projector scene server: one JSON request
//! per line out, one JSON response per line back.

use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9999;
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_RETRY_MS: u64 = 100;
const MAX_RETRY_BACKOFF_MS: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct CommonOptions {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
    pub retry_ms: u64,
}

impl Default for CommonOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_ms: DEFAULT_RETRY_MS,
        }
    }
}

pub enum CommandKind {
    Ping,
    Send { payload: String },
    Script { path: String, keep_going: bool },
}

struct Session {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

/// Validates a request line before it goes on the wire: a JSON object with
/// a string `"action"`.
pub fn validate_request(payload: &str) -> Result<Value, String> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|error| format!("request is not valid JSON: {error}"))?;
    let Some(object) = value.as_object() else {
        return Err("request must be a JSON object".to_string());
    };
    match object.get("action") {
        Some(Value::String(_)) => Ok(value),
        Some(_) => Err("'action' must be a string".to_string()),
        None => Err("request is missing the 'action' key".to_string()),
    }
}

pub fn is_error_response(response: &Value) -> bool {
    response.get("status").and_then(Value::as_str) == Some("error")
}

/// Request lines of a script file: blank lines and `#` comments dropped.
pub fn parse_script_requests(content: &str) -> Vec<String> {
    let mut requests = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        requests.push(trimmed.to_string());
    }
    requests
}

pub fn run<W: Write>(kind: CommandKind, opts: CommonOptions, stdout: &mut W) -> Result<(), String> {
    let timeout = Duration::from_millis(opts.timeout_ms);
    let retry_base = Duration::from_millis(opts.retry_ms.max(1));
    let mut session = connect_with_retry(&opts.host, opts.port, timeout, retry_base)?;

    match kind {
        CommandKind::Ping => {
            let response = round_trip(&mut session, r#"{"action": "ping"}"#, timeout)?;
            writeln!(stdout, "{response}").map_err(|error| format!("stdout write failed: {error}"))?;
            if is_error_response(&response) {
                return Err("server answered ping with an error".to_string());
            }
            Ok(())
        }
        CommandKind::Send { payload } => {
            validate_request(&payload)?;
            let response = round_trip(&mut session, &payload, timeout)?;
            writeln!(stdout, "{response}").map_err(|error| format!("stdout write failed: {error}"))?;
            Ok(())
        }
        CommandKind::Script { path, keep_going } => {
            let content = fs::read_to_string(&path)
                .map_err(|error| format!("failed to read script file '{path}': {error}"))?;
            for (index, request) in parse_script_requests(&content).iter().enumerate() {
                validate_request(request)
                    .map_err(|error| format!("script line {}: {error}", index + 1))?;
                let response = round_trip(&mut session, request, timeout)?;
                writeln!(stdout, "{response}")
                    .map_err(|error| format!("stdout write failed: {error}"))?;
                if !keep_going && is_error_response(&response) {
                    return Err(format!(
                        "script stopped at request {} on an error response",
                        index + 1
                    ));
                }
            }
            Ok(())
        }
    }
}

fn connect_with_retry(
    host: &str,
    port: u16,
    timeout: Duration,
    retry_base: Duration,
) -> Result<Session, String> {
    let deadline = Instant::now() + timeout;
    let mut attempt = 0u32;

    loop {
        match TcpStream::connect((host, port)) {
            Ok(writer) => {
                writer
                    .set_read_timeout(Some(Duration::from_millis(100)))
                    .map_err(|error| format!("failed to set socket read timeout: {error}"))?;
                let reader_stream = writer
                    .try_clone()
                    .map_err(|error| format!("failed to clone socket stream: {error}"))?;
                return Ok(Session {
                    writer,
                    reader: BufReader::new(reader_stream),
                });
            }
            Err(_) if Instant::now() >= deadline => break,
            Err(_) => {}
        }

        let shift = attempt.min(8);
        let backoff_ms = (retry_base.as_millis() as u64)
            .saturating_mul(1u64 << shift)
            .min(MAX_RETRY_BACKOFF_MS);
        let sleep_for = Duration::from_millis(backoff_ms.max(1));
        if Instant::now() + sleep_for >= deadline {
            break;
        }
        thread::sleep(sleep_for);
        attempt = attempt.saturating_add(1);
    }

    Err(format!("timed out connecting to {host}:{port}"))
}

fn round_trip(session: &mut Session, request: &str, timeout: Duration) -> Result<Value, String> {
    send_line(&mut session.writer, request)?;
    let deadline = Instant::now() + timeout;
    loop {
        match read_one_line(&mut session.reader, deadline) {
            ReadOutcome::Line(raw) => {
                return serde_json::from_str(raw.trim_end())
                    .map_err(|error| format!("server sent malformed JSON: {error}"));
            }
            ReadOutcome::NoData => {}
            ReadOutcome::Disconnected => {
                return Err("socket disconnected while waiting for a response".to_string())
            }
            ReadOutcome::DeadlineExceeded => {
                return Err("timed out waiting for a response".to_string())
            }
            ReadOutcome::IoError(error) => {
                return Err(format!("socket read error while waiting for a response: {error}"))
            }
        }
    }
}

fn send_line(writer: &mut TcpStream, line: &str) -> Result<(), String> {
    writer
        .write_all(line.as_bytes())
        .map_err(|error| format!("failed to send request: {error}"))?;
    writer
        .write_all(b"\n")
        .map_err(|error| format!("failed to terminate request line: {error}"))?;
    writer
        .flush()
        .map_err(|error| format!("failed to flush request line: {error}"))
}

enum ReadOutcome {
    Line(String),
    NoData,
    Disconnected,
    DeadlineExceeded,
    IoError(io::Error),
}

fn read_one_line(reader: &mut BufReader<TcpStream>, deadline: Instant) -> ReadOutcome {
    if Instant::now() >= deadline {
        return ReadOutcome::DeadlineExceeded;
    }

    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => ReadOutcome::Disconnected,
        Ok(_) => ReadOutcome::Line(line),
        Err(error)
            if error.kind() == io::ErrorKind::WouldBlock
                || error.kind() == io::ErrorKind::TimedOut =>
        {
            ReadOutcome::NoData
        }
        Err(error) => ReadOutcome::IoError(error),
    }
}
