use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::Value;
use tracing::{error, info, warn};

use display::{error_response, CommandRegistry, Params, Scene};

/// Fixed worker pool size; connections beyond it queue on the channel.
pub const WORKER_COUNT: usize = 10;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const DISPATCH_POLL_TIMEOUT: Duration = Duration::from_millis(100);
const READ_TIMEOUT: Duration = Duration::from_millis(500);
const READ_CHUNK_SIZE: usize = 4096;

/// Running socket server. Dropping the handle does not stop it; flip the
/// shutdown flag and call `join`.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    fatal: Arc<AtomicBool>,
    acceptor: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// True once a handler reported a fatal failure.
    pub fn had_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Waits for the acceptor and all workers. Outstanding connections
    /// finish their current request before the workers observe the flag.
    pub fn join(self) {
        let _ = self.acceptor.join();
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

/// Binds the listener and spawns the acceptor plus the worker pool.
///
/// The acceptor polls a non-blocking accept so the shutdown flag is
/// observed promptly, not only on the next incoming connection.
pub fn spawn(
    scene: Arc<Scene>,
    registry: Arc<CommandRegistry>,
    shutdown: Arc<AtomicBool>,
    host: &str,
    port: u16,
) -> io::Result<ServerHandle> {
    let listener = TcpListener::bind((host, port))?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, workers = WORKER_COUNT, "listener_bound");

    let fatal = Arc::new(AtomicBool::new(false));
    let (sender, receiver): (Sender<TcpStream>, Receiver<TcpStream>) = mpsc::channel();
    let receiver = Arc::new(Mutex::new(receiver));

    let mut workers = Vec::with_capacity(WORKER_COUNT);
    for worker_id in 0..WORKER_COUNT {
        let receiver = Arc::clone(&receiver);
        let scene = Arc::clone(&scene);
        let registry = Arc::clone(&registry);
        let shutdown = Arc::clone(&shutdown);
        let fatal = Arc::clone(&fatal);
        workers.push(thread::spawn(move || {
            worker_loop(worker_id, &receiver, &scene, &registry, &shutdown, &fatal);
        }));
    }

    let acceptor = {
        let shutdown = Arc::clone(&shutdown);
        thread::spawn(move || accept_loop(listener, sender, &shutdown))
    };

    Ok(ServerHandle {
        local_addr,
        shutdown,
        fatal,
        acceptor,
        workers,
    })
}

fn accept_loop(listener: TcpListener, sender: Sender<TcpStream>, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                info!(peer = %peer, "client_accepted");
                if sender.send(stream).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => {
                warn!(error = %err, "accept_failed");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
    info!("acceptor_stopped");
}

fn worker_loop(
    worker_id: usize,
    receiver: &Mutex<Receiver<TcpStream>>,
    scene: &Scene,
    registry: &CommandRegistry,
    shutdown: &AtomicBool,
    fatal: &AtomicBool,
) {
    while !shutdown.load(Ordering::SeqCst) {
        let stream = {
            let guard = receiver
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.recv_timeout(DISPATCH_POLL_TIMEOUT)
        };
        match stream {
            Ok(stream) => handle_connection(worker_id, stream, scene, registry, shutdown, fatal),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn handle_connection(
    worker_id: usize,
    mut stream: TcpStream,
    scene: &Scene,
    registry: &CommandRegistry,
    shutdown: &AtomicBool,
    fatal: &AtomicBool,
) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    if let Err(err) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
        warn!(peer = %peer, error = %err, "read_timeout_failed");
        return;
    }
    let _ = stream.set_nodelay(true);
    info!(worker = worker_id, peer = %peer, "client_connected");

    let mut read_buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    'connection: while !shutdown.load(Ordering::SeqCst) {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(bytes_read) => {
                read_buf.extend_from_slice(&chunk[..bytes_read]);
                let mut lines = Vec::new();
                drain_complete_lines(&mut read_buf, &mut lines);
                for line in lines {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let response = match dispatch_line(&line, scene, registry) {
                        Ok(response) => response,
                        Err(fatal_err) => {
                            // Deliberate crash policy: a handler bug takes
                            // the server down rather than corrupting a
                            // live experiment.
                            error!(
                                peer = %peer,
                                action = %fatal_err.action,
                                message = %fatal_err.message,
                                "fatal_command_failure"
                            );
                            fatal.store(true, Ordering::SeqCst);
                            shutdown.store(true, Ordering::SeqCst);
                            let _ = write_response(
                                &mut stream,
                                &error_response(&format!("fatal: {fatal_err}")),
                            );
                            break 'connection;
                        }
                    };
                    if let Err(err) = write_response(&mut stream, &response) {
                        warn!(peer = %peer, error = %err, "client_write_failed");
                        break 'connection;
                    }
                }
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => {
                warn!(peer = %peer, error = %err, "client_read_failed");
                break;
            }
        }
    }
    info!(worker = worker_id, peer = %peer, "client_disconnected");
}

/// Parses and dispatches one request line. Protocol mistakes (bad JSON,
/// missing action) become error responses on the same connection; only a
/// handler's fatal failure crosses as `Err`.
fn dispatch_line(
    line: &str,
    scene: &Scene,
    registry: &CommandRegistry,
) -> Result<Value, display::FatalError> {
    let parsed: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => return Ok(error_response(&format!("invalid JSON: {err}"))),
    };
    let Value::Object(mut request) = parsed else {
        return Ok(error_response("request must be a JSON object"));
    };
    let action = match request.remove("action") {
        Some(Value::String(action)) => action,
        Some(_) => return Ok(error_response("'action' must be a string")),
        None => return Ok(error_response("missing required key 'action'")),
    };
    let params: Params = request;
    registry.execute(&action, scene, &params)
}

fn write_response(stream: &mut TcpStream, response: &Value) -> io::Result<()> {
    let mut payload = serde_json::to_vec(response)?;
    payload.push(b'\n');
    stream.write_all(&payload)?;
    stream.flush()
}

fn drain_complete_lines(buffer: &mut Vec<u8>, out: &mut Vec<String>) {
    while let Some(newline_index) = buffer.iter().position(|byte| *byte == b'\n') {
        let mut line_bytes = buffer.drain(..=newline_index).collect::<Vec<u8>>();
        line_bytes.pop(); // newline
        if line_bytes.last().copied() == Some(b'\r') {
            line_bytes.pop();
        }
        match String::from_utf8(line_bytes) {
            Ok(line) => out.push(line),
            Err(err) => warn!(error = %err, "non_utf8_line_dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use display::builtin_registry;
    use std::io::BufRead;
    use std::io::BufReader;

    fn start_test_server() -> (ServerHandle, Arc<Scene>) {
        let scene = Arc::new(Scene::new());
        let registry = Arc::new(builtin_registry());
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = spawn(
            Arc::clone(&scene),
            registry,
            shutdown,
            "127.0.0.1",
            0,
        )
        .expect("spawn server");
        (handle, scene)
    }

    fn send_line(stream: &mut TcpStream, line: &str) {
        stream.write_all(line.as_bytes()).expect("write");
        stream.write_all(b"\n").expect("write newline");
        stream.flush().expect("flush");
    }

    fn read_response(reader: &mut BufReader<TcpStream>) -> Value {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read line");
        serde_json::from_str(line.trim_end()).expect("response JSON")
    }

    fn connect(handle: &ServerHandle) -> (TcpStream, BufReader<TcpStream>) {
        let stream = TcpStream::connect(handle.local_addr()).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        let reader = BufReader::new(stream.try_clone().expect("clone stream"));
        (stream, reader)
    }

    #[test]
    fn unknown_action_returns_available_commands() {
        let (handle, _scene) = start_test_server();
        let (mut stream, mut reader) = connect(&handle);
        send_line(&mut stream, r#"{"action": "nope"}"#);
        let response = read_response(&mut reader);
        assert_eq!(response["status"], "error");
        assert!(!response["available_commands"]
            .as_array()
            .expect("list")
            .is_empty());
        handle.shutdown();
        handle.join();
    }

    #[test]
    fn invalid_json_keeps_the_connection_open() {
        let (handle, scene) = start_test_server();
        let (mut stream, mut reader) = connect(&handle);

        send_line(&mut stream, "this is not json");
        let first = read_response(&mut reader);
        assert_eq!(first["status"], "error");

        // Same connection still works.
        send_line(
            &mut stream,
            r#"{"action": "update_position", "name": "r1", "x": 1.0, "y": 2.0}"#,
        );
        let second = read_response(&mut reader);
        assert_eq!(second["status"], "success");
        assert!(scene.body_snapshot("r1").is_some());

        handle.shutdown();
        handle.join();
    }

    #[test]
    fn responses_arrive_in_request_order() {
        let (handle, _scene) = start_test_server();
        let (mut stream, mut reader) = connect(&handle);

        // Several requests in one write; responses must correlate
        // positionally.
        let batch = concat!(
            r#"{"action": "update_position", "name": "a", "x": 0.0, "y": 0.0}"#,
            "\n",
            r#"{"action": "nope"}"#,
            "\n",
            r#"{"action": "list_rigidbodies"}"#,
            "\n",
        );
        stream.write_all(batch.as_bytes()).expect("write batch");
        stream.flush().expect("flush");

        let first = read_response(&mut reader);
        assert_eq!(first["status"], "success");
        let second = read_response(&mut reader);
        assert_eq!(second["status"], "error");
        let third = read_response(&mut reader);
        assert_eq!(third["rigidbodies"], serde_json::json!(["a"]));

        handle.shutdown();
        handle.join();
    }

    #[test]
    fn empty_lines_are_skipped() {
        let (handle, _scene) = start_test_server();
        let (mut stream, mut reader) = connect(&handle);
        stream
            .write_all(b"\n\r\n{\"action\": \"ping\"}\n")
            .expect("write");
        stream.flush().expect("flush");
        let response = read_response(&mut reader);
        assert_eq!(response["status"], "success");
        assert_eq!(response["message"], "pong");
        handle.shutdown();
        handle.join();
    }

    #[test]
    fn one_client_disconnect_leaves_others_working() {
        let (handle, _scene) = start_test_server();
        let (mut doomed, _) = connect(&handle);
        let (mut stream, mut reader) = connect(&handle);

        send_line(&mut doomed, r#"{"action": "ping"}"#);
        drop(doomed);

        send_line(&mut stream, r#"{"action": "ping"}"#);
        let response = read_response(&mut reader);
        assert_eq!(response["status"], "success");

        handle.shutdown();
        handle.join();
    }

    #[test]
    fn fatal_handler_failure_flags_shutdown() {
        let scene = Arc::new(Scene::new());
        let mut registry = CommandRegistry::new();
        registry.register("boom", |_, _| {
            Err(display::CommandError::Fatal("invariant broken".to_string()))
        });
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = spawn(
            Arc::clone(&scene),
            Arc::new(registry),
            Arc::clone(&shutdown),
            "127.0.0.1",
            0,
        )
        .expect("spawn server");

        let (mut stream, mut reader) = connect(&handle);
        send_line(&mut stream, r#"{"action": "boom"}"#);
        let response = read_response(&mut reader);
        assert_eq!(response["status"], "error");

        for _ in 0..100 {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(shutdown.load(Ordering::SeqCst));
        assert!(handle.had_fatal());
        handle.join();
    }

    #[test]
    fn drain_complete_lines_handles_crlf_and_partials() {
        let mut buffer = b"one\r\ntwo\npart".to_vec();
        let mut out = Vec::new();
        drain_complete_lines(&mut buffer, &mut out);
        assert_eq!(out, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(buffer, b"part".to_vec());

        buffer.extend_from_slice(b"ial\n");
        drain_complete_lines(&mut buffer, &mut out);
        assert_eq!(out.last().expect("line"), "partial");
        assert!(buffer.is_empty());
    }
}
