//! The external reader bridge.
//!
//! A user-supplied child process provides extra module and resource URI
//! schemes. The bridge speaks MessagePack over the child's stdio: every
//! message is a two-slot array `[code, fields]`, every request carries a
//! 63-bit `requestId` chosen by this side, and the child echoes the id on
//! its response.
//!
//! The child starts lazily on first use. One writer thread owns its stdin
//! and one reader thread owns its stdout; responses are routed to waiting
//! callers through a pending map keyed by request id, and the reader thread
//! is the sole completer. Closing sends `CloseExternalProcess`, waits up to
//! three seconds for the child to exit, then force-terminates it. A second
//! close is a no-op; any use after close fails with `AlreadyClosed`, and a
//! crashed child turns subsequent calls into errors.

use std::{
    io::{Read, Write},
    process::{Child, Command, Stdio},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant},
};

use ahash::AHashMap;
use rmpv::Value as Mp;

use crate::{
    modules::{ListEntry, ModuleLoader, ModuleReader},
    resource::{ResourceManager, ResourceReader},
};

const INITIALIZE_MODULE_READER_REQUEST: u64 = 0x30;
const INITIALIZE_MODULE_READER_RESPONSE: u64 = 0x31;
const INITIALIZE_RESOURCE_READER_REQUEST: u64 = 0x32;
const INITIALIZE_RESOURCE_READER_RESPONSE: u64 = 0x33;
const READ_MODULE_REQUEST: u64 = 0x34;
const READ_MODULE_RESPONSE: u64 = 0x35;
const READ_RESOURCE_REQUEST: u64 = 0x36;
const READ_RESOURCE_RESPONSE: u64 = 0x37;
const LIST_MODULES_REQUEST: u64 = 0x38;
const LIST_MODULES_RESPONSE: u64 = 0x39;
const LIST_RESOURCES_REQUEST: u64 = 0x3a;
const LIST_RESOURCES_RESPONSE: u64 = 0x3b;
const CLOSE_EXTERNAL_PROCESS: u64 = 0x3c;

/// How long a close waits for the child before force-terminating it.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);
/// How long a single request waits for its response.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for one external reader subprocess.
#[derive(Debug, Clone)]
pub struct ExternalReaderConfig {
    /// URI scheme the reader serves, without the trailing colon.
    pub scheme: String,
    /// Executable and arguments of the reader process.
    pub command: Vec<String>,
    /// Whether the scheme is available for module imports.
    pub modules: bool,
    /// Whether the scheme is available for resource reads.
    pub resources: bool,
}

impl ExternalReaderConfig {
    /// Registers the reader with the module and resource layers. The
    /// subprocess itself starts lazily on first use.
    pub(crate) fn register(self, loader: &mut ModuleLoader, resources: &mut ResourceManager) {
        let debug = std::env::var("PKL_DEBUG").is_ok_and(|v| v == "1" || v == "true");
        let process = Arc::new(ReaderProcess::new(self.command, debug));
        if self.modules {
            loader.register(Box::new(ExternalModuleReader {
                scheme: self.scheme.clone(),
                process: Arc::clone(&process),
            }));
        }
        if self.resources {
            resources.register(Box::new(ExternalResourceReader {
                scheme: self.scheme,
                process,
            }));
        }
    }
}

#[derive(Debug)]
enum ProcessState {
    NotStarted,
    Running(Running),
    /// The child exited on its own; calls report the crash.
    Crashed,
    Closed,
}

#[derive(Debug)]
struct Running {
    child: Child,
    writer: mpsc::Sender<Vec<u8>>,
}

/// One external reader child process.
pub(crate) struct ReaderProcess {
    command: Vec<String>,
    state: Mutex<ProcessState>,
    pending: Arc<Mutex<AHashMap<u64, mpsc::Sender<Mp>>>>,
    next_request_id: AtomicU64,
    /// Schemes whose initialize handshake has completed.
    initialized: Mutex<Vec<(u64, String)>>,
    debug: bool,
}

impl std::fmt::Debug for ReaderProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderProcess").field("command", &self.command).finish_non_exhaustive()
    }
}

impl ReaderProcess {
    fn new(command: Vec<String>, debug: bool) -> Self {
        Self {
            command,
            state: Mutex::new(ProcessState::NotStarted),
            pending: Arc::new(Mutex::new(AHashMap::new())),
            next_request_id: AtomicU64::new(1),
            initialized: Mutex::new(Vec::new()),
            debug,
        }
    }

    fn debug_log(&self, detail: &str) {
        if self.debug {
            eprintln!("pkl: external reader [{}]: {detail}", self.command.join(" "));
        }
    }

    /// Starts the child if needed. Start-up and shutdown are serialised by
    /// the state mutex.
    fn ensure_started(&self) -> Result<(), String> {
        let mut state = self.state.lock().expect("bridge state lock");
        match &*state {
            ProcessState::Running(_) => return Ok(()),
            ProcessState::Closed => return Err("external reader process is already closed".to_owned()),
            ProcessState::Crashed => return Err("external reader process exited unexpectedly".to_owned()),
            ProcessState::NotStarted => {}
        }
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| "external reader command is empty".to_owned())?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| format!("cannot start external reader `{program}`: {err}"))?;
        let stdin = child.stdin.take().expect("stdin is piped");
        let stdout = child.stdout.take().expect("stdout is piped");
        self.debug_log("started");

        // the writer thread is the only owner of the child's stdin
        let (writer, writer_rx) = mpsc::channel::<Vec<u8>>();
        thread::spawn(move || {
            let mut stdin = stdin;
            while let Ok(bytes) = writer_rx.recv() {
                if stdin.write_all(&bytes).and_then(|()| stdin.flush()).is_err() {
                    break;
                }
            }
        });

        // the reader thread is the sole completer of pending requests
        let pending = Arc::clone(&self.pending);
        thread::spawn(move || {
            let mut stdout = stdout;
            let mut buffer = Vec::new();
            let mut scratch = [0u8; 4096];
            loop {
                match stdout.read(&mut scratch) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => buffer.extend_from_slice(&scratch[..n]),
                }
                loop {
                    let mut cursor: &[u8] = &buffer;
                    match rmpv::decode::read_value(&mut cursor) {
                        Ok(message) => {
                            let consumed = buffer.len() - cursor.len();
                            buffer.drain(..consumed);
                            route_response(&pending, &message);
                        }
                        Err(_) => break, // incomplete frame; read more
                    }
                }
            }
            // child is gone: fail everything still waiting
            pending.lock().expect("pending lock").clear();
        });

        *state = ProcessState::Running(Running { child, writer });
        Ok(())
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed) & (u64::MAX >> 1)
    }

    /// Sends a request and blocks until the matching response arrives.
    fn request(&self, code: u64, mut fields: Vec<(Mp, Mp)>) -> Result<AHashMap<String, Mp>, String> {
        self.ensure_started()?;
        let id = self.next_id();
        fields.push((Mp::from("requestId"), Mp::from(id)));
        let message = Mp::Array(vec![Mp::from(code), Mp::Map(fields)]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &message).map_err(|err| format!("cannot encode request: {err}"))?;

        let (tx, rx) = mpsc::channel();
        self.pending.lock().expect("pending lock").insert(id, tx);
        let send_result = {
            let state = self.state.lock().expect("bridge state lock");
            match &*state {
                ProcessState::Running(running) => running.writer.send(bytes).map_err(|_| ()),
                ProcessState::Closed => {
                    self.pending.lock().expect("pending lock").remove(&id);
                    return Err("external reader process is already closed".to_owned());
                }
                _ => Err(()),
            }
        };
        if send_result.is_err() {
            self.pending.lock().expect("pending lock").remove(&id);
            self.mark_crashed();
            return Err("external reader process exited unexpectedly".to_owned());
        }
        self.debug_log(&format!("sent request {id} (code {code:#x})"));

        let response = rx.recv_timeout(REQUEST_TIMEOUT);
        self.pending.lock().expect("pending lock").remove(&id);
        let response = response.map_err(|_| {
            self.mark_crashed();
            "external reader process exited unexpectedly".to_owned()
        })?;
        self.debug_log(&format!("received response {id}"));
        let Mp::Array(parts) = response else {
            return Err("malformed response from external reader".to_owned());
        };
        let Some(Mp::Map(pairs)) = parts.get(1) else {
            return Err("malformed response from external reader".to_owned());
        };
        let mut map = AHashMap::new();
        for (key, value) in pairs {
            if let Some(key) = key.as_str() {
                map.insert(key.to_owned(), value.clone());
            }
        }
        Ok(map)
    }

    fn mark_crashed(&self) {
        let mut state = self.state.lock().expect("bridge state lock");
        if matches!(*state, ProcessState::Running(_)) {
            *state = ProcessState::Crashed;
        }
    }

    /// Performs the initialize handshake for a scheme, once.
    fn initialize(&self, code: u64, scheme: &str) -> Result<(), String> {
        {
            let initialized = self.initialized.lock().expect("initialized lock");
            if initialized.iter().any(|(c, s)| *c == code && s == scheme) {
                return Ok(());
            }
        }
        let response = self.request(code, vec![(Mp::from("scheme"), Mp::from(scheme))])?;
        if matches!(response.get("spec"), None | Some(Mp::Nil)) {
            return Err(format!("external reader does not serve scheme `{scheme}`"));
        }
        self.initialized.lock().expect("initialized lock").push((code, scheme.to_owned()));
        Ok(())
    }

    /// Closes the bridge: a close message, a bounded wait, then a kill.
    /// Closing twice is safe.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock().expect("bridge state lock");
        let running = match std::mem::replace(&mut *state, ProcessState::Closed) {
            ProcessState::Running(running) => running,
            _ => return,
        };
        drop(state);
        let mut message = Vec::new();
        let close = Mp::Array(vec![Mp::from(CLOSE_EXTERNAL_PROCESS), Mp::Map(Vec::new())]);
        if rmpv::encode::write_value(&mut message, &close).is_ok() {
            let _ = running.writer.send(message);
        }
        self.debug_log("close requested");
        let mut child = running.child;
        let deadline = Instant::now() + CLOSE_TIMEOUT;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => {
                    self.debug_log("exited");
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(50)),
                _ => break,
            }
        }
        let _ = child.kill();
        let _ = child.wait();
        self.debug_log("force-terminated");
    }
}

impl Drop for ReaderProcess {
    fn drop(&mut self) {
        self.close();
    }
}

fn route_response(pending: &Arc<Mutex<AHashMap<u64, mpsc::Sender<Mp>>>>, message: &Mp) {
    let Mp::Array(parts) = message else { return };
    let is_response = parts.first().and_then(Mp::as_u64).is_some_and(|code| {
        matches!(
            code,
            INITIALIZE_MODULE_READER_RESPONSE
                | INITIALIZE_RESOURCE_READER_RESPONSE
                | READ_MODULE_RESPONSE
                | READ_RESOURCE_RESPONSE
                | LIST_MODULES_RESPONSE
                | LIST_RESOURCES_RESPONSE
        )
    });
    if !is_response {
        return;
    }
    let Some(Mp::Map(pairs)) = parts.get(1) else { return };
    let request_id = pairs
        .iter()
        .find(|(k, _)| k.as_str() == Some("requestId"))
        .and_then(|(_, v)| v.as_u64());
    let Some(request_id) = request_id else { return };
    if let Some(tx) = pending.lock().expect("pending lock").remove(&request_id) {
        let _ = tx.send(message.clone());
    }
}

fn error_or<T>(response: &AHashMap<String, Mp>, ok: impl FnOnce() -> Option<T>) -> Result<T, String> {
    if let Some(err) = response.get("error").and_then(Mp::as_str) {
        return Err(err.to_owned());
    }
    ok().ok_or_else(|| "malformed response from external reader".to_owned())
}

fn list_entries(response: &AHashMap<String, Mp>) -> Result<Vec<ListEntry>, String> {
    error_or(response, || {
        let Mp::Array(elements) = response.get("pathElements")? else {
            return None;
        };
        let mut out = Vec::with_capacity(elements.len());
        for element in elements {
            let Mp::Map(pairs) = element else { return None };
            let mut name = None;
            let mut is_dir = false;
            for (key, value) in pairs {
                match key.as_str() {
                    Some("name") => name = value.as_str().map(str::to_owned),
                    Some("isDirectory") => is_dir = value.as_bool().unwrap_or(false),
                    _ => {}
                }
            }
            out.push(ListEntry {
                name: name?,
                is_dir,
            });
        }
        Some(out)
    })
}

/// Module reader backed by an external process.
#[derive(Debug)]
struct ExternalModuleReader {
    scheme: String,
    process: Arc<ReaderProcess>,
}

impl ModuleReader for ExternalModuleReader {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn read(&self, uri: &str) -> Result<String, String> {
        self.process.initialize(INITIALIZE_MODULE_READER_REQUEST, &self.scheme)?;
        let response = self
            .process
            .request(READ_MODULE_REQUEST, vec![(Mp::from("uri"), Mp::from(uri))])?;
        error_or(&response, || {
            response.get("contents").and_then(Mp::as_str).map(str::to_owned)
        })
    }

    fn list(&self, dir_uri: &str) -> Result<Vec<ListEntry>, String> {
        self.process.initialize(INITIALIZE_MODULE_READER_REQUEST, &self.scheme)?;
        let response = self
            .process
            .request(LIST_MODULES_REQUEST, vec![(Mp::from("uri"), Mp::from(dir_uri))])?;
        list_entries(&response)
    }

    fn supports_globbing(&self) -> bool {
        true
    }
}

/// Resource reader backed by an external process.
#[derive(Debug)]
struct ExternalResourceReader {
    scheme: String,
    process: Arc<ReaderProcess>,
}

impl ResourceReader for ExternalResourceReader {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn read(&self, uri: &str) -> Result<Vec<u8>, String> {
        self.process.initialize(INITIALIZE_RESOURCE_READER_REQUEST, &self.scheme)?;
        let response = self
            .process
            .request(READ_RESOURCE_REQUEST, vec![(Mp::from("uri"), Mp::from(uri))])?;
        error_or(&response, || match response.get("contents") {
            Some(Mp::Binary(bytes)) => Some(bytes.clone()),
            Some(Mp::String(_)) => response
                .get("contents")
                .and_then(Mp::as_str)
                .map(|s| s.as_bytes().to_vec()),
            _ => None,
        })
    }

    fn list(&self, dir_uri: &str) -> Result<Vec<ListEntry>, String> {
        self.process.initialize(INITIALIZE_RESOURCE_READER_REQUEST, &self.scheme)?;
        let response = self
            .process
            .request(LIST_RESOURCES_REQUEST, vec![(Mp::from("uri"), Mp::from(dir_uri))])?;
        list_entries(&response)
    }

    fn supports_globbing(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_stay_in_63_bits() {
        let process = ReaderProcess::new(vec!["true".to_owned()], false);
        process.next_request_id.store(u64::MAX - 1, Ordering::Relaxed);
        assert!(process.next_id() <= u64::MAX >> 1);
    }

    #[test]
    fn close_is_idempotent_and_poisons_later_use() {
        let process = ReaderProcess::new(vec!["definitely-not-a-real-binary".to_owned()], false);
        process.close();
        process.close();
        let err = process.ensure_started().unwrap_err();
        assert!(err.contains("already closed"), "{err}");
    }

    #[test]
    fn spawn_failure_is_reported() {
        let process = ReaderProcess::new(vec!["definitely-not-a-real-binary".to_owned()], false);
        let err = process.ensure_started().unwrap_err();
        assert!(err.contains("cannot start"), "{err}");
    }
}
