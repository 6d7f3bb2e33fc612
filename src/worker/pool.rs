//! Supervised pool of isolated analysis worker processes.
//!
//! ```text
//!  analyze() ──► PoolCommand ──►┌────────────┐── Request ──► worker IO task ──► child stdin
//!  (oneshot reply)              │ Supervisor │
//!                               └────────────┘◄─ WorkerEvent ── worker IO task ◄── child stdout
//! ```
//!
//! The supervisor task is the only owner of the slot table, the per-worker
//! in-flight maps and the wait queue. Callers talk to it through
//! [`WorkerPool`], which is a cheap cloneable handle.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::protocol::{self, Hints, ProtocolError, RawFeatures, Request, Response};
use crate::config::PoolConfig;

/// Caller-visible pool failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("Worker initialization failed: {0}")]
    InitializationFailed(String),
    #[error("Analysis timed out after {0:?}")]
    Timeout(Duration),
    #[error("Worker exited unexpectedly")]
    WorkerCrashed,
    #[error("Decode failed: {0}")]
    DecodeFailed(String),
    #[error("No analysis workers available")]
    BackendUnavailable,
}

/// How to launch one worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    /// Re-execute the running binary with the hidden `worker` subcommand,
    /// forwarding the log verbosity.
    pub fn current_exe(verbose: u8) -> std::io::Result<Self> {
        let mut args = Vec::new();
        if verbose > 0 {
            args.push(format!("-{}", "v".repeat(verbose as usize)));
        }
        args.push("worker".to_string());
        Ok(Self::new(std::env::current_exe()?, args))
    }

    fn spawn(&self) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            // Worker logs go to stderr and interleave with ours
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
    }
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub size: usize,
    pub request_timeout: Duration,
    pub startup_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl PoolSettings {
    pub fn from_config(config: &PoolConfig, size: usize) -> Self {
        Self {
            size,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            startup_timeout: Duration::from_secs(config.startup_timeout_secs),
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
        }
    }
}

/// Point-in-time view of the pool, published on every state change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatus {
    pub configured: usize,
    pub ready: usize,
    pub busy: usize,
    pub starting: usize,
    pub queued: usize,
}

// ============================================================================
// Public handle
// ============================================================================

/// Handle to a running worker pool. Cloning shares the same pool.
#[derive(Clone)]
pub struct WorkerPool {
    commands: mpsc::UnboundedSender<PoolCommand>,
    status: watch::Receiver<PoolStatus>,
    next_request_id: Arc<AtomicU64>,
    request_timeout: Duration,
}

impl WorkerPool {
    /// Spawn every worker and wait until each one has either signalled
    /// readiness or failed to initialize.
    pub async fn start(settings: PoolSettings, command: WorkerCommand) -> Self {
        let size = settings.size.max(1);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(PoolStatus {
            configured: size,
            starting: size,
            ..PoolStatus::default()
        });

        log::info!("Starting {} analysis workers", size);
        let supervisor = Supervisor {
            command,
            startup_timeout: settings.startup_timeout,
            shutdown_grace: settings.shutdown_grace,
            slots: (0..size).map(|_| Slot::default()).collect(),
            queue: VecDeque::new(),
            cursor: 0,
            events_tx,
            status_tx,
            last_init_error: None,
            shutting_down: false,
        };
        tokio::spawn(supervisor.run(commands_rx, events_rx));

        let pool = Self {
            commands: commands_tx,
            status: status_rx,
            next_request_id: Arc::new(AtomicU64::new(1)),
            request_timeout: settings.request_timeout,
        };

        let mut status = pool.subscribe();
        let _ = status.wait_for(|s| s.starting == 0).await;
        let status = pool.status();
        if status.ready == 0 {
            log::warn!("No analysis workers became ready");
        } else {
            log::info!("Worker pool ready: {}/{} workers", status.ready, status.configured);
        }
        pool
    }

    /// Analyze one file with the default per-request deadline.
    ///
    /// The deadline covers the whole call, including time spent queued
    /// behind busy workers, so a saturated pool surfaces as `Timeout`
    /// instead of an unbounded wait.
    pub async fn analyze(&self, file_path: &Path, hints: Hints) -> Result<RawFeatures, PoolError> {
        self.analyze_with_timeout(file_path, hints, self.request_timeout)
            .await
    }

    pub async fn analyze_with_timeout(
        &self,
        file_path: &Path,
        hints: Hints,
        timeout: Duration,
    ) -> Result<RawFeatures, PoolError> {
        // Paths travel as JSON strings; one that cannot must not reach a worker
        if file_path.to_str().is_none() {
            return Err(PoolError::DecodeFailed(format!(
                "path is not valid UTF-8: {}",
                file_path.display()
            )));
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (reply, response) = oneshot::channel();
        let call = QueuedCall {
            request_id,
            file_path: file_path.to_path_buf(),
            hints,
            reply,
        };
        self.commands
            .send(PoolCommand::Analyze(call))
            .map_err(|_| PoolError::BackendUnavailable)?;

        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(result)) => result,
            // Supervisor dropped the reply: pool is shutting down
            Ok(Err(_)) => Err(PoolError::BackendUnavailable),
            Err(_) => {
                log::warn!(
                    "Request {} ({}) timed out after {:?}",
                    request_id,
                    file_path.display(),
                    timeout
                );
                Err(PoolError::Timeout(timeout))
            }
        }
    }

    /// False when no worker is ready; callers should use a degraded path.
    pub fn is_available(&self) -> bool {
        self.status.borrow().ready > 0
    }

    pub fn status(&self) -> PoolStatus {
        *self.status.borrow()
    }

    pub fn ready_workers(&self) -> usize {
        self.status.borrow().ready
    }

    pub fn subscribe(&self) -> watch::Receiver<PoolStatus> {
        self.status.clone()
    }

    /// Stop accepting requests, ask every worker to exit and wait up to the
    /// grace period before killing stragglers.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(PoolCommand::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

// ============================================================================
// Supervisor internals
// ============================================================================

type Reply = oneshot::Sender<Result<RawFeatures, PoolError>>;

struct QueuedCall {
    request_id: u64,
    file_path: PathBuf,
    hints: Hints,
    reply: Reply,
}

enum PoolCommand {
    Analyze(QueuedCall),
    Shutdown(oneshot::Sender<()>),
}

/// Sent by a worker's IO task. `generation` distinguishes a slot's current
/// process from ones it already replaced.
enum WorkerEvent {
    Ready {
        slot: usize,
        generation: u64,
        backend: String,
        pid: Option<u32>,
        requests: mpsc::UnboundedSender<Request>,
    },
    InitFailed {
        slot: usize,
        generation: u64,
        error: String,
    },
    Message {
        slot: usize,
        generation: u64,
        response: Response,
    },
    Exited {
        slot: usize,
        generation: u64,
        status: String,
    },
}

struct WorkerHandle {
    pid: Option<u32>,
    requests: mpsc::UnboundedSender<Request>,
    in_flight: HashMap<u64, Reply>,
    alive: bool,
}

impl WorkerHandle {
    fn is_idle(&self) -> bool {
        self.alive && self.in_flight.is_empty()
    }
}

#[derive(Default)]
enum SlotState {
    Starting,
    Ready(WorkerHandle),
    #[default]
    Vacant,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    state: SlotState,
    task: Option<JoinHandle<()>>,
}

struct Supervisor {
    command: WorkerCommand,
    startup_timeout: Duration,
    shutdown_grace: Duration,
    slots: Vec<Slot>,
    queue: VecDeque<QueuedCall>,
    /// Round-robin position for dispatch.
    cursor: usize,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    status_tx: watch::Sender<PoolStatus>,
    last_init_error: Option<String>,
    shutting_down: bool,
}

impl Supervisor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<PoolCommand>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        for slot in 0..self.slots.len() {
            self.spawn_worker(slot);
        }
        self.publish();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(PoolCommand::Analyze(call)) => self.enqueue(call),
                    Some(PoolCommand::Shutdown(done)) => {
                        self.shutdown(&mut events).await;
                        let _ = done.send(());
                        return;
                    }
                    // Every handle dropped
                    None => {
                        self.shutdown(&mut events).await;
                        return;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
            self.dispatch();
            self.publish();
        }
    }

    fn spawn_worker(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        slot.generation += 1;
        slot.state = SlotState::Starting;
        slot.task = Some(tokio::spawn(run_worker(
            index,
            slot.generation,
            self.command.clone(),
            self.startup_timeout,
            self.events_tx.clone(),
        )));
    }

    fn is_current(&self, slot: usize, generation: u64) -> bool {
        self.slots
            .get(slot)
            .is_some_and(|s| s.generation == generation)
    }

    fn has_capacity(&self) -> bool {
        self.slots
            .iter()
            .any(|s| matches!(s.state, SlotState::Starting | SlotState::Ready(_)))
    }

    fn enqueue(&mut self, call: QueuedCall) {
        if !self.has_capacity() {
            let _ = call.reply.send(Err(PoolError::BackendUnavailable));
            return;
        }
        self.queue.push_back(call);
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Ready {
                slot,
                generation,
                backend,
                pid,
                requests,
            } => {
                if !self.is_current(slot, generation) {
                    return;
                }
                log::info!(
                    "Worker {} ready (pid {}, backend {})",
                    slot,
                    pid.map_or("?".to_string(), |p| p.to_string()),
                    if backend.is_empty() { "?" } else { backend.as_str() }
                );
                self.slots[slot].state = SlotState::Ready(WorkerHandle {
                    pid,
                    requests,
                    in_flight: HashMap::new(),
                    alive: true,
                });
            }

            WorkerEvent::InitFailed {
                slot,
                generation,
                error,
            } => {
                if !self.is_current(slot, generation) {
                    return;
                }
                log::warn!("Worker {} failed to initialize: {}", slot, error);
                let s = &mut self.slots[slot];
                s.state = SlotState::Vacant;
                s.task = None;
                self.last_init_error = Some(error);

                if !self.has_capacity() {
                    let error = self
                        .last_init_error
                        .clone()
                        .unwrap_or_else(|| "no worker could start".to_string());
                    for call in self.queue.drain(..) {
                        let _ = call
                            .reply
                            .send(Err(PoolError::InitializationFailed(error.clone())));
                    }
                }
            }

            WorkerEvent::Message {
                slot,
                generation,
                response,
            } => {
                if !self.is_current(slot, generation) {
                    return;
                }
                let SlotState::Ready(handle) = &mut self.slots[slot].state else {
                    return;
                };
                match response {
                    Response::AnalysisResult {
                        request_id,
                        success,
                        data,
                        error,
                    } => {
                        let Some(reply) = handle.in_flight.remove(&request_id) else {
                            log::warn!(
                                "Worker {} answered unknown request {}",
                                slot,
                                request_id
                            );
                            return;
                        };
                        let result = match (success, data) {
                            (true, Some(data)) => Ok(data),
                            (true, None) => Err(PoolError::DecodeFailed(
                                "worker reported success without features".to_string(),
                            )),
                            (false, _) => Err(PoolError::DecodeFailed(
                                error.unwrap_or_else(|| "analysis failed".to_string()),
                            )),
                        };
                        if reply.send(result).is_err() {
                            log::debug!("Discarding late result for request {}", request_id);
                        }
                    }
                    other => log::warn!("Worker {} sent unexpected {:?}", slot, other),
                }
            }

            WorkerEvent::Exited {
                slot,
                generation,
                status,
            } => {
                if !self.is_current(slot, generation) {
                    return;
                }
                let s = &mut self.slots[slot];
                s.task = None;
                let previous = std::mem::take(&mut s.state);
                if self.shutting_down {
                    return;
                }
                if let SlotState::Ready(handle) = previous {
                    log::warn!(
                        "Worker {} (pid {}) exited unexpectedly ({}); failing {} request(s) and respawning",
                        slot,
                        handle.pid.map_or("?".to_string(), |p| p.to_string()),
                        status,
                        handle.in_flight.len()
                    );
                    for (_, reply) in handle.in_flight {
                        let _ = reply.send(Err(PoolError::WorkerCrashed));
                    }
                    self.spawn_worker(slot);
                }
            }
        }
    }

    /// Hand queued calls to idle workers, one request per worker.
    fn dispatch(&mut self) {
        while !self.queue.is_empty() {
            let Some(index) = self.next_idle_slot() else {
                return;
            };
            let Some(call) = self.pop_live_call() else {
                return;
            };
            let SlotState::Ready(handle) = &mut self.slots[index].state else {
                self.queue.push_front(call);
                return;
            };

            let request = Request::Analyze {
                request_id: call.request_id,
                file_path: call.file_path.clone(),
                hints: call.hints.clone(),
            };
            if handle.requests.send(request).is_err() {
                // IO task is gone; its exit event will follow
                handle.alive = false;
                self.queue.push_front(call);
                continue;
            }
            log::debug!(
                "Request {} ({}) -> worker {}",
                call.request_id,
                call.file_path.display(),
                index
            );
            handle.in_flight.insert(call.request_id, call.reply);
        }
    }

    fn next_idle_slot(&mut self) -> Option<usize> {
        let n = self.slots.len();
        for offset in 0..n {
            let index = (self.cursor + offset) % n;
            if let SlotState::Ready(handle) = &self.slots[index].state {
                if handle.is_idle() {
                    self.cursor = (index + 1) % n;
                    return Some(index);
                }
            }
        }
        None
    }

    /// Pop the next call whose caller is still waiting.
    fn pop_live_call(&mut self) -> Option<QueuedCall> {
        while let Some(call) = self.queue.pop_front() {
            if !call.reply.is_closed() {
                return Some(call);
            }
            log::debug!("Dropping abandoned request {}", call.request_id);
        }
        None
    }

    fn publish(&self) {
        let mut status = PoolStatus {
            configured: self.slots.len(),
            queued: self.queue.len(),
            ..PoolStatus::default()
        };
        for slot in &self.slots {
            match &slot.state {
                SlotState::Starting => status.starting += 1,
                SlotState::Ready(handle) => {
                    status.ready += 1;
                    if !handle.in_flight.is_empty() {
                        status.busy += 1;
                    }
                }
                SlotState::Vacant => {}
            }
        }
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    async fn shutdown(&mut self, events: &mut mpsc::UnboundedReceiver<WorkerEvent>) {
        log::info!("Shutting down worker pool");
        self.shutting_down = true;

        for call in self.queue.drain(..) {
            let _ = call.reply.send(Err(PoolError::BackendUnavailable));
        }

        let mut waiting = 0usize;
        for slot in &mut self.slots {
            match std::mem::take(&mut slot.state) {
                SlotState::Ready(handle) => {
                    for (_, reply) in handle.in_flight {
                        let _ = reply.send(Err(PoolError::BackendUnavailable));
                    }
                    // Dropping the handle afterwards closes the worker's stdin
                    if handle.requests.send(Request::Exit).is_ok() {
                        waiting += 1;
                    }
                }
                SlotState::Starting => {
                    if let Some(task) = slot.task.take() {
                        task.abort();
                    }
                }
                SlotState::Vacant => {}
            }
        }
        self.publish();

        let deadline = tokio::time::Instant::now() + self.shutdown_grace;
        while waiting > 0 {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(WorkerEvent::Exited {
                    slot,
                    generation,
                    status,
                })) => {
                    if self.is_current(slot, generation) && self.slots[slot].task.take().is_some() {
                        log::debug!("Worker {} exited ({})", slot, status);
                        waiting -= 1;
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(task) = slot.task.take() {
                log::warn!(
                    "Worker {} did not exit within {:?}, killing it",
                    index,
                    self.shutdown_grace
                );
                // Dropping the task drops the child, which kills it
                task.abort();
            }
        }
        log::info!("Worker pool stopped");
    }
}

// ============================================================================
// Per-worker IO task
// ============================================================================

async fn run_worker(
    slot: usize,
    generation: u64,
    command: WorkerCommand,
    startup_timeout: Duration,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let init_failed = |error: String| {
        let _ = events.send(WorkerEvent::InitFailed {
            slot,
            generation,
            error,
        });
    };

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            init_failed(format!("failed to spawn {}: {}", command.program.display(), e));
            return;
        }
    };
    let pid = child.id();
    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        init_failed("worker stdio was not captured".to_string());
        return;
    };
    let mut lines = BufReader::new(stdout).lines();

    let backend = match handshake(&mut lines, startup_timeout).await {
        Ok(backend) => backend,
        Err(error) => {
            let _ = child.start_kill();
            init_failed(error);
            return;
        }
    };

    let (requests_tx, mut requests_rx) = mpsc::unbounded_channel::<Request>();
    let _ = events.send(WorkerEvent::Ready {
        slot,
        generation,
        backend,
        pid,
        requests: requests_tx,
    });

    let mut stdin = Some(stdin);
    let mut requests_open = true;
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match protocol::decode_line::<Response>(&line) {
                    Ok(response) => {
                        let _ = events.send(WorkerEvent::Message { slot, generation, response });
                    }
                    Err(e) => log::warn!("Worker {} sent a malformed line: {}", slot, e),
                },
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Worker {} stdout read failed: {}", slot, e);
                    let _ = child.start_kill();
                    break;
                }
            },
            request = requests_rx.recv(), if requests_open => match request {
                Some(request) => {
                    if let Some(pipe) = stdin.as_mut() {
                        match write_request(pipe, &request).await {
                            Ok(()) => {}
                            // Nothing was written; the worker is still healthy
                            Err(ProtocolError::Malformed(e)) => {
                                log::warn!("Worker {} could not encode request: {}", slot, e);
                                if let Request::Analyze { request_id, .. } = request {
                                    let response = Response::failure(
                                        request_id,
                                        format!("request could not be encoded: {}", e),
                                    );
                                    let _ = events.send(WorkerEvent::Message {
                                        slot,
                                        generation,
                                        response,
                                    });
                                }
                            }
                            Err(e) => {
                                log::warn!("Worker {} stdin write failed: {}", slot, e);
                                stdin = None;
                                let _ = child.start_kill();
                            }
                        }
                    }
                }
                None => {
                    // Supervisor let go of us: closing stdin tells the worker to exit
                    requests_open = false;
                    stdin = None;
                }
            },
        }
    }

    let status = match child.wait().await {
        Ok(status) => status.to_string(),
        Err(e) => e.to_string(),
    };
    let _ = events.send(WorkerEvent::Exited {
        slot,
        generation,
        status,
    });
}

/// Wait for the first message. `Ok(backend)` on `ready`.
async fn handshake(
    lines: &mut Lines<BufReader<ChildStdout>>,
    timeout: Duration,
) -> Result<String, String> {
    match tokio::time::timeout(timeout, lines.next_line()).await {
        Ok(Ok(Some(line))) => match protocol::decode_line::<Response>(&line) {
            Ok(Response::Ready { backend }) => Ok(backend),
            Ok(Response::InitError { error }) => Err(error),
            Ok(other) => Err(format!("unexpected startup message {:?}", other)),
            Err(e) => Err(e.to_string()),
        },
        Ok(Ok(None)) => Err("worker exited before signalling readiness".to_string()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no readiness signal within {:?}", timeout)),
    }
}

async fn write_request(stdin: &mut ChildStdin, request: &Request) -> Result<(), ProtocolError> {
    let line = protocol::encode_line(request)?;
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}
