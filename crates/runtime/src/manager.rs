// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide runtime manager.
//!
//! Owns the broker, a fixed pool of worker threads (each driving its own
//! single-threaded event loop), and the mosaic registry. Mosaics are
//! assigned round-robin to worker loops. The only direct cross-loop spawn
//! is `MosaicInstance::start`; every other operation goes through the
//! instance's command channel with a oneshot promise.
//!
//! Caller timeouts never cancel worker-side progress: a timed-out caller
//! just drops its promise receiver, and the worker finishes the command
//! and discards the result.

use crate::command::{CommandOp, CommandOutcome};
use crate::mosaic::{InstanceDeps, MosaicHandle, MosaicInstance};
use crate::role::{RoleFactory, SessionConfig};
use mosaic_broker::{Broker, BrokerEndpoints};
use mosaic_core::{
    LlmModel, MeshConfig, Mosaic, MosaicId, MosaicStatus, NodeRecord, NodeStatus, RuntimeError,
    SessionId, SessionMode,
};
use mosaic_storage::RoutingStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Per-mosaic stop budget during runtime shutdown.
const STOP_MOSAIC_BUDGET: Duration = Duration::from_secs(30);
/// Budget for status queries.
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
/// How long to wait for a worker thread's loop to come up.
const WORKER_READY_TIMEOUT: Duration = Duration::from_secs(5);

enum Slot {
    /// Reserved while `MosaicInstance::start` is in flight.
    Starting,
    Running { handle: MosaicHandle },
}

struct Started {
    workers: Vec<WorkerLoop>,
    broker: Broker,
    endpoints: BrokerEndpoints,
}

/// The facade between callers and the runtime.
pub struct RuntimeManager {
    config: MeshConfig,
    store: RoutingStore,
    roles: Arc<dyn RoleFactory>,
    state: tokio::sync::Mutex<Option<Started>>,
    registry: Arc<Mutex<HashMap<MosaicId, Slot>>>,
    /// Number of in-flight mosaic starts. The stop path waits for zero
    /// before tearing anything down.
    starting: Arc<watch::Sender<usize>>,
    next_worker: AtomicUsize,
}

impl RuntimeManager {
    pub fn new(config: MeshConfig, store: RoutingStore, roles: Arc<dyn RoleFactory>) -> Self {
        let (starting, _) = watch::channel(0usize);
        Self {
            config,
            store,
            roles,
            state: tokio::sync::Mutex::new(None),
            registry: Arc::new(Mutex::new(HashMap::new())),
            starting: Arc::new(starting),
            next_worker: AtomicUsize::new(0),
        }
    }

    pub fn store(&self) -> &RoutingStore {
        &self.store
    }

    // ========== manager lifecycle ==========

    /// Bind the broker and bring up the worker pool.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(RuntimeError::AlreadyStarted);
        }

        if self.config.runtime.max_threads == 0 {
            return Err(RuntimeError::Config("runtime.max_threads must be > 0".into()));
        }
        info!(max_threads = self.config.runtime.max_threads, "starting runtime manager");

        let broker = Broker::bind(&self.config.broker, self.store.clone())
            .await
            .map_err(|e| RuntimeError::internal(e.to_string()))?;
        let endpoints = broker.endpoints().clone();

        let mut workers = Vec::with_capacity(self.config.runtime.max_threads);
        for index in 0..self.config.runtime.max_threads {
            match WorkerLoop::spawn(index) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    for mut worker in workers {
                        worker.shutdown();
                    }
                    let mut broker = broker;
                    broker.stop().await;
                    return Err(e);
                }
            }
        }

        *state = Some(Started { workers, broker, endpoints });
        info!("runtime manager started");
        Ok(())
    }

    /// Stop everything: wait out in-flight starts, stop every running
    /// mosaic in parallel, stop the worker loops, then the broker.
    pub async fn stop(&self) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        let Some(mut started) = state.take() else {
            warn!("runtime manager is not started, nothing to stop");
            return Ok(());
        };

        info!("stopping runtime manager");

        // 1. No stop while a start is still resolving its placeholder.
        let mut starting = self.starting.subscribe();
        if starting.wait_for(|n| *n == 0).await.is_err() {
            return Err(RuntimeError::internal("starting counter channel closed"));
        }
        debug!("all in-flight mosaic starts resolved");

        // 2. Stop every running mosaic in parallel, tolerating failures.
        let handles: Vec<MosaicHandle> = {
            let registry = self.registry.lock();
            registry
                .values()
                .filter_map(|slot| match slot {
                    Slot::Running { handle, .. } => Some(handle.clone()),
                    Slot::Starting => None,
                })
                .collect()
        };

        if !handles.is_empty() {
            info!(count = handles.len(), "stopping running mosaics");
            let stops = handles.iter().map(|handle| {
                let mosaic_id = handle.mosaic().id;
                let rx = handle.commands().submit(CommandOp::StopMosaic);
                async move {
                    match tokio::time::timeout(STOP_MOSAIC_BUDGET, rx).await {
                        Ok(Ok(Ok(_))) => debug!(mosaic = %mosaic_id, "mosaic stopped"),
                        Ok(Ok(Err(e))) => error!(mosaic = %mosaic_id, error = %e, "mosaic stop failed"),
                        Ok(Err(_)) => error!(mosaic = %mosaic_id, "mosaic stop reply dropped"),
                        Err(_) => error!(mosaic = %mosaic_id, "mosaic stop timed out"),
                    }
                }
            });
            futures_util::future::join_all(stops).await;
        }
        self.registry.lock().clear();

        // 3 + 4. Stop worker loops and join the pool.
        for worker in &mut started.workers {
            worker.shutdown();
        }

        // 5. Stop the broker last.
        started.broker.stop().await;

        self.next_worker.store(0, Ordering::SeqCst);
        info!("runtime manager stopped");
        Ok(())
    }

    // ========== mosaic lifecycle ==========

    /// Start a mosaic on a round-robin worker loop.
    ///
    /// A watcher task on the caller's loop is the single owner of
    /// placeholder resolution and counter decrement; the caller's timeout
    /// abandons only the wait, never the startup itself.
    pub async fn start_mosaic(&self, mosaic: Mosaic, timeout: Duration) -> Result<(), RuntimeError> {
        let (worker_index, worker_handle, endpoints) = {
            let state = self.state.lock().await;
            let started = state.as_ref().ok_or(RuntimeError::NotStarted)?;
            let index =
                self.next_worker.fetch_add(1, Ordering::SeqCst) % started.workers.len();
            (index, started.workers[index].handle.clone(), started.endpoints.clone())
        };

        info!(mosaic = %mosaic.id, name = %mosaic.name, worker = worker_index, "starting mosaic");

        // 1. Count this start before anything can fail.
        self.starting.send_modify(|n| *n += 1);

        // 2. Reserve the slot.
        {
            let mut registry = self.registry.lock();
            match registry.get(&mosaic.id) {
                Some(Slot::Starting) => {
                    drop(registry);
                    self.decrement_starting(mosaic.id);
                    return Err(RuntimeError::MosaicStarting(mosaic.id));
                }
                Some(Slot::Running { .. }) => {
                    drop(registry);
                    self.decrement_starting(mosaic.id);
                    return Err(RuntimeError::MosaicAlreadyRunning(mosaic.id));
                }
                None => {
                    registry.insert(mosaic.id, Slot::Starting);
                }
            }
        }

        // 3. The one direct cross-loop spawn in the system.
        let deps = InstanceDeps {
            mosaic: mosaic.clone(),
            store: self.store.clone(),
            endpoints,
            roles: Arc::clone(&self.roles),
        };
        let start_join = worker_handle.spawn(MosaicInstance::start(deps));

        // 4. Watcher: waits without a timeout, resolves the placeholder,
        //    and always decrements the counter.
        let registry = Arc::clone(&self.registry);
        let starting = Arc::clone(&self.starting);
        let mosaic_id = mosaic.id;
        let watcher = tokio::spawn(async move {
            let result = match start_join.await {
                Ok(result) => result,
                Err(e) => Err(RuntimeError::internal(format!("mosaic start task failed: {e}"))),
            };

            let outcome = match result {
                Ok(handle) => {
                    registry
                        .lock()
                        .insert(mosaic_id, Slot::Running { handle });
                    debug!(mosaic = %mosaic_id, "mosaic startup resolved");
                    Ok(())
                }
                Err(e) => {
                    registry.lock().remove(&mosaic_id);
                    error!(mosaic = %mosaic_id, error = %e, "mosaic startup failed");
                    Err(e)
                }
            };

            starting.send_modify(|n| *n = n.saturating_sub(1));
            outcome
        });

        // 5. The caller's wait is bounded; the watcher's is not.
        match tokio::time::timeout(timeout, watcher).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(RuntimeError::internal(format!("startup watcher failed: {e}"))),
            Err(_) => {
                error!(mosaic = %mosaic.id, ?timeout, "mosaic startup timed out for caller, continuing in background");
                Err(RuntimeError::Timeout(timeout))
            }
        }
    }

    /// Stop a mosaic. Stopping one that is not running succeeds quietly.
    pub async fn stop_mosaic(&self, mosaic: &Mosaic, timeout: Duration) -> Result<(), RuntimeError> {
        let handle = match self.running_handle(mosaic.id) {
            Ok(handle) => handle,
            Err(RuntimeError::MosaicNotRunning(_)) => {
                debug!(mosaic = %mosaic.id, "stop for mosaic that is not running");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let rx = handle.commands().submit(CommandOp::StopMosaic);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => {
                result?;
                self.registry.lock().remove(&mosaic.id);
                info!(mosaic = %mosaic.id, "mosaic stopped");
                Ok(())
            }
            Ok(Err(_)) => Err(RuntimeError::internal("stop command dropped")),
            Err(_) => Err(RuntimeError::Timeout(timeout)),
        }
    }

    /// Observed mosaic lifecycle state.
    pub fn get_mosaic_status(&self, mosaic_id: MosaicId) -> MosaicStatus {
        let mut registry = self.registry.lock();
        match registry.get(&mosaic_id) {
            None => MosaicStatus::Stopped,
            Some(Slot::Starting) => MosaicStatus::Starting,
            Some(Slot::Running { handle, .. }) => {
                if handle.status() == MosaicStatus::Stopped {
                    // Stopped behind our back (slow stop after a caller
                    // timeout); drop the stale entry.
                    registry.remove(&mosaic_id);
                    MosaicStatus::Stopped
                } else {
                    MosaicStatus::Running
                }
            }
        }
    }

    // ========== node lifecycle ==========

    pub async fn start_node(&self, node: &NodeRecord, timeout: Duration) -> Result<(), RuntimeError> {
        self.submit(
            node.mosaic_id,
            CommandOp::StartNode { node_id: node.node_id.clone() },
            timeout,
        )
        .await
        .map(|_| ())
    }

    pub async fn stop_node(&self, node: &NodeRecord, timeout: Duration) -> Result<(), RuntimeError> {
        self.submit(
            node.mosaic_id,
            CommandOp::StopNode { node_id: node.node_id.clone() },
            timeout,
        )
        .await
        .map(|_| ())
    }

    pub async fn get_node_status(&self, node: &NodeRecord) -> Result<NodeStatus, RuntimeError> {
        // A stopped or still-starting mosaic has no running nodes.
        match self.get_mosaic_status(node.mosaic_id) {
            MosaicStatus::Stopped | MosaicStatus::Starting => return Ok(NodeStatus::Stopped),
            MosaicStatus::Running => {}
        }

        let outcome = self
            .submit(
                node.mosaic_id,
                CommandOp::GetNodeStatus { node_id: node.node_id.clone() },
                QUERY_TIMEOUT,
            )
            .await?;
        match outcome {
            CommandOutcome::NodeStatus(status) => Ok(status),
            other => Err(RuntimeError::internal(format!("unexpected outcome: {other:?}"))),
        }
    }

    // ========== session operations ==========

    /// Create an agent session and return its generated id.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_session(
        &self,
        node: &NodeRecord,
        mode: SessionMode,
        model: LlmModel,
        token_threshold_enabled: bool,
        token_threshold: u64,
        inherit_threshold: bool,
        timeout: Duration,
    ) -> Result<SessionId, RuntimeError> {
        let session_id = SessionId::generate();
        let config = SessionConfig {
            mode,
            model,
            token_threshold_enabled,
            token_threshold,
            inherit_threshold,
        };

        info!(
            session = %session_id,
            node = %node.node_id,
            mode = %mode,
            model = %model,
            "creating session"
        );

        let outcome = self
            .submit(
                node.mosaic_id,
                CommandOp::CreateSession {
                    node_id: node.node_id.clone(),
                    session_id: session_id.clone(),
                    config,
                },
                timeout,
            )
            .await?;

        match outcome {
            CommandOutcome::SessionCreated(id) => Ok(id),
            other => Err(RuntimeError::internal(format!("unexpected outcome: {other:?}"))),
        }
    }

    /// Fire-and-forget user message submission.
    pub fn submit_send_message(
        &self,
        node: &NodeRecord,
        session_id: &SessionId,
        message: String,
    ) -> Result<(), RuntimeError> {
        let handle = self.running_handle(node.mosaic_id)?;
        handle.commands().submit_no_wait(CommandOp::SendMessage {
            node_id: node.node_id.clone(),
            session_id: session_id.clone(),
            message,
        });
        Ok(())
    }

    pub async fn interrupt_session(
        &self,
        node: &NodeRecord,
        session_id: &SessionId,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        self.submit(
            node.mosaic_id,
            CommandOp::InterruptSession {
                node_id: node.node_id.clone(),
                session_id: session_id.clone(),
            },
            timeout,
        )
        .await
        .map(|_| ())
    }

    pub async fn close_session(
        &self,
        node: &NodeRecord,
        session_id: &SessionId,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        self.submit(
            node.mosaic_id,
            CommandOp::CloseSession {
                node_id: node.node_id.clone(),
                session_id: session_id.clone(),
            },
            timeout,
        )
        .await
        .map(|_| ())
    }

    // ========== internals ==========

    /// Submit a command to a running mosaic and await its promise.
    ///
    /// On timeout the receiver is dropped; the worker-side command keeps
    /// running and its result is discarded.
    async fn submit(
        &self,
        mosaic_id: MosaicId,
        op: CommandOp,
        timeout: Duration,
    ) -> Result<CommandOutcome, RuntimeError> {
        let handle = self.running_handle(mosaic_id)?;
        let name = op.name();
        let rx = handle.commands().submit(op);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RuntimeError::internal(format!("command {name} dropped"))),
            Err(_) => {
                error!(mosaic = %mosaic_id, command = name, ?timeout, "command timed out for caller");
                Err(RuntimeError::Timeout(timeout))
            }
        }
    }

    fn running_handle(&self, mosaic_id: MosaicId) -> Result<MosaicHandle, RuntimeError> {
        let mut registry = self.registry.lock();
        match registry.get(&mosaic_id) {
            None => Err(RuntimeError::MosaicNotRunning(mosaic_id)),
            Some(Slot::Starting) => Err(RuntimeError::MosaicStarting(mosaic_id)),
            Some(Slot::Running { handle, .. }) => {
                if handle.status() == MosaicStatus::Stopped {
                    registry.remove(&mosaic_id);
                    Err(RuntimeError::MosaicNotRunning(mosaic_id))
                } else {
                    Ok(handle.clone())
                }
            }
        }
    }

    fn decrement_starting(&self, mosaic_id: MosaicId) {
        self.starting.send_modify(|n| *n = n.saturating_sub(1));
        debug!(mosaic = %mosaic_id, "decremented starting counter");
    }
}

/// One worker thread driving a dedicated single-threaded event loop.
struct WorkerLoop {
    name: String,
    handle: tokio::runtime::Handle,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl WorkerLoop {
    fn spawn(index: usize) -> Result<Self, RuntimeError> {
        let name = format!("mosaic-worker-{index}");
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let thread_name = name.clone();
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(runtime.handle().clone()));

                info!(worker = %thread_name, "worker loop running");
                // Park here driving the loop until shutdown; every task
                // hosted on this loop runs on this thread.
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
                info!(worker = %thread_name, "worker loop stopping");
                // Dropping the runtime cancels any remaining tasks.
            })
            .map_err(|e| RuntimeError::internal(format!("failed to spawn {name}: {e}")))?;

        let handle = match ready_rx.recv_timeout(WORKER_READY_TIMEOUT) {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                return Err(RuntimeError::internal(format!("worker loop {name} failed: {e}")))
            }
            Err(_) => {
                return Err(RuntimeError::internal(format!("worker loop {name} never became ready")))
            }
        };

        Ok(Self { name, handle, shutdown: Some(shutdown_tx), thread: Some(thread) })
    }

    fn shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(worker = %self.name, "worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
