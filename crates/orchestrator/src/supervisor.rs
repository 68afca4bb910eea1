//! Tenant supervision
//!
//! One worker child per tenant. The supervisor spawns children, watches
//! their heartbeats, restarts crashes with capped exponential backoff, and
//! forwards their events to external observers. A missed heartbeat is
//! `degraded`, two missed are `crashed` (the child is killed and the exit
//! path takes over). Clean exits (code 0) are final; anything else restarts
//! until the policy latches.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::{RestartDecision, RestartPolicy};
use crate::{SupervisorEvent, metrics};
use stocksync_config::OrchestratorConfig;
use stocksync_domain::{Alert, AlertType, ParentMessage, TenantEvent, WorkerMessage};
use stocksync_engine::Repository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Ready,
    Degraded,
    Crashed,
    Restarting,
    /// Restart cap exceeded; latched until operator action.
    MaxRestarts,
    Stopping,
    Stopped,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Starting => "starting",
            WorkerState::Ready => "ready",
            WorkerState::Degraded => "degraded",
            WorkerState::Crashed => "crashed",
            WorkerState::Restarting => "restarting",
            WorkerState::MaxRestarts => "max_restarts",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
        }
    }

    /// Whether work can be routed to this tenant's isolated worker.
    pub fn is_live(&self) -> bool {
        matches!(self, WorkerState::Ready | WorkerState::Degraded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatHealth {
    Healthy,
    /// One interval missed.
    Degraded,
    /// Two intervals missed; the child is presumed gone.
    Missing,
}

pub fn classify_heartbeat(elapsed: Duration, interval: Duration) -> HeartbeatHealth {
    if elapsed > interval * 2 {
        HeartbeatHealth::Missing
    } else if elapsed > interval {
        HeartbeatHealth::Degraded
    } else {
        HeartbeatHealth::Healthy
    }
}

struct TenantHandle {
    state: WorkerState,
    stdin: Option<ChildStdin>,
    last_heartbeat: Instant,
    restart_history: VecDeque<Instant>,
    /// Cancelling asks the waiter task to kill the child.
    kill: CancellationToken,
}

impl TenantHandle {
    fn new() -> Self {
        Self {
            state: WorkerState::Starting,
            stdin: None,
            last_heartbeat: Instant::now(),
            restart_history: VecDeque::new(),
            kill: CancellationToken::new(),
        }
    }
}

pub struct TenantSupervisor {
    config: OrchestratorConfig,
    repo: Arc<dyn Repository>,
    handles: Mutex<HashMap<Uuid, TenantHandle>>,
    events: broadcast::Sender<SupervisorEvent>,
    policy: RestartPolicy,
    shutdown: CancellationToken,
}

impl TenantSupervisor {
    pub fn new(
        config: OrchestratorConfig,
        repo: Arc<dyn Repository>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let policy = RestartPolicy::new(config.max_restarts_per_tenant, config.restart_window());
        let (events, _) = broadcast::channel(1024);

        Arc::new(Self {
            config,
            repo,
            handles: Mutex::new(HashMap::new()),
            events,
            policy,
            shutdown,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: TenantEvent) {
        let name = match &event {
            TenantEvent::Ready { .. } => "tenant:ready",
            TenantEvent::Crashed { .. } => "tenant:crashed",
            TenantEvent::Restarting { .. } => "tenant:restarting",
            TenantEvent::MaxRestarts { .. } => "tenant:max_restarts",
        };
        metrics::TENANT_EVENTS_TOTAL.with_label_values(&[name]).inc();
        let _ = self.events.send(SupervisorEvent::Tenant(event));
    }

    /// Routing check: does this tenant have a live isolated worker?
    pub async fn has_live_worker(&self, tenant_id: Uuid) -> bool {
        let handles = self.handles.lock().await;
        handles
            .get(&tenant_id)
            .map(|h| h.state.is_live())
            .unwrap_or(false)
    }

    /// Tenants latched in max_restarts, for fallback routing.
    pub async fn latched_tenants(&self) -> Vec<Uuid> {
        let handles = self.handles.lock().await;
        handles
            .iter()
            .filter(|(_, h)| h.state == WorkerState::MaxRestarts)
            .map(|(id, _)| *id)
            .collect()
    }

    /// State per tenant, for the operational HTTP surface.
    pub async fn states(&self) -> HashMap<Uuid, &'static str> {
        let handles = self.handles.lock().await;
        handles
            .iter()
            .map(|(id, h)| (*id, h.state.as_str()))
            .collect()
    }

    /// Run supervision until shutdown: initial spawn, tenant-set polling,
    /// heartbeat sweeps.
    pub async fn run(self: &Arc<Self>) -> anyhow::Result<()> {
        let tenants = self.repo.get_all_tenant_ids().await?;
        info!(count = tenants.len(), "spawning initial tenant workers");
        for tenant_id in tenants {
            self.spawn_worker(tenant_id).await;
        }

        let mut poll = tokio::time::interval(Duration::from_secs(
            self.config.tenant_poll_interval_secs,
        ));
        poll.tick().await; // skip the immediate tick, the initial spawn just ran
        let mut health = tokio::time::interval(self.config.heartbeat_interval());
        health.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = poll.tick() => {
                    if let Err(e) = self.poll_tenants().await {
                        warn!(error = %e, "tenant poll failed");
                    }
                }
                _ = health.tick() => {
                    self.sweep_health().await;
                }
            }
        }

        self.shutdown_all().await;
        Ok(())
    }

    /// Diff the tenant set: spawn workers for new tenants, stop workers for
    /// removed ones.
    async fn poll_tenants(self: &Arc<Self>) -> anyhow::Result<()> {
        let current: Vec<Uuid> = self.repo.get_all_tenant_ids().await?;

        let (new_tenants, removed): (Vec<Uuid>, Vec<Uuid>) = {
            let handles = self.handles.lock().await;
            let new_tenants = current
                .iter()
                .filter(|id| !handles.contains_key(id))
                .copied()
                .collect();
            let removed = handles
                .keys()
                .filter(|id| !current.contains(id))
                .copied()
                .collect();
            (new_tenants, removed)
        };

        for tenant_id in new_tenants {
            info!(%tenant_id, "new tenant, spawning worker");
            self.spawn_worker(tenant_id).await;
        }
        for tenant_id in removed {
            info!(%tenant_id, "tenant removed, stopping worker");
            self.stop_worker(tenant_id).await;
        }
        Ok(())
    }

    fn spawn_worker<'a>(
        self: &'a Arc<Self>,
        tenant_id: Uuid,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(self.spawn_worker_inner(tenant_id))
    }

    async fn spawn_worker_inner(self: &Arc<Self>, tenant_id: Uuid) {
        let spawned = Command::new(&self.config.worker_binary)
            .env("TENANT_ID", tenant_id.to_string())
            .env(
                "HEALTH_CHECK_INTERVAL_SECS",
                self.config.health_check_interval_secs.to_string(),
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                error!(%tenant_id, error = %e, "failed to spawn worker");
                self.register_exit(tenant_id, None).await;
                return;
            }
        };

        let stdout = child.stdout.take();
        let stdin = child.stdin.take();
        let kill = CancellationToken::new();

        {
            let mut handles = self.handles.lock().await;
            let handle = handles.entry(tenant_id).or_insert_with(TenantHandle::new);
            // Restart history survives respawns; everything else resets.
            handle.state = WorkerState::Starting;
            handle.stdin = stdin;
            handle.last_heartbeat = Instant::now();
            handle.kill = kill.clone();
        }

        info!(%tenant_id, pid = child.id(), "worker spawned");
        metrics::WORKERS_SPAWNED_TOTAL
            .with_label_values(&[&tenant_id.to_string()])
            .inc();

        // Frame reader: heartbeats, readiness, event pass-through.
        if let Some(stdout) = stdout {
            let supervisor = Arc::clone(self);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    match serde_json::from_str::<WorkerMessage>(&line) {
                        Ok(message) => supervisor.on_message(tenant_id, message).await,
                        Err(e) => {
                            debug!(%tenant_id, error = %e, "unparseable worker frame");
                        }
                    }
                }
            });
        }

        // Exit waiter: also the kill executor.
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status.ok(),
                _ = kill.cancelled() => {
                    warn!(%tenant_id, "killing unresponsive worker");
                    let _ = child.start_kill();
                    child.wait().await.ok()
                }
            };
            supervisor
                .register_exit(tenant_id, status.and_then(|s| s.code()))
                .await;
        });
    }

    async fn on_message(&self, tenant_id: Uuid, message: WorkerMessage) {
        match message {
            WorkerMessage::Ready { .. } => {
                let mut handles = self.handles.lock().await;
                if let Some(handle) = handles.get_mut(&tenant_id) {
                    handle.state = WorkerState::Ready;
                    handle.last_heartbeat = Instant::now();
                }
                drop(handles);
                info!(%tenant_id, "worker ready");
                self.emit(TenantEvent::Ready { tenant_id });
            }
            WorkerMessage::Heartbeat { .. } => {
                let mut handles = self.handles.lock().await;
                if let Some(handle) = handles.get_mut(&tenant_id) {
                    handle.last_heartbeat = Instant::now();
                    if handle.state == WorkerState::Degraded {
                        info!(%tenant_id, "worker recovered from degraded");
                        handle.state = WorkerState::Ready;
                    }
                }
            }
            WorkerMessage::Event { event, .. } => {
                let _ = self.events.send(SupervisorEvent::Engine(event));
            }
            WorkerMessage::Stopping { .. } => {
                let mut handles = self.handles.lock().await;
                if let Some(handle) = handles.get_mut(&tenant_id) {
                    handle.state = WorkerState::Stopping;
                }
            }
        }
    }

    /// Handle a child exit: clean stops are final, crashes restart until the
    /// policy latches.
    async fn register_exit(self: &Arc<Self>, tenant_id: Uuid, code: Option<i32>) {
        let decision = {
            let mut handles = self.handles.lock().await;
            let Some(handle) = handles.get_mut(&tenant_id) else {
                return;
            };
            handle.stdin = None;

            if self.shutdown.is_cancelled() || handle.state == WorkerState::Stopping {
                handle.state = WorkerState::Stopped;
                debug!(%tenant_id, "worker stopped");
                return;
            }

            if code == Some(0) {
                info!(%tenant_id, "worker exited cleanly");
                handle.state = WorkerState::Stopped;
                return;
            }

            handle.state = WorkerState::Crashed;
            self.policy.decide(&mut handle.restart_history, Instant::now())
        };

        warn!(%tenant_id, ?code, "worker crashed");
        self.emit(TenantEvent::Crashed { tenant_id, code });
        metrics::WORKER_CRASHES_TOTAL
            .with_label_values(&[&tenant_id.to_string()])
            .inc();

        match decision {
            RestartDecision::Restart { attempt, delay } => {
                {
                    let mut handles = self.handles.lock().await;
                    if let Some(handle) = handles.get_mut(&tenant_id) {
                        handle.state = WorkerState::Restarting;
                    }
                }
                info!(%tenant_id, attempt, delay_secs = delay.as_secs(), "restarting worker");
                self.emit(TenantEvent::Restarting { tenant_id, attempt });

                let supervisor = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if !supervisor.shutdown.is_cancelled() {
                        supervisor.spawn_worker(tenant_id).await;
                    }
                });
            }
            RestartDecision::Latch => {
                {
                    let mut handles = self.handles.lock().await;
                    if let Some(handle) = handles.get_mut(&tenant_id) {
                        handle.state = WorkerState::MaxRestarts;
                    }
                }
                error!(
                    %tenant_id,
                    cap = self.config.max_restarts_per_tenant,
                    "restart cap exceeded, tenant latched"
                );
                self.emit(TenantEvent::MaxRestarts { tenant_id });
                self.raise_latch_alert(tenant_id).await;
            }
        }
    }

    /// High-severity operator alert for a latched tenant, deduplicated like
    /// every other alert.
    async fn raise_latch_alert(&self, tenant_id: Uuid) {
        let exists = self
            .repo
            .alert_exists(tenant_id, AlertType::SyncError, None, None)
            .await
            .unwrap_or(false);
        if exists {
            return;
        }

        let alert = Alert::new(
            tenant_id,
            AlertType::SyncError,
            format!(
                "Tenant worker latched after {} restarts; manual intervention required",
                self.config.max_restarts_per_tenant
            ),
            None,
            None,
            json!({ "severity": "high", "state": "max_restarts" }),
        );
        if let Err(e) = self.repo.create_alert(&alert).await {
            error!(%tenant_id, error = %e, "failed to write latch alert");
        }
    }

    /// One heartbeat sweep: stale workers degrade, dead ones are killed (the
    /// exit path then restarts them). Returns what it saw, oldest problems
    /// first, mostly for tests.
    pub async fn sweep_health(&self) -> Vec<(Uuid, HeartbeatHealth)> {
        let interval = self.config.heartbeat_interval();
        let mut observations = Vec::new();

        let mut handles = self.handles.lock().await;
        for (&tenant_id, handle) in handles.iter_mut() {
            if !handle.state.is_live() {
                continue;
            }

            let health = classify_heartbeat(handle.last_heartbeat.elapsed(), interval);
            observations.push((tenant_id, health));

            match health {
                HeartbeatHealth::Healthy => {}
                HeartbeatHealth::Degraded => {
                    if handle.state != WorkerState::Degraded {
                        warn!(%tenant_id, "heartbeat missed, worker degraded");
                        handle.state = WorkerState::Degraded;
                    }
                }
                HeartbeatHealth::Missing => {
                    warn!(%tenant_id, "two heartbeats missed, presuming crash");
                    handle.kill.cancel();
                }
            }
        }

        observations
    }

    /// Ask one worker to stop (tenant removed). Grace period, then the kill
    /// token fires.
    async fn stop_worker(&self, tenant_id: Uuid) {
        let grace = Duration::from_secs(self.config.shutdown_grace_secs);

        let kill = {
            let mut handles = self.handles.lock().await;
            let Some(handle) = handles.get_mut(&tenant_id) else {
                return;
            };
            handle.state = WorkerState::Stopping;
            Self::send_shutdown(handle).await;
            handle.kill.clone()
        };

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            kill.cancel();
        });
    }

    async fn send_shutdown(handle: &mut TenantHandle) {
        if let Some(stdin) = handle.stdin.as_mut() {
            if let Ok(mut frame) = serde_json::to_vec(&ParentMessage::Shutdown) {
                frame.push(b'\n');
                let _ = stdin.write_all(&frame).await;
                let _ = stdin.flush().await;
            }
        }
    }

    /// Orderly shutdown of every child: shutdown frames, grace, then kills.
    async fn shutdown_all(&self) {
        info!("stopping all tenant workers");

        {
            let mut handles = self.handles.lock().await;
            for handle in handles.values_mut() {
                handle.state = WorkerState::Stopping;
                Self::send_shutdown(handle).await;
            }
        }

        tokio::time::sleep(Duration::from_secs(self.config.shutdown_grace_secs)).await;

        let handles = self.handles.lock().await;
        for (tenant_id, handle) in handles.iter() {
            if handle.state != WorkerState::Stopped {
                warn!(%tenant_id, "worker did not drain in time, killing");
                handle.kill.cancel();
            }
        }
    }

    #[cfg(test)]
    async fn insert_test_handle(&self, tenant_id: Uuid, state: WorkerState, heartbeat_age: Duration) {
        let mut handles = self.handles.lock().await;
        let mut handle = TenantHandle::new();
        handle.state = state;
        handle.last_heartbeat = Instant::now() - heartbeat_age;
        handles.insert(tenant_id, handle);
    }
}
