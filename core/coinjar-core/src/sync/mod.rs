//! Pull/push synchronization of room resources with last-write-wins merge.
//!
//! The gateway never mutates jar state itself. Incoming snapshots that are
//! strictly newer than the last version seen for their resource are cached
//! and delivered to subscriptions; the owning store drains its subscription
//! on its own thread and decides whether to apply.
//!
//! Version bookkeeping is per resource:
//!
//! ```text
//! local write ──► version := snapshot.updatedAt ──► PUT (fire-and-forget)
//! poll tick   ──► GET ──► updatedAt > version ? cache + notify : drop
//! ```
//!
//! A disabled gateway (no endpoint configured) accepts every call and does
//! nothing.

pub mod transport;

pub use transport::{HttpTransport, MemoryTransport, RoomStore, Transport};

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use coinjar_protocol::{epoch, format_timestamp, Resource, VersionedPayload};
use serde::Serialize;
use serde_json::Value;

use crate::config::{RemoteConfig, MIN_POLL_INTERVAL_MS};
use crate::error::SyncError;

pub type RawSnapshot = VersionedPayload<Value>;

/// Where network calls run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// A fresh thread per push and per poll tick. Callers never wait on I/O.
    #[default]
    Background,
    /// On the calling thread. Used by one-shot commands and tests.
    Inline,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Subscriptions
// ═══════════════════════════════════════════════════════════════════════════════

/// Receives newer snapshots for one resource. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    resource: Resource,
    receiver: Receiver<RawSnapshot>,
}

impl Subscription {
    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn try_next(&self) -> Option<RawSnapshot> {
        self.receiver.try_recv().ok()
    }

    /// Everything delivered since the last drain, oldest first.
    pub fn drain(&self) -> Vec<RawSnapshot> {
        self.receiver.try_iter().collect()
    }

    pub fn wait(&self, timeout: Duration) -> Option<RawSnapshot> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Gateway
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct GatewayState {
    versions: HashMap<Resource, DateTime<Utc>>,
    cache: HashMap<Resource, RawSnapshot>,
    subscribers: HashMap<Resource, Vec<Sender<RawSnapshot>>>,
}

struct Remote {
    transport: Arc<dyn Transport>,
    poll_interval: Duration,
    dispatch: DispatchMode,
    state: Mutex<GatewayState>,
    /// Newest version already sent per resource. Held across the PUT so a
    /// slow older push can never land after a newer one.
    sent: HashMap<Resource, Mutex<DateTime<Utc>>>,
}

#[derive(Clone, Default)]
pub struct SyncGateway {
    remote: Option<Arc<Remote>>,
}

impl std::fmt::Debug for SyncGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.remote {
            Some(remote) => f
                .debug_struct("SyncGateway")
                .field("poll_interval", &remote.poll_interval)
                .field("dispatch", &remote.dispatch)
                .finish(),
            None => f.write_str("SyncGateway(disabled)"),
        }
    }
}

impl SyncGateway {
    pub fn disabled() -> Self {
        Self { remote: None }
    }

    pub fn new(
        transport: Arc<dyn Transport>,
        poll_interval: Duration,
        dispatch: DispatchMode,
    ) -> Self {
        let floor = Duration::from_millis(MIN_POLL_INTERVAL_MS);
        let sent = Resource::ALL
            .iter()
            .map(|resource| (*resource, Mutex::new(epoch())))
            .collect();
        Self {
            remote: Some(Arc::new(Remote {
                transport,
                poll_interval: poll_interval.max(floor),
                dispatch,
                state: Mutex::new(GatewayState::default()),
                sent,
            })),
        }
    }

    /// Builds an HTTP gateway when the remote section is active, otherwise a
    /// disabled one.
    pub fn from_config(config: &RemoteConfig, dispatch: DispatchMode) -> Result<Self, SyncError> {
        if !config.is_active() {
            tracing::debug!("Remote sync disabled");
            return Ok(Self::disabled());
        }
        let transport = HttpTransport::new(
            &config.base_url,
            config.room_code.trim(),
            config.token(),
            config.timeout(),
        )?;
        tracing::info!(
            base_url = %config.base_url,
            room = %config.room_code,
            interval_ms = config.poll_interval().as_millis() as u64,
            "Remote sync enabled"
        );
        Ok(Self::new(Arc::new(transport), config.poll_interval(), dispatch))
    }

    pub fn is_enabled(&self) -> bool {
        self.remote.is_some()
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.remote.as_ref().map(|remote| remote.poll_interval)
    }

    /// Last version applied or produced for `resource`.
    pub fn version(&self, resource: Resource) -> Option<DateTime<Utc>> {
        let remote = self.remote.as_ref()?;
        remote.lock().versions.get(&resource).copied()
    }

    pub fn cached(&self, resource: Resource) -> Option<RawSnapshot> {
        let remote = self.remote.as_ref()?;
        remote.lock().cache.get(&resource).cloned()
    }

    /// Records a version already held locally (e.g. loaded from disk) so
    /// older remote copies are not delivered. Never lowers a version.
    pub fn seed_version(&self, resource: Resource, version: DateTime<Utc>) {
        if let Some(remote) = &self.remote {
            remote.advance(resource, version);
        }
    }

    /// Replays the cached snapshot, if any, then delivers every strictly
    /// newer one. On a disabled gateway the subscription never yields.
    pub fn subscribe(&self, resource: Resource) -> Subscription {
        let (tx, rx) = mpsc::channel();
        if let Some(remote) = &self.remote {
            let mut state = remote.lock();
            if let Some(cached) = state.cache.get(&resource) {
                let _ = tx.send(cached.clone());
            }
            state.subscribers.entry(resource).or_default().push(tx);
        }
        Subscription {
            resource,
            receiver: rx,
        }
    }

    /// Fetches one resource now, on the calling thread. Returns the snapshot
    /// only if it was strictly newer and has been delivered to subscribers.
    pub fn pull(&self, resource: Resource) -> Option<RawSnapshot> {
        self.remote.as_ref()?.pull(resource)
    }

    /// Fetches every resource on the calling thread.
    pub fn pull_all(&self) -> usize {
        match &self.remote {
            Some(remote) => remote.pull_all(),
            None => 0,
        }
    }

    /// Schedules a pull of every resource according to the dispatch mode.
    pub fn request_immediate_pull(&self) {
        if let Some(remote) = &self.remote {
            Remote::dispatch_pull_all(remote);
        }
    }

    /// Records the snapshot's version and sends it to the room.
    ///
    /// The version is recorded before any network I/O so a pull racing this
    /// push cannot deliver an older copy. Failures are logged.
    pub fn push<T: Serialize>(&self, resource: Resource, snapshot: &VersionedPayload<T>) {
        let Some(remote) = &self.remote else {
            return;
        };
        let body = match serde_json::to_value(snapshot) {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(
                    resource = %resource,
                    error = %err,
                    "Failed to encode snapshot for push"
                );
                return;
            }
        };
        let version = snapshot.updated_at;
        {
            let mut state = remote.lock();
            let current = state.versions.get(&resource).copied().unwrap_or_else(epoch);
            if version > current {
                state.versions.insert(resource, version);
            }
            if let Some(raw) = VersionedPayload::from_value(body.clone()) {
                state.cache.insert(resource, raw);
            }
        }

        match remote.dispatch {
            DispatchMode::Inline => remote.send(resource, version, &body),
            DispatchMode::Background => {
                let worker = Arc::clone(remote);
                let spawned = thread::Builder::new()
                    .name(format!("coinjar-push-{}", resource))
                    .spawn(move || worker.send(resource, version, &body));
                if let Err(err) = spawned {
                    tracing::warn!(
                        resource = %resource,
                        error = %err,
                        "Failed to spawn push thread"
                    );
                }
            }
        }
    }

    /// Starts the periodic pull. The first pull happens immediately.
    /// Dropping the handle stops the timer; in-flight pulls finish on their own.
    pub fn start_polling(&self) -> PollHandle {
        let Some(remote) = &self.remote else {
            return PollHandle::inert();
        };
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let worker = Arc::clone(remote);
        let spawned = thread::Builder::new()
            .name("coinjar-poll".to_string())
            .spawn(move || {
                Remote::dispatch_pull_all(&worker);
                loop {
                    match stop_rx.recv_timeout(worker.poll_interval) {
                        Err(RecvTimeoutError::Timeout) => Remote::dispatch_pull_all(&worker),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("Poll loop stopped");
            });
        match spawned {
            Ok(thread) => PollHandle {
                stop: Some(stop_tx),
                thread: Some(thread),
            },
            Err(err) => {
                tracing::warn!(error = %err, "Failed to spawn poll thread");
                PollHandle::inert()
            }
        }
    }
}

impl Remote {
    fn lock(&self) -> MutexGuard<'_, GatewayState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn advance(&self, resource: Resource, version: DateTime<Utc>) {
        let mut state = self.lock();
        let current = state.versions.get(&resource).copied().unwrap_or_else(epoch);
        if version > current {
            state.versions.insert(resource, version);
        }
    }

    fn dispatch_pull_all(remote: &Arc<Remote>) {
        match remote.dispatch {
            DispatchMode::Inline => {
                remote.pull_all();
            }
            DispatchMode::Background => {
                let worker = Arc::clone(remote);
                let spawned = thread::Builder::new()
                    .name("coinjar-pull".to_string())
                    .spawn(move || {
                        worker.pull_all();
                    });
                if let Err(err) = spawned {
                    tracing::warn!(error = %err, "Failed to spawn pull thread");
                }
            }
        }
    }

    fn pull_all(&self) -> usize {
        Resource::ALL
            .iter()
            .filter(|resource| self.pull(**resource).is_some())
            .count()
    }

    fn pull(&self, resource: Resource) -> Option<RawSnapshot> {
        let raw = match self.transport.fetch(resource) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!(resource = %resource, "Room has no copy yet");
                return None;
            }
            Err(err) => {
                tracing::warn!(
                    resource = %resource,
                    error = %err,
                    "Failed to fetch remote resource"
                );
                return None;
            }
        };
        let Some(snapshot) = VersionedPayload::from_value(raw) else {
            tracing::warn!(resource = %resource, "Ignoring non-object remote payload");
            return None;
        };
        self.ingest(resource, snapshot)
    }

    fn ingest(&self, resource: Resource, snapshot: RawSnapshot) -> Option<RawSnapshot> {
        let mut state = self.lock();
        let current = state.versions.get(&resource).copied().unwrap_or_else(epoch);
        if !snapshot.is_newer_than(current) {
            tracing::trace!(
                resource = %resource,
                incoming = %format_timestamp(&snapshot.updated_at),
                current = %format_timestamp(&current),
                "Remote snapshot not newer"
            );
            return None;
        }
        tracing::debug!(
            resource = %resource,
            version = %format_timestamp(&snapshot.updated_at),
            "Applying remote snapshot"
        );
        state.versions.insert(resource, snapshot.updated_at);
        state.cache.insert(resource, snapshot.clone());
        if let Some(subscribers) = state.subscribers.get_mut(&resource) {
            subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
        }
        Some(snapshot)
    }

    fn send(&self, resource: Resource, version: DateTime<Utc>, body: &Value) {
        let guard = self.sent.get(&resource).map(|slot| {
            slot.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
        });
        if let Some(last_sent) = guard.as_deref() {
            if *last_sent > version {
                tracing::debug!(resource = %resource, "Skipping push superseded by a newer one");
                return;
            }
        }
        match self.transport.store(resource, body) {
            Ok(ack) => {
                tracing::debug!(
                    resource = %resource,
                    version = %format_timestamp(&ack.updated_at),
                    "Pushed snapshot"
                );
                if let Some(mut last_sent) = guard {
                    *last_sent = version;
                }
            }
            Err(err) => {
                tracing::warn!(
                    resource = %resource,
                    error = %err,
                    "Failed to push remote resource"
                );
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Poll handle
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct PollHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl PollHandle {
    fn inert() -> Self {
        Self {
            stop: None,
            thread: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| !thread.is_finished())
            .unwrap_or(false)
    }

    /// Stops the timer and waits for the loop thread to exit.
    pub fn stop(mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}
