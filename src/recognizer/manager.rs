//! Lifecycle manager for one loaded recognizer model.
//!
//! Two locks, always taken in this order:
//!
//! 1. the transition lock (`tokio::sync::Mutex`) guards load, unload, the
//!    active-stream counter and the idle timer. It is held across model
//!    construction, so it has to be async.
//! 2. the native lock (`std::sync::Mutex`) guards every call into the
//!    backend. Stream operations take only this one.
//!
//! The native lock is never held while waiting for the transition lock.

use crate::error::{Result, VoxholdError};
use crate::recognizer::backend::{InferenceBackend, ModelHandle, StreamHandle};
use crate::recognizer::fingerprint::ConfigFingerprint;
use crate::recognizer::observer::{LoadObserver, notify};
use crate::recognizer::scheduler::{IdleAction, IdleUnloadScheduler, RetentionPolicy};
use crate::recognizer::session::StreamSession;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// What `prepare` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// A new model was constructed.
    Loaded,
    /// The requested fingerprint was already loaded.
    Reused,
    /// Streams are active; the old model keeps serving and the new
    /// fingerprint is applied once they drain.
    Deferred,
}

/// Observable manager state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Unloaded,
    Loading,
    ReadyIdle,
    ReadyBusy(usize),
    /// Idle with an eviction scheduled.
    PendingUnload,
    /// `shutdown` was called; terminal.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnloadOrigin {
    Explicit,
    IdleTimer,
}

/// State guarded by the transition lock.
struct Transition {
    loaded: Option<ConfigFingerprint>,
    pending: Option<ConfigFingerprint>,
    policy: RetentionPolicy,
    scheduler: IdleUnloadScheduler,
}

/// Backend objects, guarded by the native lock.
#[derive(Default)]
struct Native {
    model: Option<Box<dyn ModelHandle>>,
    generation: u64,
    streams: HashMap<u64, Box<dyn StreamHandle>>,
}

fn lock_native(native: &Mutex<Native>) -> MutexGuard<'_, Native> {
    native.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run a backend call, turning a panic into an error.
fn guarded<T>(operation: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        Err(VoxholdError::BackendPanicked {
            operation: operation.to_string(),
        })
    })
}

fn release<T>(manager: &str, what: &'static str, handle: T) {
    if let Err(e) = guarded(what, move || {
        drop(handle);
        Ok(())
    }) {
        tracing::warn!(manager, error = %e, "backend release failed");
    }
}

pub(crate) struct Shared {
    name: String,
    backend: Arc<dyn InferenceBackend>,
    observer: Option<Arc<dyn LoadObserver>>,
    transition: tokio::sync::Mutex<Transition>,
    native: Arc<Mutex<Native>>,
    // Mutated only under the transition lock; read lock-free.
    active_streams: AtomicUsize,
    prepared: AtomicBool,
    loading: AtomicBool,
    pending_unload: AtomicBool,
    closed: AtomicBool,
    next_stream_id: AtomicU64,
}

impl Shared {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(VoxholdError::ManagerClosed)
        } else {
            Ok(())
        }
    }

    async fn prepare(
        self: Arc<Self>,
        fingerprint: ConfigFingerprint,
        policy: RetentionPolicy,
    ) -> Result<PrepareOutcome> {
        self.ensure_open()?;
        let mut t = self.transition.lock().await;
        self.ensure_open()?;

        self.cancel_idle_unload(&mut t);
        t.policy = policy;

        if self.prepared.load(Ordering::SeqCst) && t.loaded.as_ref() == Some(&fingerprint) {
            if let Some(pending) = t.pending.take() {
                tracing::debug!(manager = %self.name, dropped = %pending, "pending config superseded");
            }
            tracing::debug!(manager = %self.name, fingerprint = %fingerprint, "model already loaded");
            return Ok(PrepareOutcome::Reused);
        }

        let active = self.active_streams.load(Ordering::SeqCst);
        if active > 0 && self.prepared.load(Ordering::SeqCst) {
            tracing::info!(
                manager = %self.name,
                active,
                requested = %fingerprint,
                "config change deferred until active streams are released"
            );
            t.pending = Some(fingerprint);
            return Ok(PrepareOutcome::Deferred);
        }

        self.load_locked(&mut t, fingerprint).await?;
        Ok(PrepareOutcome::Loaded)
    }

    /// Replace the current model. Caller holds the transition lock and has
    /// checked that no stream is active.
    async fn load_locked(&self, t: &mut Transition, fingerprint: ConfigFingerprint) -> Result<()> {
        self.loading.store(true, Ordering::SeqCst);
        self.prepared.store(false, Ordering::SeqCst);
        t.loaded = None;
        t.pending = None;

        tracing::info!(manager = %self.name, fingerprint = %fingerprint, "loading model");
        if let Some(observer) = &self.observer {
            notify(&self.name, "on_load_start", || observer.on_load_start(&fingerprint));
        }

        let started = Instant::now();
        let native = Arc::clone(&self.native);
        let backend = Arc::clone(&self.backend);
        let requested = fingerprint.clone();
        let name = self.name.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<u64> {
            let mut native = lock_native(&native);
            // Free the old model before building the new one: never two at once.
            if let Some(previous) = native.model.take() {
                release(&name, "release model", previous);
            }
            let model = guarded("load model", || backend.load_model(&requested))?;
            native.model = Some(model);
            native.generation += 1;
            Ok(native.generation)
        })
        .await
        .map_err(VoxholdError::from)
        .and_then(|loaded| loaded);

        self.loading.store(false, Ordering::SeqCst);
        match &result {
            Ok(generation) => {
                t.loaded = Some(fingerprint.clone());
                self.prepared.store(true, Ordering::SeqCst);
                tracing::info!(
                    manager = %self.name,
                    fingerprint = %fingerprint,
                    generation,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "model loaded"
                );
            }
            Err(e) => {
                tracing::warn!(manager = %self.name, fingerprint = %fingerprint, error = %e, "model load failed");
            }
        }

        if let Some(observer) = &self.observer {
            let success = result.is_ok();
            notify(&self.name, "on_load_done", || {
                observer.on_load_done(&fingerprint, success)
            });
        }
        result.map(|_| ())
    }

    async fn create_stream(self: Arc<Self>) -> Result<Option<StreamSession>> {
        self.ensure_open()?;
        let mut t = self.transition.lock().await;
        self.ensure_open()?;

        // A pending eviction is cancelled only once a stream exists; a failed
        // attempt leaves any armed timer running and never arms a new one.
        if !self.prepared.load(Ordering::SeqCst) {
            tracing::debug!(manager = %self.name, "create_stream without a prepared model");
            return Ok(None);
        }

        if self.active_streams.load(Ordering::SeqCst) == 0
            && let Some(pending) = t.pending.take()
        {
            tracing::info!(manager = %self.name, fingerprint = %pending, "applying deferred config");
            self.load_locked(&mut t, pending).await?;
        }

        let id = self.next_stream_id.fetch_add(1, Ordering::SeqCst);
        let native = Arc::clone(&self.native);
        let created = tokio::task::spawn_blocking(move || -> Result<u64> {
            let mut guard = lock_native(&native);
            let native = &mut *guard;
            let model = native.model.as_mut().ok_or(VoxholdError::NotPrepared)?;
            let stream = guarded("create stream", || model.create_stream())?;
            native.streams.insert(id, stream);
            Ok(native.generation)
        })
        .await?;

        match created {
            Ok(generation) => {
                self.cancel_idle_unload(&mut t);
                let active = self.active_streams.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::debug!(manager = %self.name, stream = id, generation, active, "stream created");
                Ok(Some(StreamSession::new(id, generation, Arc::downgrade(&self))))
            }
            Err(e) => {
                tracing::warn!(manager = %self.name, error = %e, "stream creation failed");
                Err(e)
            }
        }
    }

    pub(crate) async fn release_stream(self: &Arc<Self>, id: u64) {
        let mut t = self.transition.lock().await;

        let found = {
            let mut native = lock_native(&self.native);
            match native.streams.remove(&id) {
                Some(stream) => {
                    release(&self.name, "release stream", stream);
                    true
                }
                None => false,
            }
        };
        if !found {
            tracing::debug!(manager = %self.name, stream = id, "stream already released");
            return;
        }

        let previous = self
            .active_streams
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or_else(|n| n);
        let remaining = previous.saturating_sub(1);
        tracing::debug!(manager = %self.name, stream = id, active = remaining, "stream released");

        if remaining == 0 {
            self.schedule_idle_unload(&mut t);
        }
    }

    fn cancel_idle_unload(&self, t: &mut Transition) {
        if t.scheduler.cancel() {
            tracing::debug!(manager = %self.name, "pending idle unload cancelled");
        }
        self.pending_unload.store(false, Ordering::SeqCst);
    }

    /// Decide eviction after the last stream is released.
    fn schedule_idle_unload(self: &Arc<Self>, t: &mut Transition) {
        if !self.prepared.load(Ordering::SeqCst) {
            return;
        }
        match t.policy.idle_action() {
            IdleAction::Keep => {
                tracing::debug!(manager = %self.name, "idle; keeping model loaded");
            }
            IdleAction::UnloadNow => {
                self.release_model_locked(t, "idle (no timeout)");
            }
            IdleAction::UnloadAfter(delay) => {
                self.pending_unload.store(true, Ordering::SeqCst);
                let weak = Arc::downgrade(self);
                t.scheduler.arm(delay, async move {
                    if let Some(shared) = weak.upgrade() {
                        shared.unload(UnloadOrigin::IdleTimer).await;
                    }
                });
                tracing::debug!(
                    manager = %self.name,
                    delay_ms = delay.as_millis() as u64,
                    "idle unload scheduled"
                );
            }
        }
    }

    pub(crate) async fn unload(self: &Arc<Self>, origin: UnloadOrigin) -> bool {
        // The idle timer raised the flag when it was armed; prepare and
        // create_stream lower it.
        if origin == UnloadOrigin::Explicit {
            self.pending_unload.store(true, Ordering::SeqCst);
        }
        let mut t = self.transition.lock().await;

        match origin {
            UnloadOrigin::Explicit => {
                t.scheduler.cancel();
            }
            UnloadOrigin::IdleTimer => {
                t.scheduler.disarm();
                if !self.pending_unload.load(Ordering::SeqCst) {
                    tracing::debug!(manager = %self.name, "idle unload superseded by new activity");
                    return false;
                }
            }
        }

        let active = self.active_streams.load(Ordering::SeqCst);
        if active > 0 {
            tracing::debug!(manager = %self.name, active, "unload skipped; streams are active");
            self.pending_unload.store(false, Ordering::SeqCst);
            return false;
        }

        let reason = match origin {
            UnloadOrigin::Explicit => "explicit unload",
            UnloadOrigin::IdleTimer => "idle timeout",
        };
        self.release_model_locked(&mut t, reason)
    }

    /// Drop the model and cached config. Caller holds the transition lock.
    fn release_model_locked(&self, t: &mut Transition, reason: &'static str) -> bool {
        let released = {
            let mut native = lock_native(&self.native);
            match native.model.take() {
                Some(model) => {
                    release(&self.name, "release model", model);
                    true
                }
                None => false,
            }
        };

        self.prepared.store(false, Ordering::SeqCst);
        self.pending_unload.store(false, Ordering::SeqCst);
        let previous = t.loaded.take();
        if let Some(pending) = t.pending.take() {
            tracing::debug!(manager = %self.name, dropped = %pending, "pending config dropped with unload");
        }

        if released {
            match previous {
                Some(fingerprint) => {
                    tracing::info!(manager = %self.name, fingerprint = %fingerprint, reason, "model unloaded")
                }
                None => tracing::info!(manager = %self.name, reason, "model unloaded"),
            }
        }
        released
    }

    async fn shutdown(self: &Arc<Self>) {
        self.closed.store(true, Ordering::SeqCst);
        let mut t = self.transition.lock().await;
        t.scheduler.cancel();

        let drained = {
            let mut native = lock_native(&self.native);
            let streams: Vec<_> = native.streams.drain().collect();
            let count = streams.len();
            for (_, stream) in streams {
                release(&self.name, "release stream", stream);
            }
            count
        };
        if drained > 0 {
            tracing::warn!(manager = %self.name, drained, "force-released active streams at shutdown");
        }
        self.active_streams.store(0, Ordering::SeqCst);

        self.release_model_locked(&mut t, "shutdown");
        tracing::info!(manager = %self.name, "recognizer manager shut down");
    }

    fn with_stream<T>(
        &self,
        id: u64,
        operation: &'static str,
        f: impl FnOnce(&mut dyn StreamHandle) -> Result<T>,
    ) -> Result<T> {
        let mut native = lock_native(&self.native);
        let stream = native
            .streams
            .get_mut(&id)
            .ok_or_else(|| VoxholdError::StreamOperation {
                operation: operation.to_string(),
                message: "stream is not active".to_string(),
            })?;
        guarded(operation, || f(&mut **stream))
    }
}

/// Builder for [`RecognizerManager`].
pub struct RecognizerManagerBuilder {
    name: Option<String>,
    backend: Arc<dyn InferenceBackend>,
    observer: Option<Arc<dyn LoadObserver>>,
}

impl RecognizerManagerBuilder {
    /// Label used in every log line (defaults to the backend name).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn observer(mut self, observer: Arc<dyn LoadObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> RecognizerManager {
        let name = self
            .name
            .unwrap_or_else(|| self.backend.name().to_string());
        RecognizerManager {
            shared: Arc::new(Shared {
                name,
                backend: self.backend,
                observer: self.observer,
                transition: tokio::sync::Mutex::new(Transition {
                    loaded: None,
                    pending: None,
                    policy: RetentionPolicy::default(),
                    scheduler: IdleUnloadScheduler::new(),
                }),
                native: Arc::new(Mutex::new(Native::default())),
                active_streams: AtomicUsize::new(0),
                prepared: AtomicBool::new(false),
                loading: AtomicBool::new(false),
                pending_unload: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                next_stream_id: AtomicU64::new(1),
            }),
        }
    }
}

/// Owns one loaded model and multiplexes recognition streams over it.
///
/// The model is loaded lazily by [`prepare`](Self::prepare), shared by every
/// stream, and evicted according to the [`RetentionPolicy`] once the last
/// stream is released. A configuration change while streams are active is
/// deferred: the old model keeps serving them and the new fingerprint takes
/// effect on the next `prepare` or `create_stream` after they drain.
///
/// Instances are independent; create one per model family.
pub struct RecognizerManager {
    shared: Arc<Shared>,
}

impl RecognizerManager {
    pub fn builder<B: InferenceBackend + 'static>(backend: B) -> RecognizerManagerBuilder {
        RecognizerManagerBuilder {
            name: None,
            backend: Arc::new(backend),
            observer: None,
        }
    }

    pub fn new<B: InferenceBackend + 'static>(backend: B) -> Self {
        Self::builder(backend).build()
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// Load or reuse the model for `fingerprint`. Returns false on failure;
    /// the reason is logged.
    pub async fn prepare(&self, fingerprint: ConfigFingerprint, policy: RetentionPolicy) -> bool {
        match self.try_prepare(fingerprint, policy).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(manager = %self.name(), error = %e, "prepare failed");
                false
            }
        }
    }

    /// Like [`prepare`](Self::prepare) but reports what happened.
    ///
    /// Runs as its own task, so dropping the returned future does not
    /// interrupt a load halfway.
    pub async fn try_prepare(
        &self,
        fingerprint: ConfigFingerprint,
        policy: RetentionPolicy,
    ) -> Result<PrepareOutcome> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(shared.prepare(fingerprint, policy)).await?
    }

    /// Open a stream on the loaded model, or `None` if nothing is prepared
    /// or the backend refused.
    pub async fn create_stream(&self) -> Option<StreamSession> {
        match self.try_create_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(manager = %self.name(), error = %e, "create_stream failed");
                None
            }
        }
    }

    pub async fn try_create_stream(&self) -> Result<Option<StreamSession>> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(shared.create_stream()).await?
    }

    pub fn accept_waveform(&self, stream: &StreamSession, samples: &[f32], sample_rate: u32) {
        self.stream_call(stream, "accept_waveform", |s| {
            s.accept_waveform(samples, sample_rate)
        });
    }

    pub fn is_ready(&self, stream: &StreamSession) -> bool {
        self.stream_call(stream, "is_ready", |s| s.is_ready())
            .unwrap_or(false)
    }

    pub fn decode(&self, stream: &StreamSession) {
        self.stream_call(stream, "decode", |s| s.decode());
    }

    pub fn result_text(&self, stream: &StreamSession) -> Option<String> {
        self.stream_call(stream, "result_text", |s| s.result_text())
            .flatten()
    }

    /// Release a stream. `None` is a no-op.
    pub async fn release_stream(&self, stream: impl Into<Option<StreamSession>>) {
        let Some(mut stream) = stream.into() else {
            return;
        };
        if !stream.belongs_to(&self.shared) {
            // Its own Drop hands it back to the manager that issued it.
            tracing::warn!(manager = %self.name(), stream = stream.id(), "stream belongs to another manager");
            return;
        }
        stream.mark_released();
        let shared = Arc::clone(&self.shared);
        let id = stream.id();
        if let Err(e) = tokio::spawn(async move { shared.release_stream(id).await }).await {
            tracing::warn!(manager = %self.name(), stream = id, error = %e, "release task failed");
        }
    }

    /// Evict the model now unless streams are active. Returns true if a
    /// model was released.
    pub async fn unload(&self) -> bool {
        let shared = Arc::clone(&self.shared);
        match tokio::spawn(async move { shared.unload(UnloadOrigin::Explicit).await }).await {
            Ok(released) => released,
            Err(e) => {
                tracing::warn!(manager = %self.name(), error = %e, "unload task failed");
                false
            }
        }
    }

    /// Release every stream and the model regardless of policy. The manager
    /// refuses all further work afterwards.
    ///
    /// Runs as its own task, so dropping the returned future still finishes
    /// the teardown.
    pub async fn shutdown(&self) {
        let shared = Arc::clone(&self.shared);
        if let Err(e) = tokio::spawn(async move { shared.shutdown().await }).await {
            tracing::warn!(manager = %self.name(), error = %e, "shutdown task failed");
        }
    }

    pub fn is_prepared(&self) -> bool {
        self.shared.prepared.load(Ordering::SeqCst)
    }

    pub fn active_streams(&self) -> usize {
        self.shared.active_streams.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ManagerState {
        let shared = &self.shared;
        if shared.closed.load(Ordering::SeqCst) {
            return ManagerState::Closed;
        }
        if shared.loading.load(Ordering::SeqCst) {
            return ManagerState::Loading;
        }
        if !shared.prepared.load(Ordering::SeqCst) {
            return ManagerState::Unloaded;
        }
        match shared.active_streams.load(Ordering::SeqCst) {
            0 if shared.pending_unload.load(Ordering::SeqCst) => ManagerState::PendingUnload,
            0 => ManagerState::ReadyIdle,
            n => ManagerState::ReadyBusy(n),
        }
    }

    /// Fingerprint of the model currently loaded.
    pub async fn loaded_fingerprint(&self) -> Option<ConfigFingerprint> {
        self.shared.transition.lock().await.loaded.clone()
    }

    /// Fingerprint recorded by a deferred `prepare`, waiting for streams to drain.
    pub async fn pending_fingerprint(&self) -> Option<ConfigFingerprint> {
        self.shared.transition.lock().await.pending.clone()
    }

    pub async fn policy(&self) -> RetentionPolicy {
        self.shared.transition.lock().await.policy
    }

    fn stream_call<T>(
        &self,
        stream: &StreamSession,
        operation: &'static str,
        f: impl FnOnce(&mut dyn StreamHandle) -> Result<T>,
    ) -> Option<T> {
        if !stream.belongs_to(&self.shared) {
            tracing::warn!(manager = %self.name(), stream = stream.id(), operation, "stream belongs to another manager");
            return None;
        }
        match self.shared.with_stream(stream.id(), operation, f) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(
                    manager = %self.name(),
                    stream = stream.id(),
                    operation,
                    error = %e,
                    "stream operation failed"
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for RecognizerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognizerManager")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}
