//! Model instances
//!
//! A [`ModelInstance`] is one replica of a model bound to a device (or
//! the CPU). It owns the opaque per-replica backend state and, when the
//! model runs more than one non-passive replica, a handle to the
//! [`BackendThread`] that serializes its execution.
//!
//! All three public operations share the same dispatch shape: with a
//! backend thread the work is enqueued as a payload, without one it
//! runs inline on the calling thread. `initialize` and `warm_up` block
//! on the payload signal because they gate the model becoming visible;
//! `schedule` is fire-and-forget.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use proteus::config::{InstanceGroupConfig, InstanceKind, ModelConfig};
use proteus::{Error, InferenceRequest, Result};
use tracing::{debug, error};

use crate::backend::Backend;
use crate::backend_thread::{BackendThread, Payload, PayloadOp, BACKEND_THREAD_NICE};
use crate::model::Model;
use crate::stats::StatsAggregator;
use crate::warmup::{self, CountingCompletion, WarmupSample};

/// Lifecycle of an instance. Transitions only move forward; passive
/// instances jump from `Initialized` to `Ready` without warming up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InstanceState {
    Uninitialized,
    Initialized,
    WarmedUp,
    Ready,
}

/// One replica of a model on one device.
///
/// The back-reference to the model is weak; the backend and stats
/// handles are held directly so that finalization and in-flight batches
/// keep working while the model itself is tearing down.
pub struct ModelInstance {
    model: Weak<Model>,
    backend: Arc<dyn Backend>,
    stats: Arc<StatsAggregator>,
    name: String,
    index: usize,
    kind: InstanceKind,
    device_id: i32,
    profile_names: Vec<String>,
    passive: bool,

    state: Mutex<InstanceState>,
    /// Opaque per-replica state owned by the backend; only touched from
    /// the instance's execution thread.
    backend_state: Mutex<Option<Box<dyn Any + Send>>>,
    backend_thread: Option<Arc<BackendThread>>,
    warmup_samples: Mutex<Vec<WarmupSample>>,
}

impl ModelInstance {
    /// Create every instance declared by the model's instance groups
    /// and register them with the model.
    ///
    /// A dedicated backend thread per instance is only worth the hop
    /// when more than one non-passive replica exists; a single-replica
    /// deployment runs inline. Under `device_blocking`, instances
    /// sharing a device share one thread, resolved through a map that
    /// lives only for the duration of this call.
    ///
    /// # Errors
    /// `InvalidArgument` for an unsupported instance-group kind;
    /// initialization and warmup-generation failures abort the load.
    pub(crate) fn create_instances(model: &Arc<Model>, device_blocking: bool) -> Result<()> {
        let config = model.config();

        // A configuration without instance groups serves one CPU
        // replica.
        let default_group;
        let groups: &[InstanceGroupConfig] = if config.instance_group.is_empty() {
            default_group = [InstanceGroupConfig {
                name: String::new(),
                kind: InstanceKind::Cpu,
                count: 1,
                gpus: Vec::new(),
                passive: false,
                profile: Vec::new(),
                rate_limiter: None,
            }];
            &default_group
        } else {
            &config.instance_group
        };

        let mut non_passive_count: i64 = 0;
        for group in groups {
            if !group.passive {
                non_passive_count += i64::from(group.count);
            }
        }
        let use_backend_threads = non_passive_count >= 2;

        let mut device_to_thread: HashMap<i32, Arc<BackendThread>> = HashMap::new();

        for (group_idx, group) in groups.iter().enumerate() {
            let group_name = if group.name.is_empty() {
                format!("{}_{group_idx}", model.name())
            } else {
                group.name.clone()
            };

            for replica in 0..group.count {
                let instance_name = if group.count > 1 {
                    format!("{group_name}_{replica}")
                } else {
                    group_name.clone()
                };
                let replica = usize::try_from(replica).unwrap_or_default();

                match group.kind {
                    InstanceKind::Cpu | InstanceKind::Model => {
                        Self::create_instance(
                            model,
                            config,
                            group,
                            instance_name,
                            replica,
                            0,
                            use_backend_threads,
                            device_blocking,
                            &mut device_to_thread,
                        )?;
                    }
                    InstanceKind::Gpu => {
                        for &device_id in &group.gpus {
                            Self::create_instance(
                                model,
                                config,
                                group,
                                instance_name.clone(),
                                replica,
                                device_id,
                                use_backend_threads,
                                device_blocking,
                                &mut device_to_thread,
                            )?;
                        }
                    }
                    other => {
                        return Err(Error::invalid_arg(format!(
                            "instance_group kind {other} not supported"
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn create_instance(
        model: &Arc<Model>,
        config: &ModelConfig,
        group: &InstanceGroupConfig,
        name: String,
        index: usize,
        device_id: i32,
        use_backend_threads: bool,
        device_blocking: bool,
        device_to_thread: &mut HashMap<i32, Arc<BackendThread>>,
    ) -> Result<()> {
        let backend_thread = if use_backend_threads {
            Some(Self::resolve_backend_thread(
                &name,
                device_id,
                device_blocking,
                device_to_thread,
            )?)
        } else {
            None
        };

        let warmup_samples =
            warmup::generate_warmup_data(config, model.schema(), model.model_dir())?;

        let instance = Arc::new(Self {
            model: Arc::downgrade(model),
            backend: Arc::clone(model.backend()),
            stats: Arc::clone(model.stats()),
            name,
            index,
            kind: group.kind,
            device_id,
            profile_names: group.profile.clone(),
            passive: group.passive,
            state: Mutex::new(InstanceState::Uninitialized),
            backend_state: Mutex::new(None),
            backend_thread,
            warmup_samples: Mutex::new(warmup_samples),
        });

        instance.initialize()?;
        model.add_instance(instance);
        Ok(())
    }

    /// Attach or create the worker thread for a device. Under
    /// device-blocking every instance on the same device reuses one
    /// thread; otherwise each instance gets its own.
    fn resolve_backend_thread(
        name: &str,
        device_id: i32,
        device_blocking: bool,
        device_to_thread: &mut HashMap<i32, Arc<BackendThread>>,
    ) -> Result<Arc<BackendThread>> {
        if device_blocking {
            if let Some(existing) = device_to_thread.get(&device_id) {
                debug!(
                    instance = name,
                    device_id, "reusing already started backend thread"
                );
                return Ok(Arc::clone(existing));
            }
        }

        let thread = BackendThread::new(name, BACKEND_THREAD_NICE, device_id)?;
        if device_blocking {
            device_to_thread.insert(device_id, Arc::clone(&thread));
        }
        Ok(thread)
    }

    // ---- Identity (the backend-visible accessors) ----

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn kind(&self) -> InstanceKind {
        self.kind
    }

    #[must_use]
    pub fn device_id(&self) -> i32 {
        self.device_id
    }

    #[must_use]
    pub fn profile_count(&self) -> usize {
        self.profile_names.len()
    }

    /// The i-th optimization profile name.
    ///
    /// # Errors
    /// `InvalidArgument` when the index is out of bounds.
    pub fn profile_name(&self, index: usize) -> Result<&str> {
        self.profile_names.get(index).map(String::as_str).ok_or_else(|| {
            Error::invalid_arg(format!(
                "out of bounds index {index}: instance is configured with {} profiles",
                self.profile_names.len()
            ))
        })
    }

    #[must_use]
    pub fn is_passive(&self) -> bool {
        self.passive
    }

    /// The owning model, `None` only while the model is tearing down.
    #[must_use]
    pub fn model(&self) -> Option<Arc<Model>> {
        self.model.upgrade()
    }

    #[must_use]
    pub fn state(&self) -> InstanceState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn has_backend_thread(&self) -> bool {
        self.backend_thread.is_some()
    }

    /// Whether this instance and `other` execute on the same worker
    /// thread (device-blocking sharing).
    #[must_use]
    pub fn shares_backend_thread_with(&self, other: &Self) -> bool {
        match (&self.backend_thread, &other.backend_thread) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    // ---- Opaque backend state ----

    /// Attach per-replica backend state. The previous value, if any, is
    /// dropped.
    pub fn set_state(&self, state: Box<dyn Any + Send>) {
        *self.backend_state.lock().unwrap_or_else(|e| e.into_inner()) = Some(state);
    }

    /// Run `f` with mutable access to the backend state slot.
    pub fn with_state<R>(&self, f: impl FnOnce(Option<&mut (dyn Any + Send)>) -> R) -> R {
        let mut guard = self.backend_state.lock().unwrap_or_else(|e| e.into_inner());
        f(guard.as_mut().map(|b| b.as_mut()))
    }

    /// Detach and return the backend state.
    #[must_use]
    pub fn take_state(&self) -> Option<Box<dyn Any + Send>> {
        self.backend_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    // ---- Statistics (backend-visible) ----

    /// Record the outcome of one request.
    pub fn report_statistics(
        &self,
        request: &InferenceRequest,
        success: bool,
        exec_start_ns: u64,
        compute_start_ns: u64,
        compute_end_ns: u64,
        exec_end_ns: u64,
    ) {
        if !request.collect_stats() {
            return;
        }
        self.stats.update_inference(
            success,
            request.batch_size(),
            request.queue_start_ns(),
            exec_start_ns,
            compute_start_ns,
            compute_end_ns,
            exec_end_ns,
        );
    }

    /// Record the execution of one whole batch.
    pub fn report_batch_statistics(
        &self,
        batch_size: u64,
        exec_start_ns: u64,
        compute_start_ns: u64,
        compute_end_ns: u64,
        exec_end_ns: u64,
    ) {
        self.stats.update_batch(
            batch_size,
            exec_start_ns,
            compute_start_ns,
            compute_end_ns,
            exec_end_ns,
        );
    }

    // ---- Operations ----

    /// Initialize the replica through the backend. Blocks until the
    /// backend's init hook has run (on the worker thread when one is
    /// attached).
    ///
    /// # Errors
    /// An init failure is fatal for this instance and aborts the model
    /// load.
    pub fn initialize(self: &Arc<Self>) -> Result<()> {
        match &self.backend_thread {
            Some(thread) => {
                let (payload, status) = Payload::new(PayloadOp::Init, Arc::clone(self));
                thread.enqueue(payload)?;
                status.recv().map_err(|_| {
                    Error::internal(format!(
                        "backend thread exited before initializing instance '{}'",
                        self.name
                    ))
                })?
            }
            None => self.initialize_func(),
        }
    }

    /// Run every warmup sample. Blocks until the last sample's requests
    /// have all been released.
    ///
    /// # Errors
    /// Only sample-construction and dispatch failures; error responses
    /// produced by the backend are logged and discarded, and the
    /// instance still proceeds to ready.
    pub fn warm_up(self: &Arc<Self>) -> Result<()> {
        match &self.backend_thread {
            Some(thread) => {
                let (payload, status) = Payload::new(PayloadOp::WarmUp, Arc::clone(self));
                thread.enqueue(payload)?;
                status.recv().map_err(|_| {
                    Error::internal(format!(
                        "backend thread exited before warming up instance '{}'",
                        self.name
                    ))
                })?
            }
            None => self.warm_up_func(),
        }
    }

    /// Dispatch a batch. Fire-and-forget: `on_completion` runs on the
    /// executing thread once the backend call returned, and per-request
    /// responses are the only channel for execution errors — nothing
    /// produced inside the dispatch can reach the caller. An instance
    /// short of `Ready` refuses the batch, failing every request with
    /// `Unavailable`.
    pub fn schedule(
        self: &Arc<Self>,
        requests: Vec<InferenceRequest>,
        on_completion: impl FnOnce() + Send + 'static,
    ) {
        match &self.backend_thread {
            Some(thread) => {
                let (payload, _status) =
                    Payload::infer_run(Arc::clone(self), requests, Box::new(on_completion));
                if let Err(e) = thread.enqueue(payload) {
                    // The thread is gone; the payload (and its requests)
                    // were dropped, which released each request.
                    error!(instance = %self.name, "failed to enqueue batch: {e}");
                }
            }
            None => self.schedule_func(requests, Some(Box::new(on_completion))),
        }
    }

    // ---- The *Func bodies (run on the execution thread) ----

    pub(crate) fn initialize_func(&self) -> Result<()> {
        self.backend.instance_init(self)?;

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = if self.passive {
            // Passive instances are never warmed up or registered with
            // the scheduler; initialization is all they get.
            InstanceState::Ready
        } else {
            InstanceState::Initialized
        };
        debug!(instance = %self.name, state = ?*state, "instance initialized");
        Ok(())
    }

    pub(crate) fn warm_up_func(&self) -> Result<()> {
        let samples =
            std::mem::take(&mut *self.warmup_samples.lock().unwrap_or_else(|e| e.into_inner()));

        for sample in samples {
            let model_name = self
                .model()
                .map_or_else(|| "<released>".to_string(), |m| m.name().to_string());
            debug!(
                model = %model_name,
                instance = %self.name,
                sample = %sample.name(),
                "running warmup sample"
            );

            // Wait on every release, not just the first request's, so
            // completion does not depend on the backend's release order.
            let completion = CountingCompletion::new(sample.requests.len());
            let mut batch = Vec::with_capacity(sample.requests.len());
            for mut request in sample.requests {
                let completion = completion.clone();
                request.set_release_callback(Box::new(move |flags| {
                    if flags & proteus::RELEASE_ALL != 0 {
                        completion.arrive();
                    }
                }));
                request.capture_request_start();
                request.capture_queue_start();
                batch.push(request);
            }

            self.execute(batch);
            completion.wait();
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state < InstanceState::WarmedUp {
            *state = InstanceState::WarmedUp;
        }
        Ok(())
    }

    pub(crate) fn schedule_func(
        &self,
        requests: Vec<InferenceRequest>,
        on_completion: Option<Box<dyn FnOnce() + Send>>,
    ) {
        // Inference only runs on a Ready instance. Warmup and
        // initialization go through their own payloads, never here.
        let state = self.state();
        if state < InstanceState::Ready {
            error!(
                instance = %self.name,
                state = ?state,
                "refusing batch for instance that is not ready"
            );
            InferenceRequest::respond_if_error(
                requests,
                &Error::unavailable(format!("instance '{}' is not ready", self.name)),
            );
        } else {
            self.execute(requests);
        }
        if let Some(f) = on_completion {
            f();
        }
    }

    /// Hand a batch to the backend. On failure the backend returns the
    /// entire batch and every request gets the same error response.
    fn execute(&self, mut requests: Vec<InferenceRequest>) {
        for request in &mut requests {
            let _ = request.mark_executing();
        }

        if let Err(failure) = self.backend.instance_execute(self, requests) {
            error!(
                instance = %self.name,
                "backend execution failed: {}",
                failure.error
            );
            InferenceRequest::respond_if_error(failure.requests, &failure.error);
        }
    }

    /// Mark the instance visible to the scheduler. Only a warmed-up
    /// instance advances; anything short of `WarmedUp` is left as it
    /// is, and [`schedule`](Self::schedule) keeps refusing its batches.
    pub(crate) fn mark_ready(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == InstanceState::WarmedUp {
            *state = InstanceState::Ready;
        }
    }
}

impl Drop for ModelInstance {
    fn drop(&mut self) {
        self.backend.instance_fini(self);
        // The state slot dies with the instance.
        self.backend_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

impl std::fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelInstance")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("kind", &self.kind)
            .field("device_id", &self.device_id)
            .field("passive", &self.passive)
            .field("state", &self.state())
            .field("has_backend_thread", &self.backend_thread.is_some())
            .finish()
    }
}
