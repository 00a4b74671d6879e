//! Models: configuration, schema, instances, and lifecycle
//!
//! A [`Model`] owns everything needed to serve one named, versioned
//! artifact: the immutable configuration, the label tables, the
//! statistics aggregator, and the set of [`ModelInstance`]s. Requests
//! enter through [`Model::enqueue`], which hands them to the attached
//! scheduler; the scheduler decides when to dispatch batches onto
//! instances.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use proteus::config::{ModelInputConfig, ModelOutputConfig};
use proteus::{Error, InferenceRequest, LabelProvider, ModelConfig, ModelSchema, Result};
use tracing::{debug, info};

use crate::backend::Backend;
use crate::instance::ModelInstance;
use crate::scheduler::{DynamicBatchScheduler, Scheduler};
use crate::stats::StatsAggregator;

/// Tracks requests between scheduler acceptance and release, so model
/// teardown can wait for in-flight work to drain.
#[derive(Default)]
pub(crate) struct InflightTracker {
    count: Mutex<u64>,
    drained: Condvar,
}

impl InflightTracker {
    pub(crate) fn increment(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count += 1;
    }

    pub(crate) fn decrement(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    pub(crate) fn wait_for_drain(&self) {
        let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count > 0 {
            count = self.drained.wait(count).unwrap_or_else(|e| e.into_inner());
        }
    }

    pub(crate) fn in_flight(&self) -> u64 {
        *self.count.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A served model: one configuration, one backend, many instances.
pub struct Model {
    config: ModelConfig,
    schema: Arc<ModelSchema>,
    version: i64,
    model_dir: PathBuf,
    backend: Arc<dyn Backend>,
    label_provider: LabelProvider,
    stats: Arc<StatsAggregator>,

    instances: Mutex<Vec<Arc<ModelInstance>>>,
    passive_instances: Mutex<Vec<Arc<ModelInstance>>>,
    scheduler: Mutex<Option<Arc<dyn Scheduler>>>,
    inflight: Arc<InflightTracker>,
    model_initialized: AtomicBool,
}

impl Model {
    /// Create a model and all of its instances.
    ///
    /// Runs the full construction sequence: validate the configuration,
    /// load label tables, run the backend's model-level init, then
    /// create and initialize every configured instance (each instance's
    /// init runs on its worker thread when one is attached). Warmup and
    /// scheduler attachment are separate steps — see
    /// [`warm_up`](Self::warm_up) and
    /// [`set_configured_scheduler`](Self::set_configured_scheduler).
    ///
    /// # Errors
    /// Backend load/init failures, instance-creation failures, and
    /// configuration errors all abort the load; nothing is retried.
    pub fn new(
        config: ModelConfig,
        version: i64,
        model_dir: impl Into<PathBuf>,
        backend: Arc<dyn Backend>,
        device_blocking: bool,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let model_dir = model_dir.into();

        let mut label_provider = LabelProvider::new();
        for output in &config.output {
            if let Some(label_file) = &output.label_filename {
                label_provider.add_labels(&output.name, model_dir.join(label_file))?;
            }
        }

        let schema = ModelSchema::new(&config, version);
        let model = Arc::new(Self {
            config,
            schema,
            version,
            model_dir,
            backend,
            label_provider,
            stats: Arc::new(StatsAggregator::new()),
            instances: Mutex::new(Vec::new()),
            passive_instances: Mutex::new(Vec::new()),
            scheduler: Mutex::new(None),
            inflight: Arc::new(InflightTracker::default()),
            model_initialized: AtomicBool::new(false),
        });

        model.backend.model_init(&model)?;
        model.model_initialized.store(true, Ordering::Release);

        ModelInstance::create_instances(&model, device_blocking)?;
        info!(
            model = model.name(),
            version,
            backend = model.backend.name(),
            "model created"
        );
        Ok(model)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    #[must_use]
    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    #[must_use]
    pub fn label_provider(&self) -> &LabelProvider {
        &self.label_provider
    }

    /// Look up a declared input.
    ///
    /// # Errors
    /// `InvalidArgument` when the input is not part of the model.
    pub fn input(&self, name: &str) -> Result<&ModelInputConfig> {
        self.schema.input(name)
    }

    /// Look up a declared output.
    ///
    /// # Errors
    /// `InvalidArgument` when the output is not part of the model.
    pub fn output(&self, name: &str) -> Result<&ModelOutputConfig> {
        self.schema.output(name)
    }

    /// Register a newly created instance. Passive instances are kept
    /// aside and never handed to the scheduler.
    pub(crate) fn add_instance(&self, instance: Arc<ModelInstance>) {
        debug!(
            model = self.name(),
            instance = instance.name(),
            passive = instance.is_passive(),
            "adding instance"
        );
        if instance.is_passive() {
            self.passive_instances
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(instance);
        } else {
            self.instances
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(instance);
        }
    }

    /// The non-passive instances, in creation order.
    #[must_use]
    pub fn instances(&self) -> Vec<Arc<ModelInstance>> {
        self.instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    #[must_use]
    pub fn passive_instances(&self) -> Vec<Arc<ModelInstance>> {
        self.passive_instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Warm every non-passive instance, serially. Each instance blocks
    /// until its samples have fully drained. Idempotent: samples are
    /// consumed on the first run, later calls are no-ops.
    ///
    /// [`set_configured_scheduler`](Self::set_configured_scheduler)
    /// calls this itself; it only needs to be driven explicitly when an
    /// external scheduler is attached via [`set_scheduler`](Self::set_scheduler).
    ///
    /// # Errors
    /// Dispatch failures only; backend error responses during warmup
    /// are logged and discarded.
    pub fn warm_up(&self) -> Result<()> {
        for instance in self.instances() {
            instance.warm_up()?;
        }
        Ok(())
    }

    /// Attach a scheduler. A model gets exactly one for its lifetime.
    ///
    /// Non-passive instances must have completed [`warm_up`](Self::warm_up)
    /// first: only instances at `WarmedUp` are promoted to `Ready`, and
    /// instances short of `Ready` refuse every batch.
    ///
    /// # Errors
    /// `Internal` when a scheduler is already attached.
    pub fn set_scheduler(&self, scheduler: Arc<dyn Scheduler>) -> Result<()> {
        let mut slot = self.scheduler.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Err(Error::internal("attempt to change scheduler not allowed"));
        }
        *slot = Some(scheduler);
        for instance in self.instances() {
            instance.mark_ready();
        }
        Ok(())
    }

    /// Warm every non-passive instance, then build and attach the
    /// standard dynamic-batching scheduler over them, with the delay
    /// window from the configuration. Warmup runs to completion before
    /// the scheduler exists, so no instance is ever visible to dispatch
    /// without having been warmed. Sequence-batching configuration is
    /// passed through untouched for an externally supplied scheduler;
    /// this method always builds the dynamic batcher.
    ///
    /// # Errors
    /// `Internal` when a scheduler is already attached;
    /// `InvalidArgument` when the model has no non-passive instances;
    /// warmup dispatch failures abort the attachment.
    pub fn set_configured_scheduler(&self) -> Result<()> {
        self.warm_up()?;

        let delay_us = self
            .config
            .dynamic_batching
            .as_ref()
            .map_or(0, |db| db.max_queue_delay_microseconds);
        let scheduler = DynamicBatchScheduler::new(
            self.instances(),
            self.config.max_batch_size,
            std::time::Duration::from_micros(delay_us),
        )?;
        self.set_scheduler(scheduler)
    }

    /// Enqueue a request for execution.
    ///
    /// The request must be prepared and carry both callbacks. On any
    /// error the request has been consumed and its release callback has
    /// fired; no response is emitted for errors detected here.
    ///
    /// # Errors
    /// `Unavailable` before a scheduler is attached or during shutdown;
    /// `InvalidArgument` for a request built against another model.
    pub fn enqueue(&self, mut request: InferenceRequest) -> Result<()> {
        if !Arc::ptr_eq(request.schema(), &self.schema) {
            return Err(Error::invalid_arg(format!(
                "request for model '{}' enqueued on model '{}'",
                request.model_name(),
                self.name()
            )));
        }

        let scheduler = {
            let slot = self.scheduler.lock().unwrap_or_else(|e| e.into_inner());
            slot.clone().ok_or_else(|| {
                Error::unavailable(format!("model '{}' is not ready", self.name()))
            })?
        };

        // Count the request in-flight until its release fires, so
        // teardown can drain.
        self.inflight.increment();
        let inflight = Arc::clone(&self.inflight);
        request.add_internal_release_fn(Box::new(move || inflight.decrement()));

        scheduler.enqueue(request)
    }

    /// Requests accepted by the scheduler whose release has not fired
    /// yet.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.inflight.in_flight()
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        // Stop the scheduler first: its queue drains (pending requests
        // get unavailable-responses) and no new batches dispatch.
        self.scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        // Wait for batches already handed to instances; their releases
        // bring the in-flight count to zero.
        self.inflight.wait_for_drain();

        if self.model_initialized.load(Ordering::Acquire) {
            self.backend.model_fini(self);
        }
        debug!(model = self.name(), "model destroyed");
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name())
            .field("version", &self.version)
            .field("max_batch_size", &self.config.max_batch_size)
            .field("instances", &self.instances().len())
            .field("passive_instances", &self.passive_instances().len())
            .finish_non_exhaustive()
    }
}
