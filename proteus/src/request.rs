//! The inference request model
//!
//! An [`InferenceRequest`] is built incrementally by a client frontend,
//! normalized against its model's schema, scheduled into a batch, and
//! finally released. The release callback fires exactly once on every
//! code path — explicit release, error response, or drop.
//!
//! # Lifecycle
//!
//! ```text
//! Building ── prepare_for_inference ──► Prepared ── enqueue ──► Scheduled
//!     ── dispatch ──► Executing ── release ──► Released
//! ```
//!
//! Transitions are monotonic forward. `prepare_for_inference` is
//! idempotent and clears any override inputs left from a previous
//! execution; overrides may only be added once a request is prepared.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::dtype::DataType;
use crate::error::{Error, Result};
use crate::memory::{BufferRef, MemoryReference, MemoryType};
use crate::response::{
    InferenceResponse, NullAllocator, ResponseAllocator, ResponseCompleteFn, ResponseFactory,
};
use crate::schema::ModelSchema;
use crate::shape;
use crate::time::monotonic_ns;

/// Release flag: the request will not be used again by the server.
pub const RELEASE_ALL: u32 = 0x01;

/// Request flag: first request of a sequence.
pub const FLAG_SEQUENCE_START: u32 = 0x01;
/// Request flag: last request of a sequence.
pub const FLAG_SEQUENCE_END: u32 = 0x02;

/// Callback invoked exactly once when the server is done with a request.
pub type ReleaseFn = Box<dyn FnOnce(u32) + Send>;

/// Where a request is in its lifecycle. Ordered; transitions only move
/// forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestState {
    Building,
    Prepared,
    Scheduled,
    Executing,
    Released,
}

/// A named input tensor of a request.
///
/// `original_shape` is what the client sent; `shape` is the normalized
/// form (batch dimension stripped for batching models, reshape applied);
/// `shape_with_batch_dim` restores the request batch size in front.
#[derive(Debug)]
pub struct Input {
    name: String,
    datatype: DataType,
    original_shape: Vec<i64>,
    shape: Vec<i64>,
    shape_with_batch_dim: Vec<i64>,
    is_shape_tensor: bool,
    data: MemoryReference,
}

impl Input {
    fn new(name: impl Into<String>, datatype: DataType, original_shape: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            datatype,
            original_shape,
            shape: Vec::new(),
            shape_with_batch_dim: Vec::new(),
            is_shape_tensor: false,
            data: MemoryReference::new(),
        }
    }

    /// Build an override input. Override shapes are taken verbatim;
    /// `batch_size != 0` prepends it to the shape-with-batch-dim view.
    #[must_use]
    pub fn new_override(
        name: impl Into<String>,
        datatype: DataType,
        batch_size: u32,
        shape: Vec<i64>,
    ) -> Self {
        let shape_with_batch_dim = if batch_size == 0 {
            shape.clone()
        } else {
            let mut s = Vec::with_capacity(shape.len() + 1);
            s.push(i64::from(batch_size));
            s.extend_from_slice(&shape);
            s
        };
        Self {
            name: name.into(),
            datatype,
            original_shape: shape.clone(),
            shape,
            shape_with_batch_dim,
            is_shape_tensor: false,
            data: MemoryReference::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn datatype(&self) -> DataType {
        self.datatype
    }

    #[must_use]
    pub fn original_shape(&self) -> &[i64] {
        &self.original_shape
    }

    /// Normalized shape (valid after `prepare_for_inference`).
    #[must_use]
    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    #[must_use]
    pub fn shape_with_batch_dim(&self) -> &[i64] {
        &self.shape_with_batch_dim
    }

    #[must_use]
    pub fn is_shape_tensor(&self) -> bool {
        self.is_shape_tensor
    }

    #[must_use]
    pub fn data(&self) -> &MemoryReference {
        &self.data
    }

    /// Append a buffer reference to this input's data. The bytes are not
    /// copied; the `Bytes` refcount keeps the backing storage alive.
    pub fn append_data(&mut self, data: Bytes, memory_type: MemoryType, memory_type_id: i64) {
        self.data
            .add_buffer(BufferRef::new(data, memory_type, memory_type_id));
    }

    /// Replace this input's (empty) data with a single owned buffer.
    ///
    /// # Errors
    /// `InvalidArgument` if data was already appended.
    pub fn set_data(&mut self, buffer: BufferRef) -> Result<()> {
        if self.data.total_byte_size() != 0 {
            return Err(Error::invalid_arg(format!(
                "input '{}' already has data, can't overwrite",
                self.name
            )));
        }
        self.data = buffer.into();
        Ok(())
    }

    pub fn remove_all_data(&mut self) {
        self.data.clear();
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "input: {}, type: {}, original shape: {}, shape: {}",
            self.name,
            self.datatype,
            shape::dims_to_string(&self.original_shape),
            shape::dims_to_string(&self.shape),
        )?;
        if self.is_shape_tensor {
            write!(f, ", is_shape_tensor: true")?;
        }
        Ok(())
    }
}

/// An inbound inference call.
///
/// See the [module docs](self) for the lifecycle. Dropping a request
/// that still owns its release callback fires it with [`RELEASE_ALL`],
/// so release-exactly-once holds on every path including panics in the
/// dispatch machinery upstream of the backend.
pub struct InferenceRequest {
    schema: Arc<ModelSchema>,
    requested_version: Option<i64>,
    id: String,
    flags: u32,
    correlation_id: u64,
    priority: u32,
    timeout_us: u64,
    collect_stats: bool,

    state: RequestState,
    needs_normalization: bool,
    batch_size: u32,

    original_inputs: Vec<Input>,
    override_inputs: Vec<Arc<Input>>,
    original_requested_outputs: BTreeSet<String>,
    requested_outputs: BTreeSet<String>,

    response_factory: Option<ResponseFactory>,
    release_fn: Option<ReleaseFn>,
    internal_release_fns: Vec<Box<dyn FnOnce() + Send>>,

    request_start_ns: u64,
    queue_start_ns: u64,
}

impl InferenceRequest {
    /// Create a request bound to a model schema. `requested_version`
    /// of `None` means "whatever version the model serves".
    #[must_use]
    pub fn new(schema: Arc<ModelSchema>, requested_version: Option<i64>) -> Self {
        Self {
            schema,
            requested_version,
            id: String::new(),
            flags: 0,
            correlation_id: 0,
            priority: 0,
            timeout_us: 0,
            collect_stats: true,
            state: RequestState::Building,
            needs_normalization: true,
            batch_size: 0,
            original_inputs: Vec::new(),
            override_inputs: Vec::new(),
            original_requested_outputs: BTreeSet::new(),
            requested_outputs: BTreeSet::new(),
            response_factory: None,
            release_fn: None,
            internal_release_fns: Vec::new(),
            request_start_ns: 0,
            queue_start_ns: 0,
        }
    }

    // ---- Identity and metadata ----

    #[must_use]
    pub fn model_name(&self) -> &str {
        self.schema.name()
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    #[must_use]
    pub fn requested_version(&self) -> Option<i64> {
        self.requested_version
    }

    #[must_use]
    pub fn actual_version(&self) -> i64 {
        self.schema.version()
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    #[must_use]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    #[must_use]
    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    pub fn set_correlation_id(&mut self, correlation_id: u64) {
        self.correlation_id = correlation_id;
    }

    #[must_use]
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Set the priority level. Zero or a level above the model's
    /// configured maximum falls back to the model's default level.
    pub fn set_priority(&mut self, priority: u32) {
        if priority == 0 || priority > self.schema.max_priority_level() {
            self.priority = self.schema.default_priority_level();
        } else {
            self.priority = priority;
        }
    }

    #[must_use]
    pub fn timeout_us(&self) -> u64 {
        self.timeout_us
    }

    /// Advisory only; the execution core never interrupts a running
    /// batch.
    pub fn set_timeout_us(&mut self, timeout_us: u64) {
        self.timeout_us = timeout_us;
    }

    #[must_use]
    pub fn collect_stats(&self) -> bool {
        self.collect_stats
    }

    pub fn set_collect_stats(&mut self, collect: bool) {
        self.collect_stats = collect;
    }

    #[must_use]
    pub fn state(&self) -> RequestState {
        self.state
    }

    #[must_use]
    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    // ---- Timing marks ----

    pub fn capture_request_start(&mut self) {
        self.request_start_ns = monotonic_ns();
    }

    pub fn capture_queue_start(&mut self) {
        self.queue_start_ns = monotonic_ns();
    }

    #[must_use]
    pub fn request_start_ns(&self) -> u64 {
        self.request_start_ns
    }

    #[must_use]
    pub fn queue_start_ns(&self) -> u64 {
        self.queue_start_ns
    }

    // ---- Builder operations ----

    /// Declare an original input.
    ///
    /// # Errors
    /// `AlreadyExists` when an input of the same name was declared.
    pub fn add_original_input(
        &mut self,
        name: &str,
        datatype: DataType,
        original_shape: &[i64],
    ) -> Result<&mut Input> {
        if self.original_inputs.iter().any(|i| i.name == name) {
            return Err(Error::already_exists(format!(
                "input '{name}' already exists in request"
            )));
        }
        self.original_inputs
            .push(Input::new(name, datatype, original_shape.to_vec()));
        self.needs_normalization = true;
        debug!(request = %self.id, input = name, "add original input");
        Ok(self.original_inputs.last_mut().expect("just pushed"))
    }

    /// Remove one original input.
    ///
    /// # Errors
    /// `InvalidArgument` when no such input was declared.
    pub fn remove_original_input(&mut self, name: &str) -> Result<()> {
        let idx = self
            .original_inputs
            .iter()
            .position(|i| i.name == name)
            .ok_or_else(|| {
                Error::invalid_arg(format!("input '{name}' does not exist in request"))
            })?;
        self.original_inputs.remove(idx);
        self.needs_normalization = true;
        Ok(())
    }

    pub fn remove_all_original_inputs(&mut self) {
        self.original_inputs.clear();
        self.needs_normalization = true;
    }

    /// Mutable access to a declared original input (e.g. to append
    /// data).
    ///
    /// # Errors
    /// `InvalidArgument` when no such input was declared.
    pub fn original_input_mut(&mut self, name: &str) -> Result<&mut Input> {
        self.original_inputs
            .iter_mut()
            .find(|i| i.name == name)
            .ok_or_else(|| Error::invalid_arg(format!("input '{name}' does not exist in request")))
    }

    /// Append a buffer reference to a declared input's data.
    ///
    /// # Errors
    /// `InvalidArgument` when no such input was declared.
    pub fn append_input_data(
        &mut self,
        name: &str,
        data: Bytes,
        memory_type: MemoryType,
        memory_type_id: i64,
    ) -> Result<()> {
        self.original_input_mut(name)?
            .append_data(data, memory_type, memory_type_id);
        Ok(())
    }

    pub fn add_original_requested_output(&mut self, name: impl Into<String>) {
        self.original_requested_outputs.insert(name.into());
        self.needs_normalization = true;
    }

    pub fn remove_original_requested_output(&mut self, name: &str) {
        self.original_requested_outputs.remove(name);
        self.needs_normalization = true;
    }

    pub fn remove_all_original_requested_outputs(&mut self) {
        self.original_requested_outputs.clear();
        self.needs_normalization = true;
    }

    /// Attach the response allocator and completion callback. Mandatory
    /// before the request can be scheduled.
    pub fn set_response_callback(
        &mut self,
        allocator: Arc<dyn ResponseAllocator>,
        complete_fn: ResponseCompleteFn,
    ) {
        self.response_factory = Some(ResponseFactory::new(
            self.schema.name(),
            self.id.clone(),
            allocator,
            complete_fn,
        ));
    }

    /// Attach the release callback. Mandatory before the request can be
    /// scheduled; fires exactly once.
    pub fn set_release_callback(&mut self, release_fn: ReleaseFn) {
        self.release_fn = Some(release_fn);
    }

    /// Register an internal hook run (in reverse registration order)
    /// before the client release callback. Used by the runtime to track
    /// in-flight requests.
    pub fn add_internal_release_fn(&mut self, f: Box<dyn FnOnce() + Send>) {
        self.internal_release_fns.push(f);
    }

    #[must_use]
    pub fn response_factory(&self) -> Option<&ResponseFactory> {
        self.response_factory.as_ref()
    }

    #[must_use]
    pub fn has_release_callback(&self) -> bool {
        self.release_fn.is_some()
    }

    // ---- Preparation and normalization ----

    /// Prepare the request for an (imminent) execution.
    ///
    /// Idempotent: clears override inputs from any previous execution,
    /// renormalizes if the declared inputs or requested outputs changed,
    /// and resets the timing marks. After this returns, the effective
    /// inputs are exactly the original inputs; overrides may then be
    /// added with [`add_override_input`](Self::add_override_input).
    ///
    /// # Errors
    /// Normalization failures (`InvalidArgument`) are returned
    /// synchronously; no response is emitted.
    pub fn prepare_for_inference(&mut self) -> Result<()> {
        self.override_inputs.clear();

        if self.needs_normalization {
            self.normalize()?;
            self.needs_normalization = false;
        }

        self.queue_start_ns = 0;
        self.request_start_ns = 0;
        self.state = RequestState::Prepared;
        debug!(request = %self.id, model = self.schema.name(), "prepared for inference");
        Ok(())
    }

    /// Add an override input for the imminent execution only. The
    /// returned handle can be re-added to other requests.
    ///
    /// # Errors
    /// `Internal` when the request has not been prepared.
    pub fn add_override_input(&mut self, input: Input) -> Result<Arc<Input>> {
        let handle = Arc::new(input);
        self.add_override_input_handle(Arc::clone(&handle))?;
        Ok(handle)
    }

    /// Add a shared override input handle, replacing any same-named
    /// override added earlier.
    ///
    /// # Errors
    /// `Internal` when the request has not been prepared.
    pub fn add_override_input_handle(&mut self, input: Arc<Input>) -> Result<()> {
        if self.state < RequestState::Prepared {
            return Err(Error::internal(format!(
                "override input '{}' added before request preparation",
                input.name
            )));
        }
        if let Some(existing) = self
            .override_inputs
            .iter_mut()
            .find(|i| i.name == input.name)
        {
            *existing = input;
        } else {
            self.override_inputs.push(input);
        }
        Ok(())
    }

    /// Effective inputs: the original inputs with same-named overrides
    /// substituted in place and extra overrides appended.
    #[must_use]
    pub fn inputs(&self) -> Vec<&Input> {
        let mut view: Vec<&Input> = Vec::with_capacity(
            self.original_inputs.len() + self.override_inputs.len(),
        );
        for input in &self.original_inputs {
            let replaced = self
                .override_inputs
                .iter()
                .find(|o| o.name == input.name)
                .map(Arc::as_ref);
            view.push(replaced.unwrap_or(input));
        }
        for over in &self.override_inputs {
            if !self.original_inputs.iter().any(|i| i.name == over.name) {
                view.push(over);
            }
        }
        view
    }

    /// Look up an effective input by name (override wins).
    ///
    /// # Errors
    /// `InvalidArgument` when the input is not present.
    pub fn input(&self, name: &str) -> Result<&Input> {
        if let Some(over) = self.override_inputs.iter().find(|i| i.name == name) {
            return Ok(over);
        }
        self.original_inputs
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| Error::invalid_arg(format!("input '{name}' does not exist in request")))
    }

    #[must_use]
    pub fn original_inputs(&self) -> &[Input] {
        &self.original_inputs
    }

    #[must_use]
    pub fn override_inputs(&self) -> &[Arc<Input>] {
        &self.override_inputs
    }

    /// Effective requested outputs (populated by normalization; empty
    /// client set means "all model outputs").
    #[must_use]
    pub fn requested_outputs(&self) -> &BTreeSet<String> {
        &self.requested_outputs
    }

    fn normalize(&mut self) -> Result<()> {
        let schema = Arc::clone(&self.schema);

        // Requested outputs: empty means every model output; otherwise
        // each name must exist in the model.
        self.requested_outputs.clear();
        if self.original_requested_outputs.is_empty() {
            self.requested_outputs
                .extend(schema.output_names().map(str::to_string));
        } else {
            for name in &self.original_requested_outputs {
                schema.output(name)?;
            }
            self.requested_outputs = self.original_requested_outputs.clone();
        }

        if self.original_inputs.len() != schema.input_count() {
            return Err(Error::invalid_arg(format!(
                "expected {} inputs but got {} inputs for model '{}'",
                schema.input_count(),
                self.original_inputs.len(),
                schema.name()
            )));
        }

        // Batch-size determination and batch-dim stripping.
        if schema.max_batch_size() == 0 {
            self.batch_size = 0;
            for input in &mut self.original_inputs {
                input.shape = input.original_shape.clone();
            }
        } else {
            self.batch_size = 0;
            for input in &mut self.original_inputs {
                let config = schema.input(&input.name)?;
                if config.is_shape_tensor {
                    input.shape = input.original_shape.clone();
                    input.is_shape_tensor = true;
                    continue;
                }

                if input.original_shape.is_empty() {
                    return Err(Error::invalid_arg(format!(
                        "input '{}' has no shape but model requires batch dimension for '{}'",
                        input.name,
                        schema.name()
                    )));
                }

                let first = u32::try_from(input.original_shape[0]).map_err(|_| {
                    Error::invalid_arg(format!(
                        "input '{}' batch dimension must be non-negative for '{}'",
                        input.name,
                        schema.name()
                    ))
                })?;
                if self.batch_size == 0 {
                    self.batch_size = first;
                } else if first != self.batch_size {
                    return Err(Error::invalid_arg(format!(
                        "input '{}' batch size does not match other inputs for '{}'",
                        input.name,
                        schema.name()
                    )));
                }

                input.shape = input.original_shape[1..].to_vec();
            }
        }

        if i64::from(self.batch_size) > i64::from(schema.max_batch_size()) {
            return Err(Error::invalid_arg(format!(
                "inference request batch-size must be <= {} for '{}'",
                schema.max_batch_size(),
                schema.name()
            )));
        }

        // Per-input dtype/shape verification, reshape, and the
        // shape-with-batch-dim view.
        for input in &mut self.original_inputs {
            let config = schema.input(&input.name)?;

            if input.datatype != config.data_type {
                return Err(Error::invalid_arg(format!(
                    "inference input data-type is '{}', model expects '{}' for '{}'",
                    input.datatype,
                    config.data_type,
                    schema.name()
                )));
            }

            if !shape::compare_dims_with_wildcard(&config.dims, &input.shape) {
                let mut full_dims = Vec::with_capacity(config.dims.len() + 1);
                if schema.max_batch_size() > 0 {
                    full_dims.push(shape::WILDCARD_DIM);
                }
                full_dims.extend_from_slice(&config.dims);
                return Err(Error::invalid_arg(format!(
                    "unexpected shape for input '{}' for model '{}'. Expected {}, got {}",
                    input.name,
                    schema.name(),
                    shape::dims_to_string(&full_dims),
                    shape::dims_to_string(&input.original_shape)
                )));
            }

            // A reshape rewrites the normalized shape, substituting the
            // request's values for the config's wildcard dims in order.
            if let Some(reshape) = &config.reshape {
                let mut variable_sizes: std::collections::VecDeque<i64> = config
                    .dims
                    .iter()
                    .zip(input.shape.iter())
                    .filter(|(&c, _)| c == shape::WILDCARD_DIM)
                    .map(|(_, &s)| s)
                    .collect();
                let mut new_shape = Vec::with_capacity(reshape.shape.len());
                for &dim in &reshape.shape {
                    if dim == shape::WILDCARD_DIM {
                        new_shape.push(variable_sizes.pop_front().ok_or_else(|| {
                            Error::invalid_arg(format!(
                                "reshape for input '{}' has more variable-size dimensions than \
                                 the input for model '{}'",
                                input.name,
                                schema.name()
                            ))
                        })?);
                    } else {
                        new_shape.push(dim);
                    }
                }
                input.shape = new_shape;
            }

            if self.batch_size == 0 {
                input.shape_with_batch_dim = input.shape.clone();
            } else {
                let mut s = Vec::with_capacity(input.shape.len() + 1);
                s.push(i64::from(self.batch_size));
                s.extend_from_slice(&input.shape);
                input.shape_with_batch_dim = s;
            }
        }

        Ok(())
    }

    // ---- Lifecycle ----

    /// Mark the request accepted by a scheduler.
    ///
    /// # Errors
    /// `Internal` on a backward transition.
    pub fn mark_scheduled(&mut self) -> Result<()> {
        self.advance(RequestState::Scheduled)
    }

    /// Mark the request handed to a backend.
    ///
    /// # Errors
    /// `Internal` on a backward transition.
    pub fn mark_executing(&mut self) -> Result<()> {
        self.advance(RequestState::Executing)
    }

    fn advance(&mut self, to: RequestState) -> Result<()> {
        if to < self.state {
            return Err(Error::internal(format!(
                "request '{}' cannot move from {:?} back to {to:?}",
                self.id, self.state
            )));
        }
        self.state = to;
        Ok(())
    }

    /// Release the request, firing internal hooks (reverse order) and
    /// then the client release callback. Consuming `self` makes a
    /// second release unrepresentable.
    pub fn release(mut self, flags: u32) {
        self.run_release_callbacks(flags);
        // Drop runs next but finds the callbacks already taken.
    }

    fn run_release_callbacks(&mut self, flags: u32) {
        for f in std::mem::take(&mut self.internal_release_fns)
            .into_iter()
            .rev()
        {
            f();
        }
        if let Some(f) = self.release_fn.take() {
            self.state = RequestState::Released;
            f(flags);
        }
    }

    /// Send an error response through the response factory and release
    /// the request with [`RELEASE_ALL`].
    pub fn respond_with_error(self, error: &Error) {
        if let Some(factory) = &self.response_factory {
            let response = factory.create_response();
            factory.send_with_status(response, error.duplicate());
        } else {
            debug!(
                request = %self.id,
                "no response factory attached, dropping error response: {error}"
            );
        }
        self.release(RELEASE_ALL);
    }

    /// Send the same error status to every request in a batch and
    /// release each one. The common exit path when a backend refuses a
    /// whole batch.
    pub fn respond_if_error(requests: Vec<Self>, error: &Error) {
        for request in requests {
            request.respond_with_error(error);
        }
    }

    // ---- Null request ----

    /// Create a shadow request sharing this request's shape with
    /// artificial data and no requested outputs. Used to pad batches:
    /// shape-tensor inputs are copied verbatim, and all other inputs
    /// reference prefixes of a single buffer sized to the largest
    /// input.
    ///
    /// # Errors
    /// `AlreadyExists`/`InvalidArgument` only on internal inconsistency
    /// of the source request.
    pub fn copy_as_null(&self) -> Result<Self> {
        let mut null = Self::new(Arc::clone(&self.schema), self.requested_version);
        null.batch_size = self.batch_size;
        null.collect_stats = false;

        // Pass 1: shape tensors keep their exact values, each in its
        // own small allocation so the null request's lifetime is
        // independent of the source's.
        for input in &self.original_inputs {
            if !input.is_shape_tensor {
                continue;
            }
            let copied = Bytes::from(input.data.concat().to_vec());
            let new_input = null.add_original_input(&input.name, input.datatype, &input.shape)?;
            new_input.shape = new_input.original_shape.clone();
            new_input.shape_with_batch_dim = new_input.original_shape.clone();
            new_input.is_shape_tensor = true;
            new_input.set_data(BufferRef::new(copied, MemoryType::Cpu, 0))?;
        }

        // Pass 2: the largest non-shape-tensor input determines the one
        // buffer everyone shares.
        let mut max_byte_size = 0usize;
        let mut max_input_name: Option<&str> = None;
        for input in &self.original_inputs {
            if input.is_shape_tensor {
                continue;
            }
            if input.data.total_byte_size() >= max_byte_size {
                max_byte_size = input.data.total_byte_size();
                max_input_name = Some(&input.name);
            }
        }

        // Pass 3: the max-size input owns the buffer; every other input
        // references a prefix sized to its own byte count.
        if let Some(max_name) = max_input_name {
            let backing = BufferRef::zeroed(max_byte_size);
            for input in &self.original_inputs {
                if input.is_shape_tensor {
                    continue;
                }
                let new_input =
                    null.add_original_input(&input.name, input.datatype, &input.shape)?;
                new_input.shape = new_input.original_shape.clone();
                new_input.shape_with_batch_dim = new_input.original_shape.clone();
                if input.name == max_name {
                    new_input.set_data(backing.clone())?;
                } else {
                    new_input.append_data(
                        backing.data.slice(0..input.data.total_byte_size()),
                        MemoryType::Cpu,
                        0,
                    );
                }
            }
        }

        // No outputs are requested, so any allocation is a backend bug;
        // the null allocator turns it into an error.
        null.set_response_callback(
            Arc::new(NullAllocator),
            Arc::new(|response: InferenceResponse| {
                if let Some(error) = response.error() {
                    debug!("null request response discarded: {error}");
                }
            }),
        );
        null.set_release_callback(Box::new(|_flags| {}));
        // The shapes above are already normalized copies; the null
        // request must never renormalize them.
        null.needs_normalization = false;
        null.state = RequestState::Prepared;
        Ok(null)
    }
}

impl Drop for InferenceRequest {
    fn drop(&mut self) {
        // Guarantees release-exactly-once even when a request is dropped
        // without going through the execution path.
        self.run_release_callbacks(RELEASE_ALL);
    }
}

impl fmt::Display for InferenceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "request id: {}, model: {}, requested version: {}, actual version: {}, flags: {:#x}, \
             correlation id: {}, batch size: {}, priority: {}, timeout (us): {}",
            self.id,
            self.model_name(),
            self.requested_version
                .map_or_else(|| "latest".to_string(), |v| v.to_string()),
            self.actual_version(),
            self.flags,
            self.correlation_id,
            self.batch_size,
            self.priority,
            self.timeout_us,
        )?;
        writeln!(f, "original inputs:")?;
        for input in &self.original_inputs {
            writeln!(f, "{input}")?;
        }
        writeln!(f, "override inputs:")?;
        for input in &self.override_inputs {
            writeln!(f, "{input}")?;
        }
        writeln!(f, "requested outputs:")?;
        for name in &self.requested_outputs {
            writeln!(f, "{name}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for InferenceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InferenceRequest")
            .field("id", &self.id)
            .field("model", &self.model_name())
            .field("state", &self.state)
            .field("batch_size", &self.batch_size)
            .field("inputs", &self.original_inputs.len())
            .field("overrides", &self.override_inputs.len())
            .finish_non_exhaustive()
    }
}
