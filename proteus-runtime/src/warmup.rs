//! Warmup sample generation
//!
//! Before an instance becomes visible to the scheduler it can be driven
//! through synthetic batches to trigger lazy initialization inside the
//! backend (JIT compilation, memory pools, autotuning). Each configured
//! warmup entry becomes a [`WarmupSample`]: `batch_size` batch-1
//! requests whose inputs point into shared synthetic buffers.
//!
//! Warmup never validates outputs; error responses are logged and
//! discarded.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};

use bytes::Bytes;
use proteus::config::{ModelConfig, WarmupInputConfig, WarmupSource};
use proteus::request::Input;
use proteus::{
    shape, DataType, Error, HostAllocator, InferenceRequest, InferenceResponse, MemoryType,
    ModelSchema, Result,
};
use rand::RngCore;
use tracing::{debug, warn};

/// Subdirectory of the model directory holding warmup data files.
const WARMUP_DATA_DIR: &str = "warmup";

/// One ready-to-run warmup batch for a single instance.
///
/// The requests are consumed when the instance warms up; the synthetic
/// buffers live on inside them via their `Bytes` refcounts.
#[derive(Debug)]
pub struct WarmupSample {
    name: String,
    pub(crate) requests: Vec<InferenceRequest>,
}

impl WarmupSample {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }
}

/// Byte size of one batch-1 tensor for a warmup input. When the dtype
/// has no fixed element size (strings), fall back to
/// `element_count * size_of::<i32>()` as the conservative allocation.
fn batch1_byte_size(name: &str, meta: &WarmupInputConfig) -> Result<usize> {
    let element_count = shape::element_count(&meta.dims).ok_or_else(|| {
        Error::invalid_arg(format!(
            "warmup setting expects all variable-size dimensions are specified for input '{name}'"
        ))
    })?;
    let element_count = usize::try_from(element_count).map_err(|_| {
        Error::invalid_arg(format!(
            "warmup setting has negative dimensions for input '{name}'"
        ))
    })?;
    Ok(match meta.data_type.size_in_bytes() {
        Some(s) => element_count * s,
        None => element_count * std::mem::size_of::<i32>(),
    })
}

/// Whether this input sources its bytes from the zero buffer. Strings
/// are always zero-sourced, even when configured as random data.
fn uses_zero_buffer(meta: &WarmupInputConfig) -> bool {
    match meta.source {
        WarmupSource::ZeroData => true,
        WarmupSource::RandomData => meta.data_type == DataType::String,
        WarmupSource::InputDataFile(_) => false,
    }
}

/// Read one warmup data file whole. For string-typed inputs the file
/// contents are the value; otherwise the file must cover the batch
/// byte size.
fn read_data_file(
    model_dir: &Path,
    file: &str,
    datatype: DataType,
    batch_byte_size: usize,
) -> Result<Bytes> {
    let path = model_dir.join(WARMUP_DATA_DIR).join(file);
    let data = std::fs::read(&path)?;
    if datatype != DataType::String && batch_byte_size > data.len() {
        return Err(Error::invalid_arg(format!(
            "warmup setting expects {batch_byte_size} bytes, but the data provided from {file} \
             only has {} bytes",
            data.len()
        )));
    }
    Ok(Bytes::from(data))
}

/// Generate the warmup samples for one instance.
///
/// Two passes per entry: the first sizes the shared zero/random buffers
/// across all inputs, the second builds `batch_size` batch-1 requests
/// referencing them. Entries with `batch_size == 0` are skipped.
///
/// # Errors
/// `InvalidArgument` for variable-size warmup dims or undersized data
/// files; IO errors for unreadable files.
pub(crate) fn generate_warmup_data(
    config: &ModelConfig,
    schema: &Arc<ModelSchema>,
    model_dir: &Path,
) -> Result<Vec<WarmupSample>> {
    let mut samples = Vec::new();

    for warmup in &config.model_warmup {
        if warmup.batch_size == 0 {
            debug!(sample = %warmup.name, "skipping batch 0 warmup sample");
            continue;
        }
        debug!(sample = %warmup.name, "generating warmup sample data");

        // First pass: size the shared synthetic buffers.
        let mut max_zero_byte_size = 0usize;
        let mut max_random_byte_size = 0usize;
        for (name, meta) in &warmup.inputs {
            let byte_size = batch1_byte_size(name, meta)?;
            match &meta.source {
                WarmupSource::InputDataFile(_) => {}
                _ if uses_zero_buffer(meta) => {
                    max_zero_byte_size = max_zero_byte_size.max(byte_size);
                }
                _ => {
                    max_random_byte_size = max_random_byte_size.max(byte_size);
                }
            }
        }

        let zero_buffer = Bytes::from(vec![0u8; max_zero_byte_size]);
        let random_buffer = {
            let mut data = vec![0u8; max_random_byte_size];
            rand::thread_rng().fill_bytes(&mut data);
            Bytes::from(data)
        };

        // File-provided inputs are read once and shared by every
        // request of the sample.
        let mut file_data: BTreeMap<&str, Bytes> = BTreeMap::new();
        for (name, meta) in &warmup.inputs {
            if let WarmupSource::InputDataFile(file) = &meta.source {
                let byte_size = batch1_byte_size(name, meta)?;
                file_data.insert(
                    name.as_str(),
                    read_data_file(model_dir, file, meta.data_type, byte_size)?,
                );
            }
        }

        // Second pass: one batch-1 request per configured batch slot.
        let mut requests = Vec::with_capacity(warmup.batch_size as usize);
        for _ in 0..warmup.batch_size {
            let mut request = InferenceRequest::new(Arc::clone(schema), None);
            let mut control_inputs: Vec<Input> = Vec::new();

            for (name, meta) in &warmup.inputs {
                let byte_size = batch1_byte_size(name, meta)?;
                let data = match &meta.source {
                    WarmupSource::InputDataFile(_) => {
                        let whole = file_data[name.as_str()].clone();
                        if meta.data_type == DataType::String {
                            whole
                        } else {
                            whole.slice(0..byte_size)
                        }
                    }
                    _ if uses_zero_buffer(meta) => zero_buffer.slice(0..byte_size),
                    _ => random_buffer.slice(0..byte_size),
                };

                // Only inputs declared by the model get the batch dim
                // prepended; control inputs (sequence signals and the
                // like) become overrides with their shape verbatim.
                let is_original_input = schema.input(name).is_ok();
                if is_original_input {
                    let mut input_shape = Vec::with_capacity(meta.dims.len() + 1);
                    if config.supports_batching() {
                        input_shape.push(1);
                    }
                    input_shape.extend_from_slice(&meta.dims);

                    let input =
                        request.add_original_input(name, meta.data_type, &input_shape)?;
                    input.append_data(data, MemoryType::Cpu, 0);
                } else {
                    let batch_dim = u32::from(config.supports_batching());
                    let mut input =
                        Input::new_override(name, meta.data_type, batch_dim, meta.dims.clone());
                    input.append_data(data, MemoryType::Cpu, 0);
                    control_inputs.push(input);
                }
            }

            request.prepare_for_inference()?;
            for input in control_inputs {
                request.add_override_input(input)?;
            }

            let sample_name = warmup.name.clone();
            request.set_response_callback(
                Arc::new(HostAllocator),
                Arc::new(move |response: InferenceResponse| {
                    if let Some(error) = response.error() {
                        warn!(sample = %sample_name, "warmup error response discarded: {error}");
                    }
                }),
            );

            requests.push(request);
        }

        samples.push(WarmupSample {
            name: warmup.name.clone(),
            requests,
        });
    }

    Ok(samples)
}

/// Counts down one slot per released request; `wait` returns once every
/// request of a sample has been released, regardless of release order.
#[derive(Clone)]
pub(crate) struct CountingCompletion {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl CountingCompletion {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            inner: Arc::new((Mutex::new(count), Condvar::new())),
        }
    }

    pub(crate) fn arrive(&self) {
        let (count, cv) = &*self.inner;
        let mut count = count.lock().unwrap_or_else(|e| e.into_inner());
        *count = count.saturating_sub(1);
        if *count == 0 {
            cv.notify_all();
        }
    }

    pub(crate) fn wait(&self) {
        let (count, cv) = &*self.inner;
        let mut count = count.lock().unwrap_or_else(|e| e.into_inner());
        while *count > 0 {
            count = cv.wait(count).unwrap_or_else(|e| e.into_inner());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proteus::config::ModelConfig;

    fn config(json: &str) -> ModelConfig {
        serde_json::from_str(json).unwrap()
    }

    fn generate(json: &str) -> Result<Vec<WarmupSample>> {
        let config = config(json);
        let schema = ModelSchema::new(&config, 1);
        generate_warmup_data(&config, &schema, Path::new("/nonexistent"))
    }

    #[test]
    fn zero_batch_size_sample_is_skipped() {
        let samples = generate(
            r#"{
            "name": "m",
            "max_batch_size": 4,
            "input": [{"name": "x", "data_type": "INT32", "dims": [4]}],
            "output": [{"name": "out", "data_type": "INT32", "dims": [4]}],
            "model_warmup": [{
                "name": "disabled",
                "batch_size": 0,
                "inputs": {"x": {"data_type": "INT32", "dims": [4], "source": "zero_data"}}
            }]
        }"#,
        )
        .unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn batch_n_sample_builds_batch1_requests() {
        let samples = generate(
            r#"{
            "name": "m",
            "max_batch_size": 4,
            "input": [{"name": "x", "data_type": "INT32", "dims": [4]}],
            "output": [{"name": "out", "data_type": "INT32", "dims": [4]}],
            "model_warmup": [{
                "name": "sample",
                "batch_size": 3,
                "inputs": {"x": {"data_type": "INT32", "dims": [4], "source": "zero_data"}}
            }]
        }"#,
        )
        .unwrap();
        assert_eq!(samples.len(), 1);
        let sample = &samples[0];
        assert_eq!(sample.request_count(), 3);

        let mut first_ptr = None;
        for request in &sample.requests {
            assert_eq!(request.batch_size(), 1);
            let input = request.input("x").unwrap();
            assert_eq!(input.shape_with_batch_dim(), &[1, 4]);
            let buf = input.data().buffer_at(0).unwrap();
            // 4 x INT32 = 16 zero bytes, all requests pointing into the
            // same shared buffer.
            assert_eq!(buf.data.len(), 16);
            assert!(buf.data.iter().all(|&b| b == 0));
            let ptr = buf.data.as_ptr();
            if let Some(first) = first_ptr {
                assert_eq!(ptr, first);
            }
            first_ptr = Some(ptr);
        }
    }

    #[test]
    fn string_random_input_sources_zero_buffer() {
        let samples = generate(
            r#"{
            "name": "m",
            "max_batch_size": 0,
            "input": [{"name": "s", "data_type": "STRING", "dims": [2]}],
            "output": [{"name": "out", "data_type": "STRING", "dims": [2]}],
            "model_warmup": [{
                "name": "sample",
                "batch_size": 1,
                "inputs": {"s": {"data_type": "STRING", "dims": [2], "source": "random_data"}}
            }]
        }"#,
        )
        .unwrap();
        let request = &samples[0].requests[0];
        let input = request.input("s").unwrap();
        // 2 elements x sizeof(i32) fallback, zero-filled.
        assert_eq!(input.data().total_byte_size(), 8);
        let buf = input.data().buffer_at(0).unwrap();
        assert!(buf.data.iter().all(|&b| b == 0));
        // Non-batching model: shape is taken verbatim.
        assert_eq!(input.shape(), &[2]);
    }

    #[test]
    fn control_input_becomes_override_without_batch_dim() {
        let samples = generate(
            r#"{
            "name": "m",
            "max_batch_size": 2,
            "input": [{"name": "x", "data_type": "FP32", "dims": [3]}],
            "output": [{"name": "out", "data_type": "FP32", "dims": [3]}],
            "model_warmup": [{
                "name": "sample",
                "batch_size": 1,
                "inputs": {
                    "x": {"data_type": "FP32", "dims": [3], "source": "random_data"},
                    "START": {"data_type": "INT32", "dims": [1], "source": "zero_data"}
                }
            }]
        }"#,
        )
        .unwrap();
        let request = &samples[0].requests[0];
        // 'x' is declared on the model: original input with batch dim.
        assert_eq!(request.input("x").unwrap().shape_with_batch_dim(), &[1, 3]);
        // 'START' is a control signal: an override, shape verbatim.
        let ctrl = request.input("START").unwrap();
        assert_eq!(ctrl.original_shape(), &[1]);
        assert_eq!(request.override_inputs().len(), 1);
    }

    #[test]
    fn wildcard_warmup_dims_rejected() {
        let err = generate(
            r#"{
            "name": "m",
            "max_batch_size": 0,
            "input": [{"name": "x", "data_type": "FP32", "dims": [-1]}],
            "output": [{"name": "out", "data_type": "FP32", "dims": [1]}],
            "model_warmup": [{
                "name": "sample",
                "batch_size": 1,
                "inputs": {"x": {"data_type": "FP32", "dims": [-1], "source": "zero_data"}}
            }]
        }"#,
        )
        .unwrap_err();
        assert!(err
            .message()
            .contains("all variable-size dimensions are specified"));
    }

    #[test]
    fn missing_data_file_is_an_error() {
        let err = generate(
            r#"{
            "name": "m",
            "max_batch_size": 0,
            "input": [{"name": "x", "data_type": "UINT8", "dims": [4]}],
            "output": [{"name": "out", "data_type": "UINT8", "dims": [4]}],
            "model_warmup": [{
                "name": "sample",
                "batch_size": 1,
                "inputs": {"x": {"data_type": "UINT8", "dims": [4],
                                  "source": {"input_data_file": "missing.bin"}}}
            }]
        }"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn data_file_feeds_input() {
        let dir = std::env::temp_dir().join("proteus-warmup-test");
        std::fs::create_dir_all(dir.join(WARMUP_DATA_DIR)).unwrap();
        std::fs::write(dir.join(WARMUP_DATA_DIR).join("x.bin"), vec![7u8; 8]).unwrap();

        let config = config(
            r#"{
            "name": "m",
            "max_batch_size": 0,
            "input": [{"name": "x", "data_type": "UINT8", "dims": [4]}],
            "output": [{"name": "out", "data_type": "UINT8", "dims": [4]}],
            "model_warmup": [{
                "name": "sample",
                "batch_size": 1,
                "inputs": {"x": {"data_type": "UINT8", "dims": [4],
                                  "source": {"input_data_file": "x.bin"}}}
            }]
        }"#,
        );
        let schema = ModelSchema::new(&config, 1);
        let samples = generate_warmup_data(&config, &schema, &dir).unwrap();
        let input_data = samples[0].requests[0].input("x").unwrap().data().concat();
        // Non-string input: a prefix of the file sized to the tensor.
        assert_eq!(&input_data[..], &[7u8; 4]);
    }

    #[test]
    fn counting_completion_handles_any_order() {
        let completion = CountingCompletion::new(3);
        let c1 = completion.clone();
        let c2 = completion.clone();
        let waiter = std::thread::spawn(move || completion.wait());
        c1.arrive();
        c2.arrive();
        c1.arrive();
        waiter.join().unwrap();
    }
}
