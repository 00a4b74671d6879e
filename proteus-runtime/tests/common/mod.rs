//! Shared test fixtures: a recording mock backend and request helpers.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::ThreadId;
use std::time::Duration;

use bytes::Bytes;
use proteus::time::monotonic_ns;
use proteus::{
    DataType, Error, HostAllocator, InferenceRequest, InferenceResponse, MemoryType, ModelConfig,
    Result, RELEASE_ALL,
};
use proteus_runtime::{Backend, ExecutionError, Model, ModelInstance};

/// One recorded `instance_execute` call.
pub struct ExecutionRecord {
    pub instance: String,
    pub request_count: usize,
    pub total_batch: u32,
    pub thread: ThreadId,
    /// (buffer pointer, buffer length) of the first input of each
    /// request, for buffer-sharing assertions.
    pub input_buffers: Vec<(usize, usize)>,
}

/// Backend that records every hook call and responds OK to every
/// request, unless told to fail.
#[derive(Default)]
pub struct MockBackend {
    pub executions: Mutex<Vec<ExecutionRecord>>,
    pub init_threads: Mutex<Vec<(String, ThreadId)>>,
    pub fini_count: AtomicUsize,
    /// When set, every execution fails with this message and hands the
    /// batch back.
    pub fail_message: Mutex<Option<String>>,
    /// When set, executions alternate success/failure.
    pub fail_every_other: AtomicBool,
    /// Artificial per-execution delay, to widen race windows in
    /// drain/ordering tests.
    pub execute_delay: Mutex<Duration>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_message(&self, msg: &str) {
        *self.fail_message.lock().unwrap() = Some(msg.to_string());
    }

    pub fn execution_count(&self) -> usize {
        self.executions.lock().unwrap().len()
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn instance_init(&self, instance: &ModelInstance) -> Result<()> {
        self.init_threads
            .lock()
            .unwrap()
            .push((instance.name().to_string(), std::thread::current().id()));
        Ok(())
    }

    fn instance_fini(&self, _instance: &ModelInstance) {
        self.fini_count.fetch_add(1, Ordering::SeqCst);
    }

    fn instance_execute(
        &self,
        instance: &ModelInstance,
        requests: Vec<InferenceRequest>,
    ) -> std::result::Result<(), ExecutionError> {
        let delay = *self.execute_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let record = ExecutionRecord {
            instance: instance.name().to_string(),
            request_count: requests.len(),
            total_batch: requests.iter().map(|r| r.batch_size().max(1)).sum(),
            thread: std::thread::current().id(),
            input_buffers: requests
                .iter()
                .filter_map(|r| {
                    let inputs = r.inputs();
                    let buf = inputs.first()?.data().buffer_at(0)?;
                    Some((buf.data.as_ptr() as usize, buf.data.len()))
                })
                .collect(),
        };
        let execution_index = {
            let mut executions = self.executions.lock().unwrap();
            executions.push(record);
            executions.len() - 1
        };

        let fail = {
            let msg = self.fail_message.lock().unwrap();
            if let Some(msg) = msg.as_ref() {
                Some(msg.clone())
            } else if self.fail_every_other.load(Ordering::SeqCst) && execution_index % 2 == 1 {
                Some("mock failure".to_string())
            } else {
                None
            }
        };

        if let Some(msg) = fail {
            return Err(ExecutionError::new(Error::internal(msg), requests));
        }

        let exec_start_ns = monotonic_ns();
        for request in requests {
            let compute_start_ns = monotonic_ns();
            if let Some(factory) = request.response_factory() {
                let response = factory.create_response();
                factory.send(response);
            }
            instance.report_statistics(
                &request,
                true,
                exec_start_ns,
                compute_start_ns,
                monotonic_ns(),
                monotonic_ns(),
            );
            request.release(RELEASE_ALL);
        }
        Ok(())
    }
}

pub fn parse_config(json: &str) -> ModelConfig {
    serde_json::from_str(json).expect("test config must parse")
}

/// Build a model with the mock backend over a throwaway model dir.
pub fn build_model(json: &str, backend: Arc<MockBackend>, device_blocking: bool) -> Arc<Model> {
    let dir = std::env::temp_dir().join("proteus-runtime-tests");
    std::fs::create_dir_all(&dir).unwrap();
    Model::new(parse_config(json), 1, dir, backend, device_blocking).expect("model must build")
}

/// A model config with one FP32 [3] input and a matching output,
/// batching up to 4.
pub const SIMPLE_BATCHING_CONFIG: &str = r#"{
    "name": "m",
    "max_batch_size": 4,
    "input": [{"name": "x", "data_type": "FP32", "dims": [3]}],
    "output": [{"name": "out", "data_type": "FP32", "dims": [3]}]
}"#;

/// Build an unprepared request with `x` of the given shape, carrying
/// `byte_len` bytes of data.
pub fn make_request(model: &Model, dims: &[i64], byte_len: usize) -> InferenceRequest {
    let mut request = InferenceRequest::new(Arc::clone(model.schema()), None);
    request
        .add_original_input("x", DataType::Fp32, dims)
        .unwrap();
    request
        .append_input_data("x", Bytes::from(vec![1u8; byte_len]), MemoryType::Cpu, 0)
        .unwrap();
    request
}

/// Attach channel-backed response and release callbacks, returning the
/// receiving ends.
pub fn attach_channels(
    request: &mut InferenceRequest,
) -> (mpsc::Receiver<InferenceResponse>, mpsc::Receiver<u32>) {
    let (response_tx, response_rx) = mpsc::channel();
    let response_tx = Mutex::new(response_tx);
    request.set_response_callback(
        Arc::new(HostAllocator),
        Arc::new(move |response: InferenceResponse| {
            let _ = response_tx.lock().unwrap().send(response);
        }),
    );

    let (release_tx, release_rx) = mpsc::channel();
    request.set_release_callback(Box::new(move |flags| {
        let _ = release_tx.send(flags);
    }));

    (response_rx, release_rx)
}

/// Receive with a generous timeout so a hung dispatch fails the test
/// instead of wedging the suite.
pub fn recv_or_panic<T>(rx: &mpsc::Receiver<T>, what: &str) -> T {
    rx.recv_timeout(Duration::from_secs(5))
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}
