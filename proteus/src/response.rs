//! Inference responses and the response factory
//!
//! Backends never construct responses directly; they go through the
//! [`ResponseFactory`] attached to each request. The factory carries the
//! output allocator and the completion callback the client registered,
//! so a backend can produce a response without knowing who is listening.

use std::sync::Arc;

use bytes::BytesMut;

use crate::dtype::DataType;
use crate::error::{Error, Result};
use crate::memory::MemoryType;

/// A writable output buffer handed to a backend by an allocator.
#[derive(Debug)]
pub struct OutputBuffer {
    pub data: BytesMut,
    pub memory_type: MemoryType,
    pub memory_type_id: i64,
}

/// Allocates and releases output tensor buffers.
///
/// The preferred memory type is a hint; the allocator reports what it
/// actually provided in the returned buffer.
pub trait ResponseAllocator: Send + Sync {
    /// Allocate `byte_size` bytes for the named output tensor.
    ///
    /// # Errors
    /// Returns an error if the allocation cannot be satisfied; the
    /// backend must then fail the response.
    fn allocate(
        &self,
        tensor_name: &str,
        byte_size: usize,
        preferred_memory_type: MemoryType,
        preferred_memory_type_id: i64,
    ) -> Result<OutputBuffer>;

    /// Release a buffer previously returned by [`allocate`](Self::allocate).
    ///
    /// The default simply drops it, which frees host allocations.
    fn release(&self, buffer: OutputBuffer) {
        drop(buffer);
    }
}

/// Default allocator: plain host memory, zero-initialized.
///
/// Used for warmup responses and anywhere the caller has no placement
/// preference of its own.
#[derive(Debug, Default)]
pub struct HostAllocator;

impl ResponseAllocator for HostAllocator {
    fn allocate(
        &self,
        _tensor_name: &str,
        byte_size: usize,
        _preferred_memory_type: MemoryType,
        _preferred_memory_type_id: i64,
    ) -> Result<OutputBuffer> {
        Ok(OutputBuffer {
            data: BytesMut::zeroed(byte_size),
            memory_type: MemoryType::Cpu,
            memory_type_id: 0,
        })
    }
}

/// Allocator that fails every allocation.
///
/// Attached to shadow (null) requests, which request no outputs: any
/// allocation attempt is a backend bug and surfaces as an error.
#[derive(Debug, Default)]
pub struct NullAllocator;

impl ResponseAllocator for NullAllocator {
    fn allocate(
        &self,
        tensor_name: &str,
        _byte_size: usize,
        _preferred_memory_type: MemoryType,
        _preferred_memory_type_id: i64,
    ) -> Result<OutputBuffer> {
        Err(Error::internal(format!(
            "unexpected allocation for output '{tensor_name}' of null request, no output should be requested"
        )))
    }
}

/// One produced output tensor.
#[derive(Debug)]
pub struct Output {
    pub name: String,
    pub datatype: DataType,
    pub shape: Vec<i64>,
    pub buffer: OutputBuffer,
}

/// The result of executing one request: either a set of outputs or an
/// error status. Exactly one response is produced per request that
/// reaches the execution path.
#[derive(Debug)]
pub struct InferenceResponse {
    model_name: String,
    id: String,
    outputs: Vec<Output>,
    error: Option<Error>,
}

impl InferenceResponse {
    fn new(model_name: String, id: String) -> Self {
        Self {
            model_name,
            id,
            outputs: Vec::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// Attach an already-filled output tensor.
    pub fn add_output(
        &mut self,
        name: impl Into<String>,
        datatype: DataType,
        shape: Vec<i64>,
        buffer: OutputBuffer,
    ) {
        self.outputs.push(Output {
            name: name.into(),
            datatype,
            shape,
            buffer,
        });
    }
}

/// Callback invoked with every completed response.
pub type ResponseCompleteFn = Arc<dyn Fn(InferenceResponse) + Send + Sync>;

/// Creates and delivers responses for one request.
///
/// Cheaply cloneable; the clone a backend stashes away stays valid after
/// the request itself has been released.
#[derive(Clone)]
pub struct ResponseFactory {
    model_name: String,
    id: String,
    allocator: Arc<dyn ResponseAllocator>,
    complete_fn: ResponseCompleteFn,
}

impl ResponseFactory {
    #[must_use]
    pub fn new(
        model_name: impl Into<String>,
        id: impl Into<String>,
        allocator: Arc<dyn ResponseAllocator>,
        complete_fn: ResponseCompleteFn,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            id: id.into(),
            allocator,
            complete_fn,
        }
    }

    /// Create an empty response for this factory's request.
    #[must_use]
    pub fn create_response(&self) -> InferenceResponse {
        InferenceResponse::new(self.model_name.clone(), self.id.clone())
    }

    #[must_use]
    pub fn allocator(&self) -> &Arc<dyn ResponseAllocator> {
        &self.allocator
    }

    /// Deliver a completed response to the client callback.
    pub fn send(&self, response: InferenceResponse) {
        (self.complete_fn)(response);
    }

    /// Deliver a response carrying the given error status.
    pub fn send_with_status(&self, mut response: InferenceResponse, error: Error) {
        response.error = Some(error);
        self.send(response);
    }
}

impl std::fmt::Debug for ResponseFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFactory")
            .field("model_name", &self.model_name)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn host_allocator_zeroes() {
        let buf = HostAllocator
            .allocate("out", 12, MemoryType::Cpu, 0)
            .unwrap();
        assert_eq!(buf.data.len(), 12);
        assert!(buf.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn null_allocator_always_fails() {
        let err = NullAllocator
            .allocate("out", 4, MemoryType::Cpu, 0)
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Internal);
    }

    #[test]
    fn factory_send_reaches_callback() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let factory = ResponseFactory::new(
            "m",
            "req-1",
            Arc::new(HostAllocator),
            Arc::new(move |resp: InferenceResponse| {
                seen2.lock().unwrap().push(resp.id().to_string());
            }),
        );

        let resp = factory.create_response();
        assert_eq!(resp.model_name(), "m");
        factory.send(resp);
        assert_eq!(*seen.lock().unwrap(), vec!["req-1"]);
    }

    #[test]
    fn send_with_status_sets_error() {
        let factory = ResponseFactory::new(
            "m",
            "",
            Arc::new(HostAllocator),
            Arc::new(|resp: InferenceResponse| {
                let err = resp.error().expect("error status");
                assert_eq!(err.kind(), crate::ErrorKind::Unavailable);
            }),
        );
        let resp = factory.create_response();
        factory.send_with_status(resp, Error::unavailable("draining"));
    }

    #[test]
    fn outputs_lookup_by_name() {
        let factory = ResponseFactory::new(
            "m",
            "",
            Arc::new(HostAllocator),
            Arc::new(|_response: InferenceResponse| {}),
        );
        let mut resp = factory.create_response();
        let buf = factory
            .allocator()
            .allocate("a", 4, MemoryType::Cpu, 0)
            .unwrap();
        resp.add_output("a", DataType::Fp32, vec![1], buf);
        assert!(resp.output("a").is_some());
        assert!(resp.output("b").is_none());
    }
}
