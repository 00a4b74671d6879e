//! Proteus core: value types for a multi-model inference server
//!
//! This crate holds the leaf types shared by every layer of the server:
//! the error taxonomy, tensor data types and shape helpers, the
//! serde-backed model configuration, reference-counted memory buffers,
//! and — most importantly — the inference request/response model with
//! its normalization and lifecycle rules.
//!
//! The execution side (models, instances, worker threads, schedulers)
//! lives in `proteus-runtime`; concrete model implementations live in
//! per-backend crates.

pub mod config;
pub mod dtype;
pub mod error;
pub mod labels;
pub mod memory;
pub mod request;
pub mod response;
pub mod schema;
pub mod shape;
pub mod time;

pub use config::{
    InstanceGroupConfig, InstanceKind, ModelConfig, ModelInputConfig, ModelOutputConfig,
    WarmupInputConfig, WarmupSource,
};
pub use dtype::DataType;
pub use error::{Error, ErrorKind, Result};
pub use labels::LabelProvider;
pub use memory::{BufferRef, MemoryReference, MemoryType};
pub use request::{InferenceRequest, Input, RequestState, RELEASE_ALL};
pub use response::{
    HostAllocator, InferenceResponse, NullAllocator, Output, OutputBuffer, ResponseAllocator,
    ResponseFactory,
};
pub use schema::ModelSchema;
pub use shape::WILDCARD_DIM;
