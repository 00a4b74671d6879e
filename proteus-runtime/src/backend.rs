//! The contract a model implementation satisfies
//!
//! A backend library implements [`Backend`] and hands batches of
//! requests to its compute engine. The core only ever calls this trait;
//! it knows nothing about what the backend does with a batch.
//!
//! # Ownership of a batch
//!
//! [`Backend::instance_execute`] receives the batch **by value**. On
//! success the backend keeps ownership of every request and must
//! eventually send a response through each request's factory and
//! release the request. On failure it returns every request inside the
//! [`ExecutionError`], and the caller sends the error response for each
//! — a backend never half-owns a batch.

use proteus::{InferenceRequest, Result};

use crate::instance::ModelInstance;
use crate::model::Model;

/// A failed batch execution: the status plus the entire batch, handed
/// back so the caller can respond-with-error for every request.
pub struct ExecutionError {
    pub error: proteus::Error,
    pub requests: Vec<InferenceRequest>,
}

impl ExecutionError {
    #[must_use]
    pub fn new(error: proteus::Error, requests: Vec<InferenceRequest>) -> Self {
        Self { error, requests }
    }
}

/// Implemented by model-execution libraries.
///
/// All hooks except [`instance_execute`](Self::instance_execute) are
/// optional; the defaults do nothing. Per-instance state attached via
/// [`ModelInstance::set_state`] is only ever touched from the instance's
/// worker thread, so implementations may assume single-threaded access
/// to it.
pub trait Backend: Send + Sync + 'static {
    /// Short backend identifier, used in logs.
    fn name(&self) -> &str;

    /// Called once per model, before any instance exists.
    ///
    /// # Errors
    /// A failure aborts the model load.
    fn model_init(&self, model: &Model) -> Result<()> {
        let _ = model;
        Ok(())
    }

    /// Called once per model at destruction.
    fn model_fini(&self, model: &Model) {
        let _ = model;
    }

    /// Called after an instance is constructed, before it sees any
    /// request. Runs on the instance's worker thread when one exists.
    ///
    /// # Errors
    /// A failure is fatal for the instance and aborts the model load.
    fn instance_init(&self, instance: &ModelInstance) -> Result<()> {
        let _ = instance;
        Ok(())
    }

    /// Called at instance destruction, after the last batch drained.
    fn instance_fini(&self, instance: &ModelInstance) {
        let _ = instance;
    }

    /// Execute one batch. See the module docs for the ownership rule.
    ///
    /// # Errors
    /// Return every request inside the [`ExecutionError`]; the caller
    /// converts the status into per-request error responses.
    fn instance_execute(
        &self,
        instance: &ModelInstance,
        requests: Vec<InferenceRequest>,
    ) -> std::result::Result<(), ExecutionError>;
}
