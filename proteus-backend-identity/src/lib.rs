//! Identity backend
//!
//! Echoes every requested output from the same-named input. Useful for
//! conformance and latency testing, and as the reference implementation
//! of the batch-ownership contract: on success it responds to and
//! releases every request itself; on failure it hands the whole batch
//! back untouched.

use proteus::time::monotonic_ns;
use proteus::{
    Error, InferenceRequest, InferenceResponse, MemoryType, Result, RELEASE_ALL,
};
use proteus_runtime::{Backend, ExecutionError, ModelInstance};
use tracing::debug;

/// See the [crate docs](self).
#[derive(Debug, Default)]
pub struct IdentityBackend;

impl IdentityBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Build the response for one request by copying each requested
    /// output's bytes from the same-named input.
    fn run_one(request: &InferenceRequest) -> Result<InferenceResponse> {
        let factory = request
            .response_factory()
            .ok_or_else(|| Error::internal("request reached execution without a response callback"))?;
        let mut response = factory.create_response();

        for name in request.requested_outputs() {
            let input = request.input(name).map_err(|_| {
                Error::invalid_arg(format!(
                    "identity model requires an input named '{name}' to produce output '{name}'"
                ))
            })?;

            let data = input.data().concat();
            let mut buffer =
                factory
                    .allocator()
                    .allocate(name, data.len(), MemoryType::Cpu, 0)?;
            buffer.data.copy_from_slice(&data);
            response.add_output(
                name.clone(),
                input.datatype(),
                input.shape_with_batch_dim().to_vec(),
                buffer,
            );
        }

        Ok(response)
    }
}

impl Backend for IdentityBackend {
    fn name(&self) -> &str {
        "identity"
    }

    fn instance_execute(
        &self,
        instance: &ModelInstance,
        requests: Vec<InferenceRequest>,
    ) -> std::result::Result<(), ExecutionError> {
        let exec_start_ns = monotonic_ns();
        let mut total_batch: u64 = 0;

        debug!(
            instance = instance.name(),
            requests = requests.len(),
            "identity executing batch"
        );

        for request in requests {
            total_batch += u64::from(request.batch_size().max(1));
            let compute_start_ns = monotonic_ns();
            match Self::run_one(&request) {
                Ok(response) => {
                    let compute_end_ns = monotonic_ns();
                    if let Some(factory) = request.response_factory() {
                        factory.send(response);
                    }
                    instance.report_statistics(
                        &request,
                        true,
                        exec_start_ns,
                        compute_start_ns,
                        compute_end_ns,
                        monotonic_ns(),
                    );
                    request.release(RELEASE_ALL);
                }
                Err(error) => {
                    instance.report_statistics(
                        &request,
                        false,
                        exec_start_ns,
                        compute_start_ns,
                        monotonic_ns(),
                        monotonic_ns(),
                    );
                    request.respond_with_error(&error);
                }
            }
        }

        let exec_end_ns = monotonic_ns();
        instance.report_batch_statistics(
            total_batch,
            exec_start_ns,
            exec_start_ns,
            exec_end_ns,
            exec_end_ns,
        );
        Ok(())
    }
}
