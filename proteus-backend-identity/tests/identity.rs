//! End-to-end test: model + scheduler + identity backend.

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use proteus::{
    DataType, HostAllocator, InferenceRequest, InferenceResponse, MemoryType, ModelConfig,
};
use proteus_backend_identity::IdentityBackend;
use proteus_runtime::Model;

fn build_model(max_batch_size: i32) -> Arc<Model> {
    let config: ModelConfig = serde_json::from_str(&format!(
        r#"{{
            "name": "echo",
            "max_batch_size": {max_batch_size},
            "input": [{{"name": "x", "data_type": "UINT8", "dims": [4]}}],
            "output": [{{"name": "x", "data_type": "UINT8", "dims": [4]}}]
        }}"#
    ))
    .unwrap();

    let dir = std::env::temp_dir().join("proteus-identity-tests");
    std::fs::create_dir_all(&dir).unwrap();
    Model::new(config, 1, dir, Arc::new(IdentityBackend::new()), true).unwrap()
}

fn run_request(model: &Arc<Model>, payload: Vec<u8>, dims: &[i64]) -> InferenceResponse {
    let mut request = InferenceRequest::new(Arc::clone(model.schema()), None);
    request.set_id("echo-test");
    request
        .add_original_input("x", DataType::Uint8, dims)
        .unwrap();
    request
        .append_input_data("x", Bytes::from(payload), MemoryType::Cpu, 0)
        .unwrap();
    request.prepare_for_inference().unwrap();

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

    model.enqueue(request).unwrap();
    let response = response_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("response");
    release_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("release");
    response
}

#[test]
fn echoes_input_bytes_to_output() {
    let model = build_model(4);
    model.set_configured_scheduler().unwrap();

    let payload = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
    let response = run_request(&model, payload.clone(), &[2, 4]);

    assert!(response.error().is_none());
    assert_eq!(response.id(), "echo-test");
    let output = response.output("x").expect("echoed output");
    assert_eq!(output.datatype, DataType::Uint8);
    assert_eq!(output.shape, vec![2, 4]);
    assert_eq!(&output.buffer.data[..], &payload[..]);
}

/// An output with no same-named input is an identity-model error: the
/// request gets an error response, not a wedge.
#[test]
fn output_without_matching_input_gets_error_response() {
    let config: ModelConfig = serde_json::from_str(
        r#"{
            "name": "echo",
            "max_batch_size": 4,
            "input": [{"name": "x", "data_type": "UINT8", "dims": [4]}],
            "output": [{"name": "y", "data_type": "UINT8", "dims": [4]}]
        }"#,
    )
    .unwrap();
    let dir = std::env::temp_dir().join("proteus-identity-tests");
    std::fs::create_dir_all(&dir).unwrap();
    let model = Model::new(config, 1, dir, Arc::new(IdentityBackend::new()), true).unwrap();
    model.set_configured_scheduler().unwrap();

    let response = run_request(&model, vec![0u8; 4], &[1, 4]);
    let error = response.error().expect("identity cannot produce 'y'");
    assert!(error.message().contains("requires an input named 'y'"));
}

#[test]
fn serves_many_requests_in_order_of_arrival() {
    let model = build_model(8);
    model.set_configured_scheduler().unwrap();

    for round in 0..10u8 {
        let payload = vec![round; 4];
        let response = run_request(&model, payload.clone(), &[1, 4]);
        assert!(response.error().is_none());
        assert_eq!(&response.output("x").unwrap().buffer.data[..], &payload[..]);
    }

    let stats = model.stats().snapshot();
    assert_eq!(stats.success_count, 10);
    assert!(stats.execution_count >= 1);
}
