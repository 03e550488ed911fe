//! Benchmark utilities.

use rand::distributions::Alphanumeric;
use rand::Rng;
use sagalog_core::SagaLogEntryBuilder;

/// Generate a random alphanumeric string of the given length.
pub fn random_text(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate a JSON object payload of roughly `size` bytes.
pub fn json_payload(size: usize) -> String {
    format!(r#"{{"data":"{}"}}"#, random_text(size.saturating_sub(11)))
}

/// Generate random record bytes of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Builders for one saga execution with `actions` actions and payloads of
/// `payload_size` bytes.
pub fn saga_execution(
    execution_id: &str,
    actions: usize,
    payload_size: usize,
) -> Vec<SagaLogEntryBuilder> {
    let b = SagaLogEntryBuilder::new;
    let mut builders = Vec::with_capacity(actions * 2 + 2);
    builders.push(b().start_saga(execution_id, "Bench-Saga", json_payload(payload_size)));
    for i in 0..actions {
        let node = format!("action{i}");
        builders.push(b().start_action(execution_id, &node));
        builders.push(b().end_action(execution_id, node, json_payload(payload_size)));
    }
    builders.push(b().end_saga(execution_id));
    builders
}
