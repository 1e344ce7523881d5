//! Model queue names.
//!
//! Each model worker pool consumes exactly one of the prediction queues; the
//! result queue carries their answers back and is only declared here.

/// Queue consumed by the GPT worker pool.
pub const QUEUE_GPT: &str = "label-platform-queue-gpt";

/// Queue consumed by the Claude worker pool.
pub const QUEUE_CLAUDE: &str = "label-platform-queue-claude";

/// Queue consumed by the Gemini worker pool.
pub const QUEUE_GEMINI: &str = "label-platform-queue-gemini";

/// Queue the workers publish predictions to.
pub const QUEUE_RESULT: &str = "label-platform-queue-result";

/// Queues the AMQP backend declares at startup: the configured prediction
/// queues followed by the result queue (if not already listed).
pub fn declared_queues(predict_queues: &[String]) -> Vec<String> {
    let mut queues = predict_queues.to_vec();
    if !queues.iter().any(|q| q == QUEUE_RESULT) {
        queues.push(QUEUE_RESULT.to_string());
    }
    queues
}
