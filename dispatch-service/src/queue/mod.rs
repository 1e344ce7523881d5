//! Model work queues.
//!
//! Two transports implement [`crate::dispatch::WorkQueue`]:
//! - Redis lists (default), what the model workers poll today
//! - durable RabbitMQ queues via a shared [`Publisher`]
//!
//! ```text
//! dispatcher ─┬─> label-platform-queue-gpt    ─> GPT worker
//!             ├─> label-platform-queue-claude ─> Claude worker
//!             └─> label-platform-queue-gemini ─> Gemini worker
//! ```

pub mod publisher;
pub mod redis_list;
pub mod types;

pub use publisher::{AmqpQueue, Publisher};
pub use redis_list::RedisListQueue;
pub use types::{declared_queues, QUEUE_CLAUDE, QUEUE_GEMINI, QUEUE_GPT, QUEUE_RESULT};
