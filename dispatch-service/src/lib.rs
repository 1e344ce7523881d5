//! Label Dispatch - rate-limited fan-out of screenshots to model workers.
//!
//! The labelling platform asks for predictions one image at a time. Each
//! request is gated by a per-image cooldown held in Redis, then the image is
//! read from MinIO, base64-encoded and appended to one queue per model.
//!
//! ## Architecture
//!
//! ```text
//! GET /api/v1/images/:id/predict
//!   → DispatchCoordinator ─ cooldown (Redis SET NX)
//!                         ─ images table (Postgres) → MinIO object
//!                         ─ gpt / claude / gemini queues → model workers
//! ```

pub mod catalog;
pub mod config;
pub mod cooldown;
pub mod dispatch;
pub mod queue;
pub mod storage;
pub mod web;

// Re-export commonly used types
pub use config::{Config, QueueBackend};
pub use dispatch::{
    CoordinatorSettings, DispatchAck, DispatchCoordinator, DispatchError, DispatchPayload,
    ResourceId,
};
pub use web::AppState;
