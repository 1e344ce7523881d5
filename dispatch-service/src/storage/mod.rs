//! Object storage access for uploaded screenshots.
//!
//! Images live in a MinIO bucket under `screenshots/{uuid}-{filename}`; the
//! dispatcher only ever reads them.

pub mod s3;
pub mod sigv4;

use thiserror::Error;

pub use s3::S3ObjectStore;

/// Why an object could not be read.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Nothing stored at this path (or no path recorded for the image).
    #[error("object not found: {0}")]
    NotFound(String),

    /// Network, timeout, credential or server-side failure.
    #[error("transient storage error")]
    Transient(#[source] anyhow::Error),
}
