//! Object reads from an S3-compatible store (MinIO in every deployment so far).

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header::AUTHORIZATION, Client, StatusCode};
use tracing::debug;
use url::Url;

use super::sigv4::{encode_path, Credentials};
use super::FetchError;
use crate::config::MinioConfig;
use crate::dispatch::ObjectStore;

/// Path-style S3 client for one bucket.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    /// `scheme://host[:port]` without a trailing slash
    origin: String,
    /// Value the client sends as `Host` (port omitted when default)
    host: String,
    bucket: String,
    credentials: Credentials,
}

impl S3ObjectStore {
    /// Build a store for `config.bucket`; every request is bounded by `timeout`.
    pub fn new(config: &MinioConfig, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint_url(&config.endpoint, config.use_ssl)?;
        let host = host_header(&endpoint)?;
        let origin = format!("{}://{}", endpoint.scheme(), host);

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            origin,
            host,
            bucket: config.bucket.clone(),
            credentials: Credentials {
                access_key: config.access_key.clone(),
                secret_key: config.secret_key.clone(),
                region: config.region.clone(),
            },
        })
    }

    /// Encoded `/{bucket}/{key}` path used both in the URL and for signing.
    fn object_path(&self, key: &str) -> String {
        encode_path(&format!("/{}/{}", self.bucket, key.trim_start_matches('/')))
    }
}

/// Accepts `host:port` or a full URL; the bare form gets a scheme from `use_ssl`.
fn endpoint_url(endpoint: &str, use_ssl: bool) -> Result<Url> {
    let raw = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        let scheme = if use_ssl { "https" } else { "http" };
        format!("{}://{}", scheme, endpoint)
    };

    Url::parse(&raw).with_context(|| format!("Invalid MinIO endpoint: {}", endpoint))
}

fn host_header(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("MinIO endpoint has no host: {}", url))?;

    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let object_path = self.object_path(path);
        let signed = self
            .credentials
            .sign_get(&self.host, &object_path, &[], Utc::now())
            .map_err(FetchError::Transient)?;

        let response = self
            .client
            .get(format!("{}{}", self.origin, object_path))
            .header("x-amz-date", &signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header(AUTHORIZATION, &signed.authorization)
            .send()
            .await
            .map_err(|e| FetchError::Transient(anyhow!(e).context(format!("GET {} failed", path))))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Transient(anyhow!(
                "object store returned {} for {}",
                status,
                path
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            FetchError::Transient(anyhow!(e).context(format!("reading {} failed", path)))
        })?;

        debug!(path = %path, bytes = body.len(), "object_fetched");

        Ok(body.to_vec())
    }
}
