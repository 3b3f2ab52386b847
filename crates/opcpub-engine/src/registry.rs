// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Registry clients.
//!
//! The registry is the service of record for data-set writer definitions.
//! The loader only ever asks it for one writer at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use opcpub_core::error::RegistryError;
use opcpub_core::model::DataSetWriter;
use opcpub_core::types::DataSetWriterId;

/// Fetches data-set writer definitions.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Downloads the definition of `writer_id` from `endpoint`.
    async fn get_data_set_writer(
        &self,
        endpoint: &str,
        writer_id: &DataSetWriterId,
    ) -> Result<DataSetWriter, RegistryError>;

    /// Returns the client name for logging.
    fn name(&self) -> &str;
}

// =============================================================================
// HttpRegistryClient
// =============================================================================

/// Reads writers from `GET {endpoint}/v2/writers/{id}`.
pub struct HttpRegistryClient {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl HttpRegistryClient {
    /// Creates a client with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| RegistryError::request(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, api_key: None })
    }

    /// Sends `api_key` as a bearer token with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Builds the URL of one writer resource.
    pub fn writer_url(endpoint: &str, writer_id: &DataSetWriterId) -> Result<reqwest::Url, RegistryError> {
        let mut url = reqwest::Url::parse(endpoint)
            .map_err(|e| RegistryError::request(format!("invalid registry endpoint '{}': {}", endpoint, e)))?;

        url.path_segments_mut()
            .map_err(|_| RegistryError::request(format!("registry endpoint '{}' cannot be a base", endpoint)))?
            .pop_if_empty()
            .extend(["v2", "writers", writer_id.as_str()]);

        Ok(url)
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn get_data_set_writer(
        &self,
        endpoint: &str,
        writer_id: &DataSetWriterId,
    ) -> Result<DataSetWriter, RegistryError> {
        let url = Self::writer_url(endpoint, writer_id)?;
        debug!(writer_id = %writer_id, url = %url, "Downloading writer");

        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RegistryError::request(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::not_found(writer_id.as_str()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::status(status.as_u16(), body));
        }

        let writer: DataSetWriter = response
            .json()
            .await
            .map_err(|e| RegistryError::invalid_response(e.to_string()))?;

        if &writer.id != writer_id {
            return Err(RegistryError::invalid_response(format!(
                "requested writer '{}' but registry returned '{}'",
                writer_id, writer.id
            )));
        }

        Ok(writer)
    }

    fn name(&self) -> &str {
        "http"
    }
}

impl std::fmt::Debug for HttpRegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRegistryClient")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

// =============================================================================
// InMemoryRegistry
// =============================================================================

/// A registry held in memory.
///
/// Serves writers defined in the configuration file and doubles as a test
/// registry with per-id failure injection.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    writers: DashMap<DataSetWriterId, DataSetWriter>,
    failures: DashMap<DataSetWriterId, u32>,
    requests: DashMap<DataSetWriterId, u64>,
    total_requests: AtomicU64,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding `writers`.
    pub fn with_writers(writers: impl IntoIterator<Item = DataSetWriter>) -> Self {
        let registry = Self::new();
        for writer in writers {
            registry.upsert(writer);
        }
        registry
    }

    /// Inserts or replaces a writer definition.
    pub fn upsert(&self, writer: DataSetWriter) {
        self.writers.insert(writer.id.clone(), writer);
    }

    /// Deletes a writer definition.
    pub fn remove(&self, writer_id: &DataSetWriterId) -> Option<DataSetWriter> {
        self.writers.remove(writer_id).map(|(_, w)| w)
    }

    /// Makes the next `count` downloads of `writer_id` fail.
    pub fn fail_next(&self, writer_id: impl Into<DataSetWriterId>, count: u32) {
        self.failures.insert(writer_id.into(), count);
    }

    /// Returns how many times `writer_id` was requested.
    pub fn request_count(&self, writer_id: &DataSetWriterId) -> u64 {
        self.requests.get(writer_id).map(|c| *c).unwrap_or(0)
    }

    /// Returns the total number of requests.
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::SeqCst)
    }

    /// Returns the number of stored writers.
    pub fn len(&self) -> usize {
        self.writers.len()
    }

    /// Returns `true` when no writer is stored.
    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    async fn get_data_set_writer(
        &self,
        _endpoint: &str,
        writer_id: &DataSetWriterId,
    ) -> Result<DataSetWriter, RegistryError> {
        self.total_requests.fetch_add(1, Ordering::SeqCst);
        *self.requests.entry(writer_id.clone()).or_insert(0) += 1;

        if let Some(mut remaining) = self.failures.get_mut(writer_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RegistryError::status(503, "injected registry failure"));
            }
        }

        self.writers
            .get(writer_id)
            .map(|w| w.value().clone())
            .ok_or_else(|| RegistryError::not_found(writer_id.as_str()))
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
