//! Collaborators the proxy delegates to: a SQL query engine and a
//! model/data-source store.

mod eval;
mod memory;

pub use memory::MemoryBackend;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::protocol::ResultSet;

/// Structured failure returned by a collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendFailure {
    pub code: u16,
    pub message: String,
}

impl BackendFailure {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Answers SQL text with a resultset
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Run `sql` in the scope of the session's integration and database
    async fn query(
        &self,
        sql: &str,
        integration: Option<&str>,
        database: Option<&str>,
    ) -> Result<ResultSet, BackendFailure>;
}

/// Training state of a predictor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Training,
    Complete,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Training => "training",
            ModelStatus::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub status: ModelStatus,
    pub accuracy: Option<f64>,
    pub predict: Vec<String>,
    pub datasource: String,
    pub select_data_query: Option<String>,
    pub external_datasource: Option<String>,
    pub training_options: serde_json::Value,
}

/// A data source ready to train from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceHandle {
    pub name: String,
    /// Integration the data was selected from, if any
    pub integration: Option<String>,
    /// Query the data was selected with, if any
    pub query: Option<String>,
}

/// Everything needed to start training a predictor
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRequest {
    pub name: String,
    pub datasource: DataSourceHandle,
    pub predict: Vec<String>,
    pub options: serde_json::Value,
}

/// Predictor registry and data-source materialization
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendFailure>;

    /// Start training and return without waiting for it
    async fn start_training(&self, request: TrainingRequest) -> Result<(), BackendFailure>;

    /// Save the result of `query` against `integration` as data source `name`
    async fn materialize_query(
        &self,
        name: &str,
        integration: &str,
        query: &str,
    ) -> Result<DataSourceHandle, BackendFailure>;

    /// Look up an already registered data source
    async fn materialize_external(&self, name: &str) -> Result<DataSourceHandle, BackendFailure>;

    async fn delete_predictor(&self, name: &str) -> Result<(), BackendFailure>;
}
