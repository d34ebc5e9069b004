use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::eval::{execute_select, Catalog, Table};
use super::{
    BackendFailure, DataSourceHandle, ModelInfo, ModelStatus, ModelStore, QueryEngine,
    TrainingRequest,
};
use crate::protocol::constants::error_code::*;
use crate::protocol::{ColumnType, ResultSet, Value};

/// Schema holding the virtual predictor tables
pub const MINDSDB_SCHEMA: &str = "mindsdb";
const INFORMATION_SCHEMA: &str = "information_schema";

/// Columns of the virtual `predictors` table
pub const PREDICTOR_COLUMNS: [&str; 7] = [
    "name",
    "status",
    "accuracy",
    "predict",
    "select_data_query",
    "external_datasource",
    "training_options",
];

/// In-process query engine and model store.
///
/// Serves the virtual `mindsdb` and `information_schema` tables from the
/// model registry. Training completes on a background task after
/// `training_delay`.
pub struct MemoryBackend {
    models: Arc<DashMap<String, ModelInfo>>,
    datasources: RwLock<BTreeMap<String, DataSourceHandle>>,
    integrations: Vec<String>,
    training_delay: Duration,
}

impl MemoryBackend {
    pub fn new(integrations: Vec<String>) -> Self {
        Self {
            models: Arc::new(DashMap::new()),
            datasources: RwLock::new(BTreeMap::new()),
            integrations,
            training_delay: Duration::from_millis(100),
        }
    }

    pub fn with_training_delay(mut self, delay: Duration) -> Self {
        self.training_delay = delay;
        self
    }

    /// Register an external data source by name
    pub fn register_datasource(&self, name: &str) {
        self.datasources.write().insert(
            name.to_string(),
            DataSourceHandle {
                name: name.to_string(),
                integration: None,
                query: None,
            },
        );
    }

    /// Insert a model as already trained
    pub fn insert_model(&self, model: ModelInfo) {
        self.models.insert(model.name.clone(), model);
    }

    pub fn model(&self, name: &str) -> Option<ModelInfo> {
        self.models.get(name).map(|m| m.clone())
    }

    fn predictors_table(&self) -> Table {
        let mut models: Vec<ModelInfo> = self.models.iter().map(|m| m.value().clone()).collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));

        let rows = models
            .into_iter()
            .map(|m| {
                let options = if m.training_options.is_null() {
                    Value::Null
                } else {
                    Value::Text(m.training_options.to_string())
                };
                vec![
                    Value::Text(m.name),
                    Value::from(m.status.as_str()),
                    m.accuracy.map(Value::Double).unwrap_or(Value::Null),
                    Value::Text(m.predict.join(", ")),
                    Value::from(m.select_data_query),
                    Value::from(m.external_datasource),
                    options,
                ]
            })
            .collect();

        let columns = PREDICTOR_COLUMNS
            .iter()
            .map(|&c| {
                let ty = if c == "accuracy" {
                    ColumnType::Double
                } else {
                    ColumnType::VarString
                };
                (c.to_string(), ty)
            })
            .collect();

        Table {
            schema: MINDSDB_SCHEMA.to_string(),
            name: "predictors".to_string(),
            columns,
            rows,
        }
    }

    fn schemas(&self) -> Vec<String> {
        let mut schemas = vec![INFORMATION_SCHEMA.to_string(), MINDSDB_SCHEMA.to_string()];
        schemas.extend(self.integrations.iter().cloned());
        schemas
    }

    fn string_table(schema: &str, name: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> Table {
        Table {
            schema: schema.to_string(),
            name: name.to_string(),
            columns: columns
                .iter()
                .map(|c| (c.to_string(), ColumnType::VarString))
                .collect(),
            rows,
        }
    }
}

impl Catalog for MemoryBackend {
    fn table(&self, schema: &str, name: &str) -> Option<Table> {
        let schema = schema.to_lowercase();
        let name = name.to_lowercase();

        match (schema.as_str(), name.as_str()) {
            (MINDSDB_SCHEMA, "predictors") => Some(self.predictors_table()),
            (MINDSDB_SCHEMA, "commands") => Some(Self::string_table(
                MINDSDB_SCHEMA,
                "commands",
                &["command"],
                Vec::new(),
            )),
            (INFORMATION_SCHEMA, "schemata") => {
                let rows = self
                    .schemas()
                    .into_iter()
                    .map(|s| vec![Value::from("def"), Value::Text(s), Value::from("utf8")])
                    .collect();
                Some(Self::string_table(
                    INFORMATION_SCHEMA,
                    "SCHEMATA",
                    &["CATALOG_NAME", "SCHEMA_NAME", "DEFAULT_CHARACTER_SET_NAME"],
                    rows,
                ))
            }
            (INFORMATION_SCHEMA, "tables") => {
                let mut rows = Vec::new();
                for table in ["predictors", "commands"] {
                    rows.push(vec![
                        Value::from("def"),
                        Value::from(MINDSDB_SCHEMA),
                        Value::from(table),
                        Value::from("BASE TABLE"),
                    ]);
                }
                for table in ["SCHEMATA", "TABLES"] {
                    rows.push(vec![
                        Value::from("def"),
                        Value::from(INFORMATION_SCHEMA),
                        Value::from(table),
                        Value::from("SYSTEM VIEW"),
                    ]);
                }
                Some(Self::string_table(
                    INFORMATION_SCHEMA,
                    "TABLES",
                    &["TABLE_CATALOG", "TABLE_SCHEMA", "TABLE_NAME", "TABLE_TYPE"],
                    rows,
                ))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl QueryEngine for MemoryBackend {
    async fn query(
        &self,
        sql: &str,
        integration: Option<&str>,
        database: Option<&str>,
    ) -> Result<ResultSet, BackendFailure> {
        debug!(sql = sql, integration = ?integration, database = ?database, "Evaluating query");
        execute_select(sql, database.unwrap_or(MINDSDB_SCHEMA), self)
    }
}

#[async_trait]
impl ModelStore for MemoryBackend {
    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendFailure> {
        let mut models: Vec<ModelInfo> = self.models.iter().map(|m| m.value().clone()).collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }

    async fn start_training(&self, request: TrainingRequest) -> Result<(), BackendFailure> {
        let name = request.name.clone();
        let model = ModelInfo {
            name: name.clone(),
            status: ModelStatus::Training,
            accuracy: None,
            predict: request.predict,
            datasource: request.datasource.name.clone(),
            select_data_query: request.datasource.query.clone(),
            external_datasource: request
                .datasource
                .query
                .is_none()
                .then(|| request.datasource.name.clone()),
            training_options: request.options,
        };
        self.models.insert(name.clone(), model);
        info!(predictor = %name, "Training started");

        let models = self.models.clone();
        let delay = self.training_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(mut model) = models.get_mut(&name) {
                model.status = ModelStatus::Complete;
                model.accuracy = Some(1.0);
                info!(predictor = %name, "Training complete");
            }
        });

        Ok(())
    }

    async fn materialize_query(
        &self,
        name: &str,
        integration: &str,
        query: &str,
    ) -> Result<DataSourceHandle, BackendFailure> {
        if !self.integrations.iter().any(|i| i == integration) {
            return Err(BackendFailure::new(
                ER_WRONG_ARGUMENTS,
                format!("integration '{}' does not exist", integration),
            ));
        }
        let handle = DataSourceHandle {
            name: name.to_string(),
            integration: Some(integration.to_string()),
            query: Some(query.to_string()),
        };
        self.datasources
            .write()
            .insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    async fn materialize_external(&self, name: &str) -> Result<DataSourceHandle, BackendFailure> {
        self.datasources.read().get(name).cloned().ok_or_else(|| {
            BackendFailure::new(
                ER_WRONG_ARGUMENTS,
                format!("datasource '{}' does not exist", name),
            )
        })
    }

    async fn delete_predictor(&self, name: &str) -> Result<(), BackendFailure> {
        match self.models.remove(name) {
            Some(_) => {
                info!(predictor = %name, "Predictor deleted");
                Ok(())
            }
            None => Err(BackendFailure::new(
                ER_WRONG_ARGUMENTS,
                format!("predictor '{}' does not exist", name),
            )),
        }
    }
}
