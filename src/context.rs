use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::backend::{MemoryBackend, ModelStore, QueryEngine};
use crate::config::Config;
use crate::query::ServerVariables;
use crate::tls::{self, TlsError};

/// Everything a connection needs from the process, built once at startup
/// and shared by every session.
pub struct ServerContext {
    pub config: Config,
    pub engine: Arc<dyn QueryEngine>,
    pub models: Arc<dyn ModelStore>,
    pub variables: ServerVariables,
    /// Present when a certificate is configured
    pub tls: Option<TlsAcceptor>,
    connection_counter: AtomicU32,
}

impl ServerContext {
    pub fn new(config: Config, engine: Arc<dyn QueryEngine>, models: Arc<dyn ModelStore>) -> Self {
        let variables = ServerVariables::new(&config.server);
        Self {
            config,
            engine,
            models,
            variables,
            tls: None,
            connection_counter: AtomicU32::new(1),
        }
    }

    /// Context backed by an in-process [`MemoryBackend`] seeded from config
    pub fn from_config(config: Config) -> Result<Self, TlsError> {
        let integrations = config
            .integrations
            .iter()
            .filter(|(_, i)| i.enabled)
            .map(|(name, _)| name.clone())
            .collect();
        let backend = Arc::new(MemoryBackend::new(integrations));
        for name in &config.backend.datasources {
            backend.register_datasource(name);
        }

        let acceptor = config.tls.as_ref().map(tls::build_acceptor).transpose()?;
        if acceptor.is_some() {
            info!("TLS enabled");
        }

        let mut context = Self::new(config, backend.clone(), backend);
        context.tls = acceptor;
        Ok(context)
    }

    pub fn next_connection_id(&self) -> u32 {
        self.connection_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntegrationConfig;

    #[tokio::test]
    async fn test_from_config_seeds_backend() {
        let mut config = Config::default();
        config
            .integrations
            .insert("default_mariadb".into(), IntegrationConfig::default());
        config.backend.datasources.push("ds1".into());

        let context = ServerContext::from_config(config).unwrap();
        assert!(!context.tls_enabled());
        assert!(context.models.materialize_external("ds1").await.is_ok());
        assert!(context
            .models
            .materialize_query("p1", "default_mariadb", "select 1")
            .await
            .is_ok());
    }

    #[test]
    fn test_connection_ids_increase() {
        let context = ServerContext::from_config(Config::default()).unwrap();
        let first = context.next_connection_id();
        assert_eq!(context.next_connection_id(), first + 1);
    }
}
