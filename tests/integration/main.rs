//! Integration test entry point
//!
//! Runs the `mysql` client crate against a live proxy.
//!
//! Run with: PROXY_RUN_INTEGRATION_TESTS=1 cargo test --test integration
//!
//! Environment variables:
//! - PROXY_RUN_INTEGRATION_TESTS: Set to "1" to enable integration tests
//! - PROXY_TEST_HOST: Proxy host (default: 127.0.0.1)
//! - PROXY_TEST_PORT: Proxy port (default: 47335)
//! - PROXY_TEST_USER: Proxy user (default: mindsdb)
//! - PROXY_TEST_PASS: Proxy password (default: empty)

mod predictors;
mod queries;
mod statements;

use mysql::{Error as MySqlError, OptsBuilder, Pool, PooledConn};
use std::env;

/// Check if integration tests should run
pub fn should_run_integration_tests() -> bool {
    env::var("PROXY_RUN_INTEGRATION_TESTS")
        .map(|v| v == "1")
        .unwrap_or(false)
}

/// Skip test if integration tests are not enabled
#[macro_export]
macro_rules! skip_if_not_enabled {
    () => {
        if !crate::should_run_integration_tests() {
            eprintln!("Skipping integration test (set PROXY_RUN_INTEGRATION_TESTS=1 to run)");
            return;
        }
    };
}

/// Get proxy connection config from environment
pub fn get_proxy_config() -> ProxyTestConfig {
    ProxyTestConfig {
        host: env::var("PROXY_TEST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        port: env::var("PROXY_TEST_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(47335),
        user: env::var("PROXY_TEST_USER").unwrap_or_else(|_| "mindsdb".to_string()),
        password: env::var("PROXY_TEST_PASS").unwrap_or_default(),
        database: Some("mindsdb".to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct ProxyTestConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
}

impl ProxyTestConfig {
    /// Create a connection pool to the proxy
    pub fn pool(&self) -> Pool {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(&self.host))
            .tcp_port(self.port)
            .user(Some(&self.user))
            .pass(Some(&self.password))
            .db_name(self.database.as_deref());
        Pool::new(opts).expect("Failed to create connection pool")
    }

    /// Get a single connection to the proxy
    pub fn conn(&self) -> PooledConn {
        self.pool().get_conn().expect("Failed to get connection")
    }
}

/// Assert that a query result is a MySQL error with given code and message
pub fn assert_query_error<T: std::fmt::Debug>(
    result: Result<T, MySqlError>,
    expected_code: u16,
    expected_msg: &str,
) {
    match result {
        Ok(v) => panic!(
            "Expected MySQL error {} with message containing '{}', but got: {:?}",
            expected_code, expected_msg, v
        ),
        Err(MySqlError::MySqlError(ref e)) => {
            assert_eq!(
                e.code, expected_code,
                "Expected error code {}, got {}. Message: {}",
                expected_code, e.code, e.message
            );
            assert!(
                e.message.contains(expected_msg),
                "Expected message containing '{}', got: {}",
                expected_msg,
                e.message
            );
        }
        Err(e) => panic!(
            "Expected MySQL error {} with message containing '{}', got different error: {:?}",
            expected_code, expected_msg, e
        ),
    }
}
