//! Plain query integration tests: variables, catalog and canned answers

use crate::{assert_query_error, get_proxy_config, skip_if_not_enabled};
use mysql::prelude::*;

#[test]
fn test_select_one() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    let one: Option<i64> = conn.query_first("SELECT 1").expect("SELECT 1 should succeed");
    assert_eq!(one, Some(1));
}

#[test]
fn test_server_variables() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    let comment: Option<String> = conn
        .query_first("SELECT @@version_comment LIMIT 1")
        .expect("version_comment should be answered");
    assert_eq!(comment.as_deref(), Some("(MindsDB)"));

    let row: Option<(i64, i64)> = conn
        .query_first("SELECT @@max_allowed_packet, @@session.auto_increment_increment")
        .expect("numeric variables should be answered");
    assert_eq!(row, Some((16_777_216, 1)));

    let result: Result<Option<String>, _> = conn.query_first("SELECT @@no_such_variable");
    assert_query_error(result, 1193, "no_such_variable");
}

#[test]
fn test_show_databases() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    let databases: Vec<String> = conn.query("SHOW DATABASES").expect("SHOW DATABASES should succeed");
    assert!(databases.iter().any(|db| db == "mindsdb"));
    assert!(databases.iter().any(|db| db == "information_schema"));
}

#[test]
fn test_use_and_database() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    conn.query_drop("USE information_schema").expect("USE should succeed");
    let db: Option<String> = conn.query_first("SELECT DATABASE()").expect("DATABASE() should succeed");
    assert_eq!(db.as_deref(), Some("information_schema"));
}

#[test]
fn test_acknowledged_statements() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    for sql in ["SET NAMES utf8mb4", "SET autocommit=1", "START TRANSACTION", "COMMIT", "ROLLBACK"] {
        conn.query_drop(sql).unwrap_or_else(|e| panic!("{} should succeed: {}", sql, e));
    }
}

#[test]
fn test_show_warnings_is_empty() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    let warnings: Vec<(String, i64, String)> = conn.query("SHOW WARNINGS").expect("SHOW WARNINGS should succeed");
    assert!(warnings.is_empty());
}
