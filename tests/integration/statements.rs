//! Prepared statement integration tests

use crate::{get_proxy_config, skip_if_not_enabled};
use mysql::prelude::*;

#[test]
fn test_prepared_select() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    let stmt = conn
        .prep("SELECT name, status FROM mindsdb.predictors")
        .expect("prepare should succeed");
    assert_eq!(stmt.num_columns(), 2);
    assert_eq!(stmt.num_params(), 0);

    let rows: Vec<(String, String)> = conn.exec(&stmt, ()).expect("execute should succeed");
    // executing twice reruns the query
    let again: Vec<(String, String)> = conn.exec(&stmt, ()).expect("second execute should succeed");
    assert_eq!(rows.len(), again.len());

    conn.close(stmt).expect("close should succeed");
}

#[test]
fn test_prepared_unsupported_statement() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    let result = conn.prep("UPDATE mindsdb.predictors SET name = 'x'");
    match result {
        Err(mysql::Error::MySqlError(e)) => {
            assert_eq!(e.code, 1149);
            assert!(e.message.contains("Only 'SELECT' and 'INSERT' statements supported"));
        }
        other => panic!("expected syntax error, got {:?}", other.map(|s| s.id())),
    }
}
