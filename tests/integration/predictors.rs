//! Predictor training and command integration tests

use crate::{assert_query_error, get_proxy_config, skip_if_not_enabled};
use mysql::prelude::*;

#[test]
fn test_insert_predictor_validation() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();

    let result = conn.query_drop("INSERT INTO mindsdb.predictors (name, predict) VALUES ('it_p', 'y')");
    assert_query_error(result, 1210, "select_data_query");

    let result = conn.query_drop(
        "INSERT INTO mindsdb.predictors (name, external_datasource) VALUES ('it_p', 'ds')",
    );
    assert_query_error(result, 1210, "'name' and 'predict' should be inserted");
}

#[test]
fn test_command_validation() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();

    let result = conn.query_drop("INSERT INTO mindsdb.commands (command) VALUES ('drop everything')");
    assert_query_error(result, 1149, "only 'delete predictor' command supported");

    let result = conn.query_drop("INSERT INTO mindsdb.commands (command) VALUES ('delete predictor')");
    assert_query_error(result, 1149, "DELETE PREDICTOR {NAME}");
}

#[test]
fn test_delete_missing_predictor() {
    skip_if_not_enabled!();

    let mut conn = get_proxy_config().conn();
    let result = conn.query_drop("DELETE FROM mindsdb.predictors WHERE name = 'it_no_such_predictor'");
    assert_query_error(result, 1149, "nothing to delete");
}
