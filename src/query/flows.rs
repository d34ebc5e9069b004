//! Writes against the virtual `mindsdb` tables.

use tracing::{debug, info};

use crate::backend::TrainingRequest;
use crate::context::ServerContext;
use crate::error::{ProxyError, ProxyResult};
use crate::parser::InsertStatement;
use crate::session::SessionState;

/// Wrap `value` as a single-quoted SQL string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// Delete every predictor a `DELETE FROM predictors ...` matches.
///
/// The statement is rerun as `SELECT name ...` against the engine to find
/// the targets.
pub async fn delete_predictors(ctx: &ServerContext, state: &SessionState, sql: &str) -> ProxyResult<usize> {
    let sql = sql.trim_matches(' ');
    let rest = sql.get("delete ".len()..).unwrap_or_default();
    let select = format!("select name {}", rest);
    debug!(sql = %select, "Resolving predictors to delete");

    let result = ctx
        .engine
        .query(&select, state.integration.as_deref(), state.database.as_deref())
        .await?;
    if result.rows.is_empty() {
        return Err(ProxyError::unsupported("nothing to delete"));
    }

    let mut deleted = 0;
    for row in &result.rows {
        let Some(name) = row.first().and_then(|v| v.to_text()) else {
            continue;
        };
        ctx.models.delete_predictor(&name).await?;
        info!(predictor = %name, "Predictor deleted");
        deleted += 1;
    }
    Ok(deleted)
}

/// Run the text inserted into `commands`.
///
/// The only command is `DELETE PREDICTOR <name>`.
pub async fn custom_command(ctx: &ServerContext, state: &SessionState, insert: &InsertStatement) -> ProxyResult<()> {
    let Some(command) = insert.get("command") else {
        return Err(ProxyError::bad_arguments("command should be inserted"));
    };
    if insert.values.len() > 1 {
        return Err(ProxyError::bad_arguments("only command should be inserted"));
    }

    let tokens: Vec<&str> = command.trim_matches(|c| c == ' ' || c == ';').split_whitespace().collect();
    let is_delete_predictor = tokens.len() >= 2
        && tokens[0].eq_ignore_ascii_case("delete")
        && tokens[1].eq_ignore_ascii_case("predictor");
    if !is_delete_predictor {
        return Err(ProxyError::syntax(
            "at this moment only 'delete predictor' command supported",
        ));
    }
    if tokens.len() != 3 {
        return Err(ProxyError::syntax(
            "wrong syntax of 'DELETE PREDICTOR {NAME}' command",
        ));
    }

    let sql = format!("delete from mindsdb.predictors where name = {}", quote_literal(tokens[2]));
    delete_predictors(ctx, state, &sql).await?;
    Ok(())
}

fn non_empty<'a>(insert: &'a InsertStatement, column: &str) -> Option<&'a str> {
    insert.get(column).filter(|v| !v.is_empty())
}

/// Validate an insert into `predictors` and start training.
///
/// Training runs in the background; this returns once it has started.
pub async fn train_predictor(ctx: &ServerContext, state: &SessionState, insert: &InsertStatement) -> ProxyResult<()> {
    let external = non_empty(insert, "external_datasource");
    let select_query = non_empty(insert, "select_data_query");

    match (external, select_query) {
        (Some(_), Some(_)) => {
            return Err(ProxyError::bad_arguments(
                "'external_datasource' and 'select_data_query' should not be used in one query",
            ))
        }
        (None, None) => {
            return Err(ProxyError::bad_arguments(
                "in query should be 'external_datasource' or 'select_data_query'",
            ))
        }
        _ => {}
    }

    let (Some(name), Some(predict)) = (non_empty(insert, "name"), non_empty(insert, "predict")) else {
        return Err(ProxyError::bad_arguments("'name' and 'predict' should be inserted"));
    };

    let models = ctx.models.list_models().await?;
    if models.iter().any(|m| m.name == name) {
        return Err(ProxyError::bad_arguments(format!(
            "predictor with name '{}' already exists",
            name
        )));
    }

    let options = match non_empty(insert, "training_options") {
        Some(text) => serde_json::from_str(text)
            .map_err(|_| ProxyError::bad_arguments("training_options should be in valid JSON string"))?,
        None => serde_json::Value::Object(Default::default()),
    };

    let datasource = match select_query {
        Some(query) => {
            let Some(integration) = state.integration.as_deref().filter(|i| !i.is_empty()) else {
                return Err(ProxyError::bad_arguments(
                    "select_data_query can be used only in query from database",
                ));
            };
            let query = query.replace("\\'", "'");
            ctx.models.materialize_query(name, integration, &query).await?
        }
        None => {
            let external = external.unwrap_or_default();
            ctx.models.materialize_external(external).await?
        }
    };

    let predict = predict.split(',').map(|c| c.trim().to_string()).collect();
    ctx.models
        .start_training(TrainingRequest {
            name: name.to_string(),
            datasource,
            predict,
            options,
        })
        .await?;

    info!(predictor = %name, "Training requested");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{MemoryBackend, ModelInfo, ModelStatus, ModelStore};
    use crate::config::Config;
    use crate::parser::parse_insert;

    fn setup() -> (Arc<MemoryBackend>, ServerContext, SessionState) {
        let backend = Arc::new(MemoryBackend::new(vec!["default_mariadb".into()]));
        backend.register_datasource("ds1");
        let ctx = ServerContext::new(Config::default(), backend.clone(), backend.clone());
        (backend, ctx, SessionState::new(1))
    }

    fn model(name: &str) -> ModelInfo {
        ModelInfo {
            name: name.into(),
            status: ModelStatus::Complete,
            accuracy: Some(0.9),
            predict: vec!["y".into()],
            datasource: "ds1".into(),
            select_data_query: None,
            external_datasource: Some("ds1".into()),
            training_options: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_delete_removes_matching_predictors() {
        let (backend, ctx, state) = setup();
        backend.insert_model(model("p1"));
        backend.insert_model(model("p2"));

        let deleted = delete_predictors(&ctx, &state, "delete from mindsdb.predictors where name = 'p1'")
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(backend.model("p1").is_none());
        assert!(backend.model("p2").is_some());
    }

    #[tokio::test]
    async fn test_delete_nothing_matches() {
        let (_, ctx, state) = setup();
        let err = delete_predictors(&ctx, &state, "delete from mindsdb.predictors where name = 'foo'")
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Unsupported(ref m) if m == "nothing to delete"));
    }

    #[tokio::test]
    async fn test_custom_command_delete_predictor() {
        let (backend, ctx, state) = setup();
        backend.insert_model(model("p1"));

        let insert = parse_insert("insert into mindsdb.commands (command) values ('DELETE PREDICTOR p1;')").unwrap();
        custom_command(&ctx, &state, &insert).await.unwrap();
        assert!(backend.model("p1").is_none());
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("p1"), "'p1'");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
        assert_eq!(quote_literal("x' or '1'='1"), "'x'' or ''1''=''1'");
        assert_eq!(quote_literal("a\\"), "'a\\\\'");
    }

    #[tokio::test]
    async fn test_custom_command_name_with_quote() {
        let (backend, ctx, state) = setup();
        backend.insert_model(model("p1"));
        backend.insert_model(model("o'brien"));

        let insert =
            parse_insert("insert into mindsdb.commands (command) values ('delete predictor x''_or_name')").unwrap();
        let err = custom_command(&ctx, &state, &insert).await.unwrap_err();
        assert_eq!(err.to_string(), "nothing to delete");
        assert!(backend.model("p1").is_some());

        let insert = parse_insert("insert into mindsdb.commands (command) values ('delete predictor o''brien')").unwrap();
        custom_command(&ctx, &state, &insert).await.unwrap();
        assert!(backend.model("o'brien").is_none());
        assert!(backend.model("p1").is_some());
    }

    #[tokio::test]
    async fn test_custom_command_errors() {
        let (_, ctx, state) = setup();

        let insert = parse_insert("insert into commands (name) values ('x')").unwrap();
        let err = custom_command(&ctx, &state, &insert).await.unwrap_err();
        assert_eq!(err.error_code(), 1210);

        let insert = parse_insert("insert into commands (command, name) values ('delete predictor x', 'y')").unwrap();
        let err = custom_command(&ctx, &state, &insert).await.unwrap_err();
        assert_eq!(err.to_string(), "only command should be inserted");

        let insert = parse_insert("insert into commands (command) values ('delete predictor')").unwrap();
        let err = custom_command(&ctx, &state, &insert).await.unwrap_err();
        assert_eq!(err.to_string(), "wrong syntax of 'DELETE PREDICTOR {NAME}' command");

        let insert = parse_insert("insert into commands (command) values ('retrain p1')").unwrap();
        let err = custom_command(&ctx, &state, &insert).await.unwrap_err();
        assert_eq!(err.error_code(), 1149);
    }

    #[tokio::test]
    async fn test_train_from_external_datasource() {
        let (backend, ctx, state) = setup();
        let insert = parse_insert(
            "insert into mindsdb.predictors (name, predict, external_datasource) values ('p1', 'y, z', 'ds1')",
        )
        .unwrap();
        train_predictor(&ctx, &state, &insert).await.unwrap();

        let model = backend.model("p1").unwrap();
        assert_eq!(model.predict, vec!["y".to_string(), "z".to_string()]);
        assert_eq!(model.external_datasource.as_deref(), Some("ds1"));
    }

    #[tokio::test]
    async fn test_train_select_query_needs_integration() {
        let (backend, ctx, mut state) = setup();
        let insert = parse_insert(
            "insert into mindsdb.predictors (name, predict, select_data_query) values ('p1', 'y', 'select * from t')",
        )
        .unwrap();

        let err = train_predictor(&ctx, &state, &insert).await.unwrap_err();
        assert_eq!(err.error_code(), 1210);
        assert!(backend.model("p1").is_none());

        state.integration = Some("default_mariadb".into());
        train_predictor(&ctx, &state, &insert).await.unwrap();
        let model = backend.model("p1").unwrap();
        assert_eq!(model.select_data_query.as_deref(), Some("select * from t"));
    }

    #[tokio::test]
    async fn test_train_validation() {
        let (backend, ctx, state) = setup();
        backend.insert_model(model("taken"));

        let cases = [
            (
                "insert into predictors (name, predict, external_datasource, select_data_query) values ('a', 'y', 'ds1', 'select 1')",
                "'external_datasource' and 'select_data_query' should not be used in one query",
            ),
            (
                "insert into predictors (name, predict) values ('a', 'y')",
                "in query should be 'external_datasource' or 'select_data_query'",
            ),
            (
                "insert into predictors (name, predict, external_datasource) values ('taken', 'y', 'ds1')",
                "predictor with name 'taken' already exists",
            ),
            (
                "insert into predictors (name, predict, external_datasource, training_options) values ('a', 'y', 'ds1', '{bad')",
                "training_options should be in valid JSON string",
            ),
        ];
        for (sql, message) in cases {
            let insert = parse_insert(sql).unwrap();
            let err = train_predictor(&ctx, &state, &insert).await.unwrap_err();
            assert_eq!(err.to_string(), message, "{}", sql);
            assert_eq!(err.error_code(), 1210);
        }
        assert!(backend.model("a").is_none());
    }

    #[tokio::test]
    async fn test_train_options_forwarded() {
        let (backend, ctx, state) = setup();
        let insert = parse_insert(
            r#"insert into predictors (name, predict, external_datasource, training_options) values ('p1', 'y', 'ds1', '{"stop_training_in_x_seconds": 10}')"#,
        )
        .unwrap();
        train_predictor(&ctx, &state, &insert).await.unwrap();
        let model = backend.model("p1").unwrap();
        assert_eq!(model.training_options["stop_training_in_x_seconds"], 10);
        let listed = backend.list_models().await.unwrap();
        assert_eq!(listed.len(), 1);
    }
}
