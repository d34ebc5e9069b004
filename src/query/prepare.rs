//! Prepared statements: classification on prepare, then execute and fetch.

use tracing::debug;

use crate::context::ServerContext;
use crate::error::{ProxyError, ProxyResult};
use crate::parser::parse_insert;
use crate::protocol::command::cursor;
use crate::protocol::{charset, field_flag, ColumnDescriptor, ColumnType, OkPacket, ResultSet, Value};
use crate::session::{PreparedStatement, SessionState, StatementKind};

use super::{custom_command, delete_predictors, quote_literal, run_select, train_predictor};

/// Placeholder column describing one `?`
fn placeholder(name: &str, alias: &str, cs: u16) -> ColumnDescriptor {
    ColumnDescriptor::new(name, ColumnType::VarString)
        .with_schema("")
        .with_table("")
        .with_alias(alias)
        .with_charset(cs)
}

/// Strip a trailing `FOR UPDATE`, matched without regard to case
fn strip_for_update(sql: &str) -> &str {
    match sql.to_ascii_lowercase().rfind("for update") {
        Some(pos) => sql[..pos].trim_end(),
        None => sql,
    }
}

/// Classify `sql` and work out its parameter and column shapes
pub async fn prepare(ctx: &ServerContext, state: &SessionState, sql: &str) -> ProxyResult<PreparedStatement> {
    let sql_lower = sql.to_lowercase();

    let statement = if sql_lower.starts_with("insert into") {
        let insert = parse_insert(sql)?;
        let table = if insert.table.eq_ignore_ascii_case("commands") {
            "commands"
        } else {
            "predictors"
        };
        let columns = insert.columns().collect::<Vec<_>>().join(",");
        let shape = run_select(ctx, state, &format!("select {} from mindsdb.{}", columns, table)).await?;

        let mut statement = PreparedStatement::new(sql, StatementKind::Insert);
        statement.params = shape
            .columns
            .iter()
            .map(|_| placeholder("?", "", charset::BINARY))
            .collect();
        statement.insert = Some(insert);
        statement
    } else if sql_lower.starts_with("select") && sql_lower.ends_with("for update") {
        let prepared = strip_for_update(sql);
        let shape = run_select(ctx, state, prepared).await?;

        let mut statement = PreparedStatement::new(sql, StatementKind::Lock);
        statement.prepared_sql = prepared.to_string();
        statement.columns = shape
            .columns
            .into_iter()
            .map(|c| c.with_charset(charset::UTF8_GENERAL_CI))
            .collect();
        statement
    } else if sql_lower.starts_with("delete") {
        let trimmed = sql.trim_matches(' ').replace('?', "\"?\"");
        let prepared = format!("select name {}", trimmed.get("delete ".len()..).unwrap_or_default());
        let shape = run_select(ctx, state, &prepared).await?;

        let mut statement = PreparedStatement::new(sql, StatementKind::Delete);
        statement.prepared_sql = prepared;
        statement.params = shape
            .columns
            .iter()
            .map(|_| {
                placeholder("", "?", charset::UTF8_GENERAL_CI).with_flags(field_flag::BINARY_COLLATION)
            })
            .collect();
        statement
    } else if sql_lower.starts_with("select") {
        let shape = run_select(ctx, state, sql).await?;

        let mut statement = PreparedStatement::new(sql, StatementKind::Select);
        statement.columns = shape.columns;
        statement
    } else {
        return Err(ProxyError::syntax(format!(
            "Only 'SELECT' and 'INSERT' statements supported. Got: {}",
            sql
        )));
    };

    debug!(
        kind = ?statement.kind,
        params = statement.params.len(),
        columns = statement.columns.len(),
        "Prepared statement"
    );
    Ok(statement)
}

/// Response to COM_STMT_EXECUTE
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    Ok(OkPacket),
    /// Whole binary resultset
    Rows(ResultSet),
    /// Metadata only; rows follow through COM_STMT_FETCH
    Cursor(Vec<ColumnDescriptor>),
}

fn quote(value: &Value) -> String {
    value.to_text().unwrap_or_else(|| "NULL".to_string())
}

pub async fn execute(
    ctx: &ServerContext,
    state: &SessionState,
    statement: &mut PreparedStatement,
    flags: u8,
    params: Vec<Value>,
) -> ProxyResult<Execution> {
    match statement.kind {
        StatementKind::Select | StatementKind::Lock => {
            let result = run_select(ctx, state, &statement.prepared_sql).await?;
            statement.fetched = 0;
            if flags & (cursor::READ_ONLY | cursor::FOR_UPDATE | cursor::SCROLLABLE) == 0 {
                statement.result = None;
                return Ok(Execution::Rows(result));
            }
            let columns = result.columns.clone();
            statement.result = Some(result);
            Ok(Execution::Cursor(columns))
        }
        StatementKind::Insert => {
            let Some(insert) = statement.insert.as_mut() else {
                return Err(ProxyError::syntax("statement has no insert target"));
            };
            if params.len() != insert.values.len() {
                return Err(ProxyError::bad_arguments(format!(
                    "For INSERT statement got {} parameters, but should be {}",
                    params.len(),
                    insert.values.len()
                )));
            }
            for ((_, slot), value) in insert.values.iter_mut().zip(&params) {
                *slot = value.to_text();
            }

            let target = statement.sql.to_lowercase().replace('`', "");
            if target.contains("commands") {
                custom_command(ctx, state, insert).await?;
            } else if target.contains("predictors") {
                train_predictor(ctx, state, insert).await?;
            } else {
                return Err(ProxyError::unsupported(
                    "Only 'insert into predictors' and 'insert into commands' implemented",
                ));
            }
            Ok(Execution::Ok(OkPacket::new()))
        }
        StatementKind::Delete => {
            let [param] = params.as_slice() else {
                return Err(ProxyError::bad_arguments("Delete statement must content 'where' filter"));
            };
            let sql = statement.sql.replace('?', &quote_literal(&quote(param)));
            delete_predictors(ctx, state, &sql).await?;
            Ok(Execution::Ok(OkPacket::new()))
        }
    }
}

/// Rows served by one COM_STMT_FETCH
#[derive(Debug, Clone, PartialEq)]
pub struct FetchBatch {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<Value>>,
    /// No rows remain after this batch
    pub last: bool,
}

/// Next `limit` rows of the last execute
pub async fn fetch(
    ctx: &ServerContext,
    state: &SessionState,
    statement: &mut PreparedStatement,
    limit: u32,
) -> ProxyResult<FetchBatch> {
    if statement.result.is_none() {
        let result = run_select(ctx, state, &statement.prepared_sql).await?;
        statement.result = Some(result);
        statement.fetched = 0;
    }
    let Some(result) = statement.result.as_ref() else {
        return Ok(FetchBatch {
            columns: Vec::new(),
            rows: Vec::new(),
            last: true,
        });
    };

    let start = statement.fetched.min(result.rows.len());
    let end = start.saturating_add(limit as usize).min(result.rows.len());
    let rows = result.rows[start..end].to_vec();
    statement.fetched = end;

    Ok(FetchBatch {
        columns: result.columns.clone(),
        rows,
        last: end >= result.rows.len(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{MemoryBackend, ModelInfo, ModelStatus};
    use crate::config::Config;

    fn setup() -> (Arc<MemoryBackend>, ServerContext, SessionState) {
        let backend = Arc::new(MemoryBackend::new(vec!["default_mariadb".into()]));
        backend.register_datasource("ds1");
        for name in ["p1", "p2", "p3"] {
            backend.insert_model(ModelInfo {
                name: name.into(),
                status: ModelStatus::Complete,
                accuracy: Some(0.5),
                predict: vec!["y".into()],
                datasource: "ds1".into(),
                select_data_query: None,
                external_datasource: Some("ds1".into()),
                training_options: serde_json::Value::Null,
            });
        }
        let ctx = ServerContext::new(Config::default(), backend.clone(), backend.clone());
        (backend, ctx, SessionState::new(1))
    }

    #[tokio::test]
    async fn test_prepare_kinds() {
        let (_, ctx, state) = setup();

        let stmt = prepare(&ctx, &state, "select name, status from mindsdb.predictors").await.unwrap();
        assert_eq!(stmt.kind, StatementKind::Select);
        assert_eq!(stmt.columns.len(), 2);
        assert_eq!(stmt.num_params(), 0);

        let stmt = prepare(&ctx, &state, "select name from mindsdb.predictors where name = 'p1' FOR UPDATE")
            .await
            .unwrap();
        assert_eq!(stmt.kind, StatementKind::Lock);
        assert_eq!(stmt.prepared_sql, "select name from mindsdb.predictors where name = 'p1'");
        assert!(stmt.columns.iter().all(|c| c.charset == charset::UTF8_GENERAL_CI));

        let stmt = prepare(&ctx, &state, "delete from mindsdb.predictors where name = ?").await.unwrap();
        assert_eq!(stmt.kind, StatementKind::Delete);
        assert_eq!(stmt.prepared_sql, "select name from mindsdb.predictors where name = \"?\"");
        assert_eq!(stmt.num_params(), 1);
        assert_eq!(stmt.params[0].alias, "?");

        let stmt = prepare(
            &ctx,
            &state,
            "insert into mindsdb.predictors (name, predict, external_datasource) values (?, ?, ?)",
        )
        .await
        .unwrap();
        assert_eq!(stmt.kind, StatementKind::Insert);
        assert_eq!(stmt.num_params(), 3);
        assert!(stmt.columns.is_empty());

        let err = prepare(&ctx, &state, "update t set a = 1").await.unwrap_err();
        assert!(err.to_string().starts_with("Only 'SELECT' and 'INSERT' statements supported"));
    }

    #[tokio::test]
    async fn test_execute_delete_binds_parameter() {
        let (backend, ctx, state) = setup();
        let mut stmt = prepare(&ctx, &state, "delete from mindsdb.predictors where name = ?").await.unwrap();

        let outcome = execute(&ctx, &state, &mut stmt, 0, vec![Value::from("p2")]).await.unwrap();
        assert!(matches!(outcome, Execution::Ok(_)));
        assert!(backend.model("p2").is_none());

        let err = execute(&ctx, &state, &mut stmt, 0, vec![Value::from("foo")]).await.unwrap_err();
        assert_eq!(err.to_string(), "nothing to delete");

        let err = execute(&ctx, &state, &mut stmt, 0, vec![]).await.unwrap_err();
        assert_eq!(err.error_code(), 1210);
    }

    #[tokio::test]
    async fn test_execute_delete_parameter_is_escaped() {
        let (backend, ctx, state) = setup();
        let mut stmt = prepare(&ctx, &state, "delete from mindsdb.predictors where name = ?").await.unwrap();

        let err = execute(&ctx, &state, &mut stmt, 0, vec![Value::from("x' or name <> '")])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "nothing to delete");
        assert!(backend.model("p1").is_some());
        assert!(backend.model("p3").is_some());
    }

    #[tokio::test]
    async fn test_execute_insert_trains() {
        let (backend, ctx, state) = setup();
        let mut stmt = prepare(
            &ctx,
            &state,
            "insert into mindsdb.predictors (name, predict, external_datasource) values (?, ?, ?)",
        )
        .await
        .unwrap();

        let err = execute(&ctx, &state, &mut stmt, 0, vec![Value::from("p9")]).await.unwrap_err();
        assert_eq!(err.to_string(), "For INSERT statement got 1 parameters, but should be 3");

        let params = vec![Value::from("p9"), Value::from("y"), Value::from("ds1")];
        execute(&ctx, &state, &mut stmt, 0, params).await.unwrap();
        assert!(backend.model("p9").is_some());
    }

    #[tokio::test]
    async fn test_cursor_execute_then_fetch() {
        let (_, ctx, state) = setup();
        let mut stmt = prepare(&ctx, &state, "select name from mindsdb.predictors").await.unwrap();

        let outcome = execute(&ctx, &state, &mut stmt, cursor::READ_ONLY, vec![]).await.unwrap();
        let Execution::Cursor(columns) = outcome else {
            panic!("expected cursor");
        };
        assert_eq!(columns.len(), 1);

        let batch = fetch(&ctx, &state, &mut stmt, 2).await.unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert!(!batch.last);

        let batch = fetch(&ctx, &state, &mut stmt, 2).await.unwrap();
        assert_eq!(batch.rows, vec![vec![Value::from("p3")]]);
        assert!(batch.last);

        let batch = fetch(&ctx, &state, &mut stmt, 2).await.unwrap();
        assert!(batch.rows.is_empty());
        assert!(batch.last);

        // Execute rewinds the cursor
        execute(&ctx, &state, &mut stmt, cursor::READ_ONLY, vec![]).await.unwrap();
        assert_eq!(fetch(&ctx, &state, &mut stmt, 10).await.unwrap().rows.len(), 3);
    }

    #[tokio::test]
    async fn test_execute_without_cursor_returns_rows() {
        let (_, ctx, state) = setup();
        let mut stmt = prepare(&ctx, &state, "select @@version").await.unwrap();
        let Execution::Rows(result) = execute(&ctx, &state, &mut stmt, 0, vec![]).await.unwrap() else {
            panic!("expected rows");
        };
        assert_eq!(result.rows, vec![vec![Value::from("0.1")]]);
    }
}
