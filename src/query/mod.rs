//! Answers `COM_QUERY` text.
//!
//! The text is classified into a [`QueryKind`] first, then each kind is
//! answered with a canned result, a flow against the model store, or the
//! query engine.

mod canned;
mod flows;
mod prepare;
mod variables;

pub use canned::ExplainTarget;
pub use flows::{custom_command, delete_predictors, quote_literal, train_predictor};
pub use prepare::{execute, fetch, prepare, Execution, FetchBatch};
pub use variables::ServerVariables;

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::context::ServerContext;
use crate::error::{ProxyError, ProxyResult};
use crate::parser::parse_insert;
use crate::protocol::status::SERVER_STATUS_AUTOCOMMIT;
use crate::protocol::{OkPacket, ResultSet};
use crate::session::SessionState;

/// Response to one query
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    Ok(OkPacket),
    Rows { result: ResultSet, status: u16 },
}

impl Answer {
    fn ok() -> Self {
        Answer::Ok(OkPacket::new())
    }

    fn rows(result: ResultSet) -> Self {
        Answer::Rows {
            result,
            status: SERVER_STATUS_AUTOCOMMIT,
        }
    }
}

/// What a query asks for, checked in this order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    /// `START TRANSACTION`, `COMMIT`, `ROLLBACK`, `SET autocommit`, other `SET`
    Acknowledge,
    SetNames(String),
    Use(String),
    ShowWarnings,
    ShowEngines,
    ShowCharset,
    ShowCollation,
    ShowTableStatus(String),
    DeletePredictors,
    InsertCommand,
    InsertPredictor,
    /// `ALTER TABLE ... DISABLE|ENABLE KEYS`
    AlterKeys,
    SelectVariables,
    SelectOne,
    SelectDatabase,
    /// Anything else starting with `SELECT`, answered by the engine
    Select,
    Explain(ExplainTarget),
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern"))
}

/// Remove block comments and surrounding `;`/whitespace
pub fn clean_sql(sql: &str) -> String {
    static COMMENT: OnceLock<Regex> = OnceLock::new();
    let stripped = regex(&COMMENT, r"(?s)/\*.*?\*/").replace_all(sql, "");
    stripped
        .trim_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string()
}

/// Catalog commands answered by rewriting them into selects
pub fn rewrite_catalog_command(sql_lower: &str) -> Option<String> {
    static FULL_TABLES: OnceLock<Regex> = OnceLock::new();

    if sql_lower.contains("show databases") {
        return Some("select schema_name as Database from information_schema.SCHEMATA".to_string());
    }
    if sql_lower.contains("show full tables from") {
        let schema = regex(&FULL_TABLES, r"show\s+full\s+tables\s+from\s+(\S*)")
            .captures(sql_lower)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or_default();
        return Some(format!(
            "select table_name as Tables_in_{} from INFORMATION_SCHEMA.TABLES WHERE table_schema = '{}' and table_type = 'BASE TABLE'",
            schema,
            schema.to_uppercase()
        ));
    }
    None
}

/// Whether `sql_lower` targets the virtual `mindsdb.<table>`
fn targets_virtual(sql_lower: &str, table: &str, database: Option<&str>) -> bool {
    sql_lower.contains(&format!("mindsdb.{}", table))
        || (database == Some("mindsdb") && sql_lower.contains(table))
}

/// Classify cleaned query text.
///
/// `sql_lower` must be lower-cased with backticks removed; `sql` keeps the
/// original case.
pub fn classify(sql: &str, sql_lower: &str, database: Option<&str>) -> ProxyResult<QueryKind> {
    static SET_NAMES: OnceLock<Regex> = OnceLock::new();

    let keyword = sql_lower.split_whitespace().next().unwrap_or_default();

    match keyword {
        "start" => return Ok(QueryKind::Acknowledge),
        "set" => {
            if sql_lower.contains("autocommit") {
                return Ok(QueryKind::Acknowledge);
            }
            if let Some(caps) = regex(&SET_NAMES, r"set\s+names\s+(\S*)").captures(sql_lower) {
                let name = caps[1].trim_matches(|c| c == '\'' || c == '"').to_string();
                return Ok(QueryKind::SetNames(name));
            }
            return Ok(QueryKind::Acknowledge);
        }
        "use" => {
            let database = sql_lower
                .split_whitespace()
                .nth(1)
                .unwrap_or_default()
                .trim_matches(|c| c == ' ' || c == ';')
                .to_string();
            return Ok(QueryKind::Use(database));
        }
        _ => {}
    }

    if sql_lower.contains("show warnings") {
        return Ok(QueryKind::ShowWarnings);
    }
    if sql_lower.contains("show engines") {
        return Ok(QueryKind::ShowEngines);
    }
    if sql_lower.contains("show charset") {
        return Ok(QueryKind::ShowCharset);
    }
    if sql_lower.contains("show collation") {
        return Ok(QueryKind::ShowCollation);
    }
    if sql_lower.contains("show table status") {
        let parts: Vec<&str> = sql.split_whitespace().collect();
        return match (parts.get(3), parts.get(4)) {
            (Some(like), Some(table)) if like.eq_ignore_ascii_case("like") => Ok(QueryKind::ShowTableStatus(
                table.trim_matches(|c| c == '\'' || c == '"').to_string(),
            )),
            _ => Err(ProxyError::unsupported("Action not implemented")),
        };
    }

    match keyword {
        "delete" if targets_virtual(sql_lower, "predictors", database) => Ok(QueryKind::DeletePredictors),
        "insert" if targets_virtual(sql_lower, "commands", database) => Ok(QueryKind::InsertCommand),
        "insert" if targets_virtual(sql_lower, "predictors", database) => Ok(QueryKind::InsertPredictor),
        "update" | "insert" => Err(ProxyError::unsupported("Update and Insert not implemented")),
        "alter" if sql_lower.contains("disable keys") || sql_lower.contains("enable keys") => {
            Ok(QueryKind::AlterKeys)
        }
        "select" => {
            if sql_lower.contains("@@") {
                Ok(QueryKind::SelectVariables)
            } else if sql_lower.split_whitespace().eq(["select", "1"]) {
                Ok(QueryKind::SelectOne)
            } else if sql_lower.contains("database()") {
                Ok(QueryKind::SelectDatabase)
            } else {
                Ok(QueryKind::Select)
            }
        }
        "rollback" | "commit" => Ok(QueryKind::Acknowledge),
        "explain" => {
            let table = sql_lower.split_whitespace().nth(1).unwrap_or_default();
            ExplainTarget::from_table(table).map(QueryKind::Explain).ok_or_else(|| {
                ProxyError::unsupported("Only 'EXPLAIN predictors' and 'EXPLAIN commands' supported")
            })
        }
        _ => Err(ProxyError::unsupported("Action not implemented")),
    }
}

/// Rows for any of the select kinds
async fn select_result(
    ctx: &ServerContext,
    state: &SessionState,
    kind: &QueryKind,
    sql: &str,
) -> ProxyResult<ResultSet> {
    match kind {
        QueryKind::SelectVariables => ctx.variables.answer(sql),
        QueryKind::SelectOne => Ok(canned::select_one()),
        QueryKind::SelectDatabase => Ok(canned::select_database(state.database.as_deref(), state.text_charset)),
        _ => Ok(ctx
            .engine
            .query(sql, state.integration.as_deref(), state.database.as_deref())
            .await?),
    }
}

/// Run a select, answering variable and `database()` queries locally.
///
/// Used where only a resultset makes sense, such as prepared statements.
pub async fn run_select(ctx: &ServerContext, state: &SessionState, sql: &str) -> ProxyResult<ResultSet> {
    let sql_lower = sql.to_lowercase().replace('`', "");
    match classify(sql, &sql_lower, state.database.as_deref()) {
        Ok(kind @ (QueryKind::SelectVariables | QueryKind::SelectOne | QueryKind::SelectDatabase)) => {
            select_result(ctx, state, &kind, sql).await
        }
        _ => select_result(ctx, state, &QueryKind::Select, sql).await,
    }
}

/// Answer one cleaned query, updating session state where it asks to
pub async fn answer_query(ctx: &ServerContext, state: &mut SessionState, sql: &str) -> ProxyResult<Answer> {
    let mut sql = sql.to_string();
    let mut sql_lower = sql.to_lowercase().replace('`', "");
    if let Some(rewritten) = rewrite_catalog_command(&sql_lower) {
        debug!(sql = %rewritten, "Rewrote catalog command");
        sql_lower = rewritten.to_lowercase();
        sql = rewritten;
    }

    let kind = classify(&sql, &sql_lower, state.database.as_deref())?;
    debug!(kind = ?kind, "Classified query");

    let answer = match kind.clone() {
        QueryKind::Acknowledge | QueryKind::AlterKeys => Answer::ok(),
        QueryKind::SetNames(name) => {
            state.set_names(&name);
            let mut ok = OkPacket::new();
            if state.tracks_session_state() {
                for var in ["character_set_client", "character_set_connection", "character_set_results"] {
                    ok = ok.track_variable(var, &name);
                }
            }
            Answer::Ok(ok)
        }
        QueryKind::Use(database) => {
            state.change_database(database);
            Answer::ok()
        }
        QueryKind::ShowWarnings => canned::show_warnings(state.text_charset),
        QueryKind::ShowEngines => canned::show_engines(state.text_charset),
        QueryKind::ShowCharset => canned::show_charset(state.text_charset),
        QueryKind::ShowCollation => canned::show_collation(state.text_charset),
        QueryKind::ShowTableStatus(table) => canned::show_table_status(&table, state.text_charset),
        QueryKind::DeletePredictors => {
            delete_predictors(ctx, state, &sql).await?;
            Answer::ok()
        }
        QueryKind::InsertCommand => {
            let insert = parse_insert(&sql)?;
            custom_command(ctx, state, &insert).await?;
            Answer::ok()
        }
        QueryKind::InsertPredictor => {
            let insert = parse_insert(&sql)?;
            train_predictor(ctx, state, &insert).await?;
            Answer::ok()
        }
        QueryKind::SelectVariables | QueryKind::SelectOne | QueryKind::SelectDatabase | QueryKind::Select => {
            Answer::rows(select_result(ctx, state, &kind, &sql).await?)
        }
        QueryKind::Explain(target) => canned::explain(target, state.text_charset),
    };
    Ok(answer)
}
