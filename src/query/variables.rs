//! Static answers for `SELECT @@variable` queries.

use std::collections::HashMap;

use crate::config::ServerConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::parser::parse_select_variables;
use crate::protocol::{charset, ColumnDescriptor, ColumnType, ResultSet, Value};

/// A server variable's value and wire shape
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub value: Value,
    pub column_type: ColumnType,
    pub charset: u16,
}

impl Variable {
    fn text(value: &str) -> Self {
        Self {
            value: Value::from(value),
            column_type: ColumnType::VarString,
            charset: charset::UTF8_GENERAL_CI,
        }
    }

    fn number(value: i64) -> Self {
        Self {
            value: Value::Int(value),
            column_type: ColumnType::LongLong,
            charset: charset::BINARY,
        }
    }
}

/// Name to value table, keyed by the bare lower-case variable name
#[derive(Debug, Clone)]
pub struct ServerVariables {
    vars: HashMap<&'static str, Variable>,
}

impl ServerVariables {
    pub fn new(server: &ServerConfig) -> Self {
        let mut vars = HashMap::new();

        vars.insert("version", Variable::text(&server.version));
        vars.insert("version_comment", Variable::text(&server.version_comment));

        for (name, value) in [
            ("auto_increment_increment", 1),
            ("autocommit", 1),
            ("interactive_timeout", 28800),
            ("lower_case_table_names", 0),
            ("max_allowed_packet", 16_777_216),
            ("net_buffer_length", 16384),
            ("net_write_timeout", 60),
            ("performance_schema", 0),
            ("query_cache_size", 0),
            ("sql_select_limit", i64::MAX),
            ("tx_read_only", 0),
            ("transaction_read_only", 0),
            ("wait_timeout", 28800),
        ] {
            vars.insert(name, Variable::number(value));
        }

        for (name, value) in [
            ("character_set_client", "utf8"),
            ("character_set_connection", "utf8"),
            ("character_set_results", "utf8"),
            ("character_set_server", "latin1"),
            ("collation_connection", "utf8_general_ci"),
            ("collation_server", "latin1_swedish_ci"),
            ("init_connect", ""),
            ("license", "GPL"),
            ("query_cache_type", "OFF"),
            (
                "sql_mode",
                "STRICT_TRANS_TABLES,NO_ZERO_IN_DATE,NO_ZERO_DATE,ERROR_FOR_DIVISION_BY_ZERO,NO_ENGINE_SUBSTITUTION",
            ),
            ("system_time_zone", "UTC"),
            ("time_zone", "SYSTEM"),
            ("tx_isolation", "REPEATABLE-READ"),
            ("transaction_isolation", "REPEATABLE-READ"),
        ] {
            vars.insert(name, Variable::text(value));
        }

        Self { vars }
    }

    /// Look up `@@[session.|global.|local.]name`, ignoring case
    pub fn get(&self, expr: &str) -> Option<&Variable> {
        let name = expr.trim().trim_start_matches('@').to_lowercase();
        let name = ["session.", "global.", "local."]
            .iter()
            .find_map(|scope| name.strip_prefix(scope))
            .unwrap_or(&name);
        self.vars.get(name)
    }

    /// One-row resultset for every `@@variable` in the select list
    pub fn answer(&self, sql: &str) -> ProxyResult<ResultSet> {
        let items = parse_select_variables(sql)?;

        let mut columns = Vec::with_capacity(items.len());
        let mut row = Vec::with_capacity(items.len());
        for item in &items {
            let variable = self
                .get(&item.expr)
                .ok_or_else(|| ProxyError::UnknownVariable(item.expr.trim_start_matches('@').to_string()))?;
            columns.push(
                ColumnDescriptor::computed(item.label(), variable.column_type)
                    .with_charset(variable.charset),
            );
            row.push(variable.value.clone());
        }

        Ok(ResultSet::new(columns, vec![row]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> ServerVariables {
        ServerVariables::new(&ServerConfig::default())
    }

    #[test]
    fn test_lookup_scopes_and_case() {
        let vars = vars();
        assert!(vars.get("@@max_allowed_packet").is_some());
        assert!(vars.get("@@SESSION.auto_increment_increment").is_some());
        assert!(vars.get("@@global.sql_mode").is_some());
        assert!(vars.get("@@no_such_thing").is_none());
    }

    #[test]
    fn test_version_from_config() {
        let result = vars().answer("SELECT @@version").unwrap();
        assert_eq!(result.columns.len(), 1);
        assert_eq!(result.columns[0].alias, "@@version");
        assert_eq!(result.rows, vec![vec![Value::from("0.1")]]);

        let result = vars().answer("select @@version_comment limit 1").unwrap();
        assert_eq!(result.rows, vec![vec![Value::from("(MindsDB)")]]);
    }

    #[test]
    fn test_multiple_with_aliases() {
        let result = vars()
            .answer("SELECT @@session.auto_increment_increment AS auto_increment_increment, @@character_set_client")
            .unwrap();
        assert_eq!(result.columns[0].alias, "auto_increment_increment");
        assert_eq!(result.columns[0].column_type, ColumnType::LongLong);
        assert_eq!(result.columns[1].alias, "@@character_set_client");
        assert_eq!(result.rows[0], vec![Value::Int(1), Value::from("utf8")]);
    }

    #[test]
    fn test_unknown_variable() {
        let err = vars().answer("select @@no_such_thing").unwrap_err();
        assert!(matches!(err, ProxyError::UnknownVariable(ref name) if name == "no_such_thing"));
        assert_eq!(err.error_code(), 1193);
    }
}
