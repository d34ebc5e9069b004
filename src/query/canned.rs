//! Fixed resultsets answering catalog queries that GUI clients send on
//! connect. They mirror the column shapes a real MySQL server returns.

use chrono::Utc;

use crate::protocol::status::{SERVER_QUERY_NO_INDEX_USED, SERVER_STATUS_AUTOCOMMIT};
use crate::protocol::{charset, field_flag, ColumnDescriptor, ColumnType, ResultSet, Value};

use super::Answer;

/// Virtual tables `EXPLAIN` can describe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplainTarget {
    Predictors,
    Commands,
}

impl ExplainTarget {
    /// Accepts the bare or `mindsdb.`-qualified name
    pub fn from_table(table: &str) -> Option<Self> {
        match table.trim_end_matches(';').to_lowercase().as_str() {
            "predictors" | "mindsdb.predictors" => Some(ExplainTarget::Predictors),
            "commands" | "mindsdb.commands" => Some(ExplainTarget::Commands),
            _ => None,
        }
    }
}

fn column(schema: &str, table: &str, name: &str, alias: &str, ty: ColumnType, cs: u16) -> ColumnDescriptor {
    ColumnDescriptor::new(name, ty)
        .with_schema(schema)
        .with_table(table)
        .with_alias(alias)
        .with_charset(cs)
}

fn text_row(values: &[&str]) -> Vec<Value> {
    values.iter().map(|v| Value::from(*v)).collect()
}

fn rows(result: ResultSet) -> Answer {
    Answer::Rows {
        result,
        status: SERVER_STATUS_AUTOCOMMIT,
    }
}

/// `DESCRIBE`-shaped listing of a virtual table
pub fn explain(target: ExplainTarget, text_charset: u16) -> Answer {
    use field_flag::{BLOB, NOT_NULL};

    let col = |name: &str, alias: &str, ty: ColumnType, flags: u16| {
        column("information_schema", "COLUMNS", name, alias, ty, text_charset).with_flags(flags)
    };
    let columns = vec![
        col("COLUMN_NAME", "Field", ColumnType::VarString, NOT_NULL),
        col("COLUMN_TYPE", "Type", ColumnType::Blob, NOT_NULL | BLOB),
        col("IS_NULLABLE", "Null", ColumnType::VarString, NOT_NULL),
        col("COLUMN_KEY", "Key", ColumnType::VarString, NOT_NULL),
        col("COLUMN_DEFAULT", "Default", ColumnType::Blob, BLOB),
        col("EXTRA", "Extra", ColumnType::VarString, NOT_NULL),
    ];

    let key_row = |name: &str| {
        vec![
            Value::from(name),
            Value::from("varchar(255)"),
            Value::from("NO"),
            Value::from("PRI"),
            Value::Null,
            Value::from(""),
        ]
    };

    let rows = match target {
        ExplainTarget::Predictors => {
            let mut rows = vec![key_row("name")];
            for field in [
                "status",
                "accuracy",
                "predict",
                "select_data_query",
                "external_datasource",
                "training_options",
            ] {
                rows.push(vec![
                    Value::from(field),
                    Value::from("varchar(255)"),
                    Value::from("YES"),
                    Value::from(""),
                    Value::Null,
                    Value::from(""),
                ]);
            }
            rows
        }
        ExplainTarget::Commands => vec![key_row("command")],
    };

    Answer::Rows {
        result: ResultSet::new(columns, rows),
        status: SERVER_STATUS_AUTOCOMMIT | SERVER_QUERY_NO_INDEX_USED,
    }
}

/// `SHOW TABLE STATUS LIKE '<table>'`
///
/// Only Name, Row_format and Collation report the `mysql` schema, as a
/// real server does.
pub fn show_table_status(table: &str, text_charset: u16) -> Answer {
    let text = |schema: &str, name: &str| {
        column(schema, "tables", name, name, ColumnType::VarString, text_charset)
    };
    let number = |name: &str| column("", "tables", name, name, ColumnType::LongLong, charset::BINARY);
    let timestamp = |name: &str| column("", "tables", name, name, ColumnType::Timestamp, charset::BINARY);

    let columns = vec![
        text("mysql", "Name"),
        text("", "Engine"),
        number("Version"),
        text("mysql", "Row_format"),
        number("Rows"),
        number("Avg_row_length"),
        number("Data_length"),
        number("Max_data_length"),
        number("Index_length"),
        number("Data_free"),
        number("Auto_increment"),
        timestamp("Create_time"),
        timestamp("Update_time"),
        timestamp("Check_time"),
        text("mysql", "Collation"),
        number("Checksum"),
        text("", "Create_options"),
        column("", "tables", "Comment", "Comment", ColumnType::Blob, text_charset),
    ];

    let now = Value::DateTime(Utc::now().naive_utc());
    let row = vec![
        Value::from(table),
        Value::from("InnoDB"),
        Value::Int(10),
        Value::from("Dynamic"),
        Value::Int(1),
        Value::Int(16384),
        Value::Int(16384),
        Value::Int(0),
        Value::Int(0),
        Value::Int(0),
        Value::Null,
        now.clone(),
        now,
        Value::Null,
        Value::from("utf8mb4_0900_ai_ci"),
        Value::Null,
        Value::from(""),
        Value::from(""),
    ];

    rows(ResultSet::new(columns, vec![row]))
}

pub fn show_warnings(text_charset: u16) -> Answer {
    let columns = vec![
        column("", "", "Level", "Level", ColumnType::VarString, text_charset),
        column("", "", "Code", "Code", ColumnType::Long, charset::BINARY),
        column("", "", "Message", "Message", ColumnType::VarString, text_charset),
    ];
    rows(ResultSet::new(columns, Vec::new()))
}

pub fn show_collation(text_charset: u16) -> Answer {
    let text = |name: &str, alias: &str| {
        column("information_schema", "COLLATIONS", name, alias, ColumnType::VarString, text_charset)
    };
    let number = |name: &str, alias: &str| {
        column("information_schema", "COLLATIONS", name, alias, ColumnType::LongLong, charset::BINARY)
    };
    let columns = vec![
        text("COLLATION_NAME", "Collation"),
        text("CHARACTER_SET_NAME", "Charset"),
        number("ID", "Id"),
        text("IS_DEFAULT", "Default"),
        text("IS_COMPILED", "Compiled"),
        number("SORTLEN", "Sortlen"),
    ];

    let entry = |name: &str, set: &str, id: i64| {
        vec![
            Value::from(name),
            Value::from(set),
            Value::Int(id),
            Value::from("Yes"),
            Value::from("Yes"),
            Value::Int(1),
        ]
    };
    let rows_ = vec![
        entry("utf8_general_ci", "utf8", charset::UTF8_GENERAL_CI as i64),
        entry("latin1_swedish_ci", "latin1", charset::LATIN1_SWEDISH_CI as i64),
    ];

    rows(ResultSet::new(columns, rows_))
}

pub fn show_charset(text_charset: u16) -> Answer {
    let text = |name: &str, alias: &str| {
        column("information_schema", "CHARACTER_SETS", name, alias, ColumnType::VarString, text_charset)
    };
    let columns = vec![
        text("CHARACTER_SET_NAME", "Charset"),
        text("DESCRIPTION", "Description"),
        text("DEFAULT_COLLATE_NAME", "Default collation"),
        column(
            "information_schema",
            "CHARACTER_SETS",
            "MAXLEN",
            "Maxlen",
            ColumnType::LongLong,
            charset::BINARY,
        ),
    ];

    let entry = |name: &str, description: &str, collation: &str, maxlen: i64| {
        let mut row = text_row(&[name, description, collation]);
        row.push(Value::Int(maxlen));
        row
    };
    let rows_ = vec![
        entry("utf8", "UTF-8 Unicode", "utf8_general_ci", 3),
        entry("latin1", "cp1252 West European", "latin1_swedish_ci", 1),
    ];

    rows(ResultSet::new(columns, rows_))
}

pub fn show_engines(text_charset: u16) -> Answer {
    let columns = ["Engine", "Support", "Comment", "Transactions", "XA", "Savepoints"]
        .iter()
        .map(|name| column("information_schema", "ENGINES", name, name, ColumnType::VarString, text_charset))
        .collect();
    let row = text_row(&[
        "InnoDB",
        "DEFAULT",
        "Supports transactions, row-level locking, and foreign keys",
        "YES",
        "YES",
        "YES",
    ]);

    rows(ResultSet::new(columns, vec![row]))
}

/// `SELECT 1`
pub fn select_one() -> ResultSet {
    let column = ColumnDescriptor::computed("1", ColumnType::LongLong).with_charset(charset::BINARY);
    ResultSet::new(vec![column], vec![vec![Value::Int(1)]])
}

/// `SELECT database()`
pub fn select_database(database: Option<&str>, text_charset: u16) -> ResultSet {
    let column = ColumnDescriptor::computed("database()", ColumnType::VarString).with_charset(text_charset);
    let value = database.map(Value::from).unwrap_or(Value::Null);
    ResultSet::new(vec![column], vec![vec![value]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unpack_rows(answer: Answer) -> (ResultSet, u16) {
        match answer {
            Answer::Rows { result, status } => (result, status),
            Answer::Ok(_) => panic!("expected rows"),
        }
    }

    #[test]
    fn test_explain_targets() {
        assert_eq!(ExplainTarget::from_table("predictors"), Some(ExplainTarget::Predictors));
        assert_eq!(ExplainTarget::from_table("MINDSDB.Commands"), Some(ExplainTarget::Commands));
        assert_eq!(ExplainTarget::from_table("mysql.user"), None);
    }

    #[test]
    fn test_explain_predictors_shape() {
        let (result, status) = unpack_rows(explain(ExplainTarget::Predictors, charset::UTF8_GENERAL_CI));
        assert_eq!(status, SERVER_STATUS_AUTOCOMMIT | SERVER_QUERY_NO_INDEX_USED);
        let aliases: Vec<_> = result.columns.iter().map(|c| c.alias.as_str()).collect();
        assert_eq!(aliases, ["Field", "Type", "Null", "Key", "Default", "Extra"]);
        assert_eq!(result.rows.len(), 7);
        assert_eq!(result.rows[0][0], Value::from("name"));
        assert_eq!(result.rows[0][3], Value::from("PRI"));
        assert_eq!(result.rows[0][4], Value::Null);
        assert_eq!(result.rows[6][0], Value::from("training_options"));
    }

    #[test]
    fn test_explain_commands_shape() {
        let (result, _) = unpack_rows(explain(ExplainTarget::Commands, charset::UTF8_GENERAL_CI));
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0][0], Value::from("command"));
    }

    #[test]
    fn test_table_status_schema_asymmetry() {
        let (result, _) = unpack_rows(show_table_status("predictors", charset::UTF8_GENERAL_CI));
        assert_eq!(result.columns.len(), 18);
        assert_eq!(result.rows[0].len(), 18);
        let mysql: Vec<_> = result
            .columns
            .iter()
            .filter(|c| c.schema == "mysql")
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(mysql, ["Name", "Row_format", "Collation"]);
        assert_eq!(result.rows[0][0], Value::from("predictors"));
    }

    #[test]
    fn test_show_warnings_is_empty() {
        let (result, _) = unpack_rows(show_warnings(charset::UTF8_GENERAL_CI));
        assert_eq!(result.columns.len(), 3);
        assert!(result.rows.is_empty());
    }

    #[test]
    fn test_catalog_answers_follow_session_charset() {
        let (result, _) = unpack_rows(show_engines(charset::UTF8MB4_GENERAL_CI));
        assert!(result.columns.iter().all(|c| c.charset == charset::UTF8MB4_GENERAL_CI));

        let (result, _) = unpack_rows(show_collation(charset::UTF8_GENERAL_CI));
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.columns[2].charset, charset::BINARY);

        let (result, _) = unpack_rows(show_charset(charset::UTF8_GENERAL_CI));
        assert_eq!(result.columns[2].alias, "Default collation");
    }

    #[test]
    fn test_select_one_and_database() {
        let result = select_one();
        assert_eq!(result.columns[0].alias, "1");
        assert_eq!(result.rows, vec![vec![Value::Int(1)]]);

        let result = select_database(None, charset::UTF8_GENERAL_CI);
        assert_eq!(result.rows, vec![vec![Value::Null]]);
        let result = select_database(Some("mindsdb"), charset::UTF8_GENERAL_CI);
        assert_eq!(result.rows, vec![vec![Value::from("mindsdb")]]);
    }
}
