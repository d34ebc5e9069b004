use sqlparser::ast::{Expr, SetExpr, Statement, UnaryOperator, Value};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

use super::ParseError;

/// A single-row `INSERT ... VALUES` statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    /// Schema qualifier, if any
    pub schema: Option<String>,
    pub table: String,
    /// Column name (lower-cased) to literal value; NULL is `None`
    pub values: Vec<(String, Option<String>)>,
}

impl InsertStatement {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .and_then(|(_, value)| value.as_deref())
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.iter().any(|(name, _)| name == column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }
}

/// Parse an insert into its target and column/value pairs.
///
/// Only the first row of a multi-row VALUES list is kept. A `?` placeholder
/// is kept as the literal `"?"`.
pub fn parse_insert(sql: &str) -> Result<InsertStatement, ParseError> {
    let dialect = MySqlDialect {};
    let statements = Parser::parse_sql(&dialect, sql)?;
    let stmt = statements.into_iter().next().ok_or(ParseError::EmptyStatement)?;

    let Statement::Insert {
        table_name,
        columns,
        source,
        ..
    } = stmt
    else {
        return Err(ParseError::NotInsert);
    };

    let mut parts: Vec<String> = table_name.0.iter().map(|i| i.value.clone()).collect();
    let table = parts.pop().ok_or(ParseError::NotInsert)?;
    let schema = parts.pop();

    let row = match source.as_deref().map(|q| q.body.as_ref()) {
        Some(SetExpr::Values(values)) => values.rows.first().cloned().unwrap_or_default(),
        _ => return Err(ParseError::NoValues),
    };

    if row.len() != columns.len() {
        return Err(ParseError::ColumnCountMismatch {
            columns: columns.len(),
            values: row.len(),
        });
    }

    let values = columns
        .iter()
        .zip(row.iter())
        .map(|(column, expr)| (column.value.to_lowercase(), literal(expr)))
        .collect();

    Ok(InsertStatement {
        schema,
        table,
        values,
    })
}

fn literal(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Value(value) => match value {
            Value::Null => None,
            Value::SingleQuotedString(s)
            | Value::DoubleQuotedString(s)
            | Value::EscapedStringLiteral(s)
            | Value::NationalStringLiteral(s) => Some(s.clone()),
            Value::Number(n, _) => Some(n.clone()),
            Value::Boolean(b) => Some(b.to_string()),
            Value::Placeholder(p) => Some(p.clone()),
            other => Some(other.to_string()),
        },
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => literal(expr).map(|v| format!("-{}", v)),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_predictor_insert() {
        let insert = parse_insert(
            "insert into mindsdb.predictors (name, predict, external_datasource) values ('p1','y','ds1')",
        )
        .unwrap();
        assert_eq!(insert.schema.as_deref(), Some("mindsdb"));
        assert_eq!(insert.table, "predictors");
        assert_eq!(insert.get("name"), Some("p1"));
        assert_eq!(insert.get("predict"), Some("y"));
        assert_eq!(insert.get("external_datasource"), Some("ds1"));
        assert!(!insert.contains("select_data_query"));
    }

    #[test]
    fn test_parse_placeholders_and_null() {
        let insert =
            parse_insert("INSERT INTO predictors (Name, predict, training_options) VALUES (?, ?, NULL)")
                .unwrap();
        assert_eq!(insert.schema, None);
        assert_eq!(
            insert.columns().collect::<Vec<_>>(),
            vec!["name", "predict", "training_options"]
        );
        assert_eq!(insert.get("name"), Some("?"));
        assert!(insert.contains("training_options"));
        assert_eq!(insert.get("training_options"), None);
    }

    #[test]
    fn test_parse_numbers() {
        let insert = parse_insert("insert into t (a, b) values (10, -2)").unwrap();
        assert_eq!(insert.get("a"), Some("10"));
        assert_eq!(insert.get("b"), Some("-2"));
    }

    #[test]
    fn test_parse_rejects_other_statements() {
        assert!(matches!(
            parse_insert("select 1"),
            Err(ParseError::NotInsert)
        ));
        assert!(parse_insert("insert into").is_err());
        assert!(matches!(
            parse_insert("insert into t (a, b) values (1)"),
            Err(ParseError::ColumnCountMismatch { .. })
        ));
    }
}
