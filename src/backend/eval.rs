//! A small SELECT evaluator over in-memory tables.
//!
//! Supports a single table in FROM (or none), projection with aliases,
//! `WHERE` with comparisons, `AND`/`OR`/`NOT`, `IN`, `LIKE` and `IS [NOT]
//! NULL`, plus `ORDER BY`, `LIMIT` and `OFFSET`.

use std::cmp::Ordering;

use sqlparser::ast::{
    BinaryOperator, Expr, Query, SelectItem, SetExpr, Statement, TableFactor, UnaryOperator,
    Value as SqlValue,
};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

use super::BackendFailure;
use crate::protocol::constants::error_code::*;
use crate::protocol::{ColumnDescriptor, ColumnType, ResultSet, Value};

/// Rows of one virtual table
#[derive(Debug, Clone)]
pub struct Table {
    pub schema: String,
    pub name: String,
    pub columns: Vec<(String, ColumnType)>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|(c, _)| c.eq_ignore_ascii_case(name))
    }
}

/// Source of tables by (schema, name)
pub trait Catalog {
    fn table(&self, schema: &str, name: &str) -> Option<Table>;
}

/// Run a SELECT against `catalog`; unqualified tables resolve in `default_schema`
pub fn execute_select(
    sql: &str,
    default_schema: &str,
    catalog: &dyn Catalog,
) -> Result<ResultSet, BackendFailure> {
    let dialect = MySqlDialect {};
    let statements = Parser::parse_sql(&dialect, sql)
        .map_err(|e| BackendFailure::new(ER_SYNTAX_ERROR, e.to_string()))?;

    let query = match statements.into_iter().next() {
        Some(Statement::Query(query)) => query,
        Some(_) => {
            return Err(BackendFailure::new(
                ER_NOT_SUPPORTED_YET,
                "only SELECT statements can be answered",
            ))
        }
        None => return Err(BackendFailure::new(ER_SYNTAX_ERROR, "empty statement")),
    };

    execute_query(&query, default_schema, catalog)
}

struct Source {
    table: Table,
    alias: Option<String>,
}

fn execute_query(
    query: &Query,
    default_schema: &str,
    catalog: &dyn Catalog,
) -> Result<ResultSet, BackendFailure> {
    let select = match query.body.as_ref() {
        SetExpr::Select(select) => select,
        _ => {
            return Err(BackendFailure::new(
                ER_NOT_SUPPORTED_YET,
                "only simple SELECT statements are supported",
            ))
        }
    };

    let source = match select.from.as_slice() {
        [] => None,
        [from] if from.joins.is_empty() => Some(resolve_table(&from.relation, default_schema, catalog)?),
        _ => {
            return Err(BackendFailure::new(
                ER_NOT_SUPPORTED_YET,
                "joins are not supported",
            ))
        }
    };

    // Without FROM there is exactly one empty row to project
    let (mut rows, table) = match &source {
        Some(s) => (s.table.rows.clone(), Some(&s.table)),
        None => (vec![Vec::new()], None),
    };

    if let Some(selection) = &select.selection {
        let mut filtered = Vec::with_capacity(rows.len());
        for row in rows {
            if truthy(&eval(selection, table, &row)?) {
                filtered.push(row);
            }
        }
        rows = filtered;
    }

    if !query.order_by.is_empty() {
        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            let keys = query
                .order_by
                .iter()
                .map(|o| eval(&o.expr, table, &row))
                .collect::<Result<Vec<_>, _>>()?;
            keyed.push((keys, row));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for (i, order) in query.order_by.iter().enumerate() {
                let ord = compare(&a[i], &b[i]).unwrap_or_else(|| null_order(&a[i], &b[i]));
                let ord = if order.asc == Some(false) { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        rows = keyed.into_iter().map(|(_, row)| row).collect();
    }

    if let Some(offset) = &query.offset {
        let n = eval_count(&offset.value)?;
        rows = rows.into_iter().skip(n).collect();
    }
    if let Some(limit) = &query.limit {
        let n = eval_count(limit)?;
        rows.truncate(n);
    }

    project(&select.projection, source.as_ref(), rows)
}

fn resolve_table(
    factor: &TableFactor,
    default_schema: &str,
    catalog: &dyn Catalog,
) -> Result<Source, BackendFailure> {
    let TableFactor::Table { name, alias, .. } = factor else {
        return Err(BackendFailure::new(
            ER_NOT_SUPPORTED_YET,
            "only plain tables are supported in FROM",
        ));
    };

    let parts: Vec<&str> = name.0.iter().map(|i| i.value.as_str()).collect();
    let (schema, table) = match parts.as_slice() {
        [table] => (default_schema, *table),
        [schema, table] => (*schema, *table),
        _ => {
            return Err(BackendFailure::new(
                ER_SYNTAX_ERROR,
                format!("invalid table name '{}'", name),
            ))
        }
    };

    let found = catalog.table(schema, table).ok_or_else(|| {
        BackendFailure::new(
            ER_NO_SUCH_TABLE,
            format!("Table '{}.{}' doesn't exist", schema, table),
        )
    })?;

    Ok(Source {
        table: found,
        alias: alias.as_ref().map(|a| a.name.value.clone()),
    })
}

fn project(
    projection: &[SelectItem],
    source: Option<&Source>,
    rows: Vec<Vec<Value>>,
) -> Result<ResultSet, BackendFailure> {
    let table = source.map(|s| &s.table);
    let mut columns = Vec::new();
    // Each output column is either a table column index or a computed expression
    let mut outputs: Vec<Result<usize, &Expr>> = Vec::new();

    for item in projection {
        match item {
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                let table = table.ok_or_else(|| {
                    BackendFailure::new(ER_SYNTAX_ERROR, "No tables used")
                })?;
                for (i, (name, ty)) in table.columns.iter().enumerate() {
                    columns.push(table_column(source, name, *ty, None));
                    outputs.push(Ok(i));
                }
            }
            SelectItem::UnnamedExpr(expr) => {
                push_output(expr, None, source, &mut columns, &mut outputs, &rows)?;
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                push_output(expr, Some(&alias.value), source, &mut columns, &mut outputs, &rows)?;
            }
        }
    }

    let mut out_rows = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut out = Vec::with_capacity(outputs.len());
        for output in &outputs {
            match output {
                Ok(i) => out.push(row.get(*i).cloned().unwrap_or(Value::Null)),
                Err(expr) => out.push(eval(expr, table, row)?),
            }
        }
        out_rows.push(out);
    }

    Ok(ResultSet::new(columns, out_rows))
}

fn push_output<'a>(
    expr: &'a Expr,
    alias: Option<&str>,
    source: Option<&Source>,
    columns: &mut Vec<ColumnDescriptor>,
    outputs: &mut Vec<Result<usize, &'a Expr>>,
    rows: &[Vec<Value>],
) -> Result<(), BackendFailure> {
    let table = source.map(|s| &s.table);

    if let Some(name) = column_name(expr) {
        let index = table
            .and_then(|t| t.column_index(name))
            .ok_or_else(|| unknown_column(name))?;
        let (column, ty) = table
            .map(|t| &t.columns[index])
            .ok_or_else(|| unknown_column(name))?;
        columns.push(table_column(source, column, *ty, alias));
        outputs.push(Ok(index));
        return Ok(());
    }

    // Computed: type from the first row's value
    let sample = match rows.first() {
        Some(row) => eval(expr, table, row)?,
        None => Value::Null,
    };
    let label = alias.map(str::to_string).unwrap_or_else(|| expr.to_string());
    columns.push(ColumnDescriptor::computed(&label, value_type(&sample)));
    outputs.push(Err(expr));
    Ok(())
}

fn table_column(source: Option<&Source>, name: &str, ty: ColumnType, alias: Option<&str>) -> ColumnDescriptor {
    let mut column = ColumnDescriptor::new(name, ty);
    if let Some(source) = source {
        column = column
            .with_schema(&source.table.schema)
            .with_table(&source.table.name);
        if let Some(table_alias) = &source.alias {
            column = column.with_table_alias(table_alias);
        }
    }
    if let Some(alias) = alias {
        column = column.with_alias(alias);
    }
    column
}

fn column_name(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Identifier(ident) => Some(&ident.value),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.as_str()),
        _ => None,
    }
}

fn unknown_column(name: &str) -> BackendFailure {
    BackendFailure::new(
        ER_BAD_FIELD_ERROR,
        format!("Unknown column '{}' in 'field list'", name),
    )
}

fn value_type(value: &Value) -> ColumnType {
    match value {
        Value::Int(_) | Value::UInt(_) => ColumnType::LongLong,
        Value::Double(_) => ColumnType::Double,
        Value::Null => ColumnType::Null,
        Value::Date(_) => ColumnType::Date,
        Value::DateTime(_) => ColumnType::DateTime,
        Value::Text(_) | Value::Bytes(_) => ColumnType::VarString,
    }
}

fn eval(expr: &Expr, table: Option<&Table>, row: &[Value]) -> Result<Value, BackendFailure> {
    if let Some(name) = column_name(expr) {
        let index = table
            .and_then(|t| t.column_index(name))
            .ok_or_else(|| unknown_column(name))?;
        return Ok(row.get(index).cloned().unwrap_or(Value::Null));
    }

    let value = match expr {
        Expr::Value(value) => literal(value),
        Expr::Nested(inner) => eval(inner, table, row)?,
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match eval(expr, table, row)? {
            Value::Int(v) => Value::Int(-v),
            Value::Double(v) => Value::Double(-v),
            other => return Err(unsupported_value(&other)),
        },
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr,
        } => boolean(!truthy(&eval(expr, table, row)?)),
        Expr::IsNull(inner) => boolean(eval(inner, table, row)?.is_null()),
        Expr::IsNotNull(inner) => boolean(!eval(inner, table, row)?.is_null()),
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let needle = eval(expr, table, row)?;
            let mut found = false;
            for item in list {
                if compare(&needle, &eval(item, table, row)?) == Some(Ordering::Equal) {
                    found = true;
                    break;
                }
            }
            boolean(found != *negated)
        }
        Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => {
            let value = eval(expr, table, row)?;
            let pattern = eval(pattern, table, row)?;
            match (value.to_text(), pattern.to_text()) {
                (Some(v), Some(p)) => boolean(like(&v, &p) != *negated),
                _ => Value::Null,
            }
        }
        Expr::BinaryOp { left, op, right } => {
            let l = eval(left, table, row)?;
            let r = eval(right, table, row)?;
            match op {
                BinaryOperator::And => boolean(truthy(&l) && truthy(&r)),
                BinaryOperator::Or => boolean(truthy(&l) || truthy(&r)),
                BinaryOperator::Eq => cmp_value(&l, &r, |o| o == Ordering::Equal),
                BinaryOperator::NotEq => cmp_value(&l, &r, |o| o != Ordering::Equal),
                BinaryOperator::Lt => cmp_value(&l, &r, |o| o == Ordering::Less),
                BinaryOperator::LtEq => cmp_value(&l, &r, |o| o != Ordering::Greater),
                BinaryOperator::Gt => cmp_value(&l, &r, |o| o == Ordering::Greater),
                BinaryOperator::GtEq => cmp_value(&l, &r, |o| o != Ordering::Less),
                other => {
                    return Err(BackendFailure::new(
                        ER_NOT_SUPPORTED_YET,
                        format!("operator {} is not supported", other),
                    ))
                }
            }
        }
        other => {
            return Err(BackendFailure::new(
                ER_NOT_SUPPORTED_YET,
                format!("expression '{}' is not supported", other),
            ))
        }
    };
    Ok(value)
}

fn literal(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Number(n, _) => n
            .parse::<i64>()
            .map(Value::Int)
            .or_else(|_| n.parse::<f64>().map(Value::Double))
            .unwrap_or_else(|_| Value::Text(n.clone())),
        SqlValue::Boolean(b) => Value::Int(i64::from(*b)),
        SqlValue::SingleQuotedString(s)
        | SqlValue::DoubleQuotedString(s)
        | SqlValue::EscapedStringLiteral(s)
        | SqlValue::NationalStringLiteral(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

fn unsupported_value(value: &Value) -> BackendFailure {
    BackendFailure::new(
        ER_NOT_SUPPORTED_YET,
        format!("cannot negate {:?}", value),
    )
}

fn boolean(b: bool) -> Value {
    Value::Int(i64::from(b))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Int(v) => *v != 0,
        Value::UInt(v) => *v != 0,
        Value::Double(v) => *v != 0.0,
        Value::Text(s) => s.trim().parse::<f64>().map(|v| v != 0.0).unwrap_or(false),
        _ => true,
    }
}

fn cmp_value(l: &Value, r: &Value, f: impl Fn(Ordering) -> bool) -> Value {
    match compare(l, r) {
        Some(o) => boolean(f(o)),
        None => Value::Null,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(v) => Some(*v as f64),
        Value::UInt(v) => Some(*v as f64),
        Value::Double(v) => Some(*v),
        _ => None,
    }
}

/// SQL comparison; `None` when either side is NULL. Text compares
/// case-insensitively, like the default collation.
fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    if l.is_null() || r.is_null() {
        return None;
    }
    match (as_number(l), as_number(r)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        (Some(a), None) => r.to_text()?.trim().parse::<f64>().ok()?.partial_cmp(&a).map(Ordering::reverse),
        (None, Some(b)) => l.to_text()?.trim().parse::<f64>().ok()?.partial_cmp(&b),
        (None, None) => Some(l.to_text()?.to_lowercase().cmp(&r.to_text()?.to_lowercase())),
    }
}

/// NULLs sort first
fn null_order(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn eval_count(expr: &Expr) -> Result<usize, BackendFailure> {
    match expr {
        Expr::Value(SqlValue::Number(n, _)) => n
            .parse()
            .map_err(|_| BackendFailure::new(ER_SYNTAX_ERROR, format!("invalid row count '{}'", n))),
        other => Err(BackendFailure::new(
            ER_SYNTAX_ERROR,
            format!("invalid row count '{}'", other),
        )),
    }
}

/// Case-insensitive LIKE with `%` and `_`
fn like(value: &str, pattern: &str) -> bool {
    fn matches(v: &[char], p: &[char]) -> bool {
        match p.split_first() {
            None => v.is_empty(),
            Some(('%', rest)) => (0..=v.len()).any(|i| matches(&v[i..], rest)),
            Some(('_', rest)) => !v.is_empty() && matches(&v[1..], rest),
            Some((c, rest)) => v.first() == Some(c) && matches(&v[1..], rest),
        }
    }
    let v: Vec<char> = value.to_lowercase().chars().collect();
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    matches(&v, &p)
}
