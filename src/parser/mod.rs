mod insert;
mod select;

pub use insert::{parse_insert, InsertStatement};
pub use select::{parse_select_variables, SelectItem};

use crate::error::ProxyError;

/// SQL-text helper errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Failed to parse SQL: {0}")]
    Sql(String),

    #[error("Empty statement")]
    EmptyStatement,

    #[error("Expected an INSERT ... VALUES statement")]
    NotInsert,

    #[error("INSERT statement has no VALUES list")]
    NoValues,

    #[error("INSERT has {columns} columns but {values} values")]
    ColumnCountMismatch { columns: usize, values: usize },

    #[error("Expected a SELECT statement")]
    NotSelect,
}

impl From<sqlparser::parser::ParserError> for ParseError {
    fn from(e: sqlparser::parser::ParserError) -> Self {
        ParseError::Sql(e.to_string())
    }
}

impl From<ParseError> for ProxyError {
    fn from(e: ParseError) -> Self {
        ProxyError::Syntax(e.to_string())
    }
}
