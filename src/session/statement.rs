use std::collections::HashMap;

use crate::parser::InsertStatement;
use crate::protocol::resultset::ParamType;
use crate::protocol::{ColumnDescriptor, ResultSet};

/// How a prepared statement is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    /// `SELECT ... FOR UPDATE`, run without the locking clause
    Lock,
    Insert,
    Delete,
}

#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub id: u32,
    /// Text as the client sent it
    pub sql: String,
    pub kind: StatementKind,
    /// Text run on execute and fetch
    pub prepared_sql: String,
    pub insert: Option<InsertStatement>,
    pub params: Vec<ColumnDescriptor>,
    pub columns: Vec<ColumnDescriptor>,
    /// Types bound by the last execute
    pub param_types: Vec<ParamType>,
    /// Rows of the last execute, served by fetch
    pub result: Option<ResultSet>,
    /// Rows already sent through fetch
    pub fetched: usize,
}

impl PreparedStatement {
    pub fn new(sql: &str, kind: StatementKind) -> Self {
        Self {
            id: 0,
            sql: sql.to_string(),
            kind,
            prepared_sql: sql.to_string(),
            insert: None,
            params: Vec::new(),
            columns: Vec::new(),
            param_types: Vec::new(),
            result: None,
            fetched: 0,
        }
    }

    pub fn num_params(&self) -> usize {
        self.params.len()
    }
}

/// Statements prepared on one connection
#[derive(Debug)]
pub struct StatementRegistry {
    statements: HashMap<u32, PreparedStatement>,
    next_id: u32,
}

impl StatementRegistry {
    pub fn new() -> Self {
        Self {
            statements: HashMap::new(),
            next_id: 1,
        }
    }

    /// Assign an id and store. Ids wrap around and skip live statements.
    pub fn register(&mut self, mut statement: PreparedStatement) -> u32 {
        while self.next_id == 0 || self.statements.contains_key(&self.next_id) {
            self.next_id = self.next_id.wrapping_add(1);
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        statement.id = id;
        self.statements.insert(id, statement);
        id
    }

    pub fn get(&self, id: u32) -> Option<&PreparedStatement> {
        self.statements.get(&id)
    }

    /// Take a statement out while it runs; put it back with [`Self::restore`]
    pub fn take(&mut self, id: u32) -> Option<PreparedStatement> {
        self.statements.remove(&id)
    }

    pub fn restore(&mut self, statement: PreparedStatement) {
        self.statements.insert(statement.id, statement);
    }

    /// Unknown ids are ignored
    pub fn close(&mut self, id: u32) -> bool {
        self.statements.remove(&id).is_some()
    }

    pub fn reset(&mut self, id: u32) -> bool {
        match self.statements.get_mut(&id) {
            Some(statement) => {
                statement.result = None;
                statement.fetched = 0;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

impl Default for StatementRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement() -> PreparedStatement {
        PreparedStatement::new("select 1", StatementKind::Select)
    }

    #[test]
    fn test_register_and_close() {
        let mut registry = StatementRegistry::new();
        let a = registry.register(statement());
        let b = registry.register(statement());
        assert_ne!(a, b);
        assert_eq!(registry.get(a).unwrap().id, a);

        assert!(registry.close(a));
        assert!(!registry.close(a));
        assert!(!registry.close(999));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_wrap_and_skip_live() {
        let mut registry = StatementRegistry::new();
        let first = registry.register(statement());
        assert_eq!(first, 1);

        registry.next_id = u32::MAX;
        assert_eq!(registry.register(statement()), u32::MAX);
        // 0 is never used and 1 is still open
        assert_eq!(registry.register(statement()), 2);
    }

    #[test]
    fn test_take_restore_reset() {
        let mut registry = StatementRegistry::new();
        let id = registry.register(statement());

        let mut stmt = registry.take(id).unwrap();
        assert!(registry.get(id).is_none());
        stmt.fetched = 5;
        stmt.result = Some(ResultSet::default());
        registry.restore(stmt);

        assert!(registry.reset(id));
        let stmt = registry.get(id).unwrap();
        assert_eq!(stmt.fetched, 0);
        assert!(stmt.result.is_none());
        assert!(!registry.reset(42));
    }
}
