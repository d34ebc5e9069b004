
use crate::protocol::capabilities::{CLIENT_DEPRECATE_EOF, CLIENT_SESSION_TRACK};
use crate::protocol::charset;

use super::statement::StatementRegistry;

/// Session state tracking
#[derive(Debug)]
pub struct SessionState {
    pub connection_id: u32,
    /// Client username, with any integration suffix removed
    pub username: String,
    /// Current database
    pub database: Option<String>,
    /// Integration selected by a `{user}_{integration}` login
    pub integration: Option<String>,
    /// Capabilities both sides agreed on
    pub capability_flags: u32,
    /// Character set from the handshake response
    pub character_set: u8,
    /// Collation used for text columns of canned resultsets
    pub text_charset: u16,
    /// Whether the stream was upgraded to TLS
    pub tls_active: bool,
    pub statements: StatementRegistry,
}

impl SessionState {
    pub fn new(connection_id: u32) -> Self {
        Self {
            connection_id,
            username: String::new(),
            database: None,
            integration: None,
            capability_flags: 0,
            character_set: 0,
            text_charset: charset::UTF8_GENERAL_CI,
            tls_active: false,
            statements: StatementRegistry::new(),
        }
    }

    /// Update state after parsing handshake response
    pub fn set_from_handshake(&mut self, username: String, database: Option<String>, capabilities: u32, charset: u8) {
        self.username = username;
        self.database = database.filter(|db| !db.is_empty());
        self.capability_flags = capabilities;
        self.character_set = charset;
    }

    /// Change current database
    pub fn change_database(&mut self, db: String) {
        self.database = Some(db);
    }

    /// Apply `SET NAMES <charset>`
    pub fn set_names(&mut self, name: &str) {
        self.text_charset = charset::collation_for_names(name);
    }

    pub fn deprecate_eof(&self) -> bool {
        self.capability_flags & CLIENT_DEPRECATE_EOF != 0
    }

    pub fn tracks_session_state(&self) -> bool {
        self.capability_flags & CLIENT_SESSION_TRACK != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_from_handshake_drops_empty_database() {
        let mut state = SessionState::new(1);
        state.set_from_handshake("mindsdb".into(), Some(String::new()), CLIENT_DEPRECATE_EOF, 33);
        assert_eq!(state.database, None);
        assert!(state.deprecate_eof());
        assert!(!state.tracks_session_state());

        state.change_database("mindsdb".into());
        assert_eq!(state.database.as_deref(), Some("mindsdb"));
    }

    #[test]
    fn test_set_names() {
        let mut state = SessionState::new(1);
        assert_eq!(state.text_charset, charset::UTF8_GENERAL_CI);

        state.set_names("utf8mb4");
        assert_eq!(state.text_charset, charset::UTF8MB4_GENERAL_CI);

        state.set_names("utf8");
        assert_eq!(state.text_charset, charset::UTF8_GENERAL_CI);
    }
}
