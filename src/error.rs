use thiserror::Error;

use crate::backend::BackendFailure;
use crate::protocol::constants::error_code::*;
use crate::protocol::resultset::ValueError;
use crate::protocol::wire::WireError;
use crate::protocol::ErrPacket;

/// Failure while answering a single command.
///
/// Everything except [`ProxyError::Protocol`] is reported to the client as an
/// ERR packet and the connection keeps serving commands.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Statement shape the proxy deliberately does not handle
    #[error("{0}")]
    Unsupported(String),
    #[error("{0}")]
    Syntax(String),
    #[error("{0}")]
    BadArguments(String),
    /// Structured failure from a backend collaborator, forwarded as is
    #[error("{message}")]
    Backend { code: u16, message: String },
    #[error("Unknown prepared statement handler ({0}) given to mysqld_stmt_execute")]
    UnknownStatement(u32),
    #[error("Unknown system variable '{0}'")]
    UnknownVariable(String),
    /// Malformed command packet; ends the connection
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ProxyError {
    pub fn unsupported(message: impl Into<String>) -> Self {
        ProxyError::Unsupported(message.into())
    }

    pub fn bad_arguments(message: impl Into<String>) -> Self {
        ProxyError::BadArguments(message.into())
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        ProxyError::Syntax(message.into())
    }

    /// MySQL error code sent to the client
    pub fn error_code(&self) -> u16 {
        match self {
            ProxyError::Unsupported(_) | ProxyError::Syntax(_) | ProxyError::Protocol(_) => {
                ER_SYNTAX_ERROR
            }
            ProxyError::BadArguments(_) => ER_WRONG_ARGUMENTS,
            ProxyError::Backend { code, .. } => *code,
            ProxyError::UnknownStatement(_) => ER_UNKNOWN_STMT_HANDLER,
            ProxyError::UnknownVariable(_) => ER_UNKNOWN_SYSTEM_VARIABLE,
        }
    }

    /// Whether the connection must be closed
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProxyError::Protocol(_))
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Unsupported(_) => "unsupported",
            ProxyError::Syntax(_) => "syntax",
            ProxyError::BadArguments(_) => "bad_arguments",
            ProxyError::Backend { .. } => "backend",
            ProxyError::UnknownStatement(_) => "unknown_statement",
            ProxyError::UnknownVariable(_) => "unknown_variable",
            ProxyError::Protocol(_) => "protocol",
        }
    }

    pub fn to_err_packet(&self) -> ErrPacket {
        ErrPacket::new(self.error_code(), self.to_string())
    }
}

impl From<BackendFailure> for ProxyError {
    fn from(failure: BackendFailure) -> Self {
        ProxyError::Backend {
            code: failure.code,
            message: failure.message,
        }
    }
}

impl From<WireError> for ProxyError {
    fn from(e: WireError) -> Self {
        ProxyError::Protocol(e.to_string())
    }
}

impl From<ValueError> for ProxyError {
    fn from(e: ValueError) -> Self {
        ProxyError::Syntax(e.to_string())
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ProxyError::unsupported("x").error_code(), 1149);
        assert_eq!(ProxyError::syntax("x").error_code(), 1149);
        assert_eq!(ProxyError::bad_arguments("x").error_code(), 1210);
        assert_eq!(ProxyError::UnknownStatement(9).error_code(), 1243);
        assert_eq!(ProxyError::UnknownVariable("x".into()).error_code(), 1193);
        assert_eq!(
            ProxyError::Backend {
                code: 1146,
                message: "no table".into()
            }
            .error_code(),
            1146
        );
    }

    #[test]
    fn test_only_protocol_is_fatal() {
        assert!(ProxyError::Protocol("x".into()).is_fatal());
        assert!(!ProxyError::unsupported("x").is_fatal());
        assert!(!ProxyError::Backend {
            code: 1,
            message: String::new()
        }
        .is_fatal());
    }

    #[test]
    fn test_err_packet_message() {
        let packet = ProxyError::bad_arguments("training_options should be in valid JSON string")
            .to_err_packet();
        assert_eq!(packet.error_code, 1210);
        assert_eq!(packet.sql_state, "HY000");
        assert_eq!(
            packet.error_message,
            "training_options should be in valid JSON string"
        );
    }
}
