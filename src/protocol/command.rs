use bytes::Bytes;

use super::packet::Command;
use super::wire::{WireError, WireReader};

/// Rows returned per COM_STMT_FETCH when the client asks for zero
pub const DEFAULT_FETCH_ROWS: u32 = 100_000;

/// `COM_STMT_EXECUTE` cursor flags
pub mod cursor {
    pub const READ_ONLY: u8 = 0x01;
    pub const FOR_UPDATE: u8 = 0x02;
    pub const SCROLLABLE: u8 = 0x04;
}

/// Parsed command from client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Query(String),
    InitDb(String),
    StmtPrepare(String),
    StmtExecute {
        stmt_id: u32,
        flags: u8,
        /// Everything after the iteration count: null bitmap, bound flag,
        /// types and values. Decoding needs the statement's param count.
        params: Bytes,
    },
    StmtFetch {
        stmt_id: u32,
        num_rows: u32,
    },
    StmtClose(u32),
    StmtReset(u32),
    StmtSendLongData(u32),
    Quit,
    Other(Command),
}

impl ClientCommand {
    /// Parse command from packet payload
    pub fn parse(payload: &Bytes) -> Result<Self, WireError> {
        let mut r = WireReader::new(payload);
        let cmd = Command::from(r.u8()?);

        let parsed = match cmd {
            Command::Query => ClientCommand::Query(text(r.rest())),
            Command::InitDb => ClientCommand::InitDb(text(r.rest())),
            Command::StmtPrepare => ClientCommand::StmtPrepare(text(r.rest())),
            Command::StmtExecute => {
                let stmt_id = r.u32_le()?;
                let flags = r.u8()?;
                // iteration count, always 1
                r.skip(4)?;
                let consumed = payload.len() - r.remaining();
                ClientCommand::StmtExecute {
                    stmt_id,
                    flags,
                    params: payload.slice(consumed..),
                }
            }
            Command::StmtFetch => {
                let stmt_id = r.u32_le()?;
                let num_rows = match r.u32_le() {
                    Ok(0) | Err(_) => DEFAULT_FETCH_ROWS,
                    Ok(n) => n,
                };
                ClientCommand::StmtFetch { stmt_id, num_rows }
            }
            Command::StmtClose => ClientCommand::StmtClose(r.u32_le()?),
            Command::StmtReset => ClientCommand::StmtReset(r.u32_le()?),
            Command::StmtSendLongData => ClientCommand::StmtSendLongData(r.u32_le()?),
            Command::Quit => ClientCommand::Quit,
            other => ClientCommand::Other(other),
        };
        Ok(parsed)
    }

    /// Command type for logs and metric labels
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::Query(_) => Command::Query.name(),
            ClientCommand::InitDb(_) => Command::InitDb.name(),
            ClientCommand::StmtPrepare(_) => Command::StmtPrepare.name(),
            ClientCommand::StmtExecute { .. } => Command::StmtExecute.name(),
            ClientCommand::StmtFetch { .. } => Command::StmtFetch.name(),
            ClientCommand::StmtClose(_) => Command::StmtClose.name(),
            ClientCommand::StmtReset(_) => Command::StmtReset.name(),
            ClientCommand::StmtSendLongData(_) => Command::StmtSendLongData.name(),
            ClientCommand::Quit => Command::Quit.name(),
            ClientCommand::Other(cmd) => cmd.name(),
        }
    }
}

fn text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}
