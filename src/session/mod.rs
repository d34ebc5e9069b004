mod auth;
mod io;
mod state;
mod statement;

pub use auth::{AuthNegotiator, AuthOutcome};
pub use io::{AsyncStream, PacketStream};
pub use state::SessionState;
pub use statement::{PreparedStatement, StatementKind, StatementRegistry};

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, error, info, instrument, warn};

use crate::context::ServerContext;
use crate::error::{ProxyError, ProxyResult};
use crate::metrics::metrics;
use crate::protocol::resultset::{
    decode_binary_params, encode_binary_metadata, encode_binary_row, encode_column_definitions,
    encode_prepare_ok, encode_text_resultset,
};
use crate::protocol::response::encode_metadata_eof;
use crate::protocol::status::{SERVER_STATUS_AUTOCOMMIT, SERVER_STATUS_CURSOR_EXISTS, SERVER_STATUS_LAST_ROW_SENT};
use crate::protocol::{encode_terminator, ClientCommand, OkPacket};
use crate::query::{self, Answer, Execution};

/// Connection-fatal failures
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Client disconnected")]
    ClientDisconnected,
    #[error("TLS error: {0}")]
    Tls(String),
}

/// Handle a single client connection
pub struct Session {
    pub id: u32,
    pub state: SessionState,
    ctx: Arc<ServerContext>,
}

impl Session {
    pub fn new(ctx: Arc<ServerContext>, id: u32) -> Self {
        Self {
            id,
            state: SessionState::new(id),
            ctx,
        }
    }

    /// Handshake, then serve commands until the client quits or the
    /// connection breaks
    pub async fn run<S>(mut self, client_stream: S) -> Result<(), SessionError>
    where
        S: AsyncStream + 'static,
    {
        let stream = PacketStream::new(client_stream);
        let ctx = Arc::clone(&self.ctx);

        let (mut stream, outcome) = AuthNegotiator::new(&ctx).negotiate(stream, &mut self.state).await?;
        if outcome == AuthOutcome::Abandoned {
            return Ok(());
        }

        let result = self.command_loop(&mut stream).await;
        debug!(
            session_id = self.id,
            open_statements = self.state.statements.len(),
            "Session finished"
        );
        result
    }

    async fn command_loop(&mut self, stream: &mut PacketStream) -> Result<(), SessionError> {
        loop {
            stream.reset_sequence();
            let Some(payload) = stream.read().await? else {
                debug!(session_id = self.id, "Client closed connection");
                return Ok(());
            };

            let command = ClientCommand::parse(&payload).map_err(|e| SessionError::Protocol(e.to_string()))?;
            if command == ClientCommand::Quit {
                info!(session_id = self.id, "Client quit");
                return Ok(());
            }

            let name = command.name();
            let start = Instant::now();
            let result = self.dispatch(command).await;
            metrics().record_command(name, start.elapsed().as_secs_f64());

            match result {
                Ok(packets) if packets.is_empty() => {}
                Ok(packets) => stream.write_group(packets).await?,
                Err(e) if e.is_fatal() => {
                    error!(session_id = self.id, command = name, error = %e, "Fatal command error");
                    metrics().record_command_error(e.kind());
                    return Err(SessionError::Protocol(e.to_string()));
                }
                Err(e) => {
                    warn!(session_id = self.id, command = name, kind = e.kind(), error = %e, "Command failed");
                    metrics().record_command_error(e.kind());
                    stream
                        .write(e.to_err_packet().encode(self.state.capability_flags))
                        .await?;
                }
            }
        }
    }

    /// Response payloads for one command; empty when nothing is sent back
    async fn dispatch(&mut self, command: ClientCommand) -> ProxyResult<Vec<Bytes>> {
        let caps = self.state.capability_flags;
        match command {
            ClientCommand::Query(sql) => self.handle_query(&sql).await,
            ClientCommand::InitDb(database) => {
                debug!(session_id = self.id, database = %database, "Changing database");
                self.state.change_database(database);
                Ok(vec![OkPacket::new().encode(caps)])
            }
            ClientCommand::StmtPrepare(sql) => self.handle_prepare(&sql).await,
            ClientCommand::StmtExecute { stmt_id, flags, params } => {
                self.handle_execute(stmt_id, flags, &params).await
            }
            ClientCommand::StmtFetch { stmt_id, num_rows } => self.handle_fetch(stmt_id, num_rows).await,
            ClientCommand::StmtClose(stmt_id) => {
                if !self.state.statements.close(stmt_id) {
                    debug!(session_id = self.id, stmt_id, "Close of unknown statement ignored");
                }
                Ok(Vec::new())
            }
            ClientCommand::StmtReset(stmt_id) => {
                if !self.state.statements.reset(stmt_id) {
                    return Err(ProxyError::UnknownStatement(stmt_id));
                }
                Ok(vec![OkPacket::new().encode(caps)])
            }
            // Parameters are always bound inline with execute
            ClientCommand::StmtSendLongData(_) => Ok(Vec::new()),
            ClientCommand::Quit => Ok(Vec::new()),
            ClientCommand::Other(cmd) => {
                debug!(session_id = self.id, command = cmd.name(), "Acknowledging command");
                Ok(vec![OkPacket::new().encode(caps)])
            }
        }
    }

    #[instrument(skip(self), fields(session_id = self.id, sql_preview = %truncate_sql(sql, 100)))]
    async fn handle_query(&mut self, sql: &str) -> ProxyResult<Vec<Bytes>> {
        let sql = query::clean_sql(sql);
        let caps = self.state.capability_flags;

        let packets = match query::answer_query(&self.ctx, &mut self.state, &sql).await? {
            Answer::Ok(ok) => vec![ok.encode(caps)],
            Answer::Rows { result, status } => {
                debug!(columns = result.columns.len(), rows = result.rows.len(), "Sending resultset");
                encode_text_resultset(&result, caps, status)
            }
        };
        Ok(packets)
    }

    #[instrument(skip(self), fields(session_id = self.id, sql_preview = %truncate_sql(sql, 100)))]
    async fn handle_prepare(&mut self, sql: &str) -> ProxyResult<Vec<Bytes>> {
        let sql = query::clean_sql(sql);
        let caps = self.state.capability_flags;
        let statement = query::prepare(&self.ctx, &self.state, &sql).await?;

        let header_counts = (statement.columns.len() as u16, statement.num_params() as u16);
        let mut body = Vec::new();
        for block in [&statement.params, &statement.columns] {
            if !block.is_empty() {
                body.extend(encode_column_definitions(block, &[]));
                body.extend(encode_metadata_eof(caps, SERVER_STATUS_AUTOCOMMIT));
            }
        }

        let kind = statement.kind;
        let stmt_id = self.state.statements.register(statement);
        debug!(stmt_id, kind = ?kind, params = header_counts.1, columns = header_counts.0, "Statement prepared");

        let mut packets = Vec::with_capacity(body.len() + 1);
        packets.push(encode_prepare_ok(stmt_id, header_counts.0, header_counts.1));
        packets.extend(body);
        Ok(packets)
    }

    async fn handle_execute(&mut self, stmt_id: u32, flags: u8, params: &[u8]) -> ProxyResult<Vec<Bytes>> {
        let caps = self.state.capability_flags;
        let mut statement = self
            .state
            .statements
            .take(stmt_id)
            .ok_or(ProxyError::UnknownStatement(stmt_id))?;

        let outcome = match decode_binary_params(params, statement.num_params(), &mut statement.param_types) {
            Ok(values) => query::execute(&self.ctx, &self.state, &mut statement, flags, values).await,
            Err(e) => Err(e.into()),
        };
        self.state.statements.restore(statement);

        let packets = match outcome? {
            Execution::Ok(ok) => vec![ok.encode(caps)],
            Execution::Rows(result) => {
                let mut packets = encode_binary_metadata(&result.columns, caps, SERVER_STATUS_AUTOCOMMIT);
                for row in &result.rows {
                    packets.push(encode_binary_row(&result.columns, row)?);
                }
                packets.push(encode_terminator(caps, SERVER_STATUS_AUTOCOMMIT));
                packets
            }
            Execution::Cursor(columns) => {
                let status = SERVER_STATUS_AUTOCOMMIT | SERVER_STATUS_CURSOR_EXISTS;
                let mut packets = encode_binary_metadata(&columns, caps, status);
                if self.state.deprecate_eof() {
                    packets.push(encode_terminator(caps, status));
                }
                packets
            }
        };
        Ok(packets)
    }

    async fn handle_fetch(&mut self, stmt_id: u32, num_rows: u32) -> ProxyResult<Vec<Bytes>> {
        let caps = self.state.capability_flags;
        let mut statement = self
            .state
            .statements
            .take(stmt_id)
            .ok_or(ProxyError::UnknownStatement(stmt_id))?;

        let outcome = query::fetch(&self.ctx, &self.state, &mut statement, num_rows).await;
        self.state.statements.restore(statement);
        let batch = outcome?;

        let mut packets = Vec::with_capacity(batch.rows.len() + 1);
        for row in &batch.rows {
            packets.push(encode_binary_row(&batch.columns, row)?);
        }
        let status = if batch.last {
            SERVER_STATUS_AUTOCOMMIT | SERVER_STATUS_LAST_ROW_SENT
        } else {
            SERVER_STATUS_AUTOCOMMIT | SERVER_STATUS_CURSOR_EXISTS
        };
        packets.push(encode_terminator(caps, status));
        debug!(stmt_id, rows = batch.rows.len(), last = batch.last, "Fetched rows");
        Ok(packets)
    }
}

/// Truncate SQL for logging
fn truncate_sql(sql: &str, max_len: usize) -> std::borrow::Cow<'_, str> {
    match sql.char_indices().nth(max_len) {
        None => std::borrow::Cow::Borrowed(sql),
        Some((end, _)) => std::borrow::Cow::Owned(format!("{}...", &sql[..end])),
    }
}
