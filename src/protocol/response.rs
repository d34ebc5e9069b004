//! OK, ERR and EOF status packets.

use bytes::{BufMut, Bytes, BytesMut};

use super::constants::sql_state;
use super::packet::{capabilities::*, status::*};
use super::wire::{WireError, WireReader, WireWrite};

const OK_HEADER: u8 = 0x00;
const EOF_HEADER: u8 = 0xFE;
const ERR_HEADER: u8 = 0xFF;

/// Session-state-change entry type for system variables
const SESSION_TRACK_SYSTEM_VARIABLES: u8 = 0x00;

/// OK packet
#[derive(Debug, Clone, PartialEq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
    /// Changed system variables, reported when the client tracks session state
    pub session_state: Vec<(String, String)>,
    /// Sent as the terminator of a resultset under CLIENT_DEPRECATE_EOF
    pub eof_header: bool,
}

impl OkPacket {
    pub fn new() -> Self {
        Self {
            affected_rows: 0,
            last_insert_id: 0,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            warnings: 0,
            info: String::new(),
            session_state: Vec::new(),
            eof_header: false,
        }
    }

    pub fn with_status(mut self, status_flags: u16) -> Self {
        self.status_flags = status_flags;
        self
    }

    pub fn with_affected_rows(mut self, affected_rows: u64) -> Self {
        self.affected_rows = affected_rows;
        self
    }

    /// Attach a changed system variable
    pub fn track_variable(mut self, name: &str, value: &str) -> Self {
        self.session_state.push((name.to_string(), value.to_string()));
        self
    }

    /// Use the EOF header, as the end of a resultset
    pub fn as_eof(mut self) -> Self {
        self.eof_header = true;
        self
    }

    pub fn encode(&self, capabilities: u32) -> Bytes {
        let mut buf = BytesMut::new();

        buf.put_u8(if self.eof_header { EOF_HEADER } else { OK_HEADER });
        buf.put_lenenc_int(self.affected_rows);
        buf.put_lenenc_int(self.last_insert_id);

        let tracking = capabilities & CLIENT_SESSION_TRACK != 0;
        let mut status_flags = self.status_flags;
        if tracking && !self.session_state.is_empty() {
            status_flags |= SERVER_SESSION_STATE_CHANGED;
        } else {
            status_flags &= !SERVER_SESSION_STATE_CHANGED;
        }

        if capabilities & CLIENT_PROTOCOL_41 != 0 {
            buf.put_u16_le(status_flags);
            buf.put_u16_le(self.warnings);
        }

        if tracking {
            buf.put_lenenc_str(&self.info);
            if status_flags & SERVER_SESSION_STATE_CHANGED != 0 {
                let mut state = BytesMut::new();
                for (name, value) in &self.session_state {
                    let mut entry = BytesMut::new();
                    entry.put_lenenc_str(name);
                    entry.put_lenenc_str(value);
                    state.put_u8(SESSION_TRACK_SYSTEM_VARIABLES);
                    state.put_lenenc_bytes(&entry);
                }
                buf.put_lenenc_bytes(&state);
            }
        } else {
            buf.extend_from_slice(self.info.as_bytes());
        }

        buf.freeze()
    }

    /// Parse an OK (or EOF-flagged OK) payload
    pub fn parse(payload: &[u8], capabilities: u32) -> Result<Self, WireError> {
        let mut r = WireReader::new(payload);
        let header = r.u8()?;
        if header != OK_HEADER && header != EOF_HEADER {
            return Err(WireError::InvalidLengthMarker(header));
        }

        let mut ok = OkPacket::new();
        ok.eof_header = header == EOF_HEADER;
        ok.affected_rows = r.lenenc_int()?;
        ok.last_insert_id = r.lenenc_int()?;
        ok.status_flags = r.u16_le()?;
        ok.warnings = r.u16_le()?;

        if capabilities & CLIENT_SESSION_TRACK != 0 {
            if !r.is_empty() {
                ok.info = String::from_utf8_lossy(r.lenenc_bytes()?).into_owned();
            }
            if ok.status_flags & SERVER_SESSION_STATE_CHANGED != 0 {
                let mut state = WireReader::new(r.lenenc_bytes()?);
                while !state.is_empty() {
                    let kind = state.u8()?;
                    let mut entry = WireReader::new(state.lenenc_bytes()?);
                    if kind == SESSION_TRACK_SYSTEM_VARIABLES {
                        let name = String::from_utf8_lossy(entry.lenenc_bytes()?).into_owned();
                        let value = String::from_utf8_lossy(entry.lenenc_bytes()?).into_owned();
                        ok.session_state.push((name, value));
                    }
                }
            }
        } else {
            ok.info = String::from_utf8_lossy(r.rest()).into_owned();
        }

        Ok(ok)
    }
}

impl Default for OkPacket {
    fn default() -> Self {
        Self::new()
    }
}

/// ERR packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub error_code: u16,
    pub sql_state: String,
    pub error_message: String,
}

impl ErrPacket {
    /// Build an ERR packet, deriving the SQLSTATE from the code
    pub fn new(error_code: u16, error_message: impl Into<String>) -> Self {
        Self {
            error_code,
            sql_state: sql_state(error_code).to_string(),
            error_message: error_message.into(),
        }
    }

    pub fn encode(&self, capabilities: u32) -> Bytes {
        let mut buf = BytesMut::new();

        buf.put_u8(ERR_HEADER);
        buf.put_u16_le(self.error_code);

        if capabilities & CLIENT_PROTOCOL_41 != 0 {
            buf.put_u8(b'#');
            buf.extend_from_slice(self.sql_state.as_bytes());
        }

        buf.extend_from_slice(self.error_message.as_bytes());

        buf.freeze()
    }

    /// Parse from packet payload
    pub fn parse(payload: &[u8], capabilities: u32) -> Option<Self> {
        let mut r = WireReader::new(payload);
        if r.u8().ok()? != ERR_HEADER {
            return None;
        }
        let error_code = r.u16_le().ok()?;

        let sql_state = if capabilities & CLIENT_PROTOCOL_41 != 0 && r.peek_u8() == Some(b'#') {
            r.skip(1).ok()?;
            String::from_utf8_lossy(r.take(5).ok()?).into_owned()
        } else {
            "HY000".to_string()
        };

        Some(Self {
            error_code,
            sql_state,
            error_message: String::from_utf8_lossy(r.rest()).into_owned(),
        })
    }
}

/// Legacy EOF packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

impl EofPacket {
    pub fn new(status_flags: u16) -> Self {
        Self {
            warnings: 0,
            status_flags,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u8(EOF_HEADER);
        buf.put_u16_le(self.warnings);
        buf.put_u16_le(self.status_flags);
        buf.freeze()
    }
}

/// Terminator of a resultset or of a prepare-response block.
///
/// An EOF-flagged OK when the client negotiated CLIENT_DEPRECATE_EOF,
/// a legacy EOF otherwise.
pub fn encode_terminator(capabilities: u32, status_flags: u16) -> Bytes {
    if capabilities & CLIENT_DEPRECATE_EOF != 0 {
        OkPacket::new()
            .with_status(status_flags)
            .as_eof()
            .encode(capabilities)
    } else {
        EofPacket::new(status_flags).encode()
    }
}

/// EOF between column definitions and rows; omitted under CLIENT_DEPRECATE_EOF
pub fn encode_metadata_eof(capabilities: u32, status_flags: u16) -> Option<Bytes> {
    if capabilities & CLIENT_DEPRECATE_EOF != 0 {
        None
    } else {
        Some(EofPacket::new(status_flags).encode())
    }
}

/// Check if packet is OK packet
pub fn is_ok_packet(payload: &[u8]) -> bool {
    !payload.is_empty() && payload[0] == OK_HEADER
}

/// Check if packet is ERR packet
pub fn is_err_packet(payload: &[u8]) -> bool {
    !payload.is_empty() && payload[0] == ERR_HEADER
}

/// Check if packet is a legacy EOF packet
pub fn is_eof_packet(payload: &[u8]) -> bool {
    payload.len() == 5 && payload[0] == EOF_HEADER
}

/// Check if packet is an EOF-flagged OK packet
pub fn is_eof_ok_packet(payload: &[u8]) -> bool {
    payload.len() > 5 && payload.len() < 0xFF_FF_FF && payload[0] == EOF_HEADER
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::error_code;

    const CAPS: u32 = CLIENT_PROTOCOL_41 | CLIENT_SESSION_TRACK;

    #[test]
    fn test_ok_packet_layout() {
        let payload = OkPacket::new().encode(CLIENT_PROTOCOL_41);
        assert_eq!(&payload[..], &[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]);
        assert!(is_ok_packet(&payload));
    }

    #[test]
    fn test_ok_packet_session_state() {
        let ok = OkPacket::new()
            .track_variable("character_set_client", "utf8mb4")
            .track_variable("character_set_results", "utf8mb4");
        let payload = ok.encode(CAPS);
        let parsed = OkPacket::parse(&payload, CAPS).unwrap();
        assert!(parsed.status_flags & SERVER_SESSION_STATE_CHANGED != 0);
        assert_eq!(parsed.session_state, ok.session_state);
    }

    #[test]
    fn test_ok_packet_untracked_drops_state() {
        let ok = OkPacket::new().track_variable("character_set_client", "utf8");
        let payload = ok.encode(CLIENT_PROTOCOL_41);
        let parsed = OkPacket::parse(&payload, CLIENT_PROTOCOL_41).unwrap();
        assert_eq!(parsed.status_flags & SERVER_SESSION_STATE_CHANGED, 0);
        assert!(parsed.session_state.is_empty());
    }

    #[test]
    fn test_err_packet_roundtrip() {
        let err = ErrPacket::new(error_code::ER_PASSWORD_NO_MATCH, "Access denied");
        let payload = err.encode(CLIENT_PROTOCOL_41);
        assert!(is_err_packet(&payload));
        assert_eq!(&payload[1..3], &1133u16.to_le_bytes());
        assert_eq!(ErrPacket::parse(&payload, CLIENT_PROTOCOL_41).unwrap(), err);
    }

    #[test]
    fn test_terminator_follows_deprecate_eof() {
        let legacy = encode_terminator(CLIENT_PROTOCOL_41, SERVER_STATUS_AUTOCOMMIT);
        assert!(is_eof_packet(&legacy));
        assert!(!is_eof_ok_packet(&legacy));
        assert!(encode_metadata_eof(CLIENT_PROTOCOL_41, SERVER_STATUS_AUTOCOMMIT).is_some());

        let caps = CLIENT_PROTOCOL_41 | CLIENT_DEPRECATE_EOF;
        let modern = encode_terminator(caps, SERVER_STATUS_AUTOCOMMIT);
        assert!(is_eof_ok_packet(&modern));
        assert!(!is_eof_packet(&modern));
        assert!(encode_metadata_eof(caps, SERVER_STATUS_AUTOCOMMIT).is_none());
    }
}
