use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};

use super::constants::auth_plugin::MYSQL_NATIVE_PASSWORD;
use super::constants::charset;
use super::packet::{capabilities::*, status};
use super::wire::{WireError, WireReader, WireWrite};

/// Length of the auth salt sent in the greeting
pub const SALT_LEN: usize = 20;

/// First byte of an auth-switch request
const AUTH_SWITCH_HEADER: u8 = 0xFE;
/// Extra-auth-data header used by caching_sha2_password
const AUTH_MORE_DATA_HEADER: u8 = 0x01;
/// caching_sha2_password: "perform full authentication"
const PERFORM_FULL_AUTHENTICATION: u8 = 0x04;

/// MySQL initial handshake packet (server -> client)
#[derive(Debug, Clone)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub auth_plugin_data_part1: [u8; 8],
    pub capability_flags: u32,
    pub character_set: u8,
    pub status_flags: u16,
    pub auth_plugin_data_part2: Vec<u8>,
    pub auth_plugin_name: String,
}

impl InitialHandshake {
    /// Build the greeting for a new connection
    pub fn new(
        connection_id: u32,
        salt: &[u8; SALT_LEN],
        server_version: &str,
        capability_flags: u32,
        auth_plugin_name: &str,
    ) -> Self {
        let mut part1 = [0u8; 8];
        part1.copy_from_slice(&salt[..8]);

        Self {
            protocol_version: 10,
            server_version: server_version.to_string(),
            connection_id,
            auth_plugin_data_part1: part1,
            capability_flags,
            character_set: charset::UTF8_GENERAL_CI as u8,
            status_flags: status::SERVER_STATUS_AUTOCOMMIT,
            auth_plugin_data_part2: salt[8..].to_vec(),
            auth_plugin_name: auth_plugin_name.to_string(),
        }
    }

    /// Get full auth plugin data (20 bytes)
    pub fn auth_plugin_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(SALT_LEN);
        data.extend_from_slice(&self.auth_plugin_data_part1);
        data.extend_from_slice(&self.auth_plugin_data_part2);
        data
    }

    /// Encode the greeting payload
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(128);

        buf.put_u8(self.protocol_version);
        buf.put_null_terminated(self.server_version.as_bytes());
        buf.put_u32_le(self.connection_id);
        buf.extend_from_slice(&self.auth_plugin_data_part1);
        // Filler
        buf.put_u8(0);
        buf.put_u16_le((self.capability_flags & 0xFFFF) as u16);
        buf.put_u8(self.character_set);
        buf.put_u16_le(self.status_flags);
        buf.put_u16_le(((self.capability_flags >> 16) & 0xFFFF) as u16);

        if self.capability_flags & CLIENT_PLUGIN_AUTH != 0 {
            buf.put_u8((self.auth_plugin_data_part1.len() + self.auth_plugin_data_part2.len() + 1) as u8);
        } else {
            buf.put_u8(0);
        }

        // Reserved (10 bytes)
        buf.extend_from_slice(&[0u8; 10]);

        if self.capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            buf.put_null_terminated(&self.auth_plugin_data_part2);
        }

        if self.capability_flags & CLIENT_PLUGIN_AUTH != 0 {
            buf.put_null_terminated(self.auth_plugin_name.as_bytes());
        }

        buf.freeze()
    }

    /// Parse a greeting payload (client side; used by tests and tooling)
    pub fn parse(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(payload);

        let protocol_version = r.u8()?;
        let server_version = String::from_utf8_lossy(r.null_terminated()?).to_string();
        let connection_id = r.u32_le()?;

        let mut auth_plugin_data_part1 = [0u8; 8];
        auth_plugin_data_part1.copy_from_slice(r.take(8)?);
        r.skip(1)?;

        let capability_flags_lower = u32::from(r.u16_le()?);
        let character_set = r.u8()?;
        let status_flags = r.u16_le()?;
        let capability_flags_upper = u32::from(r.u16_le()?);
        let capability_flags = capability_flags_lower | (capability_flags_upper << 16);

        let auth_plugin_data_len = r.u8()?;
        r.skip(10)?;

        let mut auth_plugin_data_part2 = Vec::new();
        if capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            let len = std::cmp::max(13, (auth_plugin_data_len as usize).saturating_sub(8));
            let data = r.take(len.min(r.remaining()))?;
            let data_len = data.iter().position(|&b| b == 0).unwrap_or(data.len());
            auth_plugin_data_part2.extend_from_slice(&data[..data_len]);
        }

        let auth_plugin_name = if capability_flags & CLIENT_PLUGIN_AUTH != 0 && !r.is_empty() {
            String::from_utf8_lossy(r.null_terminated_or_rest()).to_string()
        } else {
            MYSQL_NATIVE_PASSWORD.to_string()
        };

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            auth_plugin_data_part1,
            capability_flags,
            character_set,
            status_flags,
            auth_plugin_data_part2,
            auth_plugin_name,
        })
    }
}

/// Size of an SSLRequest packet: the fixed prefix of a handshake response
pub const SSL_REQUEST_LEN: usize = 32;

/// Whether a handshake-response payload is an SSLRequest
pub fn is_ssl_request(payload: &[u8]) -> bool {
    if payload.len() != SSL_REQUEST_LEN {
        return false;
    }
    let caps = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    caps & CLIENT_SSL != 0
}

/// MySQL handshake response packet (client -> server)
#[derive(Debug, Clone, Default)]
pub struct HandshakeResponse {
    pub capability_flags: u32,
    pub max_packet_size: u32,
    pub character_set: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
    pub auth_plugin_name: String,
}

impl HandshakeResponse {
    /// Parse a protocol-41 handshake response
    pub fn parse(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(payload);

        let capability_flags = r.u32_le()?;
        let max_packet_size = r.u32_le()?;
        let character_set = r.u8()?;
        r.skip(23)?;

        let username = String::from_utf8_lossy(r.null_terminated_or_rest()).to_string();

        let auth_response = if r.is_empty() {
            Vec::new()
        } else if capability_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            r.lenenc_bytes()?.to_vec()
        } else if capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            let len = r.u8()? as usize;
            r.take(len)?.to_vec()
        } else {
            r.null_terminated_or_rest().to_vec()
        };

        let database = if capability_flags & CLIENT_CONNECT_WITH_DB != 0 && !r.is_empty() {
            let db = String::from_utf8_lossy(r.null_terminated_or_rest()).to_string();
            if db.is_empty() {
                None
            } else {
                Some(db)
            }
        } else {
            None
        };

        let auth_plugin_name = if capability_flags & CLIENT_PLUGIN_AUTH != 0 && !r.is_empty() {
            String::from_utf8_lossy(r.null_terminated_or_rest()).to_string()
        } else {
            MYSQL_NATIVE_PASSWORD.to_string()
        };

        Ok(Self {
            capability_flags,
            max_packet_size,
            character_set,
            username,
            auth_response,
            database,
            auth_plugin_name,
        })
    }

    /// Encode the response payload (client side; used by tests and tooling)
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        buf.put_u32_le(self.capability_flags);
        buf.put_u32_le(self.max_packet_size);
        buf.put_u8(self.character_set);
        buf.extend_from_slice(&[0u8; 23]);
        buf.put_null_terminated(self.username.as_bytes());

        if self.capability_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            buf.put_lenenc_bytes(&self.auth_response);
        } else if self.capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            buf.put_u8(self.auth_response.len() as u8);
            buf.extend_from_slice(&self.auth_response);
        } else {
            buf.put_null_terminated(&self.auth_response);
        }

        if self.capability_flags & CLIENT_CONNECT_WITH_DB != 0 {
            buf.put_null_terminated(self.database.as_deref().unwrap_or("").as_bytes());
        }

        if self.capability_flags & CLIENT_PLUGIN_AUTH != 0 {
            buf.put_null_terminated(self.auth_plugin_name.as_bytes());
        }

        buf.freeze()
    }

    /// Encode only the fixed prefix, which is what an SSLRequest carries
    pub fn encode_ssl_request(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SSL_REQUEST_LEN);
        buf.put_u32_le(self.capability_flags | CLIENT_SSL);
        buf.put_u32_le(self.max_packet_size);
        buf.put_u8(self.character_set);
        buf.extend_from_slice(&[0u8; 23]);
        buf.freeze()
    }
}

/// Auth-method switch request (server -> client)
#[derive(Debug, Clone)]
pub struct AuthSwitchRequest {
    pub plugin_name: String,
    pub plugin_data: Vec<u8>,
}

impl AuthSwitchRequest {
    pub fn new(plugin_name: &str, salt: &[u8]) -> Self {
        Self {
            plugin_name: plugin_name.to_string(),
            plugin_data: salt.to_vec(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(AUTH_SWITCH_HEADER);
        buf.put_null_terminated(self.plugin_name.as_bytes());
        buf.put_null_terminated(&self.plugin_data);
        buf.freeze()
    }

    pub fn parse(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(payload);
        let header = r.u8()?;
        if header != AUTH_SWITCH_HEADER {
            return Err(WireError::InvalidLengthMarker(header));
        }
        let plugin_name = String::from_utf8_lossy(r.null_terminated()?).to_string();
        let plugin_data = r.null_terminated_or_rest().to_vec();
        Ok(Self {
            plugin_name,
            plugin_data,
        })
    }
}

/// caching_sha2_password "fast auth failed, send the full password"
pub fn encode_fast_auth_fail() -> Bytes {
    Bytes::from_static(&[AUTH_MORE_DATA_HEADER, PERFORM_FULL_AUTHENTICATION])
}

/// Decode a clear-text password answer (NUL-terminated over TLS)
pub fn parse_password_answer(payload: &[u8]) -> Option<String> {
    let raw = match payload.iter().position(|&b| b == 0) {
        Some(end) => &payload[..end],
        None => payload,
    };
    String::from_utf8(raw.to_vec()).ok()
}

/// Compute mysql_native_password auth response
///
/// `SHA1(password) XOR SHA1(salt + SHA1(SHA1(password)))`; an empty
/// password scrambles to an empty response.
pub fn scramble_password(password: &str, salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let hash1 = Sha1::digest(password.as_bytes());
    let hash2 = Sha1::digest(hash1);

    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(hash2);
    let hash3 = hasher.finalize();

    hash1
        .iter()
        .zip(hash3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &[u8; SALT_LEN] = b"abcdefghij0123456789";

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn test_greeting_roundtrip() {
        let greeting = InitialHandshake::new(
            42,
            SALT,
            "5.7.1-MindsDB-1.0",
            DEFAULT_CAPABILITIES,
            MYSQL_NATIVE_PASSWORD,
        );
        let payload = greeting.encode();
        let parsed = InitialHandshake::parse(&payload).unwrap();

        assert_eq!(parsed.protocol_version, 10);
        assert_eq!(parsed.server_version, "5.7.1-MindsDB-1.0");
        assert_eq!(parsed.connection_id, 42);
        assert_eq!(parsed.capability_flags, DEFAULT_CAPABILITIES);
        assert_eq!(parsed.auth_plugin_data(), SALT.to_vec());
        assert_eq!(parsed.auth_plugin_name, MYSQL_NATIVE_PASSWORD);
    }

    #[test]
    fn test_handshake_response_roundtrip() {
        let response = HandshakeResponse {
            capability_flags: DEFAULT_CAPABILITIES,
            max_packet_size: 1 << 24,
            character_set: 33,
            username: "mindsdb_mariadb".to_string(),
            auth_response: scramble_password("secret", SALT),
            database: Some("mindsdb".to_string()),
            auth_plugin_name: MYSQL_NATIVE_PASSWORD.to_string(),
        };
        let parsed = HandshakeResponse::parse(&response.encode()).unwrap();
        assert_eq!(parsed.username, "mindsdb_mariadb");
        assert_eq!(parsed.auth_response, response.auth_response);
        assert_eq!(parsed.database.as_deref(), Some("mindsdb"));
        assert_eq!(parsed.auth_plugin_name, MYSQL_NATIVE_PASSWORD);
    }

    #[test]
    fn test_handshake_response_truncated() {
        assert!(HandshakeResponse::parse(&[0x0f, 0xa2]).is_err());
    }

    #[test]
    fn test_ssl_request_detection() {
        let response = HandshakeResponse {
            capability_flags: DEFAULT_CAPABILITIES,
            max_packet_size: 1 << 24,
            character_set: 33,
            ..Default::default()
        };
        let ssl = response.encode_ssl_request();
        assert_eq!(ssl.len(), SSL_REQUEST_LEN);
        assert!(is_ssl_request(&ssl));
        assert!(!is_ssl_request(&response.encode()));
    }

    #[test]
    fn test_auth_switch_roundtrip() {
        let payload = AuthSwitchRequest::new(MYSQL_NATIVE_PASSWORD, SALT).encode();
        assert_eq!(payload[0], 0xFE);
        let parsed = AuthSwitchRequest::parse(&payload).unwrap();
        assert_eq!(parsed.plugin_name, MYSQL_NATIVE_PASSWORD);
        assert_eq!(parsed.plugin_data, SALT.to_vec());
    }

    #[test]
    fn test_password_answer() {
        assert_eq!(parse_password_answer(b"secret\0").as_deref(), Some("secret"));
        assert_eq!(parse_password_answer(b"secret").as_deref(), Some("secret"));
        assert_eq!(parse_password_answer(&[0xff, 0xfe, 0]), None);
    }

    #[test]
    fn test_scramble_known_vector() {
        // Scramble of "password" against a fixed 20-byte salt, computed
        // independently with SHA1(pw) ^ SHA1(salt + SHA1(SHA1(pw)))
        let salt = [
            0x3b, 0x55, 0x78, 0x7d, 0x2c, 0x5f, 0x7c, 0x72, 0x49, 0x52, 0x3f, 0x28, 0x47, 0x6f,
            0x77, 0x28, 0x5f, 0x5d, 0x4f, 0x29,
        ];
        let expected_stage2 = Sha1::digest(Sha1::digest(b"password"));
        // stored hash of mysql.user for "password"
        assert_eq!(
            hex(&expected_stage2),
            "2470c0c06dee42fd1618bb99005adca2ec9d1e19"
        );

        let scrambled = scramble_password("password", &salt);
        assert_eq!(scrambled.len(), 20);

        // Server-side check: SHA1(scramble XOR SHA1(salt + stage2)) == stage2
        let mut hasher = Sha1::new();
        hasher.update(salt);
        hasher.update(expected_stage2);
        let mask = hasher.finalize();
        let stage1: Vec<u8> = scrambled.iter().zip(mask.iter()).map(|(a, b)| a ^ b).collect();
        assert_eq!(Sha1::digest(&stage1), expected_stage2);
    }

    #[test]
    fn test_scramble_deterministic_and_sensitive() {
        let a = scramble_password("secret", SALT);
        assert_eq!(a, scramble_password("secret", SALT));
        assert_ne!(a, scramble_password("secret2", SALT));
        assert_ne!(a, scramble_password("secret", b"abcdefghij012345678X"));
        assert!(scramble_password("", SALT).is_empty());
    }
}
