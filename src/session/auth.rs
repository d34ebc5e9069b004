//! Connection handshake: greeting, optional TLS upgrade, auth-method
//! reconciliation and credential check.

use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{AuthConfig, AuthMethod};
use crate::context::ServerContext;
use crate::metrics::metrics;
use crate::protocol::constants::auth_plugin::{CACHING_SHA2_PASSWORD, MYSQL_NATIVE_PASSWORD};
use crate::protocol::error_code::ER_PASSWORD_NO_MATCH;
use crate::protocol::handshake::{encode_fast_auth_fail, is_ssl_request, parse_password_answer, SALT_LEN};
use crate::protocol::{
    capabilities, scramble_password, AuthSwitchRequest, ErrPacket, HandshakeResponse, InitialHandshake,
    OkPacket,
};

use super::io::PacketStream;
use super::{SessionError, SessionState};

/// How the handshake ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    /// Empty handshake response; answered with OK, no session follows
    Abandoned,
}

/// What the client proved it knows
#[derive(Debug, Clone, PartialEq, Eq)]
enum Credential {
    /// mysql_native_password scramble over the connection salt
    Scrambled(Vec<u8>),
    /// Clear-text password, only accepted over TLS
    Plain(String),
}

/// 20 printable random bytes; clients NUL-terminate the salt, so it must
/// not contain zeros
fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    for (slot, byte) in salt.iter_mut().zip(rand::thread_rng().sample_iter(&Alphanumeric)) {
        *slot = byte;
    }
    salt
}

/// Split `{user}_{integration}` when the suffix names an enabled integration
fn split_integration(ctx: &ServerContext, username: &str) -> (String, Option<String>) {
    let prefix = format!("{}_", ctx.config.auth.user);
    match username.strip_prefix(&prefix) {
        Some(integration) if ctx.config.has_integration(integration) => {
            (ctx.config.auth.user.clone(), Some(integration.to_string()))
        }
        _ => (username.to_string(), None),
    }
}

fn verify(auth: &AuthConfig, salt: &[u8], username: &str, credential: &Credential) -> bool {
    if username != auth.user {
        return false;
    }
    match credential {
        Credential::Scrambled(response) => *response == scramble_password(&auth.password, salt),
        Credential::Plain(password) => *password == auth.password,
    }
}

/// Drives one connection's handshake
pub struct AuthNegotiator<'a> {
    ctx: &'a ServerContext,
    salt: [u8; SALT_LEN],
    server_capabilities: u32,
}

impl<'a> AuthNegotiator<'a> {
    pub fn new(ctx: &'a ServerContext) -> Self {
        let mut server_capabilities = capabilities::DEFAULT_CAPABILITIES;
        if ctx.tls_enabled() {
            server_capabilities |= capabilities::CLIENT_SSL;
        }
        Self {
            ctx,
            salt: generate_salt(),
            server_capabilities,
        }
    }

    /// Run the handshake. On `Authenticated` the session state holds the
    /// negotiated user, database, integration and capabilities.
    pub async fn negotiate(
        &self,
        mut stream: PacketStream,
        state: &mut SessionState,
    ) -> Result<(PacketStream, AuthOutcome), SessionError> {
        let config = &self.ctx.config;
        let default_plugin = config.auth.default_method.plugin_name();

        let greeting = InitialHandshake::new(
            state.connection_id,
            &self.salt,
            &config.server.greeting_version,
            self.server_capabilities,
            default_plugin,
        );
        stream.write(greeting.encode()).await?;
        debug!(connection_id = state.connection_id, plugin = default_plugin, "Greeting sent");

        let mut payload = stream.read().await?.ok_or(SessionError::ClientDisconnected)?;
        if payload.is_empty() {
            info!(connection_id = state.connection_id, "Empty handshake response, closing");
            stream.write(OkPacket::new().encode(0)).await?;
            return Ok((stream, AuthOutcome::Abandoned));
        }

        if is_ssl_request(&payload) {
            let Some(acceptor) = self.ctx.tls.as_ref() else {
                return Err(SessionError::Tls("client requested SSL but TLS is not configured".into()));
            };
            stream = stream.upgrade_tls(acceptor).await?;
            state.tls_active = true;
            info!(connection_id = state.connection_id, "Connection upgraded to TLS");
            payload = stream.read().await?.ok_or(SessionError::ClientDisconnected)?;
        }

        let response =
            HandshakeResponse::parse(&payload).map_err(|e| SessionError::Protocol(e.to_string()))?;
        let capabilities = response.capability_flags & self.server_capabilities;
        let (username, integration) = split_integration(self.ctx, &response.username);

        debug!(
            connection_id = state.connection_id,
            username = %response.username,
            database = ?response.database,
            client_plugin = %response.auth_plugin_name,
            "Received handshake response"
        );

        let credential = match self
            .reconcile(&mut stream, &response, state.tls_active, default_plugin)
            .await?
        {
            Ok(credential) => credential,
            Err(message) => return Err(self.reject(&mut stream, capabilities, message).await),
        };

        if !verify(&config.auth, &self.salt, &username, &credential) {
            let message = format!("Access denied for user '{}'", response.username);
            return Err(self.reject(&mut stream, capabilities, message).await);
        }

        state.set_from_handshake(username, response.database, capabilities, response.character_set);
        state.integration = integration;
        stream.write(OkPacket::new().encode(capabilities)).await?;

        info!(
            connection_id = state.connection_id,
            username = %state.username,
            integration = ?state.integration,
            tls = state.tls_active,
            "Client authenticated"
        );
        Ok((stream, AuthOutcome::Authenticated))
    }

    /// Bring the client onto a method the server can check. The inner
    /// error is a message for the client.
    async fn reconcile(
        &self,
        stream: &mut PacketStream,
        response: &HandshakeResponse,
        tls_active: bool,
        default_plugin: &str,
    ) -> Result<Result<Credential, String>, SessionError> {
        let client_plugin = response.auth_plugin_name.as_str();
        let password_empty = self.ctx.config.auth.password.is_empty();

        if client_plugin != default_plugin {
            if client_plugin == MYSQL_NATIVE_PASSWORD && password_empty && response.auth_response.is_empty() {
                debug!("Empty native password, switching method to confirm");
                let answer = self.switch_method(stream, MYSQL_NATIVE_PASSWORD).await?;
                return Ok(Ok(Credential::Scrambled(answer.to_vec())));
            }
            if client_plugin == CACHING_SHA2_PASSWORD {
                if !tls_active {
                    return Ok(Err("caching_sha2_password without SSL not supported".to_string()));
                }
                self.switch_method(stream, CACHING_SHA2_PASSWORD).await?;
                return self.full_authentication(stream).await;
            }
            debug!(client_plugin, "Switching client to mysql_native_password");
            let answer = self.switch_method(stream, MYSQL_NATIVE_PASSWORD).await?;
            return Ok(Ok(Credential::Scrambled(answer.to_vec())));
        }

        if password_empty {
            return Ok(Ok(Credential::Scrambled(response.auth_response.clone())));
        }
        match self.ctx.config.auth.default_method {
            AuthMethod::CachingSha2Password => {
                if !tls_active {
                    return Ok(Err("caching_sha2_password without SSL not supported".to_string()));
                }
                self.full_authentication(stream).await
            }
            AuthMethod::MysqlNativePassword => Ok(Ok(Credential::Scrambled(response.auth_response.clone()))),
        }
    }

    async fn switch_method(&self, stream: &mut PacketStream, plugin: &str) -> Result<Bytes, SessionError> {
        stream
            .write(AuthSwitchRequest::new(plugin, &self.salt).encode())
            .await?;
        stream.read().await?.ok_or(SessionError::ClientDisconnected)
    }

    /// caching_sha2_password "fast auth failed": ask for the clear-text password
    async fn full_authentication(&self, stream: &mut PacketStream) -> Result<Result<Credential, String>, SessionError> {
        stream.write(encode_fast_auth_fail()).await?;
        let answer = stream.read().await?.ok_or(SessionError::ClientDisconnected)?;
        Ok(parse_password_answer(&answer)
            .map(Credential::Plain)
            .ok_or_else(|| "malformed password answer".to_string()))
    }

    /// Send ERR and build the error that ends the connection
    async fn reject(&self, stream: &mut PacketStream, capabilities: u32, message: String) -> SessionError {
        warn!(reason = %message, "Authentication failed");
        metrics().auth_failures_total.inc();
        let err = ErrPacket::new(ER_PASSWORD_NO_MATCH, message.as_str());
        if let Err(e) = stream.write(err.encode(capabilities | capabilities::CLIENT_PROTOCOL_41)).await {
            return e;
        }
        SessionError::Auth(message)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::{Config, IntegrationConfig};

    fn context(password: &str) -> ServerContext {
        let mut config = Config::default();
        config.auth.password = password.to_string();
        config
            .integrations
            .insert("default_mariadb".into(), IntegrationConfig::default());
        let backend = Arc::new(MemoryBackend::new(vec!["default_mariadb".into()]));
        ServerContext::new(config, backend.clone(), backend)
    }

    #[test]
    fn test_salt_has_no_zero_bytes() {
        let salt = generate_salt();
        assert!(salt.iter().all(|b| b.is_ascii_alphanumeric()));
        assert_ne!(salt, generate_salt());
    }

    #[test]
    fn test_split_integration() {
        let ctx = context("");
        assert_eq!(
            split_integration(&ctx, "mindsdb_default_mariadb"),
            ("mindsdb".to_string(), Some("default_mariadb".to_string()))
        );
        assert_eq!(
            split_integration(&ctx, "mindsdb_unknown"),
            ("mindsdb_unknown".to_string(), None)
        );
        assert_eq!(split_integration(&ctx, "mindsdb"), ("mindsdb".to_string(), None));
    }

    #[test]
    fn test_verify() {
        let ctx = context("secret");
        let salt = generate_salt();
        let good = Credential::Scrambled(scramble_password("secret", &salt));
        let bad = Credential::Scrambled(scramble_password("wrong", &salt));

        assert!(verify(&ctx.config.auth, &salt, "mindsdb", &good));
        assert!(!verify(&ctx.config.auth, &salt, "mindsdb", &bad));
        assert!(!verify(&ctx.config.auth, &salt, "root", &good));
        assert!(verify(&ctx.config.auth, &salt, "mindsdb", &Credential::Plain("secret".into())));
        assert!(!verify(&ctx.config.auth, &salt, "mindsdb", &Credential::Scrambled(Vec::new())));
    }

    #[test]
    fn test_empty_password_accepts_empty_response() {
        let ctx = context("");
        let salt = generate_salt();
        assert!(verify(&ctx.config.auth, &salt, "mindsdb", &Credential::Scrambled(Vec::new())));
    }
}
