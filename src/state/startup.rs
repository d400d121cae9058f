//! Connection startup and authentication state machine.

use crate::error::{Error, Result};
use crate::opts::{Opts, SslMode};
use crate::protocol::backend::error::log_notice_response;
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, ErrorResponse, ParameterStatus, RawMessage,
    ReadyForQuery, msg_type,
};
use crate::protocol::frontend::auth::{SCRAM_SHA_256, ScramClient, md5_password, password};
use crate::protocol::frontend::startup::{ssl_request, startup_with_application_name};
use crate::protocol::message::Message;
use crate::protocol::types::TransactionStatus;

use super::action::Action;

/// Connection state during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupState {
    Initial,
    WaitingSslResponse,
    SslHandshake,
    WaitingAuth,
    SaslInProgress,
    WaitingAuthResult,
    WaitingReady,
    Ready,
    Failed,
}

/// Backend identity received during startup, used for cancel requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKey {
    pub process_id: u32,
    pub secret: u32,
}

/// Connection startup state machine.
///
/// Drives SSL negotiation, the startup packet, authentication (cleartext, MD5,
/// SCRAM-SHA-256) and the parameter exchange up to the first `ReadyForQuery`.
pub struct StartupStateMachine {
    state: StartupState,
    options: Opts,
    backend_key: Option<BackendKey>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    scram_client: Option<ScramClient>,
}

impl StartupStateMachine {
    pub fn new(options: Opts) -> Self {
        Self {
            state: StartupState::Initial,
            options,
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            scram_client: None,
        }
    }

    pub fn state(&self) -> StartupState {
        self.state
    }

    /// Backend key data (for cancellation).
    pub fn backend_key(&self) -> Option<BackendKey> {
        self.backend_key
    }

    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Start the connection process.
    pub fn start(&mut self) -> Result<Action> {
        let try_ssl = match self.options.ssl_mode {
            SslMode::Disable => false,
            SslMode::Prefer => cfg!(feature = "tls"),
            SslMode::Require if cfg!(feature = "tls") => true,
            SslMode::Require => {
                self.state = StartupState::Failed;
                return Err(Error::Unsupported(
                    "sslmode=require but the tls feature is not enabled".into(),
                ));
            }
        };

        if try_ssl {
            self.state = StartupState::WaitingSslResponse;
            Ok(Action::WriteAndReadByte(ssl_request()?))
        } else {
            self.send_startup()
        }
    }

    /// Process the SSL response byte ('S' or 'N').
    pub fn process_ssl_response(&mut self, response: u8) -> Result<Action> {
        if self.state != StartupState::WaitingSslResponse {
            return Err(self.unexpected("SSL response"));
        }

        match response {
            b'S' => {
                self.state = StartupState::SslHandshake;
                Ok(Action::TlsHandshake)
            }
            b'N' => {
                if self.options.ssl_mode == SslMode::Require {
                    self.state = StartupState::Failed;
                    return Err(Error::Auth(
                        "SSL required but not supported by server".into(),
                    ));
                }
                tracing::debug!("server declined SSL, continuing unencrypted");
                self.send_startup()
            }
            _ => {
                self.state = StartupState::Failed;
                Err(Error::Protocol(format!(
                    "Unexpected SSL response: {}",
                    response.escape_ascii()
                )))
            }
        }
    }

    /// Called after the TLS handshake completes.
    pub fn tls_handshake_complete(&mut self) -> Result<Action> {
        if self.state != StartupState::SslHandshake {
            return Err(self.unexpected("TLS handshake"));
        }
        self.send_startup()
    }

    /// Process one complete server message.
    pub fn step(&mut self, msg: RawMessage<'_>) -> Result<Action> {
        match msg.type_byte {
            msg_type::ERROR_RESPONSE => {
                self.state = StartupState::Failed;
                return Err(ErrorResponse::parse(msg.payload)?.into_error());
            }
            msg_type::NOTICE_RESPONSE => {
                log_notice_response(msg.payload);
                return Ok(Action::ReadMessage);
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(msg.payload)?;
                self.set_param(param.name, param.value);
                return Ok(Action::ReadMessage);
            }
            msg_type::NEGOTIATE_PROTOCOL_VERSION => {
                tracing::debug!("server negotiated a lower protocol minor version");
                return Ok(Action::ReadMessage);
            }
            _ => {}
        }

        let result = match self.state {
            StartupState::WaitingAuth => self.handle_auth_request(msg),
            StartupState::SaslInProgress => self.handle_sasl_message(msg),
            StartupState::WaitingAuthResult => self.handle_auth_result(msg),
            StartupState::WaitingReady => self.handle_ready_message(msg),
            _ => Err(self.unexpected("message")),
        };
        if result.is_err() {
            self.state = StartupState::Failed;
        }
        result
    }

    fn send_startup(&mut self) -> Result<Action> {
        let msg = startup_with_application_name(
            &self.options.user,
            self.options.database_or_user(),
            self.options.application_name_or_default(),
            self.options.replication,
        )?;
        self.state = StartupState::WaitingAuth;
        Ok(Action::WriteAndReadMessage(msg))
    }

    fn unexpected(&self, what: &str) -> Error {
        Error::Protocol(format!("Unexpected {} in state {:?}", what, self.state))
    }

    fn set_param(&mut self, name: &str, value: &str) {
        match self.server_params.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self
                .server_params
                .push((name.to_string(), value.to_string())),
        }
    }

    fn password(&self) -> Result<&str> {
        self.options
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("Password required but not provided".into()))
    }

    fn expect_authentication<'a>(&self, msg: RawMessage<'a>) -> Result<AuthenticationMessage<'a>> {
        if msg.type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "Expected Authentication message, got '{}'",
                msg.type_byte.escape_ascii()
            )));
        }
        AuthenticationMessage::parse(msg.payload)
    }

    fn handle_auth_request(&mut self, msg: RawMessage<'_>) -> Result<Action> {
        match self.expect_authentication(msg)? {
            AuthenticationMessage::Ok => {
                self.state = StartupState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            AuthenticationMessage::CleartextPassword => {
                let response = password(self.password()?)?;
                self.state = StartupState::WaitingAuthResult;
                Ok(Action::WriteAndReadMessage(response))
            }
            AuthenticationMessage::Md5Password { salt } => {
                let hashed = md5_password(&self.options.user, self.password()?, &salt);
                self.state = StartupState::WaitingAuthResult;
                Ok(Action::WriteAndReadMessage(password(&hashed)?))
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                if !mechanisms.contains(&SCRAM_SHA_256) {
                    return Err(Error::Auth(format!(
                        "No supported SASL mechanism. Server offers: {:?}",
                        mechanisms
                    )));
                }
                let scram = ScramClient::new(self.password()?);
                let response = scram.initial_response()?;
                self.scram_client = Some(scram);
                self.state = StartupState::SaslInProgress;
                Ok(Action::WriteAndReadMessage(response))
            }
            AuthenticationMessage::Unsupported { code } => Err(Error::Unsupported(format!(
                "Unsupported authentication method: {}",
                code
            ))),
            other => Err(Error::Protocol(format!(
                "Unexpected authentication message: {:?}",
                other
            ))),
        }
    }

    fn handle_sasl_message(&mut self, msg: RawMessage<'_>) -> Result<Action> {
        let auth = self.expect_authentication(msg)?;
        let scram = self
            .scram_client
            .as_mut()
            .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?;

        match auth {
            AuthenticationMessage::SaslContinue { data } => {
                let server_first = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("Invalid server-first-message: {}", e)))?;
                let response: Message = scram.final_response(server_first)?;
                Ok(Action::WriteAndReadMessage(response))
            }
            AuthenticationMessage::SaslFinal { data } => {
                let server_final = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("Invalid server-final-message: {}", e)))?;
                scram.verify_server_final(server_final)?;
                self.state = StartupState::WaitingAuthResult;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Protocol(format!(
                "Unexpected SASL message: {:?}",
                other
            ))),
        }
    }

    fn handle_auth_result(&mut self, msg: RawMessage<'_>) -> Result<Action> {
        match self.expect_authentication(msg)? {
            AuthenticationMessage::Ok => {
                self.scram_client = None;
                self.state = StartupState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Auth(format!("Unexpected auth result: {:?}", other))),
        }
    }

    fn handle_ready_message(&mut self, msg: RawMessage<'_>) -> Result<Action> {
        match msg.type_byte {
            msg_type::BACKEND_KEY_DATA => {
                let key = BackendKeyData::parse(msg.payload)?;
                self.backend_key = Some(BackendKey {
                    process_id: key.process_id(),
                    secret: key.secret(),
                });
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(msg.payload)?;
                self.transaction_status = ready.transaction_status().unwrap_or_default();
                self.state = StartupState::Ready;
                Ok(Action::Finished)
            }
            other => Err(Error::Protocol(format!(
                "Unexpected message during startup: '{}'",
                other.escape_ascii()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::backend::split_frame;
    use crate::protocol::backend::outbound;

    fn frame(kind: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![kind];
        out.extend_from_slice(&(payload.len() as i32 + 4).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn step(sm: &mut StartupStateMachine, bytes: &[u8]) -> Result<Action> {
        let (msg, rest) = split_frame(bytes).unwrap().unwrap();
        assert!(rest.is_empty());
        sm.step(msg)
    }

    fn opts(password: Option<&str>) -> Opts {
        Opts {
            user: "pgvictoria".into(),
            password: password.map(str::to_string),
            ssl_mode: SslMode::Disable,
            ..Opts::default()
        }
    }

    fn finish_startup(sm: &mut StartupStateMachine) {
        assert!(matches!(
            step(sm, &frame(b'S', b"server_version\x0017.2\0")).unwrap(),
            Action::ReadMessage
        ));
        assert!(matches!(
            step(sm, &frame(b'K', &[0, 0, 0x30, 0x39, 0xde, 0xad, 0xbe, 0xef])).unwrap(),
            Action::ReadMessage
        ));
        assert!(matches!(step(sm, &frame(b'Z', b"I")).unwrap(), Action::Finished));
        assert_eq!(sm.state(), StartupState::Ready);
        assert_eq!(
            sm.backend_key(),
            Some(BackendKey {
                process_id: 12345,
                secret: 0xdead_beef
            })
        );
        assert_eq!(
            sm.server_params(),
            [("server_version".to_string(), "17.2".to_string())]
        );
    }

    #[test]
    fn trust_authentication() {
        let mut sm = StartupStateMachine::new(opts(None));
        let Action::WriteAndReadMessage(startup) = sm.start().unwrap() else {
            panic!("expected startup packet");
        };
        assert_eq!(startup.request_code().unwrap(), 196608);

        assert!(matches!(
            step(&mut sm, outbound::auth_success().unwrap().data()).unwrap(),
            Action::ReadMessage
        ));
        finish_startup(&mut sm);
    }

    #[test]
    fn md5_authentication() {
        let mut sm = StartupStateMachine::new(opts(Some("secret")));
        sm.start().unwrap();

        let salt = [1, 2, 3, 4];
        let mut payload = 5_i32.to_be_bytes().to_vec();
        payload.extend_from_slice(&salt);
        let Action::WriteAndReadMessage(reply) = step(&mut sm, &frame(b'R', &payload)).unwrap()
        else {
            panic!("expected password message");
        };
        let expected = password(&md5_password("pgvictoria", "secret", &salt)).unwrap();
        assert_eq!(reply, expected);

        step(&mut sm, outbound::auth_success().unwrap().data()).unwrap();
        finish_startup(&mut sm);
    }

    #[test]
    fn scram_authentication() {
        use base64::Engine as _;
        use base64::engine::general_purpose::STANDARD as BASE64;
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let mut sm = StartupStateMachine::new(opts(Some("pencil")));
        sm.start().unwrap();

        let Action::WriteAndReadMessage(initial) =
            step(&mut sm, outbound::auth_sasl().unwrap().data()).unwrap()
        else {
            panic!("expected SASLInitialResponse");
        };
        assert_eq!(sm.state(), StartupState::SaslInProgress);
        let initial = initial.data();
        let client_nonce = std::str::from_utf8(&initial[initial.len() - 32..]).unwrap();

        let salt = b"0123456789abcdef";
        let server_nonce = "3rfcNHYJY1ZVvWVs7j";
        let server_first =
            outbound::sasl_continue(client_nonce, server_nonce, &BASE64.encode(salt)).unwrap();
        let Action::WriteAndReadMessage(client_final) = step(&mut sm, server_first.data()).unwrap()
        else {
            panic!("expected SASLResponse");
        };
        let client_final = std::str::from_utf8(client_final.payload()).unwrap();
        assert!(client_final.contains(",p="));

        // Compute the server signature the way a server would
        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(b"pencil", salt, 4096, &mut salted);
        let mut mac = Hmac::<Sha256>::new_from_slice(&salted).unwrap();
        mac.update(b"Server Key");
        let server_key = mac.finalize().into_bytes();
        let (without_proof, _) = client_final.split_once(",p=").unwrap();
        let auth_message = format!(
            "n=,r={},r={}{},s={},i=4096,{}",
            client_nonce,
            client_nonce,
            server_nonce,
            BASE64.encode(salt),
            without_proof
        );
        let mut mac = Hmac::<Sha256>::new_from_slice(&server_key).unwrap();
        mac.update(auth_message.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        let server_final = outbound::sasl_final(&signature).unwrap();
        assert!(matches!(
            step(&mut sm, server_final.data()).unwrap(),
            Action::ReadMessage
        ));
        step(&mut sm, outbound::auth_success().unwrap().data()).unwrap();
        finish_startup(&mut sm);
    }

    #[test]
    fn bad_server_signature_fails() {
        let mut sm = StartupStateMachine::new(opts(Some("pencil")));
        sm.start().unwrap();
        let Action::WriteAndReadMessage(initial) =
            step(&mut sm, outbound::auth_sasl().unwrap().data()).unwrap()
        else {
            panic!("expected SASLInitialResponse");
        };
        let initial = initial.data();
        let client_nonce = std::str::from_utf8(&initial[initial.len() - 32..]).unwrap();
        let server_first = outbound::sasl_continue(client_nonce, "xyz", "c2FsdA==").unwrap();
        step(&mut sm, server_first.data()).unwrap();

        let server_final =
            outbound::sasl_final("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=").unwrap();
        assert!(matches!(step(&mut sm, server_final.data()), Err(Error::Auth(_))));
        assert_eq!(sm.state(), StartupState::Failed);
    }

    #[test]
    fn missing_password() {
        let mut sm = StartupStateMachine::new(opts(None));
        sm.start().unwrap();
        let payload = 3_i32.to_be_bytes();
        assert!(matches!(step(&mut sm, &frame(b'R', &payload)), Err(Error::Auth(_))));
    }

    #[test]
    fn server_error_during_startup() {
        let mut sm = StartupStateMachine::new(opts(None));
        sm.start().unwrap();
        let err = step(&mut sm, outbound::connection_refused().unwrap().data()).unwrap_err();
        assert_eq!(err.sqlstate(), Some("53300"));
        assert_eq!(err.server_message(), Some("connection refused"));
        assert_eq!(sm.state(), StartupState::Failed);
    }

    #[test]
    fn unsupported_method() {
        let mut sm = StartupStateMachine::new(opts(Some("x")));
        sm.start().unwrap();
        let payload = 7_i32.to_be_bytes();
        assert!(matches!(
            step(&mut sm, &frame(b'R', &payload)),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn ssl_negotiation() {
        let mut o = opts(None);
        o.ssl_mode = SslMode::Prefer;
        let mut sm = StartupStateMachine::new(o);

        if cfg!(feature = "tls") {
            let Action::WriteAndReadByte(request) = sm.start().unwrap() else {
                panic!("expected SSL request");
            };
            assert_eq!(request.request_code().unwrap(), 80877103);
            assert!(matches!(
                sm.process_ssl_response(b'N').unwrap(),
                Action::WriteAndReadMessage(_)
            ));
            assert_eq!(sm.state(), StartupState::WaitingAuth);
        } else {
            assert!(matches!(sm.start().unwrap(), Action::WriteAndReadMessage(_)));
        }
    }

    #[test]
    fn ssl_required() {
        let mut o = opts(None);
        o.ssl_mode = SslMode::Require;
        let mut sm = StartupStateMachine::new(o);

        if cfg!(feature = "tls") {
            sm.start().unwrap();
            assert!(matches!(sm.process_ssl_response(b'N'), Err(Error::Auth(_))));
        } else {
            assert!(matches!(sm.start(), Err(Error::Unsupported(_))));
        }
    }

    #[test]
    fn message_before_start_is_rejected() {
        let mut sm = StartupStateMachine::new(opts(None));
        assert!(matches!(
            step(&mut sm, outbound::auth_success().unwrap().data()),
            Err(Error::Protocol(_))
        ));
    }
}
