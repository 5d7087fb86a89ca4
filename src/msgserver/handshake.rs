// Key exchange run once per connection before any encrypted frame
//
// Line 1 (server -> client): base64 of the server's PEM public key.
// Line 2 (client -> server): base64 of the RSA-OAEP encrypted session key.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::crypto::{
    decrypt_asymmetric, encrypt_asymmetric, public_key_from_pem, ServerKeypair, SessionCipher,
    SessionKey,
};
use crate::error::HandshakeError;
use crate::msgserver::transport::{FrameReader, SessionSender};

/// Handshake progress. `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    /// Server has sent its public key
    KeySent,
    /// Client is waiting for the server's public key
    AwaitKey,
    KeyExchanged,
    Ready,
    Failed,
}

fn decode_line(line: &str) -> Result<Vec<u8>, HandshakeError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(HandshakeError::Malformed("empty line".to_string()));
    }
    STANDARD
        .decode(line)
        .map_err(|e| HandshakeError::Malformed(format!("invalid base64: {}", e)))
}

/// Server side of the exchange
pub struct ServerHandshake<'a> {
    keys: &'a ServerKeypair,
    state: HandshakeState,
}

impl<'a> ServerHandshake<'a> {
    pub fn new(keys: &'a ServerKeypair) -> Self {
        Self {
            keys,
            state: HandshakeState::Init,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    fn fail<T>(&mut self, err: HandshakeError) -> Result<T, HandshakeError> {
        self.state = HandshakeState::Failed;
        Err(err)
    }

    /// Produce line 1
    pub fn offer(&mut self) -> Result<String, HandshakeError> {
        if self.state != HandshakeState::Init {
            let state = self.state;
            return self.fail(HandshakeError::WrongState(state));
        }

        match self.keys.public_key_pem() {
            Ok(pem) => {
                self.state = HandshakeState::KeySent;
                Ok(STANDARD.encode(pem))
            }
            Err(e) => self.fail(e.into()),
        }
    }

    /// Consume line 2 and build the session cipher
    pub fn accept_key(&mut self, line: &str) -> Result<SessionCipher, HandshakeError> {
        if self.state != HandshakeState::KeySent {
            let state = self.state;
            return self.fail(HandshakeError::WrongState(state));
        }

        let encrypted = match decode_line(line) {
            Ok(bytes) => bytes,
            Err(e) => return self.fail(e),
        };
        let key = match decrypt_asymmetric(self.keys.private_key(), &encrypted)
            .and_then(|raw| SessionKey::from_bytes(&raw))
        {
            Ok(key) => key,
            Err(e) => return self.fail(e.into()),
        };
        self.state = HandshakeState::KeyExchanged;

        let cipher = SessionCipher::new(&key);
        self.state = HandshakeState::Ready;
        Ok(cipher)
    }
}

/// Client side of the exchange
pub struct ClientHandshake {
    state: HandshakeState,
    key: Option<SessionKey>,
}

impl Default for ClientHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientHandshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Init,
            key: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    fn fail<T>(&mut self, err: HandshakeError) -> Result<T, HandshakeError> {
        self.state = HandshakeState::Failed;
        self.key = None;
        Err(err)
    }

    /// Connection is open, start waiting for line 1
    pub fn await_key(&mut self) -> Result<(), HandshakeError> {
        if self.state != HandshakeState::Init {
            let state = self.state;
            return self.fail(HandshakeError::WrongState(state));
        }
        self.state = HandshakeState::AwaitKey;
        Ok(())
    }

    /// Consume line 1, produce line 2
    pub fn receive_offer(&mut self, line: &str) -> Result<String, HandshakeError> {
        if self.state != HandshakeState::AwaitKey {
            let state = self.state;
            return self.fail(HandshakeError::WrongState(state));
        }

        let pem_bytes = match decode_line(line) {
            Ok(bytes) => bytes,
            Err(e) => return self.fail(e),
        };
        let pem = match String::from_utf8(pem_bytes) {
            Ok(pem) => pem,
            Err(_) => {
                return self.fail(HandshakeError::Malformed(
                    "public key is not UTF-8".to_string(),
                ))
            }
        };
        let server_key = match public_key_from_pem(&pem) {
            Ok(key) => key,
            Err(e) => return self.fail(e.into()),
        };

        let session_key = SessionKey::generate();
        let encrypted = match encrypt_asymmetric(&server_key, session_key.as_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => return self.fail(e.into()),
        };

        self.key = Some(session_key);
        self.state = HandshakeState::KeyExchanged;
        Ok(STANDARD.encode(encrypted))
    }

    /// Build the cipher once line 2 has been sent
    pub fn finish(&mut self) -> Result<SessionCipher, HandshakeError> {
        match (self.state, self.key.take()) {
            (HandshakeState::KeyExchanged, Some(key)) => {
                self.state = HandshakeState::Ready;
                Ok(SessionCipher::new(&key))
            }
            (state, _) => self.fail(HandshakeError::WrongState(state)),
        }
    }
}

/// Run the server side over a fresh connection and switch both halves to
/// encrypted frames.
pub async fn server_handshake(
    reader: &mut FrameReader,
    sender: &SessionSender,
    keys: &ServerKeypair,
) -> Result<(), HandshakeError> {
    let mut handshake = ServerHandshake::new(keys);

    let offer = handshake.offer()?;
    sender.write_raw_line(&offer).await?;

    let line = reader.read_raw_line().await?.ok_or(HandshakeError::Closed)?;
    let cipher = handshake.accept_key(&line)?;

    reader.install_cipher(cipher.clone());
    sender.install_cipher(cipher).await;
    Ok(())
}

/// Run the client side over a fresh connection and switch both halves to
/// encrypted frames.
pub async fn client_handshake(
    reader: &mut FrameReader,
    sender: &SessionSender,
) -> Result<(), HandshakeError> {
    let mut handshake = ClientHandshake::new();
    handshake.await_key()?;

    let line = reader.read_raw_line().await?.ok_or(HandshakeError::Closed)?;
    let reply = handshake.receive_offer(&line)?;
    sender.write_raw_line(&reply).await?;

    let cipher = handshake.finish()?;
    reader.install_cipher(cipher.clone());
    sender.install_cipher(cipher).await;
    Ok(())
}
