//! Asymmetric and symmetric primitives used by the connection handshake.
//!
//! The server owns one long-lived RSA keypair. Each connection negotiates a
//! fresh 32-byte session key which drives an XChaCha20-Poly1305 cipher for
//! every frame after the handshake.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::CryptoError;

pub const DEFAULT_RSA_BITS: usize = 2048;
pub const SESSION_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;

// SHA-256 output length, used by the OAEP capacity bound
const OAEP_HASH_LEN: usize = 32;

/// Long-lived server keypair.
#[derive(Clone)]
pub struct ServerKeypair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl ServerKeypair {
    /// Generate a new keypair with the given modulus size
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// SubjectPublicKeyInfo PEM of the public half
    pub fn public_key_pem(&self) -> Result<String, CryptoError> {
        public_key_to_pem(&self.public)
    }

    pub fn bits(&self) -> usize {
        self.public.size() * 8
    }
}

pub fn public_key_to_pem(key: &RsaPublicKey) -> Result<String, CryptoError> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Largest plaintext RSA-OAEP/SHA-256 can carry under this key.
pub fn oaep_capacity(key: &RsaPublicKey) -> usize {
    key.size().saturating_sub(2 * OAEP_HASH_LEN + 2)
}

/// RSA-OAEP encryption, SHA-256 for both digest and MGF1.
pub fn encrypt_asymmetric(key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let capacity = oaep_capacity(key);
    if plaintext.len() > capacity {
        return Err(CryptoError::Encryption(format!(
            "plaintext is {} bytes, key capacity is {} bytes",
            plaintext.len(),
            capacity
        )));
    }

    key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

pub fn decrypt_asymmetric(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    key.decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

/// Per-connection symmetric key
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    pub fn generate() -> Self {
        let mut key = [0u8; SESSION_KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; SESSION_KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "session key must be {} bytes, got {}",
                SESSION_KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Authenticated symmetric cipher installed once the handshake completes.
#[derive(Clone)]
pub struct SessionCipher {
    cipher: XChaCha20Poly1305,
}

impl SessionCipher {
    pub fn new(key: &SessionKey) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new((&key.0).into()),
        }
    }

    // Returns nonce || ciphertext
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::Encryption("AEAD encryption failed".to_string()))?;

        let mut output = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_LEN {
            return Err(CryptoError::InvalidCiphertext);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::InvalidCiphertext)
    }

    /// Encrypt and base64-encode so the result fits on one line
    pub fn encrypt_line(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        Ok(STANDARD.encode(self.encrypt(plaintext)?))
    }

    pub fn decrypt_line(&self, line: &str) -> Result<Vec<u8>, CryptoError> {
        let raw = STANDARD
            .decode(line.trim())
            .map_err(|_| CryptoError::InvalidCiphertext)?;
        self.decrypt(&raw)
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionCipher(XChaCha20Poly1305)")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::OnceLock;

    /// Keys are expensive to generate, share them across tests
    pub(crate) fn test_keypair() -> &'static ServerKeypair {
        static KEYS: OnceLock<ServerKeypair> = OnceLock::new();
        KEYS.get_or_init(|| ServerKeypair::generate(DEFAULT_RSA_BITS).unwrap())
    }

    fn other_keypair() -> &'static ServerKeypair {
        static KEYS: OnceLock<ServerKeypair> = OnceLock::new();
        KEYS.get_or_init(|| ServerKeypair::generate(DEFAULT_RSA_BITS).unwrap())
    }

    #[test]
    fn test_rsa_key_size() {
        let keys = test_keypair();
        assert_eq!(keys.bits(), 2048);
        assert_eq!(oaep_capacity(keys.public_key()), 190);
    }

    #[test]
    fn test_rsa_roundtrip() {
        let keys = test_keypair();
        let message = b"Secret Message 123";

        let encrypted = encrypt_asymmetric(keys.public_key(), message).unwrap();
        assert_ne!(encrypted.as_slice(), message);

        let decrypted = decrypt_asymmetric(keys.private_key(), &encrypted).unwrap();
        assert_eq!(decrypted, message);
    }

    #[test]
    fn test_rsa_max_payload() {
        let keys = test_keypair();
        let message = vec![7u8; 190];

        let encrypted = encrypt_asymmetric(keys.public_key(), &message).unwrap();
        assert_eq!(decrypt_asymmetric(keys.private_key(), &encrypted).unwrap(), message);
    }

    #[test]
    fn test_rsa_wrong_private_key_fails() {
        let encrypted = encrypt_asymmetric(test_keypair().public_key(), b"hello").unwrap();

        let result = decrypt_asymmetric(other_keypair().private_key(), &encrypted);
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_rsa_too_long_message_fails() {
        let message = vec![b'a'; 1000];
        let result = encrypt_asymmetric(test_keypair().public_key(), &message);
        assert!(matches!(result, Err(CryptoError::Encryption(_))));

        let message = vec![b'a'; 191];
        assert!(encrypt_asymmetric(test_keypair().public_key(), &message).is_err());
    }

    #[test]
    fn test_rsa_corrupted_ciphertext_fails() {
        let keys = test_keypair();
        let mut encrypted = encrypt_asymmetric(keys.public_key(), b"hello").unwrap();
        encrypted[10] ^= 0xFF;

        assert!(decrypt_asymmetric(keys.private_key(), &encrypted).is_err());
    }

    #[test]
    fn test_public_key_pem_roundtrip() {
        let keys = test_keypair();
        let pem = keys.public_key_pem().unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));

        let parsed = public_key_from_pem(&pem).unwrap();
        assert_eq!(&parsed, keys.public_key());
    }

    #[test]
    fn test_public_key_from_garbage_fails() {
        assert!(matches!(
            public_key_from_pem("not a key"),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_session_cipher_roundtrip() {
        let cipher = SessionCipher::new(&SessionKey::generate());
        let plaintext = b"Hello World";

        let encrypted = cipher.encrypt(plaintext).unwrap();
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn test_session_cipher_wrong_key_fails() {
        let cipher1 = SessionCipher::new(&SessionKey::generate());
        let cipher2 = SessionCipher::new(&SessionKey::generate());

        let encrypted = cipher1.encrypt(b"data").unwrap();
        assert!(matches!(
            cipher2.decrypt(&encrypted),
            Err(CryptoError::InvalidCiphertext)
        ));
    }

    #[test]
    fn test_session_cipher_tampered_fails() {
        let cipher = SessionCipher::new(&SessionKey::generate());

        let mut encrypted = cipher.encrypt(b"Important data").unwrap();
        let len = encrypted.len();
        encrypted[len - 1] ^= 0xFF;

        assert!(matches!(
            cipher.decrypt(&encrypted),
            Err(CryptoError::InvalidCiphertext)
        ));
        assert!(cipher.decrypt(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_line_encoding_has_no_newline() {
        let cipher = SessionCipher::new(&SessionKey::generate());
        let payload = vec![b'\n'; 300];

        let line = cipher.encrypt_line(&payload).unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(cipher.decrypt_line(&line).unwrap(), payload);
        assert!(cipher.decrypt_line("%%% not base64 %%%").is_err());
    }

    #[test]
    fn test_session_key_from_bytes() {
        let key = SessionKey::generate();
        let copy = SessionKey::from_bytes(key.as_bytes()).unwrap();
        assert!(copy == key);

        assert!(SessionKey::from_bytes(&[0u8; 16]).is_err());
    }
}
