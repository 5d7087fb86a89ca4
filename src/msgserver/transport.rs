// Newline-framed transport, encrypted once the handshake has installed a cipher

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::crypto::SessionCipher;
use crate::error::{ProtocolError, TransportError};

pub type BoxedReader = Box<dyn AsyncBufRead + Unpin + Send>;
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Document(Value),
    Malformed(ProtocolError),
}

/// Reading half of a connection
pub struct FrameReader {
    inner: BoxedReader,
    cipher: Option<SessionCipher>,
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new(inner: impl AsyncBufRead + Unpin + Send + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            cipher: None,
            buf: Vec::new(),
        }
    }

    /// Switch to encrypted frames. Called once, after the handshake.
    pub fn install_cipher(&mut self, cipher: SessionCipher) {
        debug_assert!(self.cipher.is_none(), "cipher installed twice");
        self.cipher = Some(cipher);
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Read one line as bytes with the terminator stripped. `None` on EOF.
    async fn read_line_bytes(&mut self) -> Result<Option<&[u8]>, TransportError> {
        self.buf.clear();
        if self.inner.read_until(b'\n', &mut self.buf).await? == 0 {
            return Ok(None);
        }
        let end = self
            .buf
            .iter()
            .rposition(|b| !matches!(b, b'\r' | b'\n'))
            .map_or(0, |i| i + 1);
        Ok(Some(&self.buf[..end]))
    }

    /// Read one line with the terminator stripped. `None` on EOF.
    ///
    /// A line that is not UTF-8 is an error here; only the handshake reads
    /// raw lines, and a bad handshake line ends the connection anyway.
    pub async fn read_raw_line(&mut self) -> Result<Option<String>, TransportError> {
        let Some(bytes) = self.read_line_bytes().await? else {
            return Ok(None);
        };
        let line = std::str::from_utf8(bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Some(line.to_string()))
    }

    /// Next frame as text, decrypted if a cipher is installed.
    ///
    /// Blank lines are skipped. A frame that is not UTF-8 or fails to decrypt
    /// is logged and dropped, and reading continues with the next line.
    pub async fn read_text(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            let Some(bytes) = self.read_line_bytes().await? else {
                return Ok(None);
            };
            let line = match std::str::from_utf8(bytes) {
                Ok(line) => line.to_string(),
                Err(_) => {
                    tracing::warn!("Dropping frame: line is not UTF-8");
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let Some(cipher) = &self.cipher else {
                return Ok(Some(line));
            };

            match cipher.decrypt_line(&line) {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => tracing::warn!("Dropping frame: decrypted payload is not UTF-8"),
                },
                Err(e) => tracing::warn!("Dropping frame: {}", e),
            }
        }
    }

    /// Next frame parsed as a JSON document
    pub async fn read_document(&mut self) -> Result<Option<Inbound>, TransportError> {
        let Some(text) = self.read_text().await? else {
            return Ok(None);
        };

        let inbound = match serde_json::from_str::<Value>(&text) {
            Ok(value) => Inbound::Document(value),
            Err(e) => Inbound::Malformed(ProtocolError::MalformedFrame(e.to_string())),
        };
        Ok(Some(inbound))
    }
}

/// Writing half of a connection
pub struct FrameWriter {
    inner: BoxedWriter,
    cipher: Option<SessionCipher>,
}

impl FrameWriter {
    pub fn new(inner: impl AsyncWrite + Unpin + Send + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            cipher: None,
        }
    }

    pub fn install_cipher(&mut self, cipher: SessionCipher) {
        debug_assert!(self.cipher.is_none(), "cipher installed twice");
        self.cipher = Some(cipher);
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Write one line verbatim and wait for it to flush
    pub async fn write_raw_line(&mut self, line: &str) -> Result<(), TransportError> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Encrypt (when a cipher is installed) and send one text frame
    pub async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        let line = match &self.cipher {
            Some(cipher) => cipher.encrypt_line(text.as_bytes())?,
            None => text.to_string(),
        };
        self.write_raw_line(&line).await
    }

    /// Serialize, encrypt and send one document
    pub async fn send<T: Serialize + ?Sized>(&mut self, document: &T) -> Result<(), TransportError> {
        let text = serde_json::to_string(document)?;
        self.send_text(&text).await
    }

    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Cloneable handle to a connection's writer.
///
/// Replies and server pushes to the same peer go through this handle, so
/// their frames never interleave.
#[derive(Clone)]
pub struct SessionSender {
    writer: Arc<Mutex<FrameWriter>>,
}

impl SessionSender {
    pub fn new(writer: FrameWriter) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub async fn send<T: Serialize + ?Sized>(&self, document: &T) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.send(document).await
    }

    /// Send one pre-serialized frame
    pub async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.send_text(text).await
    }

    pub async fn write_raw_line(&self, line: &str) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.write_raw_line(line).await
    }

    pub async fn install_cipher(&self, cipher: SessionCipher) {
        let mut writer = self.writer.lock().await;
        writer.install_cipher(cipher);
    }

    pub async fn shutdown(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await
    }

    /// True if both handles write to the same connection
    pub fn same_connection(&self, other: &SessionSender) -> bool {
        Arc::ptr_eq(&self.writer, &other.writer)
    }
}
