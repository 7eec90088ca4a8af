//! Sealed secure channel
//!
//! Encrypts to one peer and signs with one identity, both Ed25519 keys.
//!
//! ## Envelope layout
//!
//! ```text
//! header : "AMSC" | version u8 | ephemeral public key [32] | nonce prefix [16] | key check [16]
//! frame  : kind u8 | length u32 BE | XChaCha20-Poly1305 ciphertext [length]
//! ```
//!
//! The payload key comes from X25519 between a fresh ephemeral key and the
//! recipient (Ed25519 keys are mapped onto Curve25519). The key check is
//! an empty sealed message, so a reader holding the wrong key fails when
//! the reader is opened. Data frames carry at most `CHUNK_SIZE` bytes of
//! plaintext; the last frame carries an Ed25519 signature over the
//! SHA-256 of the whole plaintext. Nonces bind the frame counter and kind,
//! so reordered, dropped or relabelled frames fail authentication.

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use crypto_box::aead::Aead;
use crypto_box::ChaChaBox;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::SecureChannelError;
use crate::ports::{SealingWriter, SecureChannel, VerifyingReader};

const MAGIC: [u8; 4] = *b"AMSC";
const VERSION: u8 = 1;

const KIND_KEY_CHECK: u8 = 0;
const KIND_DATA: u8 = 1;
const KIND_SIGNATURE: u8 = 2;

/// Plaintext bytes per data frame
pub const CHUNK_SIZE: usize = 64 * 1024;
const TAG_LEN: usize = 16;
const MAX_FRAME_LEN: usize = CHUNK_SIZE + TAG_LEN;
const NONCE_PREFIX_LEN: usize = 16;
const FRAME_HEADER_LEN: usize = 5;

const SIGNATURE_DOMAIN: &[u8] = b"address-membership/sealed-channel/v1";

/// Derive the payload cipher from an Ed25519 secret and an Ed25519 public key
fn shared_cipher(private: &SigningKey, public: &VerifyingKey) -> ChaChaBox {
    let secret = crypto_box::SecretKey::from(private.to_scalar());
    let public = crypto_box::PublicKey::from(public.to_montgomery());
    ChaChaBox::new(&public, &secret)
}

fn frame_nonce(prefix: &[u8; NONCE_PREFIX_LEN], counter: u32, kind: u8) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    nonce[..NONCE_PREFIX_LEN].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_LEN..NONCE_PREFIX_LEN + 4].copy_from_slice(&counter.to_be_bytes());
    nonce[NONCE_PREFIX_LEN + 4] = kind;
    nonce
}

fn signed_message(ephemeral_public: &[u8; 32], digest: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(SIGNATURE_DOMAIN.len() + 32 + digest.len());
    message.extend_from_slice(SIGNATURE_DOMAIN);
    message.extend_from_slice(ephemeral_public);
    message.extend_from_slice(digest);
    message
}

/// Generate a new random identity
pub fn generate_identity() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

fn decode_hex_key(text: &str) -> Result<[u8; 32], SecureChannelError> {
    let mut key = [0u8; 32];
    hex::decode_to_slice(text.trim(), &mut key)
        .map_err(|e| SecureChannelError::InvalidKey(e.to_string()))?;
    Ok(key)
}

/// Parse a private key seed written as 64 hex characters
pub fn parse_signing_key(text: &str) -> Result<SigningKey, SecureChannelError> {
    decode_hex_key(text).map(|seed| SigningKey::from_bytes(&seed))
}

/// Parse a public key written as 64 hex characters
pub fn parse_verifying_key(text: &str) -> Result<VerifyingKey, SecureChannelError> {
    let bytes = decode_hex_key(text)?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| SecureChannelError::InvalidKey(e.to_string()))
}

fn read_key_file<T>(
    path: &Path,
    parse: impl FnOnce(&str) -> Result<T, SecureChannelError>,
) -> Result<T, SecureChannelError> {
    let key_file_error = |reason: String| SecureChannelError::KeyFile {
        path: path.to_path_buf(),
        reason,
    };
    let text = fs::read_to_string(path).map_err(|e| key_file_error(e.to_string()))?;
    parse(&text).map_err(|e| key_file_error(e.to_string()))
}

/// Load a private key file
pub fn read_signing_key(path: impl AsRef<Path>) -> Result<SigningKey, SecureChannelError> {
    read_key_file(path.as_ref(), parse_signing_key)
}

/// Load a public key file
pub fn read_verifying_key(path: impl AsRef<Path>) -> Result<VerifyingKey, SecureChannelError> {
    read_key_file(path.as_ref(), parse_verifying_key)
}

/// Secure channel between one identity and one peer
///
/// Writers encrypt to the peer and sign with the identity; readers
/// decrypt with the identity and require the peer's signature.
#[derive(Clone)]
pub struct SealedChannel {
    identity: SigningKey,
    peer: VerifyingKey,
}

impl fmt::Debug for SealedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedChannel")
            .field("identity", &hex::encode(self.identity.verifying_key().as_bytes()))
            .field("peer", &hex::encode(self.peer.as_bytes()))
            .finish()
    }
}

impl SealedChannel {
    pub fn new(identity: SigningKey, peer: VerifyingKey) -> Self {
        Self { identity, peer }
    }

    pub fn builder() -> SealedChannelBuilder {
        SealedChannelBuilder::default()
    }

    /// Public half of this channel's identity
    pub fn public_key(&self) -> VerifyingKey {
        self.identity.verifying_key()
    }
}

/// Builder that can load keys from files
#[derive(Default)]
pub struct SealedChannelBuilder {
    identity: Option<SigningKey>,
    peer: Option<VerifyingKey>,
}

impl SealedChannelBuilder {
    pub fn private_key(mut self, key: SigningKey) -> Self {
        self.identity = Some(key);
        self
    }

    pub fn private_key_path(mut self, path: impl AsRef<Path>) -> Result<Self, SecureChannelError> {
        self.identity = Some(read_signing_key(path)?);
        Ok(self)
    }

    pub fn peer_public_key(mut self, key: VerifyingKey) -> Self {
        self.peer = Some(key);
        self
    }

    pub fn peer_public_key_path(
        mut self,
        path: impl AsRef<Path>,
    ) -> Result<Self, SecureChannelError> {
        self.peer = Some(read_verifying_key(path)?);
        Ok(self)
    }

    pub fn build(self) -> Result<SealedChannel, SecureChannelError> {
        let identity = self
            .identity
            .ok_or(SecureChannelError::MissingKey("private key"))?;
        let peer = self
            .peer
            .ok_or(SecureChannelError::MissingKey("peer public key"))?;
        Ok(SealedChannel::new(identity, peer))
    }
}

impl SecureChannel for SealedChannel {
    fn open_writer<'a>(
        &self,
        mut sink: Box<dyn Write + 'a>,
    ) -> Result<Box<dyn SealingWriter + 'a>, SecureChannelError> {
        let ephemeral = SigningKey::generate(&mut OsRng);
        let ephemeral_public = ephemeral.verifying_key().to_bytes();
        let cipher = shared_cipher(&ephemeral, &self.peer);

        let mut nonce_prefix = [0u8; NONCE_PREFIX_LEN];
        OsRng.fill_bytes(&mut nonce_prefix);

        let key_check = cipher
            .encrypt(&frame_nonce(&nonce_prefix, 0, KIND_KEY_CHECK).into(), &b""[..])
            .map_err(|_| SecureChannelError::Sealing("failed to seal key check".to_string()))?;

        sink.write_all(&MAGIC)?;
        sink.write_all(&[VERSION])?;
        sink.write_all(&ephemeral_public)?;
        sink.write_all(&nonce_prefix)?;
        sink.write_all(&key_check)?;

        Ok(Box::new(SealWriter {
            sink,
            cipher,
            nonce_prefix,
            ephemeral_public,
            identity: self.identity.clone(),
            counter: 0,
            buffer: Vec::with_capacity(CHUNK_SIZE),
            digest: Sha256::new(),
        }))
    }

    fn open_reader<'a>(
        &self,
        mut source: Box<dyn Read + 'a>,
    ) -> Result<Box<dyn VerifyingReader + 'a>, SecureChannelError> {
        let mut header = [0u8; 4 + 1 + 32 + NONCE_PREFIX_LEN + TAG_LEN];
        source.read_exact(&mut header).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                SecureChannelError::MalformedEnvelope("header truncated".to_string())
            }
            _ => SecureChannelError::from(e),
        })?;

        if header[..4] != MAGIC {
            return Err(SecureChannelError::MalformedEnvelope(
                "not a sealed envelope".to_string(),
            ));
        }
        if header[4] != VERSION {
            return Err(SecureChannelError::UnsupportedVersion(header[4]));
        }

        let mut ephemeral_public = [0u8; 32];
        ephemeral_public.copy_from_slice(&header[5..37]);
        let mut nonce_prefix = [0u8; NONCE_PREFIX_LEN];
        nonce_prefix.copy_from_slice(&header[37..37 + NONCE_PREFIX_LEN]);
        let key_check = &header[37 + NONCE_PREFIX_LEN..];

        let ephemeral = VerifyingKey::from_bytes(&ephemeral_public)
            .map_err(|e| SecureChannelError::MalformedEnvelope(e.to_string()))?;
        if ephemeral.is_weak() {
            return Err(SecureChannelError::MalformedEnvelope(
                "weak ephemeral key".to_string(),
            ));
        }

        let cipher = shared_cipher(&self.identity, &ephemeral);
        cipher
            .decrypt(&frame_nonce(&nonce_prefix, 0, KIND_KEY_CHECK).into(), key_check)
            .map_err(|_| SecureChannelError::NotRecipient)?;

        Ok(Box::new(OpenReader {
            source,
            cipher,
            nonce_prefix,
            ephemeral_public,
            sender: self.peer,
            counter: 0,
            plaintext: Vec::new(),
            position: 0,
            digest: Sha256::new(),
            state: ReadState::Streaming,
        }))
    }
}

struct SealWriter<'a> {
    sink: Box<dyn Write + 'a>,
    cipher: ChaChaBox,
    nonce_prefix: [u8; NONCE_PREFIX_LEN],
    ephemeral_public: [u8; 32],
    identity: SigningKey,
    counter: u32,
    buffer: Vec<u8>,
    digest: Sha256,
}

impl SealWriter<'_> {
    fn write_frame(&mut self, kind: u8, plaintext: &[u8]) -> Result<(), SecureChannelError> {
        let nonce = frame_nonce(&self.nonce_prefix, self.counter, kind);
        let ciphertext = self
            .cipher
            .encrypt(&nonce.into(), plaintext)
            .map_err(|_| SecureChannelError::Sealing("frame encryption failed".to_string()))?;

        let mut header = [0u8; FRAME_HEADER_LEN];
        header[0] = kind;
        header[1..].copy_from_slice(&(ciphertext.len() as u32).to_be_bytes());
        self.sink.write_all(&header)?;
        self.sink.write_all(&ciphertext)?;

        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| SecureChannelError::Sealing("frame counter exhausted".to_string()))?;
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<(), SecureChannelError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::take(&mut self.buffer);
        self.digest.update(&chunk);
        self.write_frame(KIND_DATA, &chunk)?;
        self.buffer = chunk;
        self.buffer.clear();
        Ok(())
    }
}

impl Write for SealWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = CHUNK_SIZE - self.buffer.len();
        let n = room.min(buf.len());
        self.buffer.extend_from_slice(&buf[..n]);
        if self.buffer.len() == CHUNK_SIZE {
            self.flush_buffer()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer()?;
        self.sink.flush()
    }
}

impl SealingWriter for SealWriter<'_> {
    fn finish(self: Box<Self>) -> Result<(), SecureChannelError> {
        let mut this = *self;
        this.flush_buffer()?;

        let digest = std::mem::take(&mut this.digest).finalize();
        let signature = this
            .identity
            .sign(&signed_message(&this.ephemeral_public, &digest));
        this.write_frame(KIND_SIGNATURE, &signature.to_bytes())?;
        this.sink.flush()?;
        Ok(())
    }
}

enum ReadState {
    Streaming,
    Verified,
    Failed(SecureChannelError),
}

struct OpenReader<'a> {
    source: Box<dyn Read + 'a>,
    cipher: ChaChaBox,
    nonce_prefix: [u8; NONCE_PREFIX_LEN],
    ephemeral_public: [u8; 32],
    sender: VerifyingKey,
    counter: u32,
    plaintext: Vec<u8>,
    position: usize,
    digest: Sha256,
    state: ReadState,
}

impl OpenReader<'_> {
    fn open_frame(&mut self, kind: u8, ciphertext: &[u8]) -> Result<Vec<u8>, SecureChannelError> {
        let nonce = frame_nonce(&self.nonce_prefix, self.counter, kind);
        let plaintext = self
            .cipher
            .decrypt(&nonce.into(), ciphertext)
            .map_err(|_| SecureChannelError::Tampered)?;
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| SecureChannelError::MalformedEnvelope("too many frames".to_string()))?;
        Ok(plaintext)
    }

    /// Read and authenticate the next frame
    fn next_frame(&mut self) -> Result<(), SecureChannelError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        self.source.read_exact(&mut header)?;

        let kind = header[0];
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if !(TAG_LEN..=MAX_FRAME_LEN).contains(&len) {
            return Err(SecureChannelError::MalformedEnvelope(format!(
                "frame length {} out of range",
                len
            )));
        }

        let mut ciphertext = vec![0u8; len];
        self.source.read_exact(&mut ciphertext)?;

        match kind {
            KIND_DATA => {
                let plaintext = self.open_frame(kind, &ciphertext)?;
                self.digest.update(&plaintext);
                self.plaintext = plaintext;
                self.position = 0;
                Ok(())
            }
            KIND_SIGNATURE => {
                let bytes = self.open_frame(kind, &ciphertext)?;
                let signature = Signature::from_slice(&bytes)
                    .map_err(|e| SecureChannelError::MalformedEnvelope(e.to_string()))?;
                let digest = std::mem::take(&mut self.digest).finalize();
                self.sender
                    .verify_strict(&signed_message(&self.ephemeral_public, &digest), &signature)
                    .map_err(|_| SecureChannelError::SignatureMismatch)?;
                self.expect_end()?;
                self.state = ReadState::Verified;
                Ok(())
            }
            other => Err(SecureChannelError::MalformedEnvelope(format!(
                "unknown frame kind {}",
                other
            ))),
        }
    }

    fn expect_end(&mut self) -> Result<(), SecureChannelError> {
        let mut probe = [0u8; 1];
        loop {
            match self.source.read(&mut probe) {
                Ok(0) => return Ok(()),
                Ok(_) => return Err(SecureChannelError::TrailingData),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Read for OpenReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.position < self.plaintext.len() {
                let available = &self.plaintext[self.position..];
                let n = available.len().min(buf.len());
                buf[..n].copy_from_slice(&available[..n]);
                self.position += n;
                return Ok(n);
            }

            match &self.state {
                ReadState::Verified => return Ok(0),
                ReadState::Failed(err) => return Err(err.clone().into()),
                ReadState::Streaming => {
                    if let Err(err) = self.next_frame() {
                        self.state = ReadState::Failed(err.clone());
                        return Err(err.into());
                    }
                }
            }
        }
    }
}

impl VerifyingReader for OpenReader<'_> {
    fn verify_signature(&mut self) -> Result<(), SecureChannelError> {
        if matches!(self.state, ReadState::Streaming) {
            self.position = self.plaintext.len();
            io::copy(self, &mut io::sink())?;
        }
        match &self.state {
            ReadState::Verified => Ok(()),
            ReadState::Failed(err) => Err(err.clone()),
            ReadState::Streaming => Err(SecureChannelError::Truncated),
        }
    }
}
