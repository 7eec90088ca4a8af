//! Error types for the address membership store

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while validating or decoding an address
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid {format} address format: {reason}")]
    InvalidFormat {
        format: &'static str,
        reason: String,
    },

    #[error("failed to decode {format} address: {reason}")]
    Decode {
        format: &'static str,
        reason: String,
    },

    #[error("{format} address belongs to a different network: {found}")]
    WrongNetwork { format: &'static str, found: String },
}

/// Errors from filter configuration and the filter's native codec
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Invalid false positive rate: {fpr} (must be strictly between 0 and 1)")]
    InvalidFPR { fpr: f64 },

    #[error("Invalid capacity: {capacity} (must be greater than 0)")]
    InvalidCapacity { capacity: usize },

    #[error("Filter size exceeds maximum: {size} > {max}")]
    FilterTooLarge { size: usize, max: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not a membership filter (bad magic {found:02x?})")]
    BadMagic { found: [u8; 4] },

    #[error("Unsupported filter format version {0}")]
    UnsupportedVersion(u16),

    #[error("Corrupt filter: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error while encoding filter: {0}")]
    Io(#[source] io::Error),
}

/// Errors from the secure channel
///
/// Key errors (`InvalidKey`, `KeyFile`, `MissingKey`), sink and source
/// failures (`Io`) and local sealing failures (`Sealing`) say nothing about
/// the content; see [`is_untrusted_content`](Self::is_untrusted_content).
/// The type is `Clone` so a failure observed inside `Read::read` can be
/// replayed by `verify_signature`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecureChannelError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("failed to load key file {path}: {reason}")]
    KeyFile { path: PathBuf, reason: String },

    #[error("missing {0} for secure channel")]
    MissingKey(&'static str),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    #[error("envelope is not addressed to this key")]
    NotRecipient,

    #[error("ciphertext failed authentication")]
    Tampered,

    #[error("envelope ended before its signature")]
    Truncated,

    #[error("signature verification failed")]
    SignatureMismatch,

    #[error("unexpected data after envelope signature")]
    TrailingData,

    #[error("failed to seal filter data: {0}")]
    Sealing(String),

    #[error("secure channel I/O error: {message}")]
    Io { kind: io::ErrorKind, message: String },
}

impl SecureChannelError {
    /// True when the envelope itself was rejected
    pub fn is_untrusted_content(&self) -> bool {
        matches!(
            self,
            SecureChannelError::MalformedEnvelope(_)
                | SecureChannelError::UnsupportedVersion(_)
                | SecureChannelError::NotRecipient
                | SecureChannelError::Tampered
                | SecureChannelError::Truncated
                | SecureChannelError::SignatureMismatch
                | SecureChannelError::TrailingData
        )
    }
}

impl From<io::Error> for SecureChannelError {
    fn from(err: io::Error) -> Self {
        // Errors raised by our own reader travel through io::Error unchanged.
        if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<SecureChannelError>()) {
            return inner.clone();
        }
        match err.kind() {
            io::ErrorKind::UnexpectedEof => SecureChannelError::Truncated,
            kind => SecureChannelError::Io {
                kind,
                message: err.to_string(),
            },
        }
    }
}

impl From<SecureChannelError> for io::Error {
    fn from(err: SecureChannelError) -> Self {
        match err {
            // Sink failures keep their kind on the way through a writer
            SecureChannelError::Io { kind, message } => io::Error::new(kind, message),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Errors surfaced by the membership store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Secure channel rejected filter data: {0}")]
    SecureChannel(#[from] SecureChannelError),

    #[error("No file path specified for {0}")]
    EmptyPath(&'static str),

    #[error("Failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("Failed to create {path}: {source}")]
    Create { path: PathBuf, source: io::Error },

    #[error("Failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("Failed to read membership filter from {path}: {source}")]
    Decode { path: PathBuf, source: FilterError },
}

impl StoreError {
    /// True when the error means persisted content failed authentication
    /// or could not be decrypted for this identity.
    pub fn is_untrusted_content(&self) -> bool {
        matches!(self, StoreError::SecureChannel(e) if e.is_untrusted_content())
    }
}

/// Errors from a change notifier
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("Failed to create file watcher: {0}")]
    WatcherInit(String),

    #[error("Failed to watch {path}: {reason}")]
    Watch { path: PathBuf, reason: String },

    #[error("Watcher reported an error: {0}")]
    Backend(String),

    #[error("Notifier is already watching")]
    AlreadyWatching,

    #[error("Notifier has been closed")]
    Closed,

    #[error("Watch cancelled")]
    Cancelled,
}

/// Errors from the reload coordinator lifecycle
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("Reload coordinator cannot start from state {0:?}")]
    InvalidStart(crate::service::CoordinatorState),

    #[error("Reload coordinator is not running (state {0:?})")]
    NotRunning(crate::service::CoordinatorState),

    #[error("Watch task failed: {0}")]
    Watch(#[from] NotifierError),

    #[error("No tokio runtime available to run the watch task: {0}")]
    NoRuntime(String),

    #[error("Watch task panicked: {0}")]
    TaskPanicked(String),

    #[error("Failed to close notifier: {0}")]
    Close(NotifierError),
}
