//! Outbound Ports (Driven Ports)
//!
//! Capabilities the membership store depends on. Implementations are
//! chosen by the embedder and injected at construction time.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{AddressError, FilterError, NotifierError, SecureChannelError, StoreError};

/// Validates an address string and maps it to its canonical byte key
///
/// Every textual form of one address MUST map to the same bytes: the
/// filter only sees bytes, so a mismatch between insert and lookup is a
/// silent false negative.
pub trait AddressNormalizer: Send + Sync {
    /// Reject malformed input before any byte work
    fn validate(&self, address: &str) -> Result<(), AddressError>;

    /// Canonical byte key for an address
    fn to_canonical_bytes(&self, address: &str) -> Result<Vec<u8>, AddressError>;

    /// Validate, then canonicalize
    fn normalize(&self, address: &str) -> Result<Vec<u8>, AddressError> {
        self.validate(address)?;
        self.to_canonical_bytes(address)
    }
}

/// Encrypting sink returned by [`SecureChannel::open_writer`]
pub trait SealingWriter: Write {
    /// Flush buffered plaintext, append the signature and flush the sink
    ///
    /// Dropping the writer without finishing leaves an envelope that
    /// readers reject as truncated.
    fn finish(self: Box<Self>) -> Result<(), SecureChannelError>;
}

/// Decrypting source returned by [`SecureChannel::open_reader`]
///
/// `read` reports a verification failure at the point the underlying
/// stream ends. Callers whose decoder may stop before the end MUST call
/// `verify_signature` afterwards.
pub trait VerifyingReader: Read {
    /// Consume any unread bytes and report the signature outcome
    fn verify_signature(&mut self) -> Result<(), SecureChannelError>;
}

/// Authenticated encryption around a byte stream
pub trait SecureChannel: Send + Sync {
    fn open_writer<'a>(
        &self,
        sink: Box<dyn Write + 'a>,
    ) -> Result<Box<dyn SealingWriter + 'a>, SecureChannelError>;

    /// Fails here when the envelope is not addressed to this identity
    fn open_reader<'a>(
        &self,
        source: Box<dyn Read + 'a>,
    ) -> Result<Box<dyn VerifyingReader + 'a>, SecureChannelError>;
}

/// Point-in-time statistics of a filter
#[derive(Clone, Debug, PartialEq)]
pub struct FilterStats {
    pub size_bits: usize,
    pub hash_count: usize,
    pub elements_inserted: usize,
    pub estimated_fpr: f64,
}

/// Approximate membership filter the store is built on
///
/// The serialized form is opaque to the store.
pub trait MembershipFilter: Clone + Send + Sync + 'static {
    /// Filter sized for `capacity` keys at `false_positive_rate`
    fn with_estimates(capacity: usize, false_positive_rate: f64) -> Self;

    fn add(&mut self, key: &[u8]);

    /// `false` means definitely absent
    fn test(&self, key: &[u8]) -> bool;

    /// Write the native form, returning the number of bytes written
    fn serialize_to<W: Write>(&self, sink: W) -> Result<u64, FilterError>;

    /// Read exactly one native record; may stop before the end of `source`
    fn deserialize_from<R: Read>(source: R) -> Result<Self, FilterError>;

    fn stats(&self) -> FilterStats;
}

/// Callback a notifier invokes with the path that changed
pub type ReloadCallback = Arc<dyn Fn(&Path) -> Result<(), StoreError> + Send + Sync>;

/// Source of "the persisted filter changed" events
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Block until `cancel` fires or a fatal watch error occurs
    ///
    /// Bursts of changes are coalesced into one `on_reload` call. Errors
    /// returned by `on_reload` are logged and never end the watch.
    async fn watch_for_change(
        &self,
        cancel: CancellationToken,
        on_reload: ReloadCallback,
    ) -> Result<(), NotifierError>;

    /// Release watch resources
    async fn close(&self) -> Result<(), NotifierError>;
}
