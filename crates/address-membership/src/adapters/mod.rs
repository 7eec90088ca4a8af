//! Adapters Layer
//!
//! Implementations of the outbound ports:
//! - Address normalizers (EVM, Bitcoin)
//! - Sealed secure channel for persisted filters
//! - Change notifiers (file watcher, manual trigger)

pub mod bitcoin;
pub mod evm;
pub mod file_watcher;
pub mod manual_notifier;
pub mod sealed_channel;

pub use bitcoin::{BitcoinNetwork, BitcoinNormalizer};
pub use evm::EvmNormalizer;
pub use file_watcher::FileWatcherNotifier;
pub use manual_notifier::{ManualNotifier, ReloadTrigger};
pub use sealed_channel::{
    generate_identity, parse_signing_key, parse_verifying_key, read_signing_key, read_verifying_key,
    SealedChannel, SealedChannelBuilder,
};
