//! # Address Membership
//!
//! Answers "has this address ever been added?" from a compact Bloom
//! filter, with encrypted and signed persistence and hot reload.
//!
//! ## Architecture
//!
//! This crate follows Hexagonal Architecture (Ports & Adapters):
//!
//! - **Domain Layer** (`domain/`): Pure logic, no file I/O
//!   - `BloomFilter`: Core probabilistic data structure and its native format
//!   - `StoreConfig` / `ReloadConfig`: Configuration with validation
//!   - `StoreConfigBuilder`: Fluent builder for configuration
//!
//! - **Ports Layer** (`ports/`): Trait definitions
//!   - `AddressMembership`: Driving port (inbound API)
//!   - `AddressNormalizer`, `SecureChannel`, `MembershipFilter`, `Notifier`:
//!     Driven ports injected at construction
//!
//! - **Service Layer** (`service/`): Orchestration
//!   - `MembershipStore`: Implements `AddressMembership`
//!   - `ReloadCoordinator`: Background watch task with start/stop lifecycle
//!
//! - **Adapters Layer** (`adapters/`):
//!   - `EvmNormalizer`, `BitcoinNormalizer`: Address formats
//!   - `SealedChannel`: Ed25519/X25519 sealed envelopes
//!   - `FileWatcherNotifier`, `ManualNotifier`: Change notification
//!
//! ## Invariants
//!
//! - No false negatives: an added address is reported present until the
//!   filter is replaced by one that does not contain it
//! - Reload is all-or-nothing: a failed load leaves the active filter as is
//! - A sealed file is only trusted after its signature has verified
//!
//! ## Usage Example
//!
//! ```ignore
//! use address_membership::{EvmNormalizer, MembershipStore};
//! use std::sync::Arc;
//!
//! let store = MembershipStore::builder(Arc::new(EvmNormalizer))
//!     .with_estimates(1_000, 0.0001)
//!     .build()?;
//!
//! store.add_address("0x1234567890abcdef1234567890abcdef12345678")?;
//! assert!(store.check_address("0X1234567890ABCDEF1234567890ABCDEF12345678")?);
//! store.save_to_file("filter.bin")?;
//! ```
//!
//! ## Hot Reload
//!
//! ```ignore
//! use address_membership::{FileWatcherNotifier, ReloadConfig, ReloadCoordinator};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = ReloadConfig::default();
//! let notifier = FileWatcherNotifier::new("filter.bin", config.reload_delay())?;
//! let coordinator = ReloadCoordinator::new(store.clone(), Arc::new(notifier));
//!
//! let shutdown = CancellationToken::new();
//! coordinator.start(&shutdown)?;
//! // ...
//! coordinator.stop().await?;
//! ```

pub mod adapters;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod service;

// Re-exports for convenience
pub use adapters::{
    BitcoinNetwork, BitcoinNormalizer, EvmNormalizer, FileWatcherNotifier, ManualNotifier,
    ReloadTrigger, SealedChannel, SealedChannelBuilder,
};
pub use domain::{BloomFilter, MembershipConfig, ReloadConfig, StoreConfig, StoreConfigBuilder};
pub use error::{
    AddressError, FilterError, NotifierError, ReloadError, SecureChannelError, StoreError,
};
pub use metrics::{StoreMetrics, StoreMetricsSnapshot};
pub use ports::{
    AddressMembership, AddressNormalizer, FilterStats, MembershipFilter, Notifier, SecureChannel,
};
pub use service::{CoordinatorState, MembershipStore, ReloadCoordinator, StoreBuilder};
