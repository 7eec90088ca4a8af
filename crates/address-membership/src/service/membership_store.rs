//! Membership Store
//!
//! Thread-safe address membership over an approximate filter with
//! all-or-nothing hot reload.
//!
//! ## Locking
//!
//! One `RwLock` guards the active filter. Lookups share it; adds and the
//! reload swap take it exclusively. Reload decodes (and verifies) into a
//! new filter with no lock held, so readers are only ever blocked for the
//! pointer swap, and they see either the old filter or the new one.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::domain::{BloomFilter, StoreConfig};
use crate::error::{FilterError, SecureChannelError, StoreError};
use crate::metrics::StoreMetrics;
use crate::ports::{
    AddressMembership, AddressNormalizer, FilterStats, MembershipFilter, SecureChannel,
};

/// Read one filter from `path`, verifying it when a channel is given
///
/// With a channel, the signature is checked even if the decoder stopped
/// before the end of the envelope, and a verification failure wins over
/// any decode error.
pub fn read_filter<F: MembershipFilter>(
    path: &Path,
    channel: Option<&dyn SecureChannel>,
) -> Result<F, StoreError> {
    if path.as_os_str().is_empty() {
        return Err(StoreError::EmptyPath("loading"));
    }

    let file = File::open(path).map_err(|source| StoreError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let source = BufReader::new(file);

    let decode_error = |source| StoreError::Decode {
        path: path.to_path_buf(),
        source,
    };

    match channel {
        Some(channel) => {
            let mut reader = channel.open_reader(Box::new(source))?;
            let decoded = F::deserialize_from(&mut reader);
            let verified = reader.verify_signature();
            match (decoded, verified) {
                (_, Err(e)) => Err(StoreError::SecureChannel(e)),
                (Err(e), Ok(())) => Err(decode_error(e)),
                (Ok(filter), Ok(())) => Ok(filter),
            }
        }
        None => F::deserialize_from(source).map_err(decode_error),
    }
}

/// Address membership store
///
/// Generic over the filter so that alternative filters can be plugged in;
/// [`BloomFilter`] is the default.
pub struct MembershipStore<F: MembershipFilter = BloomFilter> {
    filter: RwLock<F>,
    normalizer: Arc<dyn AddressNormalizer>,
    secure_channel: Option<Arc<dyn SecureChannel>>,
    metrics: StoreMetrics,
}

impl MembershipStore<BloomFilter> {
    /// Start building a Bloom-filter-backed store
    pub fn builder(normalizer: Arc<dyn AddressNormalizer>) -> StoreBuilder<BloomFilter> {
        StoreBuilder::new(normalizer)
    }
}

impl<F: MembershipFilter> MembershipStore<F> {
    fn from_parts(
        filter: F,
        normalizer: Arc<dyn AddressNormalizer>,
        secure_channel: Option<Arc<dyn SecureChannel>>,
    ) -> Self {
        Self {
            filter: RwLock::new(filter),
            normalizer,
            secure_channel,
            metrics: StoreMetrics::new(),
        }
    }

    fn normalize(&self, address: &str) -> Result<Vec<u8>, StoreError> {
        self.normalizer.normalize(address).map_err(|e| {
            self.metrics.record_rejected();
            StoreError::Address(e)
        })
    }

    /// Add an address
    pub fn add_address(&self, address: &str) -> Result<(), StoreError> {
        let key = self.normalize(address)?;
        self.filter.write().add(&key);
        self.metrics.record_add();
        Ok(())
    }

    /// `Ok(false)` means the address was definitely never added
    pub fn check_address(&self, address: &str) -> Result<bool, StoreError> {
        let key = self.normalize(address)?;
        let start = Instant::now();
        let found = self.filter.read().test(&key);
        self.metrics.record_lookup(start.elapsed(), found);
        Ok(found)
    }

    /// Replace the active filter with the one stored at `path`
    ///
    /// On any failure the active filter is left untouched.
    pub fn load_from_file(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let loaded: F = match read_filter(path, self.secure_channel.as_deref()) {
            Ok(filter) => filter,
            Err(e) => {
                self.metrics.record_reload(false);
                return Err(e);
            }
        };

        let loaded_elements = loaded.stats().elements_inserted;
        let previous = std::mem::replace(&mut *self.filter.write(), loaded);
        self.metrics.record_reload(true);

        info!(
            path = %path.display(),
            elements = loaded_elements,
            "[MembershipStore] Filter loaded"
        );
        debug!(
            previous_elements = previous.stats().elements_inserted,
            "[MembershipStore] Previous filter released"
        );
        Ok(())
    }

    /// Write the active filter to `path`, truncating any existing file
    ///
    /// Not crash-atomic: a failure part way leaves a partial file. Use
    /// [`save_to_file_atomic`](Self::save_to_file_atomic) when the file is
    /// being watched or must always be loadable.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(StoreError::EmptyPath("saving"));
        }

        let snapshot = self.snapshot();
        let file = File::create(path).map_err(|source| StoreError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        self.encode_into(&snapshot, file, path)?;

        self.metrics.record_save();
        info!(path = %path.display(), "[MembershipStore] Filter saved");
        Ok(())
    }

    /// Write the active filter to a temporary file beside `path`, sync
    /// it, then rename it over `path`
    ///
    /// Readers of `path` see either the previous file or the complete new one.
    pub fn save_to_file_atomic(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(StoreError::EmptyPath("saving"));
        }

        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let create_error = |source| StoreError::Create {
            path: path.to_path_buf(),
            source,
        };

        let snapshot = self.snapshot();
        let mut temp = tempfile::NamedTempFile::new_in(&directory).map_err(create_error)?;
        self.encode_into(&snapshot, temp.as_file_mut(), path)?;
        temp.as_file()
            .sync_all()
            .map_err(|source| write_error(source, path))?;
        temp.persist(path).map_err(|e| write_error(e.error, path))?;

        self.metrics.record_save();
        info!(path = %path.display(), "[MembershipStore] Filter saved atomically");
        Ok(())
    }

    /// Statistics of the active filter
    pub fn filter_stats(&self) -> FilterStats {
        self.filter.read().stats()
    }

    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    /// Whether persisted files are sealed
    pub fn is_secured(&self) -> bool {
        self.secure_channel.is_some()
    }

    fn snapshot(&self) -> F {
        self.filter.read().clone()
    }

    fn encode_into<'a, W: Write + 'a>(
        &self,
        filter: &F,
        sink: W,
        path: &Path,
    ) -> Result<(), StoreError> {
        let written = match &self.secure_channel {
            Some(channel) => {
                let sealing = |e| sealing_error(e, path);
                let mut writer = channel.open_writer(Box::new(sink)).map_err(sealing)?;
                let written = filter
                    .serialize_to(&mut writer)
                    .map_err(|e| encoding_error(e, path))?;
                writer.finish().map_err(sealing)?;
                written
            }
            None => {
                let mut writer = BufWriter::new(sink);
                let written = filter
                    .serialize_to(&mut writer)
                    .map_err(|e| encoding_error(e, path))?;
                writer.flush().map_err(|source| write_error(source, path))?;
                written
            }
        };

        debug!(bytes = written, secured = self.is_secured(), "[MembershipStore] Filter encoded");
        Ok(())
    }
}

fn write_error(source: io::Error, path: &Path) -> StoreError {
    StoreError::Write {
        path: path.to_path_buf(),
        source,
    }
}

/// Sink failures surface as write errors, never as untrusted content
fn sealing_error(err: SecureChannelError, path: &Path) -> StoreError {
    match err {
        SecureChannelError::Io { kind, message } => write_error(io::Error::new(kind, message), path),
        other => StoreError::SecureChannel(other),
    }
}

fn encoding_error(err: FilterError, path: &Path) -> StoreError {
    match err {
        FilterError::Io(source) => {
            // A sealing writer reports its own failures through io::Error
            match source
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<SecureChannelError>())
            {
                Some(inner) => sealing_error(inner.clone(), path),
                None => write_error(source, path),
            }
        }
        other => StoreError::Filter(other),
    }
}

impl<F: MembershipFilter> AddressMembership for MembershipStore<F> {
    fn add_address(&self, address: &str) -> Result<(), StoreError> {
        MembershipStore::add_address(self, address)
    }

    fn check_address(&self, address: &str) -> Result<bool, StoreError> {
        MembershipStore::check_address(self, address)
    }

    fn load_from_file(&self, path: &Path) -> Result<(), StoreError> {
        MembershipStore::load_from_file(self, path)
    }

    fn save_to_file(&self, path: &Path) -> Result<(), StoreError> {
        MembershipStore::save_to_file(self, path)
    }
}

/// Builder for [`MembershipStore`]
///
/// Without estimates the default [`StoreConfig`] (10 000 addresses at a
/// 1e-7 false positive rate) is used.
pub struct StoreBuilder<F: MembershipFilter = BloomFilter> {
    normalizer: Arc<dyn AddressNormalizer>,
    config: Option<StoreConfig>,
    secure_channel: Option<Arc<dyn SecureChannel>>,
    _filter: PhantomData<fn() -> F>,
}

impl<F: MembershipFilter> StoreBuilder<F> {
    pub fn new(normalizer: Arc<dyn AddressNormalizer>) -> Self {
        Self {
            normalizer,
            config: None,
            secure_channel: None,
            _filter: PhantomData,
        }
    }

    /// Size a fresh filter for `capacity` addresses at `false_positive_rate`
    pub fn with_estimates(mut self, capacity: usize, false_positive_rate: f64) -> Self {
        self.config = Some(StoreConfig {
            capacity,
            false_positive_rate,
        });
        self
    }

    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Seal saved files and require sealed files on load
    pub fn with_secure_channel(mut self, channel: Arc<dyn SecureChannel>) -> Self {
        self.secure_channel = Some(channel);
        self
    }

    /// Build a store with an empty filter
    pub fn build(self) -> Result<MembershipStore<F>, StoreError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let filter = F::with_estimates(config.capacity, config.false_positive_rate);
        let stats = filter.stats();
        info!(
            capacity = config.capacity,
            false_positive_rate = config.false_positive_rate,
            size_bits = stats.size_bits,
            hash_count = stats.hash_count,
            secured = self.secure_channel.is_some(),
            "[MembershipStore] Created empty store"
        );

        Ok(MembershipStore::from_parts(
            filter,
            self.normalizer,
            self.secure_channel,
        ))
    }

    /// Build a store from a persisted filter; estimates are ignored
    pub fn load_from_file(self, path: impl AsRef<Path>) -> Result<MembershipStore<F>, StoreError> {
        let path = path.as_ref();
        let filter: F = read_filter(path, self.secure_channel.as_deref()).map_err(|e| {
            warn!(path = %path.display(), error = %e, "[MembershipStore] Failed to load initial filter");
            e
        })?;

        info!(
            path = %path.display(),
            elements = filter.stats().elements_inserted,
            "[MembershipStore] Created store from file"
        );
        Ok(MembershipStore::from_parts(
            filter,
            self.normalizer,
            self.secure_channel,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{BitcoinNormalizer, EvmNormalizer, SealedChannel};
    use ed25519_dalek::SigningKey;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;

    fn evm() -> Arc<dyn AddressNormalizer> {
        Arc::new(EvmNormalizer)
    }

    fn random_addresses(seed: u64, count: usize) -> Vec<String> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            let bytes: [u8; 20] = rng.gen();
            if seen.insert(bytes) {
                out.push(format!("0x{}", hex::encode(bytes)));
            }
        }
        out
    }

    fn evm_store(capacity: usize, fpr: f64) -> MembershipStore {
        MembershipStore::builder(evm())
            .with_estimates(capacity, fpr)
            .build()
            .unwrap()
    }

    /// Channel for `me` exchanging files with `peer`
    fn channel(me: u8, peer: u8) -> Arc<dyn SecureChannel> {
        let identity = SigningKey::from_bytes(&[me; 32]);
        let peer = SigningKey::from_bytes(&[peer; 32]).verifying_key();
        Arc::new(SealedChannel::new(identity, peer))
    }

    const ALICE: u8 = 1;
    const BOB: u8 = 2;
    const CHAD: u8 = 3;

    #[test]
    fn test_concrete_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter.bin");
        let added = [
            "0x1234567890abcdef1234567890abcdef12345678",
            "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd",
            "0x0000000000000000000000000000000000000001",
        ];

        let store = evm_store(1000, 0.0001);
        for address in added {
            store.add_address(address).unwrap();
        }
        store.save_to_file(&path).unwrap();

        let loaded = MembershipStore::builder(evm()).load_from_file(&path).unwrap();
        for address in added {
            assert!(loaded.check_address(address).unwrap(), "{} missing", address);
        }
        for address in random_addresses(7, 3) {
            assert!(!loaded.check_address(&address).unwrap(), "{} unexpectedly present", address);
        }
    }

    #[test]
    fn test_invalid_false_positive_rate_rejected() {
        for fpr in [0.0, 1.0, -0.1, 1.5] {
            let result = MembershipStore::builder(evm())
                .with_estimates(1000, fpr)
                .build();
            assert!(
                matches!(result, Err(StoreError::Filter(FilterError::InvalidFPR { .. }))),
                "fpr {} should be rejected",
                fpr
            );
        }
    }

    #[test]
    fn test_default_estimates() {
        let store = MembershipStore::builder(evm()).build().unwrap();
        let stats = store.filter_stats();

        assert_eq!(stats.elements_inserted, 0);
        assert!(stats.size_bits > 10_000 * 30);
        assert!(!store.is_secured());
    }

    #[test]
    fn test_invalid_address_rejected() {
        let store = evm_store(100, 0.01);

        assert!(matches!(store.add_address("0x1234"), Err(StoreError::Address(_))));
        assert!(matches!(store.check_address("not an address"), Err(StoreError::Address(_))));
        assert_eq!(store.filter_stats().elements_inserted, 0);
        assert_eq!(store.metrics().snapshot().addresses_rejected, 2);
    }

    #[test]
    fn test_canonical_forms_share_membership() {
        let store = evm_store(100, 0.001);
        store
            .add_address("0xABCDEFABCDEFABCDEFABCDEFABCDEFABCDEFABCD")
            .unwrap();

        assert!(store
            .check_address("0Xabcdefabcdefabcdefabcdefabcdefabcdefabcd")
            .unwrap());
    }

    #[test]
    fn test_bitcoin_store() {
        let store = MembershipStore::builder(Arc::new(BitcoinNormalizer::default()))
            .with_estimates(100, 0.001)
            .build()
            .unwrap();

        store.add_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").unwrap();
        assert!(store.check_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").unwrap());
        assert!(store.add_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNb").is_err());
    }

    #[test]
    fn test_round_trip_without_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter.bin");
        let added = random_addresses(1, 500);
        let probes = random_addresses(2, 500);

        let store = evm_store(1000, 0.001);
        for address in &added {
            store.add_address(address).unwrap();
        }
        store.save_to_file(&path).unwrap();
        let loaded = MembershipStore::builder(evm()).load_from_file(&path).unwrap();

        assert_eq!(loaded.filter_stats(), store.filter_stats());
        for address in added.iter().chain(&probes) {
            assert_eq!(
                loaded.check_address(address).unwrap(),
                store.check_address(address).unwrap()
            );
        }
    }

    #[test]
    fn test_round_trip_with_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter.sealed");
        let added = random_addresses(3, 200);

        let writer = MembershipStore::builder(evm())
            .with_estimates(1000, 0.001)
            .with_secure_channel(channel(ALICE, BOB))
            .build()
            .unwrap();
        for address in &added {
            writer.add_address(address).unwrap();
        }
        writer.save_to_file(&path).unwrap();

        let reader = MembershipStore::builder(evm())
            .with_secure_channel(channel(BOB, ALICE))
            .load_from_file(&path)
            .unwrap();
        assert!(reader.is_secured());
        for address in &added {
            assert!(reader.check_address(address).unwrap());
        }

        // Sealed files are not plain filters
        assert!(matches!(
            MembershipStore::builder(evm()).load_from_file(&path),
            Err(StoreError::Decode { .. })
        ));
    }

    #[test]
    fn test_third_party_cannot_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter.sealed");
        let writer = MembershipStore::builder(evm())
            .with_estimates(100, 0.01)
            .with_secure_channel(channel(ALICE, BOB))
            .build()
            .unwrap();
        writer
            .add_address("0x1234567890abcdef1234567890abcdef12345678")
            .unwrap();
        writer.save_to_file(&path).unwrap();

        let chad = MembershipStore::builder(evm())
            .with_estimates(100, 0.01)
            .with_secure_channel(channel(CHAD, ALICE))
            .build()
            .unwrap();
        let err = chad.load_from_file(&path).unwrap_err();

        assert!(err.is_untrusted_content());
        assert!(matches!(
            err,
            StoreError::SecureChannel(SecureChannelError::NotRecipient)
        ));
        assert!(!chad
            .check_address("0x1234567890abcdef1234567890abcdef12345678")
            .unwrap());
    }

    #[test]
    fn test_impersonated_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter.sealed");
        let planted = "0x1234567890abcdef1234567890abcdef12345678";

        // Chad encrypts to Bob but cannot sign as Alice
        let forger = MembershipStore::builder(evm())
            .with_estimates(100, 0.01)
            .with_secure_channel(channel(CHAD, BOB))
            .build()
            .unwrap();
        forger.add_address(planted).unwrap();
        forger.save_to_file(&path).unwrap();

        let bob = MembershipStore::builder(evm())
            .with_estimates(100, 0.01)
            .with_secure_channel(channel(BOB, ALICE))
            .build()
            .unwrap();
        let err = bob.load_from_file(&path).unwrap_err();

        assert!(matches!(
            err,
            StoreError::SecureChannel(SecureChannelError::SignatureMismatch)
        ));
        assert!(!bob.check_address(planted).unwrap());
        assert_eq!(bob.metrics().snapshot().reloads_failed, 1);
    }

    #[test]
    fn test_failed_reload_keeps_last_good_filter() {
        let dir = tempfile::tempdir().unwrap();
        let store = evm_store(100, 0.001);
        let added = random_addresses(4, 20);
        for address in &added {
            store.add_address(address).unwrap();
        }

        let corrupted = dir.path().join("corrupted.bin");
        std::fs::write(&corrupted, b"definitely not a filter").unwrap();
        let truncated = dir.path().join("truncated.bin");
        store.save_to_file(&truncated).unwrap();
        let bytes = std::fs::read(&truncated).unwrap();
        std::fs::write(&truncated, &bytes[..bytes.len() / 2]).unwrap();

        assert!(matches!(
            store.load_from_file(dir.path().join("missing.bin")),
            Err(StoreError::Open { .. })
        ));
        assert!(matches!(store.load_from_file(&corrupted), Err(StoreError::Decode { .. })));
        assert!(matches!(store.load_from_file(&truncated), Err(StoreError::Decode { .. })));
        assert!(matches!(store.load_from_file(""), Err(StoreError::EmptyPath(_))));

        for address in &added {
            assert!(store.check_address(address).unwrap());
        }
        assert_eq!(store.metrics().snapshot().reloads_failed, 4);
        assert_eq!(store.metrics().snapshot().reloads_succeeded, 0);
    }

    #[test]
    fn test_reload_replaces_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter.bin");
        let old_address = "0x1111111111111111111111111111111111111111";
        let new_address = "0x2222222222222222222222222222222222222222";

        let producer = evm_store(100, 0.0001);
        producer.add_address(new_address).unwrap();
        producer.save_to_file(&path).unwrap();

        let store = evm_store(100, 0.0001);
        store.add_address(old_address).unwrap();
        store.load_from_file(&path).unwrap();

        assert!(store.check_address(new_address).unwrap());
        assert!(!store.check_address(old_address).unwrap());
        assert_eq!(store.metrics().snapshot().reloads_succeeded, 1);
    }

    #[test]
    fn test_save_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = evm_store(100, 0.01);

        assert!(matches!(store.save_to_file(""), Err(StoreError::EmptyPath(_))));
        assert!(matches!(
            store.save_to_file(dir.path().join("missing").join("filter.bin")),
            Err(StoreError::Create { .. })
        ));
        assert!(matches!(
            store.save_to_file_atomic(dir.path().join("missing").join("filter.bin")),
            Err(StoreError::Create { .. })
        ));
    }

    /// Sink that accepts `accept` bytes, then fails every write
    struct FailingSink {
        accept: usize,
        fail_flush: bool,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.accept == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "no space left"));
            }
            let n = self.accept.min(buf.len());
            self.accept -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            if self.fail_flush {
                Err(io::Error::new(io::ErrorKind::Other, "flush failed"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_sink_failures_are_write_errors() {
        // Larger than one sealed chunk, so failures also hit mid-stream frames
        let plain = evm_store(100_000, 0.01);
        let sealed = MembershipStore::builder(evm())
            .with_estimates(100_000, 0.01)
            .with_secure_channel(channel(ALICE, BOB))
            .build()
            .unwrap();
        let path = Path::new("filter.bin");

        for store in [&plain, &sealed] {
            let snapshot = store.snapshot();
            let sinks = [
                FailingSink { accept: 0, fail_flush: false },
                FailingSink { accept: 100, fail_flush: false },
                FailingSink { accept: usize::MAX, fail_flush: true },
            ];
            for sink in sinks {
                let err = store.encode_into(&snapshot, sink, path).unwrap_err();
                assert!(
                    matches!(&err, StoreError::Write { source, .. } if source.kind() == io::ErrorKind::Other),
                    "secured={} got {:?}",
                    store.is_secured(),
                    err
                );
                assert!(!err.is_untrusted_content());
            }
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_save_to_full_device() {
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let sealed = MembershipStore::builder(evm())
            .with_estimates(100, 0.01)
            .with_secure_channel(channel(ALICE, BOB))
            .build()
            .unwrap();

        for store in [evm_store(100, 0.01), sealed] {
            let err = store.save_to_file(full).unwrap_err();
            assert!(matches!(err, StoreError::Write { .. }), "{:?}", err);
            assert!(!err.is_untrusted_content());
            assert_eq!(store.metrics().snapshot().saves_completed, 0);
        }
    }

    #[test]
    fn test_atomic_save_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filter.bin");
        std::fs::write(&path, b"stale").unwrap();

        let store = evm_store(100, 0.001);
        store
            .add_address("0x1234567890abcdef1234567890abcdef12345678")
            .unwrap();
        store.save_to_file_atomic(&path).unwrap();

        let loaded = MembershipStore::builder(evm()).load_from_file(&path).unwrap();
        assert!(loaded
            .check_address("0x1234567890abcdef1234567890abcdef12345678")
            .unwrap());
        // Only the target remains in the directory
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        assert_eq!(store.metrics().snapshot().saves_completed, 1);
    }

    #[test]
    fn test_false_positive_rate_bounded() {
        let fpr = 0.01;
        let store = evm_store(1000, fpr);
        for address in random_addresses(10, 1000) {
            store.add_address(&address).unwrap();
        }

        let probes = random_addresses(11, 10_000);
        let positives = probes
            .iter()
            .filter(|a| store.check_address(a).unwrap())
            .count();
        let observed = positives as f64 / probes.len() as f64;

        assert!(observed < fpr * 10.0, "observed rate {} for target {}", observed, fpr);
    }

    #[test]
    fn test_readers_never_see_partial_filter_during_reload() {
        let dir = tempfile::tempdir().unwrap();
        let base = random_addresses(20, 200);
        let extra = random_addresses(21, 200);

        // Both files contain `base`; only the second contains `extra`
        let small = dir.path().join("small.bin");
        let large = dir.path().join("large.bin");
        let producer = evm_store(1000, 0.0001);
        for address in &base {
            producer.add_address(address).unwrap();
        }
        producer.save_to_file(&small).unwrap();
        for address in &extra {
            producer.add_address(address).unwrap();
        }
        producer.save_to_file(&large).unwrap();

        let normalize = |addresses: &[String]| -> Vec<Vec<u8>> {
            addresses
                .iter()
                .map(|a| EvmNormalizer.normalize(a).unwrap())
                .collect()
        };
        let base_keys = normalize(&base);
        let extra_keys = normalize(&extra);

        let store = MembershipStore::builder(evm()).load_from_file(&small).unwrap();
        let readers = 4;
        let barrier = Barrier::new(readers + 1);
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            for _ in 0..readers {
                scope.spawn(|| {
                    barrier.wait();
                    while !done.load(Ordering::Acquire) {
                        // One guard: the whole view comes from a single filter
                        let filter = store.filter.read();
                        assert!(base_keys.iter().all(|k| filter.test(k)));
                        let present = extra_keys.iter().filter(|k| filter.test(k)).count();
                        assert!(
                            present == 0 || present == extra_keys.len(),
                            "mixed filter: {} of {} extra addresses present",
                            present,
                            extra_keys.len()
                        );
                    }
                });
            }

            barrier.wait();
            for round in 0..21 {
                let path = if round % 2 == 0 { &large } else { &small };
                store.load_from_file(path).unwrap();
            }
            done.store(true, Ordering::Release);
        });

        // Last round (20) loaded the large filter
        for address in &extra {
            assert!(store.check_address(address).unwrap());
        }
        assert_eq!(store.metrics().snapshot().reloads_succeeded, 21);
    }

    #[test]
    fn test_store_behind_trait_object() {
        let store: Arc<dyn AddressMembership> = Arc::new(evm_store(100, 0.01));
        store
            .add_address("0x1234567890abcdef1234567890abcdef12345678")
            .unwrap();

        assert!(store
            .check_address("0x1234567890abcdef1234567890abcdef12345678")
            .unwrap());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_no_false_negatives(keys in proptest::collection::vec(proptest::array::uniform20(any::<u8>()), 1..100)) {
            let store = evm_store(100, 0.01);
            let addresses: Vec<String> = keys.iter().map(|k| format!("0x{}", hex::encode(k))).collect();
            for address in &addresses {
                store.add_address(address).unwrap();
            }
            for address in &addresses {
                prop_assert!(store.check_address(&address.to_uppercase()).unwrap());
            }
        }
    }
}
