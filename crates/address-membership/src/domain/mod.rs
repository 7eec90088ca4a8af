//! Domain Layer - Pure business logic
//!
//! This layer contains:
//! - Bloom filter implementation and its native codec
//! - Hash functions
//! - Parameter calculations
//! - Configuration
//!
//! RULES:
//! - No file or network I/O (codecs work on `Read`/`Write`)
//! - No async code

pub mod bloom_filter;
pub mod config;
pub mod hash_functions;
pub mod parameters;

pub use bloom_filter::{BloomFilter, FORMAT_MAGIC, FORMAT_VERSION};
pub use config::{MembershipConfig, ReloadConfig, StoreConfig, StoreConfigBuilder, MAX_FILTER_BITS};
pub use parameters::{calculate_optimal_parameters, BloomFilterParams};
