//! Store and reload configuration
//!
//! # Example
//!
//! ```ignore
//! use address_membership::domain::StoreConfigBuilder;
//!
//! let config = StoreConfigBuilder::new()
//!     .capacity(1_000)
//!     .false_positive_rate(0.0001)
//!     .build()
//!     .expect("Valid config");
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::parameters::minimum_bits;
use crate::error::FilterError;

/// Largest filter, in bits, the store will build or decode (2 GiB)
pub const MAX_FILTER_BITS: usize = 1 << 34;

/// Sizing of a freshly built membership filter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Expected number of addresses (n)
    pub capacity: usize,
    /// Target false positive rate, strictly between 0 and 1
    pub false_positive_rate: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            false_positive_rate: 0.000_000_1,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with validation
    pub fn new(capacity: usize, false_positive_rate: f64) -> Result<Self, FilterError> {
        let config = Self {
            capacity,
            false_positive_rate,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate sizing parameters
    pub fn validate(&self) -> Result<(), FilterError> {
        let fpr = self.false_positive_rate;
        // NaN fails both comparisons
        if !(fpr > 0.0 && fpr < 1.0) {
            return Err(FilterError::InvalidFPR { fpr });
        }

        if self.capacity == 0 {
            return Err(FilterError::InvalidCapacity {
                capacity: self.capacity,
            });
        }

        let size = minimum_bits(self.capacity, fpr);
        if size > MAX_FILTER_BITS {
            return Err(FilterError::FilterTooLarge {
                size,
                max: MAX_FILTER_BITS,
            });
        }

        Ok(())
    }
}

/// Fluent builder for [`StoreConfig`]
#[derive(Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the expected number of addresses
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Set the target false positive rate
    pub fn false_positive_rate(mut self, fpr: f64) -> Self {
        self.config.false_positive_rate = fpr;
        self
    }

    /// Build and validate
    pub fn build(self) -> Result<StoreConfig, FilterError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Reload coordination settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// Quiet period after the last change event before reloading
    pub reload_delay_ms: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            reload_delay_ms: 500,
        }
    }
}

impl ReloadConfig {
    /// Quiet period as a `Duration`
    pub fn reload_delay(&self) -> Duration {
        Duration::from_millis(self.reload_delay_ms)
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        if self.reload_delay_ms == 0 {
            return Err(FilterError::InvalidConfig(
                "reload_delay_ms cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete configuration, typically read from a JSON file
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    pub store: StoreConfig,
    pub reload: ReloadConfig,
}

impl MembershipConfig {
    /// Parse and validate a JSON document; missing fields take defaults
    pub fn from_json_str(json: &str) -> Result<Self, FilterError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FilterError::InvalidConfig(e.to_string()))?;
        config.store.validate()?;
        config.reload.validate()?;
        Ok(config)
    }
}
