//! Inbound Ports (Driving Ports)
//!
//! The API that embedders (servers, batch tools, the reload coordinator)
//! use to talk to a membership store.

use std::path::Path;

use crate::error::StoreError;

/// Primary membership API (Driving Port)
pub trait AddressMembership: Send + Sync {
    /// Add an address; only ever grows membership
    fn add_address(&self, address: &str) -> Result<(), StoreError>;

    /// `Ok(true)` = possibly a member, `Ok(false)` = definitely not
    fn check_address(&self, address: &str) -> Result<bool, StoreError>;

    /// Replace the whole filter from `path`; all-or-nothing
    fn load_from_file(&self, path: &Path) -> Result<(), StoreError>;

    /// Persist the current filter to `path`
    fn save_to_file(&self, path: &Path) -> Result<(), StoreError>;
}
