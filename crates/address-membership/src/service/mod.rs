//! Service Layer
//!
//! Application services that orchestrate the domain and the ports:
//! the membership store and the reload coordinator that keeps it fresh.

pub mod membership_store;
pub mod reload_coordinator;

pub use membership_store::{read_filter, MembershipStore, StoreBuilder};
pub use reload_coordinator::{CoordinatorState, ReloadCoordinator};
