//! Ports Layer
//!
//! Defines the interfaces (traits) for:
//! - Driving Ports (inbound) - API for external callers
//! - Driven Ports (outbound) - Capabilities injected into the store

pub mod inbound;
pub mod outbound;

pub use inbound::AddressMembership;
pub use outbound::{
    AddressNormalizer, FilterStats, MembershipFilter, Notifier, ReloadCallback, SealingWriter,
    SecureChannel, VerifyingReader,
};
