//! EVM address normalizer
//!
//! Accepts `0x`/`0X` + 40 hex digits in any case; the canonical key is
//! the 20 decoded bytes, so checksummed and lower-case spellings of one
//! account share a key.

use crate::error::AddressError;
use crate::ports::AddressNormalizer;

const FORMAT: &str = "EVM";

/// Length of an EVM address in bytes
pub const EVM_ADDRESS_BYTES: usize = 20;
/// Length of the textual form including the prefix
pub const EVM_ADDRESS_LEN: usize = 2 + 2 * EVM_ADDRESS_BYTES;

/// Normalizer for Ethereum-style (EVM) addresses
#[derive(Clone, Copy, Debug, Default)]
pub struct EvmNormalizer;

impl EvmNormalizer {
    pub fn new() -> Self {
        Self
    }
}

/// Hex digits after the prefix, if length and prefix are right
fn hex_digits(address: &str) -> Result<&str, AddressError> {
    if address.len() != EVM_ADDRESS_LEN {
        return Err(AddressError::InvalidFormat {
            format: FORMAT,
            reason: format!("expected {} characters, got {}", EVM_ADDRESS_LEN, address.len()),
        });
    }
    address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| AddressError::InvalidFormat {
            format: FORMAT,
            reason: "missing 0x prefix".to_string(),
        })
}

impl AddressNormalizer for EvmNormalizer {
    fn validate(&self, address: &str) -> Result<(), AddressError> {
        let digits = hex_digits(address)?;
        if let Some(bad) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(AddressError::InvalidFormat {
                format: FORMAT,
                reason: format!("invalid hex character {:?}", bad),
            });
        }
        Ok(())
    }

    fn to_canonical_bytes(&self, address: &str) -> Result<Vec<u8>, AddressError> {
        let digits = hex_digits(address)?;
        let mut key = [0u8; EVM_ADDRESS_BYTES];
        hex::decode_to_slice(digits, &mut key).map_err(|e| AddressError::Decode {
            format: FORMAT,
            reason: e.to_string(),
        })?;
        Ok(key.to_vec())
    }
}
