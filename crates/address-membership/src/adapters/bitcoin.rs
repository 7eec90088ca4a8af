//! Bitcoin address normalizer
//!
//! Base58Check (P2PKH/P2SH) and bech32/bech32m (segwit) addresses are
//! decoded with their checksums and checked against one network. The
//! canonical key is the script hash or witness program, so every valid
//! spelling of an address (e.g. upper-case bech32) shares one key.

use serde::{Deserialize, Serialize};

use crate::error::AddressError;
use crate::ports::AddressNormalizer;

const FORMAT: &str = "Bitcoin";

/// Hash160 payload length of base58 addresses
const HASH160_LEN: usize = 20;

/// Bitcoin network an address must belong to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitcoinNetwork {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl BitcoinNetwork {
    fn p2pkh_version(self) -> u8 {
        match self {
            BitcoinNetwork::Mainnet => 0x00,
            BitcoinNetwork::Testnet | BitcoinNetwork::Regtest => 0x6f,
        }
    }

    fn p2sh_version(self) -> u8 {
        match self {
            BitcoinNetwork::Mainnet => 0x05,
            BitcoinNetwork::Testnet | BitcoinNetwork::Regtest => 0xc4,
        }
    }

    /// Human-readable part of segwit addresses
    pub fn hrp(self) -> &'static str {
        match self {
            BitcoinNetwork::Mainnet => "bc",
            BitcoinNetwork::Testnet => "tb",
            BitcoinNetwork::Regtest => "bcrt",
        }
    }
}

/// Normalizer for Bitcoin addresses on one network
#[derive(Clone, Copy, Debug, Default)]
pub struct BitcoinNormalizer {
    network: BitcoinNetwork,
}

impl BitcoinNormalizer {
    pub fn new(network: BitcoinNetwork) -> Self {
        Self { network }
    }

    pub fn network(&self) -> BitcoinNetwork {
        self.network
    }

    /// Segwit addresses start with the network HRP and the `1` separator
    fn looks_like_segwit(&self, address: &str) -> bool {
        let prefix_len = self.network.hrp().len() + 1;
        address
            .get(..prefix_len)
            .map(|prefix| prefix.eq_ignore_ascii_case(&format!("{}1", self.network.hrp())))
            .unwrap_or(false)
    }

    fn decode_segwit(&self, address: &str) -> Result<Vec<u8>, AddressError> {
        let (hrp, _version, program) =
            bech32::segwit::decode(address).map_err(|e| AddressError::Decode {
                format: FORMAT,
                reason: e.to_string(),
            })?;

        let hrp = hrp.to_lowercase();
        if hrp != self.network.hrp() {
            return Err(AddressError::WrongNetwork {
                format: FORMAT,
                found: hrp,
            });
        }
        Ok(program)
    }

    fn decode_base58(&self, address: &str) -> Result<Vec<u8>, AddressError> {
        let payload = bs58::decode(address)
            .with_check(None)
            .into_vec()
            .map_err(|e| AddressError::Decode {
                format: FORMAT,
                reason: e.to_string(),
            })?;

        let (version, hash) = match payload.split_first() {
            Some((version, hash)) if hash.len() == HASH160_LEN => (*version, hash),
            _ => {
                return Err(AddressError::InvalidFormat {
                    format: FORMAT,
                    reason: format!("unexpected base58 payload length {}", payload.len()),
                })
            }
        };

        if version != self.network.p2pkh_version() && version != self.network.p2sh_version() {
            return Err(AddressError::WrongNetwork {
                format: FORMAT,
                found: format!("version byte 0x{:02x}", version),
            });
        }
        Ok(hash.to_vec())
    }

    fn decode(&self, address: &str) -> Result<Vec<u8>, AddressError> {
        if address.is_empty() {
            return Err(AddressError::InvalidFormat {
                format: FORMAT,
                reason: "empty address".to_string(),
            });
        }
        if self.looks_like_segwit(address) {
            self.decode_segwit(address)
        } else {
            self.decode_base58(address)
        }
    }
}

impl AddressNormalizer for BitcoinNormalizer {
    fn validate(&self, address: &str) -> Result<(), AddressError> {
        self.decode(address).map(|_| ())
    }

    fn to_canonical_bytes(&self, address: &str) -> Result<Vec<u8>, AddressError> {
        self.decode(address)
    }

    // Decode once instead of twice
    fn normalize(&self, address: &str) -> Result<Vec<u8>, AddressError> {
        self.decode(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bech32::Hrp;

    /// Genesis coinbase address and its hash160
    const GENESIS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
    const GENESIS_HASH160: &str = "62e907b15cbf27d5425399ebf6f0fb50ebb88f18";

    fn base58_address(version: u8, hash: &[u8; 20]) -> String {
        let mut payload = vec![version];
        payload.extend_from_slice(hash);
        bs58::encode(payload).with_check().into_string()
    }

    fn segwit_v0_address(hrp: &str, program: &[u8]) -> String {
        bech32::segwit::encode_v0(Hrp::parse(hrp).unwrap(), program).unwrap()
    }

    #[test]
    fn test_genesis_address() {
        let normalizer = BitcoinNormalizer::default();

        assert!(normalizer.validate(GENESIS).is_ok());
        assert_eq!(
            normalizer.to_canonical_bytes(GENESIS).unwrap(),
            hex::decode(GENESIS_HASH160).unwrap()
        );
    }

    #[test]
    fn test_p2sh_address() {
        let hash = [0x5Au8; 20];
        let address = base58_address(0x05, &hash);

        assert!(address.starts_with('3'));
        assert_eq!(BitcoinNormalizer::default().normalize(&address).unwrap(), hash);
    }

    #[test]
    fn test_bad_checksum_rejected() {
        // Last character changed
        let result = BitcoinNormalizer::default().validate("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNb");
        assert!(matches!(result, Err(AddressError::Decode { .. })));
    }

    #[test]
    fn test_wrong_network_rejected() {
        let testnet = base58_address(0x6f, &[7u8; 20]);

        assert!(matches!(
            BitcoinNormalizer::new(BitcoinNetwork::Mainnet).validate(&testnet),
            Err(AddressError::WrongNetwork { .. })
        ));
        assert!(BitcoinNormalizer::new(BitcoinNetwork::Testnet)
            .validate(&testnet)
            .is_ok());
    }

    #[test]
    fn test_segwit_address_case_insensitive() {
        let program = [0x75u8; 20];
        let lower = segwit_v0_address("bc", &program);
        let upper = lower.to_uppercase();
        let normalizer = BitcoinNormalizer::default();

        assert_eq!(normalizer.normalize(&lower).unwrap(), program);
        assert_eq!(normalizer.normalize(&upper).unwrap(), program);
    }

    #[test]
    fn test_segwit_wrong_network_rejected() {
        let address = segwit_v0_address("tb", &[1u8; 20]);

        assert!(BitcoinNormalizer::new(BitcoinNetwork::Mainnet)
            .validate(&address)
            .is_err());
        assert_eq!(
            BitcoinNormalizer::new(BitcoinNetwork::Testnet)
                .normalize(&address)
                .unwrap(),
            vec![1u8; 20]
        );
    }

    #[test]
    fn test_regtest_segwit() {
        let address = segwit_v0_address("bcrt", &[9u8; 32]);

        assert_eq!(
            BitcoinNormalizer::new(BitcoinNetwork::Regtest)
                .normalize(&address)
                .unwrap(),
            vec![9u8; 32]
        );
    }

    #[test]
    fn test_malformed_inputs_rejected() {
        let normalizer = BitcoinNormalizer::default();
        for input in ["", "0OIl", "bc1", "bc1qqqqq", "not an address", "0x1234"] {
            assert!(normalizer.validate(input).is_err(), "{:?} should be rejected", input);
        }
    }
}
