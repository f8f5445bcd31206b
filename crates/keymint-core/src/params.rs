//! Chain parameter registry.
//!
//! Resolves a network tag to the magic bytes the codecs need: BIP-32
//! version bytes, SLIP-0132 version bytes per scheme, Base58 address
//! prefixes and the Bech32 human-readable part.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Derivation scheme, named after the address encoding it produces.
///
/// Maps to BIP-44 / BIP-49 / BIP-84 account layouts respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// P2PKH (BIP-44).
    Legacy,
    /// P2SH-P2WPKH (BIP-49).
    Segwit,
    /// P2WPKH (BIP-84).
    NativeSegwit,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Legacy => write!(f, "legacy"),
            Scheme::Segwit => write!(f, "segwit"),
            Scheme::NativeSegwit => write!(f, "native_segwit"),
        }
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "legacy" => Ok(Scheme::Legacy),
            "segwit" => Ok(Scheme::Segwit),
            "native_segwit" => Ok(Scheme::NativeSegwit),
            other => Err(Error::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Supported networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    BitcoinMainnet,
    BitcoinTestnet3,
    BitcoinRegtest,
    LitecoinMainnet,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::BitcoinMainnet => write!(f, "bitcoin_mainnet"),
            Network::BitcoinTestnet3 => write!(f, "bitcoin_testnet3"),
            Network::BitcoinRegtest => write!(f, "bitcoin_regtest"),
            Network::LitecoinMainnet => write!(f, "litecoin_mainnet"),
        }
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "bitcoin_mainnet" | "bitcoin" | "mainnet" => Ok(Network::BitcoinMainnet),
            "bitcoin_testnet3" | "testnet3" | "testnet" => Ok(Network::BitcoinTestnet3),
            "bitcoin_regtest" | "regtest" => Ok(Network::BitcoinRegtest),
            "litecoin_mainnet" | "litecoin" => Ok(Network::LitecoinMainnet),
            other => Err(Error::UnsupportedNetwork(other.to_string())),
        }
    }
}

/// Magic bytes for one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    pub network: Network,
    /// Standard BIP-32 public version bytes (xpub, tpub, Ltub).
    pub bip32_pub_version: [u8; 4],
    /// SLIP-0132 version bytes for P2SH-P2WPKH keys (ypub, upub, Mtub).
    slip132_segwit_version: [u8; 4],
    /// SLIP-0132 version bytes for P2WPKH keys (zpub, vpub).
    slip132_native_version: [u8; 4],
    pub p2pkh_prefix: u8,
    pub p2sh_prefix: u8,
    pub bech32_hrp: &'static str,
}

const BITCOIN_MAINNET: ChainParams = ChainParams {
    network: Network::BitcoinMainnet,
    bip32_pub_version: [0x04, 0x88, 0xB2, 0x1E],
    slip132_segwit_version: [0x04, 0x9D, 0x7C, 0xB2],
    slip132_native_version: [0x04, 0xB2, 0x47, 0x46],
    p2pkh_prefix: 0x00,
    p2sh_prefix: 0x05,
    bech32_hrp: "bc",
};

const BITCOIN_TESTNET3: ChainParams = ChainParams {
    network: Network::BitcoinTestnet3,
    bip32_pub_version: [0x04, 0x35, 0x87, 0xCF],
    slip132_segwit_version: [0x04, 0x4A, 0x52, 0x62],
    slip132_native_version: [0x04, 0x5F, 0x1C, 0xF6],
    p2pkh_prefix: 0x6F,
    p2sh_prefix: 0xC4,
    bech32_hrp: "tb",
};

// Regtest shares testnet's key serialization and address prefixes; only
// the HRP differs.
const BITCOIN_REGTEST: ChainParams = ChainParams {
    network: Network::BitcoinRegtest,
    bip32_pub_version: [0x04, 0x35, 0x87, 0xCF],
    slip132_segwit_version: [0x04, 0x4A, 0x52, 0x62],
    slip132_native_version: [0x04, 0x5F, 0x1C, 0xF6],
    p2pkh_prefix: 0x6F,
    p2sh_prefix: 0xC4,
    bech32_hrp: "bcrt",
};

// SLIP-0132 assigns Litecoin no zpub-equivalent, so native-segwit keys
// keep the standard Ltub bytes.
const LITECOIN_MAINNET: ChainParams = ChainParams {
    network: Network::LitecoinMainnet,
    bip32_pub_version: [0x01, 0x9D, 0xA4, 0x62],
    slip132_segwit_version: [0x01, 0xB2, 0x6E, 0xF6],
    slip132_native_version: [0x01, 0x9D, 0xA4, 0x62],
    p2pkh_prefix: 0x30,
    p2sh_prefix: 0x32,
    bech32_hrp: "ltc",
};

impl ChainParams {
    /// Look up the parameters for a network.
    pub fn for_network(network: Network) -> &'static ChainParams {
        match network {
            Network::BitcoinMainnet => &BITCOIN_MAINNET,
            Network::BitcoinTestnet3 => &BITCOIN_TESTNET3,
            Network::BitcoinRegtest => &BITCOIN_REGTEST,
            Network::LitecoinMainnet => &LITECOIN_MAINNET,
        }
    }

    /// SLIP-0132 version bytes for a scheme. Legacy keys keep the
    /// standard BIP-32 bytes.
    pub fn slip132_version(&self, scheme: Scheme) -> [u8; 4] {
        match scheme {
            Scheme::Legacy => self.bip32_pub_version,
            Scheme::Segwit => self.slip132_segwit_version,
            Scheme::NativeSegwit => self.slip132_native_version,
        }
    }

    /// Whether `version` is acceptable on input for this network:
    /// either the standard bytes or any SLIP-0132 variant.
    pub fn accepts_version(&self, version: [u8; 4]) -> bool {
        version == self.bip32_pub_version
            || version == self.slip132_segwit_version
            || version == self.slip132_native_version
    }
}
