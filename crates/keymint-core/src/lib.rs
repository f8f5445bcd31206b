//! Keymint core — chain parameters, BIP-32 key codec, address codec.
//!
//! Everything the keychain engine needs to turn an account-level xpub
//! into monitorable addresses: network magic bytes, extended-key
//! serialization (BIP-32 + SLIP-0132), non-hardened child derivation
//! (CKDpub) and the three address encodings (P2PKH, P2SH-P2WPKH,
//! P2WPKH).
//!
//! This crate is synchronous and holds no state; all functions are
//! deterministic in their inputs.

pub mod address;
pub mod hash;
pub mod params;
pub mod path;
pub mod xpub;

pub use params::{ChainParams, Network, Scheme};
pub use path::{Change, DerivationPath, HARDENED_BIT};
pub use xpub::ExtendedPubKey;

use thiserror::Error;

/// Errors from the codec layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Malformed extended key: {0}")]
    MalformedKey(String),

    #[error("Malformed derivation path: {0}")]
    MalformedPath(String),

    #[error("Base58Check checksum mismatch")]
    InvalidChecksum,

    #[error("Child derivation failed at index {0}; skip to the next index")]
    InvalidDerivation(u32),

    #[error("Hardened index {0:#010x} cannot be derived from an xpub")]
    HardenedIndex(u32),

    #[error("Unrecognized change chain: {0}")]
    UnrecognizedChange(u32),
}
