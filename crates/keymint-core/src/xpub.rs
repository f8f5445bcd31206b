//! BIP-32 extended public keys: serialization and CKDpub.
//!
//! The 78-byte payload layout (version, depth, parent fingerprint,
//! child number, chain code, compressed public key) is assembled and
//! split here byte-for-byte; Base58Check framing comes from `bs58`.
//! Only non-hardened derivation is possible — this codec never touches
//! private material.

use crate::hash::hash160;
use crate::params::ChainParams;
use crate::path::HARDENED_BIT;
use crate::Error;
use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Scalar, Secp256k1, Verification};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Length of the serialized payload before Base58Check framing.
pub const ENCODED_LEN: usize = 78;

/// An account- or chain-level extended public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedPubKey {
    pub depth: u8,
    pub parent_fingerprint: [u8; 4],
    pub child_number: u32,
    pub chain_code: [u8; 32],
    pub public_key: PublicKey,
}

impl ExtendedPubKey {
    /// Decode a Base58Check extended key, validating its version bytes
    /// against the network.
    ///
    /// Standard and SLIP-0132 version bytes are both accepted on input;
    /// the version is not retained (re-serialization picks its own).
    pub fn from_base58(encoded: &str, params: &ChainParams) -> Result<Self, Error> {
        let data = bs58::decode(encoded)
            .with_check(None)
            .into_vec()
            .map_err(|e| match e {
                bs58::decode::Error::InvalidChecksum { .. } => Error::InvalidChecksum,
                other => Error::MalformedKey(other.to_string()),
            })?;

        if data.len() != ENCODED_LEN {
            return Err(Error::MalformedKey(format!(
                "expected {ENCODED_LEN} payload bytes, got {}",
                data.len()
            )));
        }

        let version: [u8; 4] = data[0..4].try_into().expect("slice length checked");
        if !params.accepts_version(version) {
            return Err(Error::MalformedKey(format!(
                "version bytes {version:02x?} do not belong to {}",
                params.network
            )));
        }

        let depth = data[4];
        let parent_fingerprint: [u8; 4] = data[5..9].try_into().expect("slice length checked");
        let child_number = u32::from_be_bytes(data[9..13].try_into().expect("slice length checked"));
        let chain_code: [u8; 32] = data[13..45].try_into().expect("slice length checked");
        // Rejects anything that is not a compressed point (0x02/0x03).
        let public_key = PublicKey::from_slice(&data[45..78])
            .map_err(|e| Error::MalformedKey(format!("invalid public key: {e}")))?;

        Ok(ExtendedPubKey {
            depth,
            parent_fingerprint,
            child_number,
            chain_code,
            public_key,
        })
    }

    /// Reconstruct an account-level key from raw material.
    ///
    /// The account node sits at depth 3 with a hardened child number;
    /// its parent fingerprint is unknown to us and set to zero. The
    /// public key may be compressed or uncompressed; it is stored
    /// compressed.
    pub fn from_account_material(
        public_key: &[u8],
        chain_code: [u8; 32],
        account_index: u32,
    ) -> Result<Self, Error> {
        if account_index & HARDENED_BIT != 0 {
            return Err(Error::MalformedKey(format!(
                "account index {account_index} out of range"
            )));
        }
        let public_key = PublicKey::from_slice(public_key)
            .map_err(|e| Error::MalformedKey(format!("invalid public key: {e}")))?;
        Ok(ExtendedPubKey {
            depth: 3,
            parent_fingerprint: [0; 4],
            child_number: account_index | HARDENED_BIT,
            chain_code,
            public_key,
        })
    }

    /// Serialize with the given version bytes (standard or SLIP-0132).
    pub fn to_base58(&self, version: [u8; 4]) -> String {
        let mut payload = [0u8; ENCODED_LEN];
        payload[0..4].copy_from_slice(&version);
        payload[4] = self.depth;
        payload[5..9].copy_from_slice(&self.parent_fingerprint);
        payload[9..13].copy_from_slice(&self.child_number.to_be_bytes());
        payload[13..45].copy_from_slice(&self.chain_code);
        payload[45..78].copy_from_slice(&self.public_key.serialize());
        bs58::encode(payload).with_check().into_string()
    }

    /// First four bytes of HASH160 of the compressed public key.
    pub fn fingerprint(&self) -> [u8; 4] {
        hash160(&self.public_key.serialize())[0..4]
            .try_into()
            .expect("hash160 yields 20 bytes")
    }

    /// Non-hardened child derivation (BIP-32 CKDpub).
    ///
    /// Fails with [`Error::InvalidDerivation`] when IL falls outside the
    /// curve order or the tweaked point is infinity; per BIP-32 the
    /// caller moves on to the next index.
    pub fn ckd_pub<C: Verification>(
        &self,
        secp: &Secp256k1<C>,
        index: u32,
    ) -> Result<Self, Error> {
        if index & HARDENED_BIT != 0 {
            return Err(Error::HardenedIndex(index));
        }

        let mut mac = HmacSha512::new_from_slice(&self.chain_code)
            .expect("HMAC accepts any key length");
        mac.update(&self.public_key.serialize());
        mac.update(&index.to_be_bytes());
        let digest = mac.finalize().into_bytes();
        let (il, ir) = digest.split_at(32);

        let tweak = Scalar::from_be_bytes(il.try_into().expect("IL is 32 bytes"))
            .map_err(|_| Error::InvalidDerivation(index))?;
        let child_key = self
            .public_key
            .add_exp_tweak(secp, &tweak)
            .map_err(|_| Error::InvalidDerivation(index))?;

        Ok(ExtendedPubKey {
            depth: self.depth + 1,
            parent_fingerprint: self.fingerprint(),
            child_number: index,
            chain_code: ir.try_into().expect("IR is 32 bytes"),
            public_key: child_key,
        })
    }
}
