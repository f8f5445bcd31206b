//! Address encoders: P2PKH, P2SH-P2WPKH and P2WPKH.
//!
//! Scheme selection happens here; the key material is always a
//! compressed secp256k1 public key (uncompressed inputs were already
//! compressed by the key codec).

use crate::hash::hash160;
use crate::params::{ChainParams, Scheme};
use bech32::Hrp;
use secp256k1::PublicKey;

/// Encode a public key as an address under the given scheme.
pub fn encode(public_key: &PublicKey, scheme: Scheme, params: &ChainParams) -> String {
    let pubkey_hash = hash160(&public_key.serialize());
    match scheme {
        Scheme::Legacy => base58check_address(params.p2pkh_prefix, &pubkey_hash),
        Scheme::Segwit => {
            // Redeem script: OP_0 PUSH20 <pubkey hash>.
            let mut redeem = [0u8; 22];
            redeem[1] = 0x14;
            redeem[2..].copy_from_slice(&pubkey_hash);
            base58check_address(params.p2sh_prefix, &hash160(&redeem))
        }
        Scheme::NativeSegwit => {
            let hrp = Hrp::parse(params.bech32_hrp).expect("registry HRPs are valid");
            bech32::segwit::encode_v0(hrp, &pubkey_hash)
                .expect("20-byte witness program is valid at v0")
        }
    }
}

/// Normalize an address to its stored form.
///
/// Bech32 is case-insensitive, so valid all-uppercase inputs map to the
/// lowercase form the engine stores. Mixed-case strings are invalid
/// Bech32 and pass through untouched, as does anything Base58 (which is
/// case-sensitive).
pub fn normalize(address: &str) -> String {
    if bech32::segwit::decode(address).is_ok() {
        address.to_ascii_lowercase()
    } else {
        address.to_string()
    }
}

fn base58check_address(prefix: u8, hash: &[u8; 20]) -> String {
    let mut payload = [0u8; 21];
    payload[0] = prefix;
    payload[1..].copy_from_slice(hash);
    bs58::encode(payload).with_check().into_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Network;
    use crate::xpub::ExtendedPubKey;
    use secp256k1::Secp256k1;

    // Pubkey at 44'/0'/0'/0/0 of the standard test mnemonic.
    const PUBKEY_HEX: &str = "03aaeb52dd7494c361049de67cc680e83ebcbbbdbeb13637d92cd845f70308af5e";

    fn pubkey() -> PublicKey {
        PublicKey::from_slice(&hex::decode(PUBKEY_HEX).unwrap()).unwrap()
    }

    #[test]
    fn p2pkh_mainnet() {
        let params = ChainParams::for_network(Network::BitcoinMainnet);
        assert_eq!(
            encode(&pubkey(), Scheme::Legacy, params),
            "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA"
        );
    }

    #[test]
    fn p2pkh_testnet_and_litecoin_prefixes() {
        let testnet = ChainParams::for_network(Network::BitcoinTestnet3);
        assert_eq!(
            encode(&pubkey(), Scheme::Legacy, testnet),
            "n1M8ZVQtL7QoFvGMg24D6b2ojWvFXCGpoS"
        );
        let litecoin = ChainParams::for_network(Network::LitecoinMainnet);
        assert!(encode(&pubkey(), Scheme::Legacy, litecoin).starts_with('L'));
    }

    #[test]
    fn p2sh_p2wpkh_wraps_witness_program() {
        let params = ChainParams::for_network(Network::BitcoinMainnet);
        // BIP-49 account key, first external address.
        let secp = Secp256k1::verification_only();
        let account = ExtendedPubKey::from_base58(
            "xpub6C6nQwHaWbSrzs5tZ1q7m5R9cPK9eYpNMFesiXsYrgc1P8bvLLAet9JfHjYXKjToD8cBRswJXXbbFpXgwsswVPAZzKMa1jUp2kVkGVUaJa7",
            params,
        )
        .unwrap();
        let key = account
            .ckd_pub(&secp, 0)
            .unwrap()
            .ckd_pub(&secp, 0)
            .unwrap()
            .public_key;
        assert_eq!(
            encode(&key, Scheme::Segwit, params),
            "37VucYSaXLCAsxYyAPfbSi9eh4iEcbShgf"
        );
    }

    #[test]
    fn p2wpkh_bech32() {
        let params = ChainParams::for_network(Network::BitcoinMainnet);
        // BIP-84 account key, first external address.
        let secp = Secp256k1::verification_only();
        let account = ExtendedPubKey::from_base58(
            "xpub6CatWdiZiodmUeTDp8LT5or8nmbKNcuyvz7WyksVFkKB4RHwCD3XyuvPEbvqAQY3rAPshWcMLoP2fMFMKHPJ4ZeZXYVUhLv1VMrjPC7PW6V",
            params,
        )
        .unwrap();
        let key = account
            .ckd_pub(&secp, 0)
            .unwrap()
            .ckd_pub(&secp, 0)
            .unwrap()
            .public_key;
        let address = encode(&key, Scheme::NativeSegwit, params);
        assert_eq!(address, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
        // BIP-173: produced addresses are lowercase.
        assert_eq!(address, address.to_ascii_lowercase());
    }

    #[test]
    fn p2wpkh_regtest_hrp() {
        let params = ChainParams::for_network(Network::BitcoinRegtest);
        assert!(encode(&pubkey(), Scheme::NativeSegwit, params).starts_with("bcrt1"));
    }

    #[test]
    fn normalize_lowercases_valid_bech32() {
        let lower = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";
        let upper = lower.to_ascii_uppercase();
        assert_eq!(normalize(&upper), lower);
        assert_eq!(normalize(lower), lower);
    }

    #[test]
    fn normalize_leaves_base58_and_mixed_case_alone() {
        // Base58 addresses are case-sensitive.
        assert_eq!(
            normalize("1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA"),
            "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA"
        );
        // Mixed case is invalid Bech32 and must not be "repaired".
        let mixed = "bc1Qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";
        assert_eq!(normalize(mixed), mixed);
    }
}
