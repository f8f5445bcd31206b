//! Hash primitives shared by the key and address codecs.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// HASH160: RIPEMD160(SHA256(data)).
///
/// Used for public-key hashes, redeem-script hashes and BIP-32 key
/// fingerprints.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash160_empty_input() {
        // HASH160 of the empty string, a fixed reference value.
        assert_eq!(
            hex::encode(hash160(b"")),
            "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"
        );
    }

    #[test]
    fn hash160_known_pubkey() {
        // Compressed pubkey behind the first BIP-44 test-mnemonic address.
        let pubkey =
            hex::decode("03aaeb52dd7494c361049de67cc680e83ebcbbbdbeb13637d92cd845f70308af5e")
                .unwrap();
        assert_eq!(
            hex::encode(hash160(&pubkey)),
            "d986ed01b7a22225a70edbf2ba7cfb63a15cb3aa"
        );
    }
}
