#![no_main]

use keymint_core::{ChainParams, ExtendedPubKey, Network};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Try parsing arbitrary bytes as a UTF-8 string, then as an xpub.
    // from_base58 must never panic — it should always return Ok or Err.
    if let Ok(s) = std::str::from_utf8(data) {
        let params = ChainParams::for_network(Network::BitcoinMainnet);
        let _ = ExtendedPubKey::from_base58(s, params);
    }
});
