#![no_main]

use keymint_core::address::normalize;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // normalize must never panic; it only lowercases strings that
    // decode as valid segwit addresses.
    if let Ok(s) = std::str::from_utf8(data) {
        let normalized = normalize(s);
        // Normalization is idempotent.
        assert_eq!(normalize(&normalized), normalized);
    }
});
