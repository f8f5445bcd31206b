#![no_main]

use keymint_core::DerivationPath;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Derivation-path parsing must never panic on arbitrary input.
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = s.parse::<DerivationPath>();
    }
});
