//! Fuzz target for the binary magic database parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_magic_parser
//!
//! Input is prefixed with the magic signature so the fuzzer spends its time
//! in section and rule parsing. Whatever loads is then matched against the
//! input itself.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mimesniff_core::MagicRuleSet;
use mimesniff_core::magic::MAGIC_SIGNATURE;

fuzz_target!(|data: &[u8]| {
    let mut bytes = MAGIC_SIGNATURE.to_vec();
    bytes.extend_from_slice(data);

    let mut set = MagicRuleSet::new();
    let _ = set.parse_bytes(&bytes, "fuzz");
    let _ = set.lookup_bytes(data);
});
