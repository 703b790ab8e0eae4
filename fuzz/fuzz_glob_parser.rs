//! Fuzz target for the glob database parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_glob_parser
//!
//! Feeds arbitrary text through `GlobIndex::parse_str()` and then looks up a
//! few names against whatever was indexed.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mimesniff_core::GlobIndex;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let mut index = GlobIndex::new();
    index.parse_str(&text);

    for name in ["README", "archive.tar.gz", "Photo.JPG", ""] {
        let _ = index.lookup(name);
    }
});
