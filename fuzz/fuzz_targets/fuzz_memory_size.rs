//! Fuzz target: memory size parsing.
//!
//! Parsing never panics, and a parsed size prints back to the same byte count.
#![no_main]

use libfuzzer_sys::fuzz_target;
use lxdvm_core::MemorySize;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(size) = text.parse::<MemorySize>() {
        let reparsed: MemorySize = match size.to_string().parse() {
            Ok(s) => s,
            Err(e) => panic!("printed size must parse: {e}"),
        };
        assert_eq!(reparsed, size);
    }
});
