//! Fuzz target: mount device naming.
//!
//! Every target path maps to a 27-character LXD device name.
#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let target = String::from_utf8_lossy(data);
    let name = lxdvm_backend::device_name_for(&target);
    assert_eq!(name.len(), 27, "LXD device names are capped at 27 chars");
    assert!(name.starts_with("d_"));
});
