//! Fuzz target: lease table scanning and status code lookup.
#![no_main]

use libfuzzer_sys::fuzz_target;
use lxdvm_backend::leases::find_ipv4;
use lxdvm_backend::status_for_code;

fuzz_target!(|data: &[u8]| {
    if let Ok(leases) = serde_json::from_slice::<serde_json::Value>(data) {
        let _ = find_ipv4(&leases, "52:54:00:aa:bb:cc");
        if let Some(code) = leases["metadata"]["status_code"].as_i64() {
            let _ = status_for_code(code);
        }
    }
});
