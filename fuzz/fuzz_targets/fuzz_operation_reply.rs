//! Fuzz target: async envelope parsing.
//!
//! Arbitrary JSON handed to `PendingOperation::from_reply` must never
//! panic, and any operation it finds must carry a non-empty path.

#![no_main]

use libfuzzer_sys::fuzz_target;
use lxdvm_backend::PendingOperation;

fuzz_target!(|data: &[u8]| {
    let Ok(reply) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    if let Some(op) = PendingOperation::from_reply(&reply) {
        assert!(!op.path.is_empty(), "operation path must not be empty");
    }
});
