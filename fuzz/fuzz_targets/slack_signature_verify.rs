#![no_main]

use libfuzzer_sys::fuzz_target;
use quill_gateway::{timestamp_is_stale, verify_slack_signature};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let mut parts = raw.splitn(4, '\n');
    let secret = parts.next().unwrap_or("");
    let timestamp = parts.next().unwrap_or("");
    let body = parts.next().unwrap_or("");
    let header = parts.next().unwrap_or("");

    if verify_slack_signature(secret, timestamp, body, header).is_ok() {
        let digest = header.strip_prefix("v0=").unwrap_or("");
        assert_eq!(digest.trim().len(), 64);
    }

    let _ = timestamp_is_stale(timestamp, 1_700_000_000);
    if let Ok(request_unix) = timestamp.trim().parse::<i64>() {
        if request_unix >= 0 {
            assert!(!timestamp_is_stale(
                &request_unix.to_string(),
                request_unix as u64
            ));
        }
    }
});
