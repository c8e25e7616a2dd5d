#![no_main]

use libfuzzer_sys::fuzz_target;
use quill_slack::storage_key;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let (team, enterprise) = match raw.split_once('\n') {
        Some((team, enterprise)) => (team, enterprise),
        None => (raw.as_ref(), ""),
    };

    match storage_key(Some(team), Some(enterprise)) {
        Some(key) => {
            let scoped = key
                .strip_prefix("team_")
                .or_else(|| key.strip_prefix("ent_"))
                .unwrap_or("");
            assert!(!scoped.is_empty());
            assert_eq!(scoped, scoped.trim());
        }
        None => {
            assert!(team.trim().is_empty());
            assert!(enterprise.trim().is_empty());
        }
    }

    if !team.trim().is_empty() {
        assert_eq!(
            storage_key(Some(team), Some(enterprise)),
            Some(format!("team_{}", team.trim()))
        );
    }
});
