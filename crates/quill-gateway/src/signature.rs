use anyhow::{anyhow, bail, Context, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Requests whose timestamp differs from the current time by more than this
/// many seconds are rejected before signature comparison.
pub const MAX_TIMESTAMP_SKEW_SECONDS: i64 = 300;

/// Verifies a Slack request signature: HMAC-SHA256 over
/// `v0:{timestamp}:{body}`, compared against the `v0=<hex>` header value.
pub fn verify_slack_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &str,
    signature_header: &str,
) -> Result<()> {
    let digest_hex = signature_header
        .strip_prefix("v0=")
        .ok_or_else(|| anyhow!("signature must use v0=<hex> format"))?;
    let signature_bytes = decode_hex(digest_hex)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(signing_secret.as_bytes())
        .context("failed to initialize hmac verifier")?;
    mac.update(format!("v0:{timestamp}:{body}").as_bytes());
    mac.verify_slice(&signature_bytes)
        .map_err(|_| anyhow!("signature verification failed"))
}

/// True when the request timestamp is unparsable or lies outside the
/// allowed skew window around `now_unix`.
pub fn timestamp_is_stale(timestamp: &str, now_unix: u64) -> bool {
    let Ok(request_unix) = timestamp.trim().parse::<i64>() else {
        return true;
    };
    let skew = (now_unix as i64).saturating_sub(request_unix);
    skew.unsigned_abs() > MAX_TIMESTAMP_SKEW_SECONDS as u64
}

fn decode_hex(raw: &str) -> Result<Vec<u8>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("signature digest cannot be empty");
    }
    if trimmed.len() % 2 != 0 {
        bail!("signature digest must have an even number of hex characters");
    }
    let mut bytes = Vec::with_capacity(trimmed.len() / 2);
    for chunk in trimmed.as_bytes().chunks_exact(2) {
        let pair = std::str::from_utf8(chunk)
            .map_err(|_| anyhow!("signature digest must be ascii hex"))?;
        let byte = u8::from_str_radix(pair, 16)
            .with_context(|| format!("invalid hex byte '{pair}' in signature digest"))?;
        bytes.push(byte);
    }
    Ok(bytes)
}

#[cfg(test)]
pub(crate) fn sign_request(signing_secret: &str, timestamp: &str, body: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(signing_secret.as_bytes()).expect("hmac accepts any key");
    mac.update(format!("v0:{timestamp}:{body}").as_bytes());
    let digest = mac.finalize().into_bytes();
    format!(
        "v0={}",
        digest
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>()
    )
}
