//! ID generation utilities for turnloop
//!
//! Provides the coarse clock, claim nonces, and the content-derived loop slug.

use std::path::Path;

use rand::Rng;
use sha2::{Digest, Sha256};

/// Prefix marking a soft reservation written by `start`
pub const PENDING_PREFIX: &str = "pending:";

const SLUG_STEM_MAX: usize = 24;
const SLUG_HASH_LEN: usize = 12;

/// Get current timestamp in seconds since Unix epoch
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Generate a short random nonce for claim tokens
///
/// Format: 8 lowercase hex chars
pub fn generate_nonce() -> String {
    let random: u32 = rand::rng().random();
    format!("{:08x}", random)
}

/// Generate a pending claim token
///
/// Format: `pending:{unix_secs}:{nonce}`
pub fn pending_token(issued_at: u64) -> String {
    format!("{}{}:{}", PENDING_PREFIX, issued_at, generate_nonce())
}

/// Derive the stable slug for a target set.
///
/// The set is sorted and de-duplicated first, so argument order never changes
/// the result. Format: `{stem}-{sha256 prefix}` where the stem comes from the
/// first target's file name.
pub fn loop_slug<P: AsRef<Path>>(targets: &[P]) -> String {
    let mut keys: Vec<String> = targets
        .iter()
        .map(|p| p.as_ref().to_string_lossy().into_owned())
        .collect();
    keys.sort();
    keys.dedup();

    let digest = hex::encode(Sha256::digest(keys.join("\n").as_bytes()));

    let stem = keys
        .first()
        .and_then(|k| Path::new(k).file_name().map(|n| sanitize_stem(&n.to_string_lossy())))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "loop".to_string());

    format!("{}-{}", stem, &digest[..SLUG_HASH_LEN])
}

fn sanitize_stem(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed: String = out.trim_matches('-').chars().take(SLUG_STEM_MAX).collect();
    trimmed.trim_end_matches('-').to_string()
}
