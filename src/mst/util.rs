//! MST utility functions

use crate::{Error, Result};

/// Maximum key length in bytes
pub const MAX_KEY_LEN: usize = 1024;

/// Layer (height) of a key, derived from its hash
///
/// Counts leading zero bits of BLAKE3(key) in 2-bit chunks, giving an
/// expected fanout of 4. Tree shape depends only on the key set.
pub fn layer_for_key(key: &str) -> usize {
    let hash = blake3::hash(key.as_bytes());
    leading_zeros(hash.as_bytes()) / 2
}

fn leading_zeros(hash: &[u8]) -> usize {
    let mut count = 0;
    for byte in hash {
        if *byte == 0 {
            count += 8;
        } else {
            count += byte.leading_zeros() as usize;
            break;
        }
    }
    count
}

/// Keys must match `[a-zA-Z0-9._:~/-]+`
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidPath("empty tree key".into()));
    }

    if key.len() > MAX_KEY_LEN {
        return Err(Error::InvalidPath(format!(
            "tree key too long: {} > {}",
            key.len(),
            MAX_KEY_LEN
        )));
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '~' | '-' | '/'))
    {
        return Err(Error::InvalidPath(format!("invalid tree key: {}", key)));
    }

    Ok(())
}

/// Shared prefix length of two keys, in bytes
pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}
