//! Jump consistent hash.
//!
//! Maps a 64-bit key onto one of `n` buckets such that growing `n` to `n + 1`
//! moves only `1 / (n + 1)` of the keys. Every node computes ownership with
//! these functions independently, so they must stay bit-for-bit stable.
//!
//! Tokens are checksummed with CRC-64/NVME, not CRC-64/ECMA, so placement
//! does not match nodes that hash with the ECMA polynomial. A cluster must
//! run a single implementation.
//!
//! # Example
//!
//! ```
//! use mnemosyne_core::jump;
//! use std::num::NonZeroU32;
//!
//! let buckets = NonZeroU32::new(3).unwrap_or(NonZeroU32::MIN);
//! let bucket = jump::hash_str("some-access-token", buckets);
//! assert!(bucket < 3);
//! assert_eq!(bucket, jump::hash_str("some-access-token", buckets));
//! ```

use crc64fast_nvme::Digest;
use std::num::NonZeroU32;

const MULTIPLIER: u64 = 2_862_933_555_777_941_757;

/// Bucket in `[0, num_buckets)` for `key`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn hash(mut key: u64, num_buckets: NonZeroU32) -> u32 {
    let num_buckets = i64::from(num_buckets.get());
    let mut bucket: i64 = -1;
    let mut next: i64 = 0;

    while next < num_buckets {
        bucket = next;
        key = key.wrapping_mul(MULTIPLIER).wrapping_add(1);
        next = ((bucket + 1) as f64 * ((1_i64 << 31) as f64 / ((key >> 33) + 1) as f64)) as i64;
    }

    // The loop runs at least once, so 0 <= bucket < num_buckets.
    bucket as u32
}

/// 64-bit checksum of a token, used as the jump hash key.
///
/// The digest lives on the stack, so each call starts from a fresh state.
#[must_use]
pub fn sum64(token: &str) -> u64 {
    let mut digest = Digest::new();
    digest.write(token.as_bytes());
    digest.sum64()
}

/// Bucket for a string token: `hash(sum64(token), num_buckets)`.
#[must_use]
pub fn hash_str(token: &str, num_buckets: NonZeroU32) -> u32 {
    hash(sum64(token), num_buckets)
}
