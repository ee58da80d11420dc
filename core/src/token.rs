//! Access token generation.

use rand::RngCore;

/// Bytes of entropy in a generated token.
pub const TOKEN_BYTES: usize = 16;

/// Generate a random access token: 128 bits from the thread-local CSPRNG,
/// hex encoded (32 characters).
#[must_use]
pub fn generate_access_token() -> String {
    let mut rng = rand::thread_rng();
    let mut random_bytes = [0u8; TOKEN_BYTES];
    rng.fill_bytes(&mut random_bytes);
    hex::encode(random_bytes)
}
