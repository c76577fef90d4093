//! Challenge-response credential for the identify message.
//!
//! The peer advertises a `salt` and a `challenge` in its hello. The client
//! proves knowledge of the shared password without sending it:
//!
//! ```text
//! secret   = base64( SHA256( password ++ salt ) )
//! response = base64( SHA256( secret ++ challenge ) )
//! ```
//!
//! Both concatenations are over the raw UTF-8 bytes and the base64 alphabet
//! is the standard padded one.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Compute the identify credential for `password`.
///
/// `salt` and `challenge` must be passed exactly as received.
pub fn compute_auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let secret = hash_and_encode(password, salt);
    hash_and_encode(&secret, challenge)
}

fn hash_and_encode(head: &str, tail: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(head.as_bytes());
    hasher.update(tail.as_bytes());
    STANDARD.encode(hasher.finalize())
}
