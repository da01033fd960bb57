//! Request identifier generation (spec §4.6).
//!
//! Not cryptographically meaningful — just a stable, low-collision 128-bit
//! opaque token in the 32-hex-char form downstream systems expect.

use md5::{Digest, Md5};
use rand::RngCore;

/// Generates a fresh request id: 16 random bytes + 16 more random bytes,
/// hex-encoded to 64 chars, then MD5'd and hex-encoded again to 32 chars.
pub fn new_request_id() -> String {
	let mut rng = rand::rng();
	let mut a = [0u8; 16];
	let mut b = [0u8; 16];
	rng.fill_bytes(&mut a);
	rng.fill_bytes(&mut b);

	let raw = format!("{}{}", hex::encode(a), hex::encode(b));
	let digest = Md5::digest(raw.as_bytes());
	hex::encode(digest)
}
