// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Wire protocol for the hive coordination layer.
//!
//! Every peer message travels inside a custom-message frame:
//!
//! ```text
//! [ MAGIC(4) = "HIVE" | TYPE(1) | LEN(2, big-endian) | PAYLOAD(LEN) ]
//! ```
//!
//! Payloads are JSON documents; signatures live inside the payload so they
//! can be verified after deserialization. Frames whose magic does not match
//! belong to other plugins and are passed through untouched.

pub mod codec;
pub mod msgs;
pub mod signing;

pub use codec::{decode, encode, FrameError, HIVE_MAGIC, MAX_MESSAGE_BYTES};
pub use msgs::HiveMessage;

/// Returns true if `s` is a 33-byte compressed public key rendered as hex.
pub fn is_node_id(s: &str) -> bool {
	s.len() == 66
		&& s.bytes().all(|b| b.is_ascii_hexdigit())
		&& (s.starts_with("02") || s.starts_with("03"))
}

/// Returns true if `s` is a 64-character hex digest (sha256, payment hash).
pub fn is_hex32(s: &str) -> bool {
	s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_node_id_shape() {
		let good = format!("02{}", "aa".repeat(32));
		assert!(is_node_id(&good));
		assert!(!is_node_id(&good[..64]));
		assert!(!is_node_id(&format!("04{}", "aa".repeat(32))));
		assert!(!is_node_id(&format!("02{}zz", "aa".repeat(31))));
	}
}
