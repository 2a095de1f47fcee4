// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::fmt;

/// An error surfaced by a kernel handler or subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiveError {
	// A generic description of the error condition in English. Intended for
	// a human audience only; client-side code may use it for logging.
	pub message: String,

	// The error code uniquely identifying the condition, meant to be read
	// and handled programmatically.
	pub code: HiveErrorCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiveErrorCode {
	/// A frame with bad magic, overflowing length, or truncated payload.
	InvalidFrame,
	/// A payload failing its shape/bounds predicate.
	InvalidPayload,
	/// A signature that does not verify over the canonical signing string.
	SignatureMismatch,
	/// A message whose claimed sender differs from the transport peer.
	IdentityMismatch,
	/// The sender exceeded its per-topic rate limit.
	RateLimited,
	/// The sender is not an admitted hive member.
	NotMember,
	/// The message or entity is past its TTL.
	Stale,
	/// We lost an intent tie-break. Not an operator-visible failure.
	ConflictResolved,
	/// The requested entity does not exist.
	NotFound,
	/// The gateway circuit breaker is open; the host was not contacted.
	CircuitOpen,
	/// A recoverable host RPC failure.
	TransientHost,
	/// A store read or write failed.
	Storage,
	/// A malformed operator request.
	InvalidRequest,
	/// Unrecoverable condition; the kernel loop must halt.
	Fatal,
}

impl HiveError {
	pub fn new(code: HiveErrorCode, message: impl Into<String>) -> Self {
		HiveError { message: message.into(), code }
	}
}

impl fmt::Display for HiveError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}: {}", self.code, self.message)
	}
}

impl std::error::Error for HiveError {}

impl From<rusqlite::Error> for HiveError {
	fn from(e: rusqlite::Error) -> Self {
		HiveError::new(HiveErrorCode::Storage, e.to_string())
	}
}
