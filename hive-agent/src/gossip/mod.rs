// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The shared observation layer: per-topic stores that deduplicate,
//! rate-limit, reject outliers, and produce confidence-scored summaries.
//!
//! Every topic applies the same admission contract before touching state:
//! the reporter must be the transport sender, must be an admitted member,
//! must be inside its per-topic rate budget, the report must be fresh, and
//! its signature must verify over the canonical signing string.

pub(crate) mod fee_intel;
pub(crate) mod liquidity;
pub(crate) mod peer_events;
pub(crate) mod reputation;
pub(crate) mod routes;

use std::collections::HashMap;
use std::sync::Mutex;

use hive_proto::msgs::RateLimit;

use crate::error::{HiveError, HiveErrorCode};
use crate::gateway::Gateway;
use crate::store::Store;

/// Sliding-window per-sender rate tracker. Advisory and lossy: windows live
/// in memory and reset on restart.
pub struct RateLimiter {
	windows: Mutex<HashMap<String, Vec<u64>>>,
}

impl RateLimiter {
	pub fn new() -> Self {
		RateLimiter { windows: Mutex::new(HashMap::new()) }
	}

	/// Returns true and records the message when the sender is inside its
	/// budget; false when the message must be dropped.
	pub fn check_and_record(&self, sender: &str, limit: RateLimit, now: u64) -> bool {
		let mut windows = self.windows.lock().expect("lock poisoned");
		let entries = windows.entry(sender.to_string()).or_default();
		entries.retain(|ts| now.saturating_sub(*ts) < limit.window_seconds);
		if entries.len() >= limit.count as usize {
			return false;
		}
		entries.push(now);
		true
	}

	pub fn prune(&self, now: u64, window_seconds: u64) {
		let mut windows = self.windows.lock().expect("lock poisoned");
		windows.retain(|_, entries| {
			entries.retain(|ts| now.saturating_sub(*ts) < window_seconds);
			!entries.is_empty()
		});
	}
}

/// The admission contract shared by all gossip topics. Returns a typed error
/// naming the first failing gate; the message is dropped without state
/// change in every failure case.
#[allow(clippy::too_many_arguments)]
pub(crate) fn admit_report(
	store: &Store, gateway: &Gateway, limiter: &RateLimiter, sender: &str, reporter: &str,
	timestamp: u64, now: u64, max_age_seconds: u64, limit: RateLimit, signing_string: &str,
	signature: &str,
) -> Result<(), HiveError> {
	if sender != reporter {
		return Err(HiveError::new(
			HiveErrorCode::IdentityMismatch,
			"reporter differs from transport sender",
		));
	}
	if store.get_member(reporter)?.is_none() {
		return Err(HiveError::new(HiveErrorCode::NotMember, "reporter not a member"));
	}
	if now.saturating_sub(timestamp) > max_age_seconds {
		return Err(HiveError::new(HiveErrorCode::Stale, "report too old"));
	}
	if !limiter.check_and_record(reporter, limit, now) {
		return Err(HiveError::new(HiveErrorCode::RateLimited, "per-sender rate exceeded"));
	}
	let verified = gateway
		.verify_signature(now, signing_string, signature, reporter)
		.map_err(HiveError::from)?;
	if !verified {
		return Err(HiveError::new(HiveErrorCode::SignatureMismatch, "report signature"));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	use crate::gateway::test_util::MockHostRpc;
	use crate::store::Tier;

	fn node_id(tag: u8) -> String {
		format!("02{:02x}{}", tag, "ab".repeat(31))
	}

	#[test]
	fn test_rate_limiter_window() {
		let limiter = RateLimiter::new();
		let limit = RateLimit { count: 2, window_seconds: 60 };
		assert!(limiter.check_and_record("a", limit, 100));
		assert!(limiter.check_and_record("a", limit, 110));
		assert!(!limiter.check_and_record("a", limit, 120));
		// A different sender has its own window.
		assert!(limiter.check_and_record("b", limit, 120));
		// The window slides: the first entry falls out.
		assert!(limiter.check_and_record("a", limit, 161));
	}

	#[test]
	fn test_admission_gates_in_order() {
		let store = Store::open_in_memory().unwrap();
		let member = node_id(1);
		let gateway = Gateway::new(Arc::new(MockHostRpc::new(&member)));
		let limiter = RateLimiter::new();
		let limit = RateLimit { count: 10, window_seconds: 3600 };
		let signing = "hive:test:1";
		let sig = MockHostRpc::sign_for(&member, signing);

		// Identity binding first.
		let err = admit_report(
			&store, &gateway, &limiter, &node_id(2), &member, 100, 100, 3600, limit, signing, &sig,
		)
		.unwrap_err();
		assert_eq!(err.code, HiveErrorCode::IdentityMismatch);

		// Unknown reporter.
		let err = admit_report(
			&store, &gateway, &limiter, &member, &member, 100, 100, 3600, limit, signing, &sig,
		)
		.unwrap_err();
		assert_eq!(err.code, HiveErrorCode::NotMember);

		store.add_member(&member, Tier::Member, 0).unwrap();

		// Stale report.
		let err = admit_report(
			&store, &gateway, &limiter, &member, &member, 100, 5000, 3600, limit, signing, &sig,
		)
		.unwrap_err();
		assert_eq!(err.code, HiveErrorCode::Stale);

		// Bad signature.
		let err = admit_report(
			&store, &gateway, &limiter, &member, &member, 100, 100, 3600, limit, signing, "nope",
		)
		.unwrap_err();
		assert_eq!(err.code, HiveErrorCode::SignatureMismatch);

		// All gates pass.
		admit_report(
			&store, &gateway, &limiter, &member, &member, 100, 100, 3600, limit, signing, &sig,
		)
		.unwrap();
	}
}
