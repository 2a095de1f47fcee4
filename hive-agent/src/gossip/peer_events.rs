// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Channel event observations from hive members. Remote-close events make
//! their subject a candidate for cooperative expansion.

use std::sync::Arc;

use hive_proto::msgs::{PeerEventReport, PEER_AVAILABLE_RATE_LIMIT};
use hive_proto::signing;
use log::debug;

use crate::error::HiveError;
use crate::gateway::Gateway;
use crate::gossip::{admit_report, RateLimiter};
use crate::store::Store;

/// What the service should do with an admitted event.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEventAction {
	None,
	/// The peer became available for a new channel; the expansion manager
	/// should evaluate a round.
	EvaluateExpansion { target: String, event_type: String, reporter: String, capacity_sats: u64 },
}

pub struct PeerEventsManager {
	store: Arc<Store>,
	gateway: Arc<Gateway>,
	limiter: RateLimiter,
}

impl PeerEventsManager {
	pub fn new(store: Arc<Store>, gateway: Arc<Gateway>) -> Self {
		PeerEventsManager { store, gateway, limiter: RateLimiter::new() }
	}

	pub fn handle_event(
		&self, sender: &str, msg: &PeerEventReport, now: u64, max_age_seconds: u64,
	) -> Result<PeerEventAction, HiveError> {
		admit_report(
			&self.store,
			&self.gateway,
			&self.limiter,
			sender,
			&msg.reporter,
			msg.timestamp,
			now,
			max_age_seconds,
			PEER_AVAILABLE_RATE_LIMIT,
			&signing::peer_event(msg),
			&msg.signature,
		)?;

		self.store.store_peer_event(msg)?;
		debug!(
			"peer event {} from {} about {}",
			msg.event_type,
			&msg.reporter[..16],
			&msg.peer[..16]
		);

		// A remote close frees the peer for a fresh channel from the fleet.
		if msg.event_type == "remote_close" || msg.event_type == "peer_available" {
			return Ok(PeerEventAction::EvaluateExpansion {
				target: msg.peer.clone(),
				event_type: msg.event_type.clone(),
				reporter: msg.reporter.clone(),
				capacity_sats: msg.capacity_sats,
			});
		}
		Ok(PeerEventAction::None)
	}

	/// Records one of our own observations, bypassing transport gates.
	pub fn record_own_event(&self, msg: &PeerEventReport) -> Result<(), HiveError> {
		self.store.store_peer_event(msg)
	}

	pub fn prune(&self, older_than: u64, now: u64) -> Result<u32, HiveError> {
		self.limiter.prune(now, PEER_AVAILABLE_RATE_LIMIT.window_seconds);
		self.store.prune_peer_events(older_than)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::gateway::test_util::MockHostRpc;
	use crate::store::Tier;

	fn node_id(tag: u8) -> String {
		format!("02{:02x}{}", tag, "ab".repeat(31))
	}

	fn event(reporter: &str, peer: &str, event_type: &str, ts: u64) -> PeerEventReport {
		let mut msg = PeerEventReport {
			reporter: reporter.to_string(),
			peer: peer.to_string(),
			event_type: event_type.to_string(),
			timestamp: ts,
			channel_id: Some("100x1x0".into()),
			capacity_sats: 3_000_000,
			duration_days: 90,
			total_revenue_sats: 1200,
			net_pnl_sats: 900,
			forward_count: 40,
			forward_volume_sats: 2_000_000,
			our_fee_ppm: 100,
			their_fee_ppm: 80,
			opener: Some(reporter.to_string()),
			closer: Some(peer.to_string()),
			reason: None,
			signature: String::new(),
		};
		msg.signature = MockHostRpc::sign_for(reporter, &signing::peer_event(&msg));
		msg
	}

	#[test]
	fn test_remote_close_triggers_expansion_evaluation() {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let gateway = Arc::new(Gateway::new(Arc::new(MockHostRpc::new(&node_id(1)))));
		let manager = PeerEventsManager::new(Arc::clone(&store), gateway);
		let reporter = node_id(2);
		store.add_member(&reporter, Tier::Member, 0).unwrap();

		let action = manager
			.handle_event(&reporter, &event(&reporter, &node_id(9), "remote_close", 100), 150, 3600)
			.unwrap();
		match action {
			PeerEventAction::EvaluateExpansion { target, capacity_sats, .. } => {
				assert_eq!(target, node_id(9));
				assert_eq!(capacity_sats, 3_000_000);
			},
			other => panic!("expected expansion evaluation, got {:?}", other),
		}

		// The event also landed in the summary used by quality scoring.
		let summary = store.get_peer_event_summary(&node_id(9), 0).unwrap();
		assert_eq!(summary.event_count, 1);
		assert_eq!(summary.remote_close_count, 1);
	}

	#[test]
	fn test_ordinary_event_stores_without_action() {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let gateway = Arc::new(Gateway::new(Arc::new(MockHostRpc::new(&node_id(1)))));
		let manager = PeerEventsManager::new(Arc::clone(&store), gateway);
		let reporter = node_id(2);
		store.add_member(&reporter, Tier::Member, 0).unwrap();

		let action = manager
			.handle_event(&reporter, &event(&reporter, &node_id(9), "channel_open", 100), 150, 3600)
			.unwrap();
		assert_eq!(action, PeerEventAction::None);
	}

	#[test]
	fn test_non_member_event_dropped() {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let gateway = Arc::new(Gateway::new(Arc::new(MockHostRpc::new(&node_id(1)))));
		let manager = PeerEventsManager::new(Arc::clone(&store), gateway);
		let stranger = node_id(7);

		let err = manager
			.handle_event(&stranger, &event(&stranger, &node_id(9), "remote_close", 100), 150, 3600)
			.unwrap_err();
		assert_eq!(err.code, crate::error::HiveErrorCode::NotMember);
		assert_eq!(store.get_peer_event_summary(&node_id(9), 0).unwrap().event_count, 0);
	}
}
