// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Liquidity needs advertised by members, ordered by urgency.

use std::sync::Arc;

use hive_proto::msgs::{LiquidityNeedMsg, LIQUIDITY_NEED_RATE_LIMIT};
use hive_proto::signing;
use log::debug;

use crate::error::HiveError;
use crate::gateway::Gateway;
use crate::gossip::{admit_report, RateLimiter};
use crate::store::fleet::{MemberHealth, MemberLiquidityState};
use crate::store::Store;

fn urgency_rank(urgency: &str) -> u8 {
	match urgency {
		"critical" => 0,
		"high" => 1,
		"medium" => 2,
		_ => 3,
	}
}

pub struct LiquidityCoordinator {
	store: Arc<Store>,
	gateway: Arc<Gateway>,
	limiter: RateLimiter,
}

impl LiquidityCoordinator {
	pub fn new(store: Arc<Store>, gateway: Arc<Gateway>) -> Self {
		LiquidityCoordinator { store, gateway, limiter: RateLimiter::new() }
	}

	/// One live need per (reporter, target); a newer report replaces the
	/// older row, so needs are naturally deduplicated.
	pub fn handle_need(
		&self, sender: &str, msg: &LiquidityNeedMsg, now: u64, max_age_seconds: u64,
	) -> Result<(), HiveError> {
		admit_report(
			&self.store,
			&self.gateway,
			&self.limiter,
			sender,
			&msg.reporter,
			msg.timestamp,
			now,
			max_age_seconds,
			LIQUIDITY_NEED_RATE_LIMIT,
			&signing::liquidity_need(msg),
			&msg.signature,
		)?;

		self.store.upsert_liquidity_need(msg)?;

		// A need is also a health signal for the reporter.
		let depleted = (msg.current_balance_pct < 0.2) as u32;
		let saturated = (msg.current_balance_pct > 0.8) as u32;
		self.store.upsert_member_liquidity_state(&MemberLiquidityState {
			peer_id: msg.reporter.clone(),
			depleted_count: depleted,
			saturated_count: saturated,
			rebalancing_active: msg.need_type == "rebalance",
			timestamp: now,
		})?;
		self.store.upsert_member_health(&MemberHealth {
			peer_id: msg.reporter.clone(),
			timestamp: now,
			overall_health: match msg.urgency.as_str() {
				"critical" => 25,
				"high" => 50,
				"medium" => 70,
				_ => 85,
			},
			needs_help: msg.urgency == "critical" || msg.urgency == "high",
			needs_inbound: msg.need_type == "inbound",
			needs_outbound: msg.need_type == "outbound",
			needs_channels: false,
		})?;

		debug!(
			"liquidity need from {}: {} {} sats ({})",
			&msg.reporter[..16],
			msg.need_type,
			msg.amount_sats,
			msg.urgency
		);
		Ok(())
	}

	/// Fresh needs, most urgent first, then newest.
	pub fn get_needs(&self, now: u64, max_age_seconds: u64) -> Result<Vec<LiquidityNeedMsg>, HiveError> {
		let since = now.saturating_sub(max_age_seconds);
		let mut needs = self.store.get_liquidity_needs(since)?;
		needs.sort_by(|a, b| {
			urgency_rank(&a.urgency)
				.cmp(&urgency_rank(&b.urgency))
				.then_with(|| b.timestamp.cmp(&a.timestamp))
		});
		Ok(needs)
	}

	pub fn prune(&self, older_than: u64, now: u64) -> Result<u32, HiveError> {
		self.limiter.prune(now, LIQUIDITY_NEED_RATE_LIMIT.window_seconds);
		self.store.prune_liquidity_needs(older_than)
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

	fn need(reporter: &str, target: u8, urgency: &str, ts: u64) -> LiquidityNeedMsg {
		let mut msg = LiquidityNeedMsg {
			reporter: reporter.to_string(),
			need_type: "inbound".into(),
			target: Some(node_id(target)),
			amount_sats: 250_000,
			urgency: urgency.into(),
			max_fee_ppm: 100,
			reason: "channel_depleted".into(),
			current_balance_pct: 0.08,
			timestamp: ts,
			signature: String::new(),
		};
		msg.signature = MockHostRpc::sign_for(reporter, &signing::liquidity_need(&msg));
		msg
	}

	#[test]
	fn test_needs_ordered_by_urgency() {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let gateway = Arc::new(Gateway::new(Arc::new(MockHostRpc::new(&node_id(1)))));
		let coordinator = LiquidityCoordinator::new(Arc::clone(&store), gateway);
		for tag in 2..=4 {
			store.add_member(&node_id(tag), Tier::Member, 0).unwrap();
		}

		coordinator.handle_need(&node_id(2), &need(&node_id(2), 10, "low", 100), 150, 3600).unwrap();
		coordinator
			.handle_need(&node_id(3), &need(&node_id(3), 11, "critical", 101), 150, 3600)
			.unwrap();
		coordinator
			.handle_need(&node_id(4), &need(&node_id(4), 12, "medium", 102), 150, 3600)
			.unwrap();

		let needs = coordinator.get_needs(150, 3600).unwrap();
		assert_eq!(needs.len(), 3);
		assert_eq!(needs[0].urgency, "critical");
		assert_eq!(needs[1].urgency, "medium");
		assert_eq!(needs[2].urgency, "low");
	}

	#[test]
	fn test_newer_need_replaces_older() {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let gateway = Arc::new(Gateway::new(Arc::new(MockHostRpc::new(&node_id(1)))));
		let coordinator = LiquidityCoordinator::new(Arc::clone(&store), gateway);
		let reporter = node_id(2);
		store.add_member(&reporter, Tier::Member, 0).unwrap();

		coordinator.handle_need(&reporter, &need(&reporter, 10, "low", 100), 150, 3600).unwrap();
		let mut updated = need(&reporter, 10, "high", 120);
		updated.amount_sats = 400_000;
		updated.signature =
			MockHostRpc::sign_for(&reporter, &signing::liquidity_need(&updated));
		coordinator.handle_need(&reporter, &updated, 150, 3600).unwrap();

		let needs = coordinator.get_needs(150, 3600).unwrap();
		assert_eq!(needs.len(), 1);
		assert_eq!(needs[0].amount_sats, 400_000);
		assert_eq!(needs[0].urgency, "high");
	}
}
