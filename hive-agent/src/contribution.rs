// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Forward-event crediting for contribution ratios and anti-leech signals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{Datelike, TimeZone, Timelike, Utc};
use log::{debug, warn};

use crate::error::HiveError;
use crate::gateway::Gateway;
use crate::store::contribution::ContributionDirection;
use crate::store::Store;

const CHANNEL_MAP_REFRESH_SECONDS: u64 = 300;
const MAX_CONTRIB_EVENTS_PER_PEER_PER_HOUR: u32 = 120;
const MAX_EVENT_MSAT: u64 = 100_000_000_000_000;

pub const LEECH_WARN_RATIO: f64 = 0.5;
pub const LEECH_BAN_RATIO: f64 = 0.4;
pub const LEECH_WINDOW_DAYS: u64 = 7;

/// A settled forward observed by the host hook.
#[derive(Debug, Clone)]
pub struct ForwardEvent {
	pub in_channel: String,
	pub out_channel: String,
	pub in_msat: u64,
	pub out_msat: u64,
	pub settled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeechStatus {
	pub is_leech: bool,
	pub ratio: f64,
	/// Set when the low ratio persisted a full window and the configuration
	/// allows auto-filing a ban proposal. The caller escalates; this module
	/// only flags.
	pub ban_trigger: bool,
}

pub struct ContributionManager {
	store: Arc<Store>,
	gateway: Arc<Gateway>,
	our_id: String,
	channel_map: Mutex<(HashMap<String, String>, u64)>,
	rate: Mutex<HashMap<String, (u64, u32)>>,
}

impl ContributionManager {
	pub fn new(store: Arc<Store>, gateway: Arc<Gateway>, our_id: String) -> Self {
		ContributionManager {
			store,
			gateway,
			our_id,
			channel_map: Mutex::new((HashMap::new(), 0)),
			rate: Mutex::new(HashMap::new()),
		}
	}

	fn lookup_peer(&self, channel_id: &str, now: u64) -> Option<String> {
		let mut guard = self.channel_map.lock().expect("lock poisoned");
		let (map, last_refresh) = &mut *guard;
		if now.saturating_sub(*last_refresh) >= CHANNEL_MAP_REFRESH_SECONDS || map.is_empty() {
			match self.gateway.list_peer_channels(now, None) {
				Ok(channels) => {
					map.clear();
					for channel in channels {
						if let Some(scid) = channel.short_channel_id {
							map.insert(scid, channel.peer_id);
						}
					}
					*last_refresh = now;
				},
				Err(e) => warn!("channel map refresh failed: {}", e),
			}
		}
		map.get(channel_id).cloned()
	}

	fn allow_record(&self, peer_id: &str, now: u64) -> bool {
		let mut rate = self.rate.lock().expect("lock poisoned");
		let (window_start, count) = rate.get(peer_id).copied().unwrap_or((now, 0));
		let (window_start, count) =
			if now.saturating_sub(window_start) >= 3600 { (now, 0) } else { (window_start, count) };
		if count >= MAX_CONTRIB_EVENTS_PER_PEER_PER_HOUR {
			return false;
		}
		rate.insert(peer_id.to_string(), (window_start, count + 1));
		true
	}

	/// Credits a settled forward to the member peers on either side.
	/// The inbound peer gave us work (`forwarded`), the outbound peer took
	/// work (`received`).
	pub fn handle_forward_event(
		&self, event: &ForwardEvent, now: u64, ban_autotrigger_enabled: bool,
	) -> Result<Vec<(String, LeechStatus)>, HiveError> {
		if !event.settled {
			return Ok(Vec::new());
		}

		let amount_msat = event.in_msat.min(event.out_msat);
		if amount_msat == 0 || amount_msat > MAX_EVENT_MSAT {
			return Ok(Vec::new());
		}
		let amount_sats = amount_msat / 1000;
		if amount_sats == 0 {
			return Ok(Vec::new());
		}

		let in_peer = self.lookup_peer(&event.in_channel, now);
		let out_peer = self.lookup_peer(&event.out_channel, now);
		let mut statuses = Vec::new();

		// Every settled forward is our routing revenue and a flow sample
		// per touched channel.
		let fee_sats = event.in_msat.saturating_sub(event.out_msat) / 1000;
		if fee_sats > 0 {
			self.store.record_pool_revenue(
				&self.our_id,
				fee_sats,
				Some(&event.in_channel),
				now,
			)?;
		}
		let (hour, day_of_week) = hour_and_weekday(now);
		self.store.record_flow_sample(&event.in_channel, hour, day_of_week, amount_sats, 0, now)?;
		self.store.record_flow_sample(&event.out_channel, hour, day_of_week, 0, amount_sats, now)?;

		if let Some(peer) = &in_peer {
			if Some(peer) != out_peer.as_ref() && self.is_admitted(peer)? {
				if self.allow_record(peer, now) {
					self.store.record_contribution(
						peer,
						ContributionDirection::Forwarded,
						amount_sats,
						now,
					)?;
					statuses.push((peer.clone(), self.check_leech(peer, now, ban_autotrigger_enabled)?));
				}
			}
		}

		if let Some(peer) = &out_peer {
			if Some(peer) != in_peer.as_ref() && self.is_admitted(peer)? {
				if self.allow_record(peer, now) {
					self.store.record_contribution(
						peer,
						ContributionDirection::Received,
						amount_sats,
						now,
					)?;
					statuses.push((peer.clone(), self.check_leech(peer, now, ban_autotrigger_enabled)?));
				}
			}
		}

		Ok(statuses)
	}

	fn is_admitted(&self, peer_id: &str) -> Result<bool, HiveError> {
		Ok(self.store.get_member(peer_id)?.is_some())
	}

	pub fn contribution_ratio(&self, peer_id: &str, now: u64, window_days: u64) -> Result<f64, HiveError> {
		let since = now.saturating_sub(window_days * 86400);
		Ok(self.store.get_contribution_stats(peer_id, since)?.ratio())
	}

	/// Evaluates leech standing over the 7-day window. A ratio below the ban
	/// line starts (or continues) the flag clock; only after a full window of
	/// sustained low ratio does `ban_trigger` fire, and only when allowed.
	pub fn check_leech(
		&self, peer_id: &str, now: u64, ban_autotrigger_enabled: bool,
	) -> Result<LeechStatus, HiveError> {
		let ratio = self.contribution_ratio(peer_id, now, LEECH_WINDOW_DAYS)?;

		if ratio > LEECH_BAN_RATIO {
			self.store.clear_leech_flag(peer_id)?;
			return Ok(LeechStatus { is_leech: ratio < LEECH_WARN_RATIO, ratio, ban_trigger: false });
		}

		let flag = self.store.get_leech_flag(peer_id)?;
		let low_since = match &flag {
			Some(f) => f.low_since_ts,
			None => {
				self.store.set_leech_flag(peer_id, now, false)?;
				return Ok(LeechStatus { is_leech: true, ratio, ban_trigger: false });
			},
		};

		let already_triggered = flag.map(|f| f.ban_triggered).unwrap_or(false);
		let window_elapsed = now.saturating_sub(low_since) >= LEECH_WINDOW_DAYS * 86400;
		if window_elapsed && !already_triggered {
			self.store.set_leech_flag(peer_id, low_since, true)?;
			if ban_autotrigger_enabled {
				debug!("leech ban trigger for {} (ratio {:.2})", &peer_id[..16], ratio);
				return Ok(LeechStatus { is_leech: true, ratio, ban_trigger: true });
			}
			warn!("leech flagged for {} (ratio {:.2}), autotrigger disabled", &peer_id[..16], ratio);
		}

		Ok(LeechStatus { is_leech: true, ratio, ban_trigger: false })
	}
}

fn hour_and_weekday(now: u64) -> (u32, u32) {
	let dt = Utc.timestamp_opt(now as i64, 0).single().unwrap_or_else(Utc::now);
	(dt.hour(), dt.weekday().num_days_from_monday())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::gateway::test_util::MockHostRpc;
	use crate::store::Tier;

	fn node_id(tag: u8) -> String {
		format!("02{:02x}{}", tag, "ab".repeat(31))
	}

	fn setup(member: &str) -> (ContributionManager, Arc<Store>) {
		let store = Arc::new(Store::open_in_memory().unwrap());
		store.add_member(member, Tier::Member, 0).unwrap();
		let rpc = MockHostRpc::new(&node_id(99));
		rpc.channels.lock().unwrap().push(crate::gateway::PeerChannel {
			peer_id: member.to_string(),
			short_channel_id: Some("100x1x0".into()),
			state: "CHANNELD_NORMAL".into(),
			total_sat: 1_000_000,
			spendable_sat: 500_000,
		});
		let gateway = Arc::new(Gateway::new(Arc::new(rpc)));
		(ContributionManager::new(Arc::clone(&store), gateway, node_id(99)), store)
	}

	#[test]
	fn test_forward_credits_inbound_member() {
		let member = node_id(1);
		let (manager, store) = setup(&member);

		let event = ForwardEvent {
			in_channel: "100x1x0".into(),
			out_channel: "999x9x9".into(),
			in_msat: 2_000_000,
			out_msat: 1_999_000,
			settled: true,
		};
		manager.handle_forward_event(&event, 1000, false).unwrap();

		let stats = store.get_contribution_stats(&member, 0).unwrap();
		assert_eq!(stats.forwarded_sats, 1999);
		assert_eq!(stats.received_sats, 0);
	}

	#[test]
	fn test_unsettled_forward_ignored() {
		let member = node_id(1);
		let (manager, store) = setup(&member);
		let event = ForwardEvent {
			in_channel: "100x1x0".into(),
			out_channel: "999x9x9".into(),
			in_msat: 2_000_000,
			out_msat: 1_999_000,
			settled: false,
		};
		manager.handle_forward_event(&event, 1000, false).unwrap();
		assert_eq!(store.get_contribution_stats(&member, 0).unwrap().forwarded_sats, 0);
	}

	#[test]
	fn test_leech_flag_set_and_cleared() {
		let member = node_id(1);
		let (manager, store) = setup(&member);

		// Heavy receiver: ratio well below the ban line.
		store
			.record_contribution(&member, ContributionDirection::Received, 10_000, 900)
			.unwrap();
		store
			.record_contribution(&member, ContributionDirection::Forwarded, 1_000, 900)
			.unwrap();

		let status = manager.check_leech(&member, 1000, false).unwrap();
		assert!(status.is_leech);
		assert!(!status.ban_trigger);
		assert!(store.get_leech_flag(&member).unwrap().is_some());

		// Balance restored: flag cleared.
		store
			.record_contribution(&member, ContributionDirection::Forwarded, 20_000, 950)
			.unwrap();
		let status = manager.check_leech(&member, 1000, false).unwrap();
		assert!(!status.is_leech);
		assert!(store.get_leech_flag(&member).unwrap().is_none());
	}

	#[test]
	fn test_leech_ban_trigger_gated_by_config() {
		let member = node_id(1);
		let (manager, store) = setup(&member);
		store
			.record_contribution(&member, ContributionDirection::Received, 10_000, 100)
			.unwrap();

		// Flag starts at t=1000.
		manager.check_leech(&member, 1000, true).unwrap();
		let after_window = 1000 + LEECH_WINDOW_DAYS * 86400;

		// With autotrigger enabled the window elapsing fires exactly once.
		let status = manager.check_leech(&member, after_window, true).unwrap();
		assert!(status.ban_trigger);
		let status = manager.check_leech(&member, after_window + 10, true).unwrap();
		assert!(!status.ban_trigger);
	}

	#[test]
	fn test_leech_flag_only_when_autotrigger_disabled() {
		let member = node_id(1);
		let (manager, store) = setup(&member);
		store
			.record_contribution(&member, ContributionDirection::Received, 10_000, 100)
			.unwrap();

		manager.check_leech(&member, 1000, false).unwrap();
		let after_window = 1000 + LEECH_WINDOW_DAYS * 86400;
		let status = manager.check_leech(&member, after_window, false).unwrap();
		assert!(!status.ban_trigger);
		assert!(store.get_leech_flag(&member).unwrap().unwrap().ban_triggered);
	}
}
