// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Shared routing intelligence from member-reported path probes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use hive_proto::msgs::{RouteProbe, ROUTE_PROBE_RATE_LIMIT};
use hive_proto::signing;
use log::debug;

use crate::error::HiveError;
use crate::gateway::Gateway;
use crate::gossip::{admit_report, RateLimiter};
use crate::store::Store;

/// Aggregated statistics for one `(destination, path)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PathStats {
	pub destination: String,
	pub path: Vec<String>,
	pub probe_count: u32,
	pub success_count: u32,
	pub total_latency_ms: u64,
	pub total_fee_ppm: u64,
	pub avg_capacity_sats: u64,
	pub reporters: HashSet<String>,
	pub last_success_time: u64,
}

impl PathStats {
	pub fn success_rate(&self) -> f64 {
		if self.probe_count == 0 {
			return 0.0;
		}
		self.success_count as f64 / self.probe_count as f64
	}

	pub fn avg_latency_ms(&self) -> u64 {
		if self.success_count == 0 {
			return 0;
		}
		self.total_latency_ms / self.success_count as u64
	}

	pub fn avg_fee_ppm(&self) -> u64 {
		if self.success_count == 0 {
			return 0;
		}
		self.total_fee_ppm / self.success_count as u64
	}
}

pub struct RouteIntelManager {
	store: Arc<Store>,
	gateway: Arc<Gateway>,
	limiter: RateLimiter,
	path_stats: Mutex<HashMap<(String, Vec<String>), PathStats>>,
}

impl RouteIntelManager {
	pub fn new(store: Arc<Store>, gateway: Arc<Gateway>) -> Self {
		RouteIntelManager {
			store,
			gateway,
			limiter: RateLimiter::new(),
			path_stats: Mutex::new(HashMap::new()),
		}
	}

	pub fn handle_probe(
		&self, sender: &str, msg: &RouteProbe, now: u64, max_age_seconds: u64,
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
			ROUTE_PROBE_RATE_LIMIT,
			&signing::route_probe(msg),
			&msg.signature,
		)?;

		self.store.store_route_probe(msg)?;
		self.update_path_stats(msg);
		debug!(
			"route probe from {} to {}: {}",
			&msg.reporter[..16],
			&msg.destination[..16],
			if msg.success { "success" } else { "failed" }
		);
		Ok(())
	}

	fn update_path_stats(&self, msg: &RouteProbe) {
		let key = (msg.destination.clone(), msg.path.clone());
		let mut stats = self.path_stats.lock().expect("lock poisoned");
		let entry = stats.entry(key).or_insert_with(|| PathStats {
			destination: msg.destination.clone(),
			path: msg.path.clone(),
			probe_count: 0,
			success_count: 0,
			total_latency_ms: 0,
			total_fee_ppm: 0,
			avg_capacity_sats: 0,
			reporters: HashSet::new(),
			last_success_time: 0,
		});

		entry.probe_count += 1;
		entry.reporters.insert(msg.reporter.clone());
		if msg.success {
			entry.success_count += 1;
			entry.total_latency_ms += msg.latency_ms as u64;
			entry.total_fee_ppm += msg.total_fee_ppm as u64;
			entry.last_success_time = entry.last_success_time.max(msg.timestamp);
			if msg.estimated_capacity_sats > 0 {
				entry.avg_capacity_sats = if entry.avg_capacity_sats == 0 {
					msg.estimated_capacity_sats
				} else {
					// Smoothed toward the newest estimate.
					(entry.avg_capacity_sats * 3 + msg.estimated_capacity_sats) / 4
				};
			}
		}
	}

	/// Rebuilds path statistics from persisted probes for a destination.
	pub fn rebuild_destination(&self, destination: &str, since: u64) -> Result<u32, HiveError> {
		let probes = self.store.get_route_probes(destination, since)?;
		let count = probes.len() as u32;
		for probe in &probes {
			self.update_path_stats(probe);
		}
		Ok(count)
	}

	pub fn best_paths(&self, destination: &str, limit: usize) -> Vec<PathStats> {
		let stats = self.path_stats.lock().expect("lock poisoned");
		let mut paths: Vec<PathStats> =
			stats.values().filter(|p| p.destination == destination).cloned().collect();
		paths.sort_by(|a, b| {
			b.success_rate()
				.partial_cmp(&a.success_rate())
				.unwrap_or(std::cmp::Ordering::Equal)
				.then_with(|| a.avg_fee_ppm().cmp(&b.avg_fee_ppm()))
		});
		paths.truncate(limit);
		paths
	}

	pub fn prune(&self, older_than: u64, now: u64) -> Result<u32, HiveError> {
		self.limiter.prune(now, ROUTE_PROBE_RATE_LIMIT.window_seconds);
		self.path_stats
			.lock()
			.expect("lock poisoned")
			.retain(|_, stats| stats.last_success_time >= older_than || stats.success_count == 0);
		self.store.prune_route_probes(older_than)
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

	fn probe(
		reporter: &str, destination: &str, path: Vec<String>, success: bool, fee: u32, ts: u64,
	) -> RouteProbe {
		let mut msg = RouteProbe {
			reporter: reporter.to_string(),
			destination: destination.to_string(),
			path,
			timestamp: ts,
			success,
			latency_ms: 250,
			failure_reason: if success { String::new() } else { "temporary_failure".into() },
			failure_hop: if success { -1 } else { 1 },
			estimated_capacity_sats: 2_000_000,
			total_fee_ppm: fee,
			amount_probed_sats: 100_000,
			signature: String::new(),
		};
		msg.signature = MockHostRpc::sign_for(reporter, &signing::route_probe(&msg));
		msg
	}

	fn manager() -> (RouteIntelManager, Arc<Store>) {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let gateway = Arc::new(Gateway::new(Arc::new(MockHostRpc::new(&node_id(1)))));
		(RouteIntelManager::new(Arc::clone(&store), gateway), store)
	}

	#[test]
	fn test_path_stats_accumulate() {
		let (manager, store) = manager();
		let reporter = node_id(2);
		store.add_member(&reporter, Tier::Member, 0).unwrap();
		let destination = node_id(9);
		let path = vec![node_id(3), node_id(9)];

		manager
			.handle_probe(
				&reporter,
				&probe(&reporter, &destination, path.clone(), true, 120, 100),
				150,
				3600,
			)
			.unwrap();
		manager
			.handle_probe(
				&reporter,
				&probe(&reporter, &destination, path.clone(), false, 0, 110),
				150,
				3600,
			)
			.unwrap();

		let best = manager.best_paths(&destination, 5);
		assert_eq!(best.len(), 1);
		assert_eq!(best[0].probe_count, 2);
		assert_eq!(best[0].success_count, 1);
		assert_eq!(best[0].success_rate(), 0.5);
		assert_eq!(best[0].avg_fee_ppm(), 120);
	}

	#[test]
	fn test_best_paths_ranked_by_success_then_fee() {
		let (manager, store) = manager();
		let reporter = node_id(2);
		store.add_member(&reporter, Tier::Member, 0).unwrap();
		let destination = node_id(9);
		let cheap = vec![node_id(3), node_id(9)];
		let pricey = vec![node_id(4), node_id(9)];

		manager
			.handle_probe(
				&reporter,
				&probe(&reporter, &destination, pricey.clone(), true, 900, 100),
				150,
				3600,
			)
			.unwrap();
		manager
			.handle_probe(
				&reporter,
				&probe(&reporter, &destination, cheap.clone(), true, 50, 101),
				150,
				3600,
			)
			.unwrap();

		let best = manager.best_paths(&destination, 5);
		assert_eq!(best[0].path, cheap);
	}

	#[test]
	fn test_rebuild_from_store() {
		let (manager, store) = manager();
		let reporter = node_id(2);
		store.add_member(&reporter, Tier::Member, 0).unwrap();
		let destination = node_id(9);
		let path = vec![node_id(3), node_id(9)];
		store
			.store_route_probe(&probe(&reporter, &destination, path.clone(), true, 100, 100))
			.unwrap();

		let fresh = manager;
		assert_eq!(fresh.rebuild_destination(&destination, 0).unwrap(), 1);
		assert_eq!(fresh.best_paths(&destination, 5).len(), 1);
	}
}
