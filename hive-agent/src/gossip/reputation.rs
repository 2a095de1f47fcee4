// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Collective reputation for external peers.
//!
//! Reports from multiple members are aggregated with skepticism: reports
//! deviating from the median beyond a threshold are dropped (except our
//! own), our own observations weigh double, and confidence grows with the
//! number of distinct reporters. No single reporter can move an aggregate
//! far.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use hive_proto::msgs::{
	RateLimit, ReputationReport, PEER_REPUTATION_RATE_LIMIT, REPUTATION_STALENESS_SECONDS,
	VALID_WARNINGS,
};
use hive_proto::signing;
use log::debug;

use crate::error::HiveError;
use crate::gateway::Gateway;
use crate::gossip::{admit_report, RateLimiter};
use crate::store::Store;

/// Distinct reporters needed for high confidence.
pub const MIN_REPORTERS_FOR_CONFIDENCE: usize = 3;
/// Deviation from the median beyond which a report is an outlier.
pub const OUTLIER_DEVIATION_THRESHOLD: f64 = 0.2;
/// Our own observations count double.
const OUR_DATA_WEIGHT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
	Low,
	Medium,
	High,
}

impl Confidence {
	pub fn as_str(&self) -> &'static str {
		match self {
			Confidence::Low => "low",
			Confidence::Medium => "medium",
			Confidence::High => "high",
		}
	}
}

/// Derived, in-memory aggregate for one external peer.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedReputation {
	pub peer_id: String,
	pub avg_uptime: f64,
	pub avg_htlc_success: f64,
	pub avg_fee_stability: f64,
	pub avg_response_time_ms: u32,
	pub total_force_closes: u32,
	pub reporters: HashSet<String>,
	pub report_count: usize,
	pub warnings: HashMap<String, u32>,
	pub confidence: Confidence,
	pub last_update: u64,
	pub reputation_score: u8,
}

pub struct ReputationAggregator {
	store: Arc<Store>,
	gateway: Arc<Gateway>,
	our_id: String,
	limiter: RateLimiter,
	aggregated: Mutex<HashMap<String, AggregatedReputation>>,
}

impl ReputationAggregator {
	pub fn new(store: Arc<Store>, gateway: Arc<Gateway>, our_id: String) -> Self {
		ReputationAggregator {
			store,
			gateway,
			our_id,
			limiter: RateLimiter::new(),
			aggregated: Mutex::new(HashMap::new()),
		}
	}

	pub fn rate_limit(&self) -> RateLimit {
		PEER_REPUTATION_RATE_LIMIT
	}

	/// Admits, persists, and re-aggregates a reputation report.
	pub fn handle_report(
		&self, sender: &str, msg: &ReputationReport, now: u64, max_age_seconds: u64,
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
			PEER_REPUTATION_RATE_LIMIT,
			&signing::peer_reputation(msg),
			&msg.signature,
		)?;

		self.store.store_peer_reputation(msg)?;
		self.update_aggregation(&msg.peer, now)?;
		debug!("reputation report from {} about {}", short(&msg.reporter), short(&msg.peer));
		Ok(())
	}

	/// Records our own observation without transport-level gates.
	pub fn record_own_report(&self, msg: &ReputationReport, now: u64) -> Result<(), HiveError> {
		self.store.store_peer_reputation(msg)?;
		self.update_aggregation(&msg.peer, now)
	}

	/// Rebuilds every aggregation from disk. Startup path.
	pub fn rebuild_from_store(&self, now: u64) -> Result<usize, HiveError> {
		let since = now.saturating_sub(REPUTATION_STALENESS_SECONDS);
		let subjects = self.store.get_reputation_subjects(since)?;
		let count = subjects.len();
		for peer in subjects {
			self.update_aggregation(&peer, now)?;
		}
		Ok(count)
	}

	fn update_aggregation(&self, peer_id: &str, now: u64) -> Result<(), HiveError> {
		let since = now.saturating_sub(REPUTATION_STALENESS_SECONDS);
		let reports = self.store.get_reputation_reports(peer_id, since)?;

		if reports.is_empty() {
			self.aggregated.lock().expect("lock poisoned").remove(peer_id);
			return Ok(());
		}

		let filtered = filter_outliers(&reports, &self.our_id);

		// Weight our own data double by counting it twice.
		let mut weighted: Vec<&ReputationReport> = Vec::with_capacity(filtered.len() + 1);
		for report in &filtered {
			weighted.push(report);
			if report.reporter == self.our_id {
				for _ in 1..OUR_DATA_WEIGHT {
					weighted.push(report);
				}
			}
		}

		let avg_uptime = mean(weighted.iter().map(|r| r.uptime_pct));
		let avg_htlc = mean(weighted.iter().map(|r| r.htlc_success_rate));
		let avg_fee_stability = mean(weighted.iter().map(|r| r.fee_stability));
		let avg_response =
			mean(weighted.iter().map(|r| r.response_time_ms as f64)).round() as u32;
		let force_closes: u32 = filtered.iter().map(|r| r.force_close_count).sum();

		let mut warnings: HashMap<String, u32> = HashMap::new();
		for report in &filtered {
			for warning in &report.warnings {
				if VALID_WARNINGS.contains(&warning.as_str()) {
					*warnings.entry(warning.clone()).or_insert(0) += 1;
				}
			}
		}

		let reporters: HashSet<String> =
			filtered.iter().map(|r| r.reporter.clone()).collect();
		let confidence = if reporters.len() >= MIN_REPORTERS_FOR_CONFIDENCE {
			Confidence::High
		} else if reporters.len() == 2 {
			Confidence::Medium
		} else {
			Confidence::Low
		};

		// Score 0-100: uptime and HTLC success dominate, fee stability
		// helps, force closes and distinct warnings penalize.
		let uptime_score = avg_uptime * 30.0;
		let htlc_score = avg_htlc * 30.0;
		let fee_score = avg_fee_stability * 20.0;
		let force_close_penalty = (force_closes as f64 * 5.0).min(20.0);
		let warning_penalty = (warnings.len() as f64 * 2.0).min(10.0);
		let score = (uptime_score + htlc_score + fee_score
			- force_close_penalty
			- warning_penalty)
			.clamp(0.0, 100.0) as u8;

		let last_update = filtered.iter().map(|r| r.timestamp).max().unwrap_or(0);

		self.aggregated.lock().expect("lock poisoned").insert(
			peer_id.to_string(),
			AggregatedReputation {
				peer_id: peer_id.to_string(),
				avg_uptime,
				avg_htlc_success: avg_htlc,
				avg_fee_stability,
				avg_response_time_ms: avg_response,
				total_force_closes: force_closes,
				reporters,
				report_count: filtered.len(),
				warnings,
				confidence,
				last_update,
				reputation_score: score,
			},
		);
		Ok(())
	}

	pub fn get_reputation(&self, peer_id: &str) -> Option<AggregatedReputation> {
		self.aggregated.lock().expect("lock poisoned").get(peer_id).cloned()
	}

	pub fn tracked_peer_count(&self) -> usize {
		self.aggregated.lock().expect("lock poisoned").len()
	}

	/// Drops stale aggregations and prunes the backing table.
	pub fn cleanup_stale(&self, now: u64) -> Result<u32, HiveError> {
		let cutoff = now.saturating_sub(REPUTATION_STALENESS_SECONDS);
		self.aggregated
			.lock()
			.expect("lock poisoned")
			.retain(|_, agg| agg.last_update >= cutoff);
		self.store.prune_peer_reputation(cutoff)
	}

	pub fn prune_rate_windows(&self, now: u64) {
		self.limiter.prune(now, PEER_REPUTATION_RATE_LIMIT.window_seconds);
	}
}

/// Median-based outlier rejection on the core metrics. With fewer than three
/// reports there is nothing to vote with; our own report always survives.
fn filter_outliers<'a>(
	reports: &'a [ReputationReport], our_id: &str,
) -> Vec<&'a ReputationReport> {
	if reports.len() < 3 {
		return reports.iter().collect();
	}

	let median_uptime = median(reports.iter().map(|r| r.uptime_pct));
	let median_htlc = median(reports.iter().map(|r| r.htlc_success_rate));

	let filtered: Vec<&ReputationReport> = reports
		.iter()
		.filter(|r| {
			let uptime_dev = (r.uptime_pct - median_uptime).abs();
			let htlc_dev = (r.htlc_success_rate - median_htlc).abs();
			(uptime_dev <= OUTLIER_DEVIATION_THRESHOLD && htlc_dev <= OUTLIER_DEVIATION_THRESHOLD)
				|| r.reporter == our_id
		})
		.collect();

	if filtered.is_empty() {
		reports.iter().collect()
	} else {
		filtered
	}
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
	let collected: Vec<f64> = values.collect();
	if collected.is_empty() {
		return 0.0;
	}
	collected.iter().sum::<f64>() / collected.len() as f64
}

fn median(values: impl Iterator<Item = f64>) -> f64 {
	let mut collected: Vec<f64> = values.collect();
	collected.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
	if collected.is_empty() {
		return 0.0;
	}
	let mid = collected.len() / 2;
	if collected.len() % 2 == 0 {
		(collected[mid - 1] + collected[mid]) / 2.0
	} else {
		collected[mid]
	}
}

fn short(peer_id: &str) -> &str {
	&peer_id[..peer_id.len().min(16)]
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::gateway::test_util::MockHostRpc;
	use crate::store::Tier;

	fn node_id(tag: u8) -> String {
		format!("02{:02x}{}", tag, "ab".repeat(31))
	}

	fn report(reporter: &str, peer: &str, uptime: f64, htlc: f64, ts: u64) -> ReputationReport {
		let mut msg = ReputationReport {
			reporter: reporter.to_string(),
			peer: peer.to_string(),
			timestamp: ts,
			uptime_pct: uptime,
			response_time_ms: 100,
			force_close_count: 0,
			fee_stability: 1.0,
			htlc_success_rate: htlc,
			channel_age_days: 60,
			total_routed_sats: 1_000_000,
			warnings: vec![],
			observation_days: 7,
			signature: String::new(),
		};
		msg.signature = MockHostRpc::sign_for(reporter, &signing::peer_reputation(&msg));
		msg
	}

	fn aggregator(our_id: &str) -> (ReputationAggregator, Arc<Store>) {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let gateway = Arc::new(Gateway::new(Arc::new(MockHostRpc::new(our_id))));
		(ReputationAggregator::new(Arc::clone(&store), gateway, our_id.to_string()), store)
	}

	#[test]
	fn test_outlier_rejected_and_confidence_medium() {
		let our_id = node_id(1);
		let (aggregator, store) = aggregator(&our_id);
		let peer = node_id(9);
		for tag in 2..=4 {
			store.add_member(&node_id(tag), Tier::Member, 0).unwrap();
		}

		// Three reports with uptimes 0.95, 0.93, 0.50: the 0.50 report is
		// more than 0.20 from the median and is dropped.
		aggregator
			.handle_report(&node_id(2), &report(&node_id(2), &peer, 0.95, 0.99, 100), 200, 3600)
			.unwrap();
		aggregator
			.handle_report(&node_id(3), &report(&node_id(3), &peer, 0.93, 0.99, 100), 200, 3600)
			.unwrap();
		aggregator
			.handle_report(&node_id(4), &report(&node_id(4), &peer, 0.50, 0.99, 100), 200, 3600)
			.unwrap();

		let agg = aggregator.get_reputation(&peer).unwrap();
		assert_eq!(agg.report_count, 2);
		assert_eq!(agg.reporters.len(), 2);
		assert_eq!(agg.confidence, Confidence::Medium);
		assert!((agg.avg_uptime - 0.94).abs() < 1e-9);
	}

	#[test]
	fn test_own_outlying_report_kept() {
		let our_id = node_id(1);
		let (aggregator, store) = aggregator(&our_id);
		let peer = node_id(9);
		store.add_member(&our_id, Tier::Member, 0).unwrap();
		for tag in 2..=3 {
			store.add_member(&node_id(tag), Tier::Member, 0).unwrap();
		}

		aggregator
			.handle_report(&node_id(2), &report(&node_id(2), &peer, 0.95, 0.99, 100), 200, 3600)
			.unwrap();
		aggregator
			.handle_report(&node_id(3), &report(&node_id(3), &peer, 0.93, 0.99, 100), 200, 3600)
			.unwrap();
		// Our own deviant observation survives the filter.
		aggregator.record_own_report(&report(&our_id, &peer, 0.30, 0.99, 100), 200).unwrap();

		let agg = aggregator.get_reputation(&peer).unwrap();
		assert_eq!(agg.report_count, 3);
		assert!(agg.reporters.contains(&our_id));
	}

	#[test]
	fn test_reputation_score_formula() {
		let our_id = node_id(1);
		let (aggregator, store) = aggregator(&our_id);
		let peer = node_id(9);
		store.add_member(&node_id(2), Tier::Member, 0).unwrap();

		let mut bad = report(&node_id(2), &peer, 1.0, 1.0, 100);
		bad.force_close_count = 2;
		bad.warnings = vec!["force_closer".into()];
		bad.signature = MockHostRpc::sign_for(&node_id(2), &signing::peer_reputation(&bad));
		aggregator.handle_report(&node_id(2), &bad, 200, 3600).unwrap();

		let agg = aggregator.get_reputation(&peer).unwrap();
		// 30 + 30 + 20 - min(20, 2*5) - min(10, 1*2) = 68
		assert_eq!(agg.reputation_score, 68);
		assert_eq!(agg.confidence, Confidence::Low);
	}

	#[test]
	fn test_replay_is_idempotent_on_aggregate() {
		let our_id = node_id(1);
		let (aggregator, store) = aggregator(&our_id);
		let peer = node_id(9);
		store.add_member(&node_id(2), Tier::Member, 0).unwrap();

		let msg = report(&node_id(2), &peer, 0.9, 0.9, 100);
		aggregator.handle_report(&node_id(2), &msg, 200, 3600).unwrap();
		let first = aggregator.get_reputation(&peer).unwrap();
		aggregator.handle_report(&node_id(2), &msg, 210, 3600).unwrap();
		let second = aggregator.get_reputation(&peer).unwrap();
		assert_eq!(first, second);
	}

	#[test]
	fn test_single_outlier_bounded_by_median() {
		let our_id = node_id(1);
		let (aggregator, store) = aggregator(&our_id);
		let peer = node_id(9);
		for tag in 2..=5 {
			store.add_member(&node_id(tag), Tier::Member, 0).unwrap();
		}

		for tag in 2..=4 {
			aggregator
				.handle_report(
					&node_id(tag),
					&report(&node_id(tag), &peer, 0.95, 0.95, 100),
					200,
					3600,
				)
				.unwrap();
		}
		let before = aggregator.get_reputation(&peer).unwrap().avg_uptime;

		// A wildly outlying new report cannot move the aggregate: it is
		// dropped by the median filter entirely.
		aggregator
			.handle_report(&node_id(5), &report(&node_id(5), &peer, 0.0, 0.0, 100), 200, 3600)
			.unwrap();
		let after = aggregator.get_reputation(&peer).unwrap().avg_uptime;
		assert!((before - after).abs() <= OUTLIER_DEVIATION_THRESHOLD);
	}
}
