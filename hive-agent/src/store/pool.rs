// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Routing-pool economics and temporal flow records.
//!
//! Pool rows snapshot who contributed what to a settlement period and how
//! revenue was distributed. Flow samples bucket settled forwards by hour
//! and weekday; recurring directional buckets condense into temporal
//! patterns used to anticipate liquidity demand.

use rusqlite::params;

use crate::error::HiveError;
use crate::store::Store;

/// Minimum bucket samples before a pattern is called.
const MIN_PATTERN_SAMPLES: u32 = 6;
/// Mean absolute net flow below this is noise, not a pattern.
const MIN_PATTERN_FLOW_SATS: i64 = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct PoolContribution {
	pub member_id: String,
	pub period: String,
	pub total_capacity_sats: u64,
	pub forwards_sats: u64,
	pub uptime_pct: f64,
	pub pool_share: f64,
	pub recorded_at: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolDistribution {
	pub period: String,
	pub member_id: String,
	pub contribution_share: f64,
	pub revenue_share_sats: u64,
	pub total_pool_revenue_sats: u64,
	pub settled_at: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemporalPattern {
	pub channel_id: String,
	pub hour_of_day: u32,
	pub day_of_week: u32,
	pub direction: String,
	pub intensity: f64,
	pub confidence: f64,
	pub samples: u32,
	pub avg_flow_sats: i64,
}

impl Store {
	// =========================================================================
	// Pool economics
	// =========================================================================

	pub fn record_pool_contribution(
		&self, contribution: &PoolContribution,
	) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO pool_contributions
					(member_id, period, total_capacity_sats, forwards_sats, uptime_pct,
					 pool_share, recorded_at)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
				 ON CONFLICT(member_id, period) DO UPDATE SET
					total_capacity_sats = excluded.total_capacity_sats,
					forwards_sats = excluded.forwards_sats,
					uptime_pct = excluded.uptime_pct,
					pool_share = excluded.pool_share,
					recorded_at = excluded.recorded_at",
				params![
					contribution.member_id,
					contribution.period,
					contribution.total_capacity_sats as i64,
					contribution.forwards_sats as i64,
					contribution.uptime_pct,
					contribution.pool_share,
					contribution.recorded_at as i64
				],
			)?;
			Ok(())
		})
	}

	pub fn get_pool_contributions(
		&self, period: &str,
	) -> Result<Vec<PoolContribution>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(
				"SELECT member_id, period, total_capacity_sats, forwards_sats, uptime_pct,
						pool_share, recorded_at
				 FROM pool_contributions WHERE period = ?1 ORDER BY member_id",
			)?;
			let rows = stmt.query_map(params![period], |row| {
				Ok(PoolContribution {
					member_id: row.get(0)?,
					period: row.get(1)?,
					total_capacity_sats: row.get::<_, i64>(2)? as u64,
					forwards_sats: row.get::<_, i64>(3)? as u64,
					uptime_pct: row.get(4)?,
					pool_share: row.get(5)?,
					recorded_at: row.get::<_, i64>(6)? as u64,
				})
			})?;
			rows.collect()
		})
	}

	pub fn record_pool_revenue(
		&self, member_id: &str, amount_sats: u64, channel_id: Option<&str>, now: u64,
	) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO pool_revenue (member_id, amount_sats, channel_id, recorded_at)
				 VALUES (?1, ?2, ?3, ?4)",
				params![member_id, amount_sats as i64, channel_id, now as i64],
			)?;
			Ok(())
		})
	}

	pub fn pool_revenue_since(&self, member_id: &str, since: u64) -> Result<u64, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT COALESCE(SUM(amount_sats), 0) FROM pool_revenue
				 WHERE member_id = ?1 AND recorded_at >= ?2",
				params![member_id, since as i64],
				|row| row.get::<_, i64>(0).map(|v| v as u64),
			)
		})
	}

	/// Records a distribution row. Insert-or-ignore keeps a settled period's
	/// distribution final.
	pub fn record_pool_distribution(
		&self, distribution: &PoolDistribution,
	) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"INSERT OR IGNORE INTO pool_distributions
					(period, member_id, contribution_share, revenue_share_sats,
					 total_pool_revenue_sats, settled_at)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
				params![
					distribution.period,
					distribution.member_id,
					distribution.contribution_share,
					distribution.revenue_share_sats as i64,
					distribution.total_pool_revenue_sats as i64,
					distribution.settled_at as i64
				],
			)?;
			Ok(changed > 0)
		})
	}

	// =========================================================================
	// Flow samples and temporal patterns
	// =========================================================================

	pub fn record_flow_sample(
		&self, channel_id: &str, hour: u32, day_of_week: u32, inbound_sats: u64,
		outbound_sats: u64, now: u64,
	) -> Result<(), HiveError> {
		let net = inbound_sats as i64 - outbound_sats as i64;
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO flow_samples
					(channel_id, hour, day_of_week, inbound_sats, outbound_sats, net_flow_sats,
					 timestamp)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
				params![
					channel_id,
					hour as i64,
					day_of_week as i64,
					inbound_sats as i64,
					outbound_sats as i64,
					net,
					now as i64
				],
			)?;
			Ok(())
		})
	}

	/// Condenses flow samples into per-(channel, hour, weekday) patterns.
	/// A bucket becomes a pattern once it has enough samples and a mean net
	/// flow that is clearly directional.
	pub fn detect_temporal_patterns(&self, since: u64, now: u64) -> Result<u32, HiveError> {
		let buckets: Vec<(String, u32, u32, u32, f64)> = self.with_conn(|conn| {
			let mut stmt = conn.prepare(
				"SELECT channel_id, hour, day_of_week, COUNT(*), AVG(net_flow_sats)
				 FROM flow_samples WHERE timestamp >= ?1
				 GROUP BY channel_id, hour, day_of_week",
			)?;
			let rows = stmt.query_map(params![since as i64], |row| {
				Ok((
					row.get::<_, String>(0)?,
					row.get::<_, i64>(1)? as u32,
					row.get::<_, i64>(2)? as u32,
					row.get::<_, i64>(3)? as u32,
					row.get::<_, f64>(4)?,
				))
			})?;
			rows.collect()
		})?;

		let mut detected = 0;
		for (channel_id, hour, day_of_week, samples, avg_flow) in buckets {
			if samples < MIN_PATTERN_SAMPLES {
				continue;
			}
			let avg_flow = avg_flow.round() as i64;
			if avg_flow.abs() < MIN_PATTERN_FLOW_SATS {
				continue;
			}
			let direction = if avg_flow > 0 { "inbound" } else { "outbound" };
			let confidence = (samples as f64 / (4.0 * MIN_PATTERN_SAMPLES as f64)).min(1.0);
			let intensity = avg_flow.unsigned_abs() as f64 / MIN_PATTERN_FLOW_SATS as f64;

			self.with_conn(|conn| {
				conn.execute(
					"INSERT INTO temporal_patterns
						(channel_id, hour_of_day, day_of_week, direction, intensity, confidence,
						 samples, avg_flow_sats, detected_at)
					 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
					 ON CONFLICT(channel_id, hour_of_day, day_of_week) DO UPDATE SET
						direction = excluded.direction,
						intensity = excluded.intensity,
						confidence = excluded.confidence,
						samples = excluded.samples,
						avg_flow_sats = excluded.avg_flow_sats,
						detected_at = excluded.detected_at",
					params![
						channel_id,
						hour as i64,
						day_of_week as i64,
						direction,
						intensity,
						confidence,
						samples as i64,
						avg_flow,
						now as i64
					],
				)?;
				Ok(())
			})?;
			detected += 1;
		}
		Ok(detected)
	}

	pub fn get_temporal_patterns(
		&self, channel_id: &str,
	) -> Result<Vec<TemporalPattern>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(
				"SELECT channel_id, hour_of_day, day_of_week, direction, intensity, confidence,
						samples, avg_flow_sats
				 FROM temporal_patterns WHERE channel_id = ?1
				 ORDER BY day_of_week, hour_of_day",
			)?;
			let rows = stmt.query_map(params![channel_id], |row| {
				Ok(TemporalPattern {
					channel_id: row.get(0)?,
					hour_of_day: row.get::<_, Option<i64>>(1)?.unwrap_or(0) as u32,
					day_of_week: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as u32,
					direction: row.get(3)?,
					intensity: row.get(4)?,
					confidence: row.get(5)?,
					samples: row.get::<_, i64>(6)? as u32,
					avg_flow_sats: row.get(7)?,
				})
			})?;
			rows.collect()
		})
	}

	pub fn prune_flow_samples(&self, older_than: u64) -> Result<u32, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"DELETE FROM flow_samples WHERE timestamp < ?1",
				params![older_than as i64],
			)?;
			Ok(changed as u32)
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn node_id(tag: u8) -> String {
		format!("02{:02x}{}", tag, "ab".repeat(31))
	}

	#[test]
	fn test_pool_distribution_is_final() {
		let store = Store::open_in_memory().unwrap();
		let distribution = PoolDistribution {
			period: "2025-W03".into(),
			member_id: node_id(1),
			contribution_share: 0.5,
			revenue_share_sats: 75,
			total_pool_revenue_sats: 150,
			settled_at: 100,
		};
		assert!(store.record_pool_distribution(&distribution).unwrap());
		let mut rewrite = distribution.clone();
		rewrite.revenue_share_sats = 9999;
		assert!(!store.record_pool_distribution(&rewrite).unwrap());
	}

	#[test]
	fn test_pool_revenue_window_sum() {
		let store = Store::open_in_memory().unwrap();
		let id = node_id(1);
		store.record_pool_revenue(&id, 50, Some("100x1x0"), 100).unwrap();
		store.record_pool_revenue(&id, 70, Some("100x1x0"), 200).unwrap();
		assert_eq!(store.pool_revenue_since(&id, 150).unwrap(), 70);
		assert_eq!(store.pool_revenue_since(&id, 0).unwrap(), 120);
	}

	#[test]
	fn test_temporal_pattern_detection_thresholds() {
		let store = Store::open_in_memory().unwrap();
		// Strong inbound bucket: enough samples, clearly directional.
		for i in 0..8 {
			store.record_flow_sample("chan-a", 9, 2, 50_000, 1_000, 100 + i).unwrap();
		}
		// Noisy bucket: plenty of samples but negligible net flow.
		for i in 0..8 {
			store.record_flow_sample("chan-b", 9, 2, 1_000, 900, 100 + i).unwrap();
		}
		// Sparse bucket: directional but too few samples.
		for i in 0..3 {
			store.record_flow_sample("chan-c", 9, 2, 90_000, 0, 100 + i).unwrap();
		}

		assert_eq!(store.detect_temporal_patterns(0, 500).unwrap(), 1);
		let patterns = store.get_temporal_patterns("chan-a").unwrap();
		assert_eq!(patterns.len(), 1);
		assert_eq!(patterns[0].direction, "inbound");
		assert_eq!(patterns[0].samples, 8);
		assert!(store.get_temporal_patterns("chan-b").unwrap().is_empty());
		assert!(store.get_temporal_patterns("chan-c").unwrap().is_empty());
	}

	#[test]
	fn test_pattern_redetection_updates_row() {
		let store = Store::open_in_memory().unwrap();
		for i in 0..6 {
			store.record_flow_sample("chan-a", 9, 2, 50_000, 0, 100 + i).unwrap();
		}
		store.detect_temporal_patterns(0, 500).unwrap();
		for i in 0..6 {
			store.record_flow_sample("chan-a", 9, 2, 0, 80_000, 200 + i).unwrap();
		}
		store.detect_temporal_patterns(0, 600).unwrap();

		let patterns = store.get_temporal_patterns("chan-a").unwrap();
		assert_eq!(patterns.len(), 1);
		assert_eq!(patterns[0].direction, "outbound");
		assert_eq!(patterns[0].samples, 12);
	}
}
