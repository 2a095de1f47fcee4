// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Persistence for gossiped observations. In-memory aggregations are rebuilt
//! from these tables on startup.

use hive_proto::msgs::{FeeReport, LiquidityNeedMsg, PeerEventReport, ReputationReport, RouteProbe};
use rusqlite::{params, OptionalExtension};

use crate::error::HiveError;
use crate::store::Store;

/// Aggregate view over a peer's stored channel events, the input to quality
/// scoring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerEventSummary {
	pub event_count: u32,
	pub open_count: u32,
	pub close_count: u32,
	pub remote_close_count: u32,
	pub mutual_close_count: u32,
	pub local_close_count: u32,
	pub avg_duration_days: f64,
	pub total_revenue_sats: u64,
	pub net_pnl_sats: i64,
	pub total_forward_count: u64,
	pub total_forward_volume_sats: u64,
	pub reporter_count: u32,
}

/// Aggregated fee profile for an external peer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerFeeProfile {
	pub peer_id: String,
	pub reporter_count: u32,
	pub avg_fee_charged: f64,
	pub min_fee_charged: u32,
	pub max_fee_charged: u32,
	pub total_hive_volume: u64,
	pub total_hive_revenue: u64,
	pub avg_utilization: f64,
	pub last_update: u64,
	pub confidence: f64,
}

impl Store {
	// =========================================================================
	// Peer events
	// =========================================================================

	pub fn store_peer_event(&self, event: &PeerEventReport) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO peer_events
					(peer_id, reporter_id, event_type, timestamp, channel_id, capacity_sats,
					 duration_days, total_revenue_sats, net_pnl_sats, forward_count,
					 forward_volume_sats, our_fee_ppm, their_fee_ppm, opener, closer, reason)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
				params![
					event.peer,
					event.reporter,
					event.event_type,
					event.timestamp as i64,
					event.channel_id,
					event.capacity_sats as i64,
					event.duration_days as i64,
					event.total_revenue_sats as i64,
					event.net_pnl_sats,
					event.forward_count as i64,
					event.forward_volume_sats as i64,
					event.our_fee_ppm as i64,
					event.their_fee_ppm as i64,
					event.opener,
					event.closer,
					event.reason
				],
			)?;
			Ok(())
		})
	}

	pub fn get_peer_event_summary(
		&self, peer_id: &str, since: u64,
	) -> Result<PeerEventSummary, HiveError> {
		self.with_conn(|conn| {
			let mut summary = conn.query_row(
				"SELECT COUNT(*),
						COALESCE(SUM(CASE WHEN event_type = 'channel_open' THEN 1 ELSE 0 END), 0),
						COALESCE(SUM(CASE WHEN event_type LIKE '%close' THEN 1 ELSE 0 END), 0),
						COALESCE(SUM(CASE WHEN event_type = 'remote_close' THEN 1 ELSE 0 END), 0),
						COALESCE(SUM(CASE WHEN event_type = 'mutual_close' THEN 1 ELSE 0 END), 0),
						COALESCE(SUM(CASE WHEN event_type = 'local_close' THEN 1 ELSE 0 END), 0),
						COALESCE(AVG(CASE WHEN duration_days > 0 THEN duration_days END), 0),
						COALESCE(SUM(total_revenue_sats), 0),
						COALESCE(SUM(net_pnl_sats), 0),
						COALESCE(SUM(forward_count), 0),
						COALESCE(SUM(forward_volume_sats), 0),
						COUNT(DISTINCT reporter_id)
				 FROM peer_events WHERE peer_id = ?1 AND timestamp >= ?2",
				params![peer_id, since as i64],
				|row| {
					Ok(PeerEventSummary {
						event_count: row.get::<_, i64>(0)? as u32,
						open_count: row.get::<_, i64>(1)? as u32,
						close_count: row.get::<_, i64>(2)? as u32,
						remote_close_count: row.get::<_, i64>(3)? as u32,
						mutual_close_count: row.get::<_, i64>(4)? as u32,
						local_close_count: row.get::<_, i64>(5)? as u32,
						avg_duration_days: row.get(6)?,
						total_revenue_sats: row.get::<_, i64>(7)? as u64,
						net_pnl_sats: row.get(8)?,
						total_forward_count: row.get::<_, i64>(9)? as u64,
						total_forward_volume_sats: row.get::<_, i64>(10)? as u64,
						reporter_count: row.get::<_, i64>(11)? as u32,
					})
				},
			)?;
			if summary.event_count == 0 {
				summary = PeerEventSummary::default();
			}
			Ok(summary)
		})
	}

	/// Distinct external peers a reporter has filed events about. The
	/// candidate's topology reach, as witnessed by its own reports.
	pub fn get_event_subjects_by_reporter(
		&self, reporter: &str, since: u64,
	) -> Result<Vec<String>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(
				"SELECT DISTINCT peer_id FROM peer_events
				 WHERE reporter_id = ?1 AND timestamp >= ?2",
			)?;
			let rows = stmt.query_map(params![reporter, since as i64], |row| row.get(0))?;
			rows.collect()
		})
	}

	pub fn prune_peer_events(&self, older_than: u64) -> Result<u32, HiveError> {
		self.with_conn(|conn| {
			let changed = conn
				.execute("DELETE FROM peer_events WHERE timestamp < ?1", params![older_than as i64])?;
			Ok(changed as u32)
		})
	}

	// =========================================================================
	// Peer reputation reports
	// =========================================================================

	pub fn store_peer_reputation(&self, report: &ReputationReport) -> Result<(), HiveError> {
		let warnings = serde_json::to_string(&report.warnings).unwrap_or_else(|_| "[]".into());
		self.with_conn(|conn| {
			// One live report per (reporter, subject); newer replaces older.
			conn.execute(
				"DELETE FROM peer_reputation WHERE reporter_id = ?1 AND peer_id = ?2",
				params![report.reporter, report.peer],
			)?;
			conn.execute(
				"INSERT INTO peer_reputation
					(reporter_id, peer_id, timestamp, uptime_pct, response_time_ms,
					 force_close_count, fee_stability, htlc_success_rate, channel_age_days,
					 total_routed_sats, warnings, observation_days)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
				params![
					report.reporter,
					report.peer,
					report.timestamp as i64,
					report.uptime_pct,
					report.response_time_ms as i64,
					report.force_close_count as i64,
					report.fee_stability,
					report.htlc_success_rate,
					report.channel_age_days as i64,
					report.total_routed_sats as i64,
					warnings,
					report.observation_days as i64
				],
			)?;
			Ok(())
		})
	}

	pub fn get_reputation_reports(
		&self, peer_id: &str, since: u64,
	) -> Result<Vec<ReputationReport>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(
				"SELECT reporter_id, peer_id, timestamp, uptime_pct, response_time_ms,
						force_close_count, fee_stability, htlc_success_rate, channel_age_days,
						total_routed_sats, warnings, observation_days
				 FROM peer_reputation
				 WHERE peer_id = ?1 AND timestamp >= ?2
				 ORDER BY timestamp",
			)?;
			let rows = stmt.query_map(params![peer_id, since as i64], row_to_reputation)?;
			rows.collect()
		})
	}

	pub fn get_reputation_subjects(&self, since: u64) -> Result<Vec<String>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(
				"SELECT DISTINCT peer_id FROM peer_reputation WHERE timestamp >= ?1",
			)?;
			let rows = stmt.query_map(params![since as i64], |row| row.get(0))?;
			rows.collect()
		})
	}

	pub fn prune_peer_reputation(&self, older_than: u64) -> Result<u32, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"DELETE FROM peer_reputation WHERE timestamp < ?1",
				params![older_than as i64],
			)?;
			Ok(changed as u32)
		})
	}

	// =========================================================================
	// Fee intelligence
	// =========================================================================

	pub fn store_fee_report(&self, report: &FeeReport) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO fee_intelligence
					(reporter_id, target_peer_id, timestamp, our_fee_ppm, their_fee_ppm,
					 forward_count, forward_volume_sats, revenue_sats, flow_direction,
					 utilization_pct, days_observed, fees_earned_sats, capacity_sats, uptime_pct,
					 signature)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
				params![
					report.reporter,
					report.target,
					report.timestamp as i64,
					report.our_fee_ppm as i64,
					report.their_fee_ppm as i64,
					report.forward_count as i64,
					report.forward_volume_sats as i64,
					report.revenue_sats as i64,
					report.flow_direction,
					report.utilization_pct,
					report.days_observed as i64,
					report.fees_earned_sats as i64,
					report.capacity_sats as i64,
					report.uptime_pct as i64,
					report.signature
				],
			)?;
			Ok(())
		})
	}

	pub fn get_fee_reports_for_target(
		&self, target: &str, since: u64,
	) -> Result<Vec<FeeReport>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(&format!(
				"SELECT {} FROM fee_intelligence
				 WHERE target_peer_id = ?1 AND timestamp >= ?2
				 ORDER BY timestamp",
				FEE_COLUMNS
			))?;
			let rows = stmt.query_map(params![target, since as i64], row_to_fee_report)?;
			rows.collect()
		})
	}

	/// The most recent fee report from each member reporter since `since`.
	/// Settlement contribution gathering reads member totals from these.
	pub fn get_latest_fee_report_per_reporter(
		&self, since: u64,
	) -> Result<Vec<FeeReport>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(&format!(
				"SELECT {} FROM fee_intelligence f
				 WHERE timestamp >= ?1 AND timestamp = (
					SELECT MAX(timestamp) FROM fee_intelligence
					WHERE reporter_id = f.reporter_id AND timestamp >= ?1
				 )
				 GROUP BY reporter_id
				 ORDER BY reporter_id",
				FEE_COLUMNS
			))?;
			let rows = stmt.query_map(params![since as i64], row_to_fee_report)?;
			rows.collect()
		})
	}

	pub fn prune_fee_reports(&self, older_than: u64) -> Result<u32, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"DELETE FROM fee_intelligence WHERE timestamp < ?1",
				params![older_than as i64],
			)?;
			Ok(changed as u32)
		})
	}

	pub fn upsert_fee_profile(&self, profile: &PeerFeeProfile) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO peer_fee_profiles
					(peer_id, reporter_count, avg_fee_charged, min_fee_charged, max_fee_charged,
					 total_hive_volume, total_hive_revenue, avg_utilization, last_update,
					 confidence)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
				 ON CONFLICT(peer_id) DO UPDATE SET
					reporter_count = excluded.reporter_count,
					avg_fee_charged = excluded.avg_fee_charged,
					min_fee_charged = excluded.min_fee_charged,
					max_fee_charged = excluded.max_fee_charged,
					total_hive_volume = excluded.total_hive_volume,
					total_hive_revenue = excluded.total_hive_revenue,
					avg_utilization = excluded.avg_utilization,
					last_update = excluded.last_update,
					confidence = excluded.confidence",
				params![
					profile.peer_id,
					profile.reporter_count as i64,
					profile.avg_fee_charged,
					profile.min_fee_charged as i64,
					profile.max_fee_charged as i64,
					profile.total_hive_volume as i64,
					profile.total_hive_revenue as i64,
					profile.avg_utilization,
					profile.last_update as i64,
					profile.confidence
				],
			)?;
			Ok(())
		})
	}

	pub fn get_fee_profile(&self, peer_id: &str) -> Result<Option<PeerFeeProfile>, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT peer_id, reporter_count, avg_fee_charged, min_fee_charged,
						max_fee_charged, total_hive_volume, total_hive_revenue, avg_utilization,
						last_update, confidence
				 FROM peer_fee_profiles WHERE peer_id = ?1",
				params![peer_id],
				|row| {
					Ok(PeerFeeProfile {
						peer_id: row.get(0)?,
						reporter_count: row.get::<_, i64>(1)? as u32,
						avg_fee_charged: row.get(2)?,
						min_fee_charged: row.get::<_, i64>(3)? as u32,
						max_fee_charged: row.get::<_, i64>(4)? as u32,
						total_hive_volume: row.get::<_, i64>(5)? as u64,
						total_hive_revenue: row.get::<_, i64>(6)? as u64,
						avg_utilization: row.get(7)?,
						last_update: row.get::<_, i64>(8)? as u64,
						confidence: row.get(9)?,
					})
				},
			)
			.optional()
		})
	}

	// =========================================================================
	// Route probes
	// =========================================================================

	pub fn store_route_probe(&self, probe: &RouteProbe) -> Result<(), HiveError> {
		let path = serde_json::to_string(&probe.path).unwrap_or_else(|_| "[]".into());
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO route_probes
					(reporter_id, destination, path, timestamp, success, latency_ms,
					 failure_reason, failure_hop, estimated_capacity_sats, total_fee_ppm,
					 amount_probed_sats)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
				params![
					probe.reporter,
					probe.destination,
					path,
					probe.timestamp as i64,
					probe.success as i64,
					probe.latency_ms as i64,
					probe.failure_reason,
					probe.failure_hop as i64,
					probe.estimated_capacity_sats as i64,
					probe.total_fee_ppm as i64,
					probe.amount_probed_sats as i64
				],
			)?;
			Ok(())
		})
	}

	pub fn get_route_probes(
		&self, destination: &str, since: u64,
	) -> Result<Vec<RouteProbe>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(
				"SELECT reporter_id, destination, path, timestamp, success, latency_ms,
						failure_reason, failure_hop, estimated_capacity_sats, total_fee_ppm,
						amount_probed_sats
				 FROM route_probes
				 WHERE destination = ?1 AND timestamp >= ?2
				 ORDER BY timestamp",
			)?;
			let rows = stmt.query_map(params![destination, since as i64], |row| {
				let path_json: String = row.get(2)?;
				Ok(RouteProbe {
					reporter: row.get(0)?,
					destination: row.get(1)?,
					path: serde_json::from_str(&path_json).unwrap_or_default(),
					timestamp: row.get::<_, i64>(3)? as u64,
					success: row.get::<_, i64>(4)? != 0,
					latency_ms: row.get::<_, i64>(5)? as u32,
					failure_reason: row.get(6)?,
					failure_hop: row.get::<_, i64>(7)? as i32,
					estimated_capacity_sats: row.get::<_, i64>(8)? as u64,
					total_fee_ppm: row.get::<_, i64>(9)? as u32,
					amount_probed_sats: row.get::<_, i64>(10)? as u64,
					signature: String::new(),
				})
			})?;
			rows.collect()
		})
	}

	pub fn prune_route_probes(&self, older_than: u64) -> Result<u32, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"DELETE FROM route_probes WHERE timestamp < ?1",
				params![older_than as i64],
			)?;
			Ok(changed as u32)
		})
	}

	// =========================================================================
	// Liquidity needs
	// =========================================================================

	/// One live need per (reporter, target); newer reports replace older.
	pub fn upsert_liquidity_need(&self, need: &LiquidityNeedMsg) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO liquidity_needs
					(reporter_id, need_type, target_peer_id, amount_sats, urgency, max_fee_ppm,
					 reason, current_balance_pct, timestamp)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
				 ON CONFLICT(reporter_id, target_peer_id) DO UPDATE SET
					need_type = excluded.need_type,
					amount_sats = excluded.amount_sats,
					urgency = excluded.urgency,
					max_fee_ppm = excluded.max_fee_ppm,
					reason = excluded.reason,
					current_balance_pct = excluded.current_balance_pct,
					timestamp = excluded.timestamp",
				params![
					need.reporter,
					need.need_type,
					need.target,
					need.amount_sats as i64,
					need.urgency,
					need.max_fee_ppm as i64,
					need.reason,
					need.current_balance_pct,
					need.timestamp as i64
				],
			)?;
			Ok(())
		})
	}

	pub fn get_liquidity_needs(&self, since: u64) -> Result<Vec<LiquidityNeedMsg>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(
				"SELECT reporter_id, need_type, target_peer_id, amount_sats, urgency,
						max_fee_ppm, reason, current_balance_pct, timestamp
				 FROM liquidity_needs WHERE timestamp >= ?1
				 ORDER BY timestamp DESC",
			)?;
			let rows = stmt.query_map(params![since as i64], |row| {
				Ok(LiquidityNeedMsg {
					reporter: row.get(0)?,
					need_type: row.get(1)?,
					target: row.get(2)?,
					amount_sats: row.get::<_, i64>(3)? as u64,
					urgency: row.get(4)?,
					max_fee_ppm: row.get::<_, i64>(5)? as u32,
					reason: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
					current_balance_pct: row.get(7)?,
					timestamp: row.get::<_, i64>(8)? as u64,
					signature: String::new(),
				})
			})?;
			rows.collect()
		})
	}

	pub fn prune_liquidity_needs(&self, older_than: u64) -> Result<u32, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"DELETE FROM liquidity_needs WHERE timestamp < ?1",
				params![older_than as i64],
			)?;
			Ok(changed as u32)
		})
	}
}

const FEE_COLUMNS: &str = "reporter_id, target_peer_id, timestamp, our_fee_ppm, their_fee_ppm, \
	forward_count, forward_volume_sats, revenue_sats, flow_direction, utilization_pct, \
	days_observed, fees_earned_sats, capacity_sats, uptime_pct, signature";

fn row_to_fee_report(row: &rusqlite::Row<'_>) -> Result<FeeReport, rusqlite::Error> {
	Ok(FeeReport {
		reporter: row.get(0)?,
		target: row.get(1)?,
		timestamp: row.get::<_, i64>(2)? as u64,
		our_fee_ppm: row.get::<_, Option<i64>>(3)?.unwrap_or(0) as u32,
		their_fee_ppm: row.get::<_, Option<i64>>(4)?.unwrap_or(0) as u32,
		forward_count: row.get::<_, Option<i64>>(5)?.unwrap_or(0) as u32,
		forward_volume_sats: row.get::<_, Option<i64>>(6)?.unwrap_or(0) as u64,
		revenue_sats: row.get::<_, Option<i64>>(7)?.unwrap_or(0) as u64,
		flow_direction: row.get::<_, Option<String>>(8)?.unwrap_or_else(|| "balanced".into()),
		utilization_pct: row.get::<_, Option<f64>>(9)?.unwrap_or(0.0),
		days_observed: row.get::<_, Option<i64>>(10)?.unwrap_or(0) as u32,
		fees_earned_sats: row.get::<_, i64>(11)? as u64,
		capacity_sats: row.get::<_, i64>(12)? as u64,
		uptime_pct: row.get::<_, i64>(13)? as u32,
		bolt12_offer: None,
		signature: row.get(14)?,
	})
}

fn row_to_reputation(row: &rusqlite::Row<'_>) -> Result<ReputationReport, rusqlite::Error> {
	let warnings_json: String = row.get(10)?;
	Ok(ReputationReport {
		reporter: row.get(0)?,
		peer: row.get(1)?,
		timestamp: row.get::<_, i64>(2)? as u64,
		uptime_pct: row.get(3)?,
		response_time_ms: row.get::<_, i64>(4)? as u32,
		force_close_count: row.get::<_, i64>(5)? as u32,
		fee_stability: row.get(6)?,
		htlc_success_rate: row.get(7)?,
		channel_age_days: row.get::<_, i64>(8)? as u32,
		total_routed_sats: row.get::<_, i64>(9)? as u64,
		warnings: serde_json::from_str(&warnings_json).unwrap_or_default(),
		observation_days: row.get::<_, i64>(11)? as u32,
		signature: String::new(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn node_id(tag: u8) -> String {
		format!("02{:02x}{}", tag, "ab".repeat(31))
	}

	fn reputation(reporter: &str, peer: &str, ts: u64, uptime: f64) -> ReputationReport {
		ReputationReport {
			reporter: reporter.into(),
			peer: peer.into(),
			timestamp: ts,
			uptime_pct: uptime,
			response_time_ms: 100,
			force_close_count: 0,
			fee_stability: 1.0,
			htlc_success_rate: 0.99,
			channel_age_days: 30,
			total_routed_sats: 1000,
			warnings: vec!["force_closer".into()],
			observation_days: 7,
			signature: "s".into(),
		}
	}

	#[test]
	fn test_reputation_replaces_per_reporter() {
		let store = Store::open_in_memory().unwrap();
		let (reporter, peer) = (node_id(1), node_id(9));
		store.store_peer_reputation(&reputation(&reporter, &peer, 100, 0.9)).unwrap();
		store.store_peer_reputation(&reputation(&reporter, &peer, 200, 0.95)).unwrap();

		let reports = store.get_reputation_reports(&peer, 0).unwrap();
		assert_eq!(reports.len(), 1);
		assert_eq!(reports[0].uptime_pct, 0.95);
		assert_eq!(reports[0].warnings, vec!["force_closer".to_string()]);
	}

	#[test]
	fn test_peer_event_summary() {
		let store = Store::open_in_memory().unwrap();
		let peer = node_id(9);
		let mk = |reporter: u8, event_type: &str, duration: u32| PeerEventReport {
			reporter: node_id(reporter),
			peer: peer.clone(),
			event_type: event_type.into(),
			timestamp: 1000,
			channel_id: None,
			capacity_sats: 1_000_000,
			duration_days: duration,
			total_revenue_sats: 500,
			net_pnl_sats: 250,
			forward_count: 10,
			forward_volume_sats: 100_000,
			our_fee_ppm: 100,
			their_fee_ppm: 50,
			opener: None,
			closer: None,
			reason: None,
			signature: "s".into(),
		};
		store.store_peer_event(&mk(1, "remote_close", 120)).unwrap();
		store.store_peer_event(&mk(2, "mutual_close", 200)).unwrap();
		store.store_peer_event(&mk(1, "channel_open", 0)).unwrap();

		let summary = store.get_peer_event_summary(&peer, 0).unwrap();
		assert_eq!(summary.event_count, 3);
		assert_eq!(summary.close_count, 2);
		assert_eq!(summary.remote_close_count, 1);
		assert_eq!(summary.mutual_close_count, 1);
		assert_eq!(summary.open_count, 1);
		assert_eq!(summary.reporter_count, 2);
		assert_eq!(summary.avg_duration_days, 160.0);
	}

	#[test]
	fn test_liquidity_need_upsert() {
		let store = Store::open_in_memory().unwrap();
		let need = LiquidityNeedMsg {
			reporter: node_id(1),
			need_type: "inbound".into(),
			target: Some(node_id(9)),
			amount_sats: 100_000,
			urgency: "high".into(),
			max_fee_ppm: 50,
			reason: "depleted".into(),
			current_balance_pct: 0.1,
			timestamp: 100,
			signature: "s".into(),
		};
		store.upsert_liquidity_need(&need).unwrap();
		let mut updated = need.clone();
		updated.amount_sats = 200_000;
		updated.timestamp = 200;
		store.upsert_liquidity_need(&updated).unwrap();

		let needs = store.get_liquidity_needs(0).unwrap();
		assert_eq!(needs.len(), 1);
		assert_eq!(needs[0].amount_sats, 200_000);
	}

	#[test]
	fn test_latest_fee_report_per_reporter() {
		let store = Store::open_in_memory().unwrap();
		let mk = |reporter: u8, ts: u64, fees: u64| FeeReport {
			reporter: node_id(reporter),
			target: node_id(9),
			timestamp: ts,
			our_fee_ppm: 10,
			their_fee_ppm: 20,
			forward_count: 5,
			forward_volume_sats: 1000,
			revenue_sats: 10,
			flow_direction: "balanced".into(),
			utilization_pct: 0.5,
			days_observed: 7,
			fees_earned_sats: fees,
			capacity_sats: 10,
			uptime_pct: 100,
			bolt12_offer: None,
			signature: "s".into(),
		};
		store.store_fee_report(&mk(1, 100, 50)).unwrap();
		store.store_fee_report(&mk(1, 200, 100)).unwrap();
		store.store_fee_report(&mk(2, 150, 70)).unwrap();

		let latest = store.get_latest_fee_report_per_reporter(0).unwrap();
		assert_eq!(latest.len(), 2);
		assert_eq!(latest[0].reporter, node_id(1));
		assert_eq!(latest[0].fees_earned_sats, 100);
		assert_eq!(latest[1].fees_earned_sats, 70);
	}
}
