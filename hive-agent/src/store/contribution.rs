// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The append-only contribution ledger behind contribution ratios.

use rusqlite::params;

use crate::error::HiveError;
use crate::store::Store;

/// Hard row cap on the ledger; the oldest rows are pruned ring-buffer style.
pub const MAX_CONTRIBUTION_ROWS: u64 = 500_000;

/// Direction of a contribution entry as seen from the hive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContributionDirection {
	/// The peer forwarded traffic into the hive (gave work).
	Forwarded,
	/// The peer received forwarded traffic from the hive (took work).
	Received,
}

impl ContributionDirection {
	pub fn as_str(&self) -> &'static str {
		match self {
			ContributionDirection::Forwarded => "forwarded",
			ContributionDirection::Received => "received",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContributionStats {
	pub forwarded_sats: u64,
	pub received_sats: u64,
}

impl ContributionStats {
	/// Forwarded over received; 1.0 for a silent peer, infinite for a pure
	/// giver.
	pub fn ratio(&self) -> f64 {
		if self.received_sats == 0 {
			if self.forwarded_sats == 0 {
				1.0
			} else {
				f64::INFINITY
			}
		} else {
			self.forwarded_sats as f64 / self.received_sats as f64
		}
	}
}

impl Store {
	pub fn record_contribution(
		&self, peer_id: &str, direction: ContributionDirection, amount_sats: u64, timestamp: u64,
	) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO contribution_ledger (peer_id, direction, amount_sats, timestamp)
				 VALUES (?1, ?2, ?3, ?4)",
				params![peer_id, direction.as_str(), amount_sats as i64, timestamp as i64],
			)?;
			conn.execute(
				"DELETE FROM contribution_ledger WHERE id <= (
					SELECT id FROM contribution_ledger
					ORDER BY id DESC LIMIT 1 OFFSET ?1
				 )",
				params![MAX_CONTRIBUTION_ROWS as i64],
			)?;
			Ok(())
		})
	}

	pub fn get_contribution_stats(
		&self, peer_id: &str, since: u64,
	) -> Result<ContributionStats, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(
				"SELECT direction, COALESCE(SUM(amount_sats), 0)
				 FROM contribution_ledger
				 WHERE peer_id = ?1 AND timestamp >= ?2
				 GROUP BY direction",
			)?;
			let rows = stmt.query_map(params![peer_id, since as i64], |row| {
				Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
			})?;
			let mut stats = ContributionStats::default();
			for row in rows {
				let (direction, total) = row?;
				match direction.as_str() {
					"forwarded" => stats.forwarded_sats = total,
					"received" => stats.received_sats = total,
					_ => {},
				}
			}
			Ok(stats)
		})
	}

	pub fn prune_old_contributions(&self, older_than: u64) -> Result<u32, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"DELETE FROM contribution_ledger WHERE timestamp < ?1",
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
	fn test_stats_and_ratio() {
		let store = Store::open_in_memory().unwrap();
		let id = node_id(1);
		store.record_contribution(&id, ContributionDirection::Forwarded, 3000, 100).unwrap();
		store.record_contribution(&id, ContributionDirection::Forwarded, 1000, 200).unwrap();
		store.record_contribution(&id, ContributionDirection::Received, 2000, 300).unwrap();
		// Outside the window.
		store.record_contribution(&id, ContributionDirection::Received, 9999, 50).unwrap();

		let stats = store.get_contribution_stats(&id, 100).unwrap();
		assert_eq!(stats.forwarded_sats, 4000);
		assert_eq!(stats.received_sats, 2000);
		assert_eq!(stats.ratio(), 2.0);
	}

	#[test]
	fn test_silent_peer_ratio_is_neutral() {
		assert_eq!(ContributionStats::default().ratio(), 1.0);
		let giver = ContributionStats { forwarded_sats: 10, received_sats: 0 };
		assert!(giver.ratio().is_infinite());
	}
}
