// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use hive_proto::msgs::IntentType;
use rusqlite::{params, OptionalExtension};

use crate::error::HiveError;
use crate::store::Store;

/// Lifecycle of an intent lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentStatus {
	Pending,
	Committed,
	Aborted,
	Expired,
}

impl IntentStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			IntentStatus::Pending => "pending",
			IntentStatus::Committed => "committed",
			IntentStatus::Aborted => "aborted",
			IntentStatus::Expired => "expired",
		}
	}

	pub fn from_str(s: &str) -> Option<IntentStatus> {
		match s {
			"pending" => Some(IntentStatus::Pending),
			"committed" => Some(IntentStatus::Committed),
			"aborted" => Some(IntentStatus::Aborted),
			"expired" => Some(IntentStatus::Expired),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntentRecord {
	pub id: i64,
	pub intent_type: IntentType,
	pub target: String,
	pub initiator: String,
	pub timestamp: u64,
	pub expires_at: u64,
	pub status: IntentStatus,
	pub signature: Option<String>,
}

fn parse_intent_type(s: &str) -> IntentType {
	match s {
		"rebalance" => IntentType::Rebalance,
		"ban_peer" => IntentType::BanPeer,
		_ => IntentType::ChannelOpen,
	}
}

fn row_to_intent(row: &rusqlite::Row<'_>) -> Result<IntentRecord, rusqlite::Error> {
	let type_str: String = row.get(1)?;
	let status_str: String = row.get(6)?;
	Ok(IntentRecord {
		id: row.get(0)?,
		intent_type: parse_intent_type(&type_str),
		target: row.get(2)?,
		initiator: row.get(3)?,
		timestamp: row.get::<_, i64>(4)? as u64,
		expires_at: row.get::<_, i64>(5)? as u64,
		status: IntentStatus::from_str(&status_str).unwrap_or(IntentStatus::Pending),
		signature: row.get(7)?,
	})
}

const INTENT_COLUMNS: &str =
	"id, intent_type, target, initiator, timestamp, expires_at, status, signature";

impl Store {
	pub fn create_intent(
		&self, intent_type: IntentType, target: &str, initiator: &str, timestamp: u64,
		expires_at: u64, signature: Option<&str>,
	) -> Result<i64, HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO intent_locks
					(intent_type, target, initiator, timestamp, expires_at, status, signature)
				 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6)",
				params![
					intent_type.as_str(),
					target,
					initiator,
					timestamp as i64,
					expires_at as i64,
					signature
				],
			)?;
			Ok(conn.last_insert_rowid())
		})
	}

	pub fn get_intent(&self, id: i64) -> Result<Option<IntentRecord>, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				&format!("SELECT {} FROM intent_locks WHERE id = ?1", INTENT_COLUMNS),
				params![id],
				row_to_intent,
			)
			.optional()
		})
	}

	/// All pending intents for the same `(type, target)` pair.
	pub fn get_conflicting_intents(
		&self, intent_type: IntentType, target: &str,
	) -> Result<Vec<IntentRecord>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(&format!(
				"SELECT {} FROM intent_locks
				 WHERE target = ?1 AND intent_type = ?2 AND status = 'pending'
				 ORDER BY initiator",
				INTENT_COLUMNS
			))?;
			let rows = stmt.query_map(params![target, intent_type.as_str()], row_to_intent)?;
			rows.collect()
		})
	}

	pub fn get_pending_intents(&self) -> Result<Vec<IntentRecord>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(&format!(
				"SELECT {} FROM intent_locks WHERE status = 'pending' ORDER BY timestamp",
				INTENT_COLUMNS
			))?;
			let rows = stmt.query_map([], row_to_intent)?;
			rows.collect()
		})
	}

	/// Pending intents owned by `initiator` whose hold window has elapsed.
	pub fn get_pending_intents_ready(
		&self, initiator: &str, now: u64, hold_seconds: u64,
	) -> Result<Vec<IntentRecord>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(&format!(
				"SELECT {} FROM intent_locks
				 WHERE status = 'pending' AND initiator = ?1 AND timestamp + ?2 <= ?3
				 ORDER BY timestamp",
				INTENT_COLUMNS
			))?;
			let rows = stmt.query_map(
				params![initiator, hold_seconds as i64, now as i64],
				row_to_intent,
			)?;
			rows.collect()
		})
	}

	pub fn update_intent_status(&self, id: i64, status: IntentStatus) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"UPDATE intent_locks SET status = ?2 WHERE id = ?1",
				params![id, status.as_str()],
			)?;
			Ok(changed > 0)
		})
	}

	/// Marks pending intents whose `expires_at` has passed as expired. An
	/// intent expiring exactly at `now` is reaped in the same tick.
	pub fn cleanup_expired_intents(&self, now: u64) -> Result<u32, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"UPDATE intent_locks SET status = 'expired'
				 WHERE status = 'pending' AND expires_at <= ?1",
				params![now as i64],
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
	fn test_conflicts_ordered_by_initiator() {
		let store = Store::open_in_memory().unwrap();
		let target = node_id(9);
		store
			.create_intent(IntentType::ChannelOpen, &target, &node_id(2), 100, 400, None)
			.unwrap();
		store
			.create_intent(IntentType::ChannelOpen, &target, &node_id(1), 100, 400, None)
			.unwrap();
		// A different type on the same target does not conflict.
		store.create_intent(IntentType::Rebalance, &target, &node_id(3), 100, 400, None).unwrap();

		let conflicts = store.get_conflicting_intents(IntentType::ChannelOpen, &target).unwrap();
		assert_eq!(conflicts.len(), 2);
		assert_eq!(conflicts[0].initiator, node_id(1));
	}

	#[test]
	fn test_expiry_boundary_is_inclusive() {
		let store = Store::open_in_memory().unwrap();
		let id = store
			.create_intent(IntentType::ChannelOpen, &node_id(9), &node_id(1), 100, 400, None)
			.unwrap();
		assert_eq!(store.cleanup_expired_intents(399).unwrap(), 0);
		assert_eq!(store.cleanup_expired_intents(400).unwrap(), 1);
		assert_eq!(store.get_intent(id).unwrap().unwrap().status, IntentStatus::Expired);
	}

	#[test]
	fn test_hold_window_gate() {
		let store = Store::open_in_memory().unwrap();
		let me = node_id(1);
		store.create_intent(IntentType::ChannelOpen, &node_id(9), &me, 100, 400, None).unwrap();
		assert!(store.get_pending_intents_ready(&me, 159, 60).unwrap().is_empty());
		assert_eq!(store.get_pending_intents_ready(&me, 160, 60).unwrap().len(), 1);
	}
}
