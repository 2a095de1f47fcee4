// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Daily spend tracking and time-bounded budget holds.
//!
//! A hold is a local reservation of future spend taken out during an
//! expansion round. Active holds may never sum above the daily budget.

use rusqlite::{params, OptionalExtension};

use crate::error::{HiveError, HiveErrorCode};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldStatus {
	Active,
	Released,
	Consumed,
	Expired,
}

impl HoldStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			HoldStatus::Active => "active",
			HoldStatus::Released => "released",
			HoldStatus::Consumed => "consumed",
			HoldStatus::Expired => "expired",
		}
	}

	pub fn from_str(s: &str) -> Option<HoldStatus> {
		match s {
			"active" => Some(HoldStatus::Active),
			"released" => Some(HoldStatus::Released),
			"consumed" => Some(HoldStatus::Consumed),
			"expired" => Some(HoldStatus::Expired),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetHold {
	pub hold_id: String,
	pub round_id: String,
	pub peer_id: String,
	pub amount_sats: u64,
	pub created_at: u64,
	pub expires_at: u64,
	pub status: HoldStatus,
	pub consumed_by: Option<String>,
	pub consumed_at: Option<u64>,
}

fn row_to_hold(row: &rusqlite::Row<'_>) -> Result<BudgetHold, rusqlite::Error> {
	let status: String = row.get(6)?;
	Ok(BudgetHold {
		hold_id: row.get(0)?,
		round_id: row.get(1)?,
		peer_id: row.get(2)?,
		amount_sats: row.get::<_, i64>(3)? as u64,
		created_at: row.get::<_, i64>(4)? as u64,
		expires_at: row.get::<_, i64>(5)? as u64,
		status: HoldStatus::from_str(&status).unwrap_or(HoldStatus::Active),
		consumed_by: row.get(7)?,
		consumed_at: row.get::<_, Option<i64>>(8)?.map(|t| t as u64),
	})
}

const HOLD_COLUMNS: &str = "hold_id, round_id, peer_id, amount_sats, created_at, expires_at, \
	status, consumed_by, consumed_at";

impl Store {
	pub fn record_budget_spend(
		&self, date_key: &str, action_type: &str, amount_sats: u64, target: Option<&str>,
		timestamp: u64,
	) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO budget_tracking (date_key, action_type, amount_sats, target, timestamp)
				 VALUES (?1, ?2, ?3, ?4, ?5)",
				params![date_key, action_type, amount_sats as i64, target, timestamp as i64],
			)?;
			Ok(())
		})
	}

	pub fn get_daily_spend(&self, date_key: &str) -> Result<u64, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT COALESCE(SUM(amount_sats), 0) FROM budget_tracking WHERE date_key = ?1",
				params![date_key],
				|row| row.get::<_, i64>(0).map(|v| v as u64),
			)
		})
	}

	pub fn active_hold_total(&self, now: u64) -> Result<u64, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT COALESCE(SUM(amount_sats), 0) FROM budget_holds
				 WHERE status = 'active' AND expires_at > ?1",
				params![now as i64],
				|row| row.get::<_, i64>(0).map(|v| v as u64),
			)
		})
	}

	/// Budget still available today after spend and active reservations.
	pub fn get_available_budget(
		&self, daily_budget: u64, date_key: &str, now: u64,
	) -> Result<u64, HiveError> {
		let spent = self.get_daily_spend(date_key)?;
		let held = self.active_hold_total(now)?;
		Ok(daily_budget.saturating_sub(spent).saturating_sub(held))
	}

	/// Creates a hold, refusing any reservation that would push the active
	/// hold total above the daily budget.
	pub fn create_budget_hold(
		&self, hold_id: &str, round_id: &str, peer_id: &str, amount_sats: u64, now: u64,
		expires_at: u64, daily_budget: u64,
	) -> Result<(), HiveError> {
		let held = self.active_hold_total(now)?;
		if held + amount_sats > daily_budget {
			return Err(HiveError::new(
				HiveErrorCode::InvalidRequest,
				format!(
					"hold of {} sats would exceed daily budget ({} already held of {})",
					amount_sats, held, daily_budget
				),
			));
		}
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO budget_holds
					(hold_id, round_id, peer_id, amount_sats, created_at, expires_at, status)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active')",
				params![
					hold_id,
					round_id,
					peer_id,
					amount_sats as i64,
					now as i64,
					expires_at as i64
				],
			)?;
			Ok(())
		})
	}

	pub fn get_budget_hold(&self, hold_id: &str) -> Result<Option<BudgetHold>, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				&format!("SELECT {} FROM budget_holds WHERE hold_id = ?1", HOLD_COLUMNS),
				params![hold_id],
				row_to_hold,
			)
			.optional()
		})
	}

	pub fn get_holds_for_round(&self, round_id: &str) -> Result<Vec<BudgetHold>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(&format!(
				"SELECT {} FROM budget_holds WHERE round_id = ?1 ORDER BY created_at",
				HOLD_COLUMNS
			))?;
			let rows = stmt.query_map(params![round_id], row_to_hold)?;
			rows.collect()
		})
	}

	pub fn get_active_holds(&self, now: u64) -> Result<Vec<BudgetHold>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(&format!(
				"SELECT {} FROM budget_holds
				 WHERE status = 'active' AND expires_at > ?1 ORDER BY created_at",
				HOLD_COLUMNS
			))?;
			let rows = stmt.query_map(params![now as i64], row_to_hold)?;
			rows.collect()
		})
	}

	pub fn release_budget_hold(&self, hold_id: &str) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"UPDATE budget_holds SET status = 'released'
				 WHERE hold_id = ?1 AND status = 'active'",
				params![hold_id],
			)?;
			Ok(changed > 0)
		})
	}

	pub fn consume_budget_hold(
		&self, hold_id: &str, consumed_by: &str, now: u64,
	) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"UPDATE budget_holds SET status = 'consumed', consumed_by = ?2, consumed_at = ?3
				 WHERE hold_id = ?1 AND status = 'active'",
				params![hold_id, consumed_by, now as i64],
			)?;
			Ok(changed > 0)
		})
	}

	pub fn expire_budget_holds(&self, now: u64) -> Result<u32, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"UPDATE budget_holds SET status = 'expired'
				 WHERE status = 'active' AND expires_at <= ?1",
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
	fn test_holds_never_exceed_daily_budget() {
		let store = Store::open_in_memory().unwrap();
		let peer = node_id(1);
		store.create_budget_hold("h1", "r1", &peer, 6_000_000, 100, 500, 10_000_000).unwrap();
		store.create_budget_hold("h2", "r2", &peer, 4_000_000, 100, 500, 10_000_000).unwrap();
		let err = store
			.create_budget_hold("h3", "r3", &peer, 1, 100, 500, 10_000_000)
			.unwrap_err();
		assert_eq!(err.code, HiveErrorCode::InvalidRequest);
		assert_eq!(store.active_hold_total(100).unwrap(), 10_000_000);
	}

	#[test]
	fn test_released_hold_frees_budget() {
		let store = Store::open_in_memory().unwrap();
		let peer = node_id(1);
		store.create_budget_hold("h1", "r1", &peer, 9_000_000, 100, 500, 10_000_000).unwrap();
		assert!(store.release_budget_hold("h1").unwrap());
		// Releasing twice is a no-op.
		assert!(!store.release_budget_hold("h1").unwrap());
		store.create_budget_hold("h2", "r2", &peer, 9_000_000, 100, 500, 10_000_000).unwrap();
	}

	#[test]
	fn test_expired_holds_do_not_count() {
		let store = Store::open_in_memory().unwrap();
		let peer = node_id(1);
		store.create_budget_hold("h1", "r1", &peer, 9_000_000, 100, 200, 10_000_000).unwrap();
		assert_eq!(store.active_hold_total(200).unwrap(), 0);
		assert_eq!(store.expire_budget_holds(200).unwrap(), 1);
		assert_eq!(store.get_budget_hold("h1").unwrap().unwrap().status, HoldStatus::Expired);
	}

	#[test]
	fn test_available_budget_subtracts_spend_and_holds() {
		let store = Store::open_in_memory().unwrap();
		let peer = node_id(1);
		store.record_budget_spend("2026-08-01", "channel_open", 2_000_000, None, 100).unwrap();
		store.create_budget_hold("h1", "r1", &peer, 3_000_000, 100, 500, 10_000_000).unwrap();
		let available = store.get_available_budget(10_000_000, "2026-08-01", 100).unwrap();
		assert_eq!(available, 5_000_000);
	}

	#[test]
	fn test_consume_records_consumer() {
		let store = Store::open_in_memory().unwrap();
		let peer = node_id(1);
		store.create_budget_hold("h1", "r1", &peer, 1_000, 100, 500, 10_000).unwrap();
		assert!(store.consume_budget_hold("h1", "channel_open", 150).unwrap());
		let hold = store.get_budget_hold("h1").unwrap().unwrap();
		assert_eq!(hold.status, HoldStatus::Consumed);
		assert_eq!(hold.consumed_by.as_deref(), Some("channel_open"));
		assert_eq!(hold.consumed_at, Some(150));
	}
}
