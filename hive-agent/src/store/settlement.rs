// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Settlement offers, proposals, ready votes, executions and settled periods.

use rusqlite::{params, OptionalExtension};

use crate::error::HiveError;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementStatus {
	Pending,
	Ready,
	Completed,
	Stale,
}

impl SettlementStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			SettlementStatus::Pending => "pending",
			SettlementStatus::Ready => "ready",
			SettlementStatus::Completed => "completed",
			SettlementStatus::Stale => "stale",
		}
	}

	pub fn from_str(s: &str) -> Option<SettlementStatus> {
		match s {
			"pending" => Some(SettlementStatus::Pending),
			"ready" => Some(SettlementStatus::Ready),
			"completed" => Some(SettlementStatus::Completed),
			"stale" => Some(SettlementStatus::Stale),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementProposalRecord {
	pub proposal_id: String,
	pub period: String,
	pub proposer_peer_id: String,
	pub data_hash: String,
	pub total_fees_sats: u64,
	pub member_count: u32,
	pub status: SettlementStatus,
	pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementExecutionRecord {
	pub proposal_id: String,
	pub executor_peer_id: String,
	pub payment_hash: Option<String>,
	pub amount_paid_sats: u64,
	pub signature: String,
	pub executed_at: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettledPeriod {
	pub period: String,
	pub proposal_id: String,
	pub total_distributed_sats: u64,
	pub settled_at: u64,
}

fn row_to_proposal(row: &rusqlite::Row<'_>) -> Result<SettlementProposalRecord, rusqlite::Error> {
	let status: String = row.get(6)?;
	Ok(SettlementProposalRecord {
		proposal_id: row.get(0)?,
		period: row.get(1)?,
		proposer_peer_id: row.get(2)?,
		data_hash: row.get(3)?,
		total_fees_sats: row.get::<_, i64>(4)? as u64,
		member_count: row.get::<_, i64>(5)? as u32,
		status: SettlementStatus::from_str(&status).unwrap_or(SettlementStatus::Pending),
		created_at: row.get::<_, i64>(7)? as u64,
	})
}

const PROPOSAL_COLUMNS: &str = "proposal_id, period, proposer_peer_id, data_hash, \
	total_fees_sats, member_count, status, created_at";

impl Store {
	// =========================================================================
	// BOLT12 offers
	// =========================================================================

	pub fn register_settlement_offer(
		&self, peer_id: &str, bolt12_offer: &str, now: u64,
	) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO settlement_offers (peer_id, bolt12_offer, registered_at, active)
				 VALUES (?1, ?2, ?3, 1)
				 ON CONFLICT(peer_id) DO UPDATE SET
					bolt12_offer = excluded.bolt12_offer,
					registered_at = excluded.registered_at,
					active = 1",
				params![peer_id, bolt12_offer, now as i64],
			)?;
			Ok(())
		})
	}

	pub fn get_settlement_offer(&self, peer_id: &str) -> Result<Option<String>, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT bolt12_offer FROM settlement_offers WHERE peer_id = ?1 AND active = 1",
				params![peer_id],
				|row| row.get(0),
			)
			.optional()
		})
	}

	pub fn deactivate_settlement_offer(&self, peer_id: &str) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"UPDATE settlement_offers SET active = 0 WHERE peer_id = ?1",
				params![peer_id],
			)?;
			Ok(())
		})
	}

	// =========================================================================
	// Proposals
	// =========================================================================

	pub fn add_settlement_proposal(
		&self, proposal: &SettlementProposalRecord,
	) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"INSERT OR IGNORE INTO settlement_proposals
					(proposal_id, period, proposer_peer_id, data_hash, total_fees_sats,
					 member_count, status, created_at)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
				params![
					proposal.proposal_id,
					proposal.period,
					proposal.proposer_peer_id,
					proposal.data_hash,
					proposal.total_fees_sats as i64,
					proposal.member_count as i64,
					proposal.status.as_str(),
					proposal.created_at as i64
				],
			)?;
			Ok(changed > 0)
		})
	}

	pub fn get_settlement_proposal(
		&self, proposal_id: &str,
	) -> Result<Option<SettlementProposalRecord>, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				&format!(
					"SELECT {} FROM settlement_proposals WHERE proposal_id = ?1",
					PROPOSAL_COLUMNS
				),
				params![proposal_id],
				row_to_proposal,
			)
			.optional()
		})
	}

	pub fn get_settlement_proposal_by_period(
		&self, period: &str,
	) -> Result<Option<SettlementProposalRecord>, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				&format!(
					"SELECT {} FROM settlement_proposals
					 WHERE period = ?1 AND status != 'stale'
					 ORDER BY created_at DESC LIMIT 1",
					PROPOSAL_COLUMNS
				),
				params![period],
				row_to_proposal,
			)
			.optional()
		})
	}

	pub fn get_settlement_proposals_with_status(
		&self, status: SettlementStatus,
	) -> Result<Vec<SettlementProposalRecord>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(&format!(
				"SELECT {} FROM settlement_proposals WHERE status = ?1 ORDER BY created_at",
				PROPOSAL_COLUMNS
			))?;
			let rows = stmt.query_map(params![status.as_str()], row_to_proposal)?;
			rows.collect()
		})
	}

	pub fn update_settlement_proposal_status(
		&self, proposal_id: &str, status: SettlementStatus,
	) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"UPDATE settlement_proposals SET status = ?2 WHERE proposal_id = ?1",
				params![proposal_id, status.as_str()],
			)?;
			Ok(changed > 0)
		})
	}

	// =========================================================================
	// Ready votes
	// =========================================================================

	pub fn add_settlement_ready_vote(
		&self, proposal_id: &str, voter: &str, data_hash: &str, signature: &str, now: u64,
	) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"INSERT OR IGNORE INTO settlement_ready_votes
					(proposal_id, voter_peer_id, data_hash, signature, voted_at)
				 VALUES (?1, ?2, ?3, ?4, ?5)",
				params![proposal_id, voter, data_hash, signature, now as i64],
			)?;
			Ok(changed > 0)
		})
	}

	pub fn count_settlement_ready_votes(&self, proposal_id: &str) -> Result<u32, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT COUNT(*) FROM settlement_ready_votes WHERE proposal_id = ?1",
				params![proposal_id],
				|row| row.get::<_, i64>(0).map(|c| c as u32),
			)
		})
	}

	pub fn has_voted_settlement(&self, proposal_id: &str, voter: &str) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let count: i64 = conn.query_row(
				"SELECT COUNT(*) FROM settlement_ready_votes
				 WHERE proposal_id = ?1 AND voter_peer_id = ?2",
				params![proposal_id, voter],
				|row| row.get(0),
			)?;
			Ok(count > 0)
		})
	}

	// =========================================================================
	// Executions
	// =========================================================================

	pub fn add_settlement_execution(
		&self, execution: &SettlementExecutionRecord,
	) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"INSERT OR IGNORE INTO settlement_executions
					(proposal_id, executor_peer_id, payment_hash, amount_paid_sats, signature,
					 executed_at)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
				params![
					execution.proposal_id,
					execution.executor_peer_id,
					execution.payment_hash,
					execution.amount_paid_sats as i64,
					execution.signature,
					execution.executed_at as i64
				],
			)?;
			Ok(changed > 0)
		})
	}

	pub fn get_settlement_executions(
		&self, proposal_id: &str,
	) -> Result<Vec<SettlementExecutionRecord>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(
				"SELECT proposal_id, executor_peer_id, payment_hash, amount_paid_sats, signature,
						executed_at
				 FROM settlement_executions WHERE proposal_id = ?1 ORDER BY executed_at",
			)?;
			let rows = stmt.query_map(params![proposal_id], |row| {
				Ok(SettlementExecutionRecord {
					proposal_id: row.get(0)?,
					executor_peer_id: row.get(1)?,
					payment_hash: row.get(2)?,
					amount_paid_sats: row.get::<_, i64>(3)? as u64,
					signature: row.get(4)?,
					executed_at: row.get::<_, i64>(5)? as u64,
				})
			})?;
			rows.collect()
		})
	}

	pub fn has_executed_settlement(
		&self, proposal_id: &str, executor: &str,
	) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let count: i64 = conn.query_row(
				"SELECT COUNT(*) FROM settlement_executions
				 WHERE proposal_id = ?1 AND executor_peer_id = ?2",
				params![proposal_id, executor],
				|row| row.get(0),
			)?;
			Ok(count > 0)
		})
	}

	// =========================================================================
	// Settled periods
	// =========================================================================

	/// Marks a period settled. Insert-or-ignore: once settled, a period's
	/// total can never be rewritten.
	pub fn mark_period_settled(
		&self, period: &str, proposal_id: &str, total_distributed_sats: u64, now: u64,
	) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"INSERT OR IGNORE INTO settled_periods
					(period, proposal_id, total_distributed_sats, settled_at)
				 VALUES (?1, ?2, ?3, ?4)",
				params![period, proposal_id, total_distributed_sats as i64, now as i64],
			)?;
			Ok(changed > 0)
		})
	}

	pub fn is_period_settled(&self, period: &str) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let count: i64 = conn.query_row(
				"SELECT COUNT(*) FROM settled_periods WHERE period = ?1",
				params![period],
				|row| row.get(0),
			)?;
			Ok(count > 0)
		})
	}

	pub fn get_settled_period(&self, period: &str) -> Result<Option<SettledPeriod>, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT period, proposal_id, total_distributed_sats, settled_at
				 FROM settled_periods WHERE period = ?1",
				params![period],
				|row| {
					Ok(SettledPeriod {
						period: row.get(0)?,
						proposal_id: row.get(1)?,
						total_distributed_sats: row.get::<_, i64>(2)? as u64,
						settled_at: row.get::<_, i64>(3)? as u64,
					})
				},
			)
			.optional()
		})
	}

	pub fn get_settled_periods(&self, limit: u32) -> Result<Vec<SettledPeriod>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(
				"SELECT period, proposal_id, total_distributed_sats, settled_at
				 FROM settled_periods ORDER BY settled_at DESC LIMIT ?1",
			)?;
			let rows = stmt.query_map(params![limit as i64], |row| {
				Ok(SettledPeriod {
					period: row.get(0)?,
					proposal_id: row.get(1)?,
					total_distributed_sats: row.get::<_, i64>(2)? as u64,
					settled_at: row.get::<_, i64>(3)? as u64,
				})
			})?;
			rows.collect()
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn node_id(tag: u8) -> String {
		format!("02{:02x}{}", tag, "ab".repeat(31))
	}

	fn proposal(id: &str, period: &str) -> SettlementProposalRecord {
		SettlementProposalRecord {
			proposal_id: id.into(),
			period: period.into(),
			proposer_peer_id: node_id(1),
			data_hash: "cd".repeat(32),
			total_fees_sats: 150,
			member_count: 2,
			status: SettlementStatus::Pending,
			created_at: 100,
		}
	}

	#[test]
	fn test_settled_period_is_immutable() {
		let store = Store::open_in_memory().unwrap();
		assert!(store.mark_period_settled("2025-W03", "p1", 25, 100).unwrap());
		// A second settlement attempt for the same period changes nothing.
		assert!(!store.mark_period_settled("2025-W03", "p2", 9999, 200).unwrap());
		let settled = store.get_settled_period("2025-W03").unwrap().unwrap();
		assert_eq!(settled.proposal_id, "p1");
		assert_eq!(settled.total_distributed_sats, 25);
	}

	#[test]
	fn test_vote_and_execution_dedup() {
		let store = Store::open_in_memory().unwrap();
		store.add_settlement_proposal(&proposal("p1", "2025-W03")).unwrap();

		let voter = node_id(2);
		assert!(store
			.add_settlement_ready_vote("p1", &voter, &"cd".repeat(32), "sig", 100)
			.unwrap());
		assert!(!store
			.add_settlement_ready_vote("p1", &voter, &"cd".repeat(32), "sig", 200)
			.unwrap());
		assert_eq!(store.count_settlement_ready_votes("p1").unwrap(), 1);
		assert!(store.has_voted_settlement("p1", &voter).unwrap());

		let execution = SettlementExecutionRecord {
			proposal_id: "p1".into(),
			executor_peer_id: voter.clone(),
			payment_hash: None,
			amount_paid_sats: 0,
			signature: "sig".into(),
			executed_at: 150,
		};
		assert!(store.add_settlement_execution(&execution).unwrap());
		assert!(!store.add_settlement_execution(&execution).unwrap());
		assert!(store.has_executed_settlement("p1", &voter).unwrap());
	}

	#[test]
	fn test_proposal_per_period_lookup() {
		let store = Store::open_in_memory().unwrap();
		store.add_settlement_proposal(&proposal("p1", "2025-W03")).unwrap();
		assert!(store.get_settlement_proposal_by_period("2025-W03").unwrap().is_some());
		assert!(store.get_settlement_proposal_by_period("2025-W04").unwrap().is_none());

		store.update_settlement_proposal_status("p1", SettlementStatus::Ready).unwrap();
		let ready =
			store.get_settlement_proposals_with_status(SettlementStatus::Ready).unwrap();
		assert_eq!(ready.len(), 1);
	}

	#[test]
	fn test_offer_upsert() {
		let store = Store::open_in_memory().unwrap();
		let id = node_id(3);
		store.register_settlement_offer(&id, "lno1first", 100).unwrap();
		store.register_settlement_offer(&id, "lno1second", 200).unwrap();
		assert_eq!(store.get_settlement_offer(&id).unwrap().as_deref(), Some("lno1second"));
		store.deactivate_settlement_offer(&id).unwrap();
		assert!(store.get_settlement_offer(&id).unwrap().is_none());
	}
}
