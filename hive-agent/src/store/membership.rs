// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Promotion requests, vouches, ban proposals and ballots.

use rusqlite::{params, OptionalExtension};

use crate::error::HiveError;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq)]
pub struct PromotionRequestRecord {
	pub target_peer_id: String,
	pub request_id: String,
	pub status: String,
	pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VouchRecord {
	pub target_peer_id: String,
	pub request_id: String,
	pub voucher_peer_id: String,
	pub sig: String,
	pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalStatus {
	Pending,
	Approved,
	Rejected,
	Expired,
}

impl ProposalStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			ProposalStatus::Pending => "pending",
			ProposalStatus::Approved => "approved",
			ProposalStatus::Rejected => "rejected",
			ProposalStatus::Expired => "expired",
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct BanProposalRecord {
	pub proposal_id: String,
	pub target_peer_id: String,
	pub proposer_peer_id: String,
	pub reason: String,
	pub proposed_at: u64,
	pub expires_at: u64,
	pub status: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BanVoteRecord {
	pub proposal_id: String,
	pub voter_peer_id: String,
	pub vote: String,
	pub voted_at: u64,
	pub signature: String,
}

fn row_to_ban_proposal(row: &rusqlite::Row<'_>) -> Result<BanProposalRecord, rusqlite::Error> {
	Ok(BanProposalRecord {
		proposal_id: row.get(0)?,
		target_peer_id: row.get(1)?,
		proposer_peer_id: row.get(2)?,
		reason: row.get(3)?,
		proposed_at: row.get::<_, i64>(4)? as u64,
		expires_at: row.get::<_, i64>(5)? as u64,
		status: row.get(6)?,
	})
}

impl Store {
	// =========================================================================
	// Promotion requests and vouches
	// =========================================================================

	pub fn add_promotion_request(
		&self, target: &str, request_id: &str, created_at: u64,
	) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"INSERT OR IGNORE INTO promotion_requests
					(target_peer_id, request_id, created_at)
				 VALUES (?1, ?2, ?3)",
				params![target, request_id, created_at as i64],
			)?;
			Ok(changed > 0)
		})
	}

	pub fn get_promotion_request(
		&self, target: &str, request_id: &str,
	) -> Result<Option<PromotionRequestRecord>, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT target_peer_id, request_id, status, created_at
				 FROM promotion_requests WHERE target_peer_id = ?1 AND request_id = ?2",
				params![target, request_id],
				|row| {
					Ok(PromotionRequestRecord {
						target_peer_id: row.get(0)?,
						request_id: row.get(1)?,
						status: row.get(2)?,
						created_at: row.get::<_, i64>(3)? as u64,
					})
				},
			)
			.optional()
		})
	}

	pub fn has_pending_promotion_request(&self, target: &str) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let count: i64 = conn.query_row(
				"SELECT COUNT(*) FROM promotion_requests
				 WHERE target_peer_id = ?1 AND status = 'pending'",
				params![target],
				|row| row.get(0),
			)?;
			Ok(count > 0)
		})
	}

	pub fn update_promotion_request_status(
		&self, target: &str, request_id: &str, status: &str,
	) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"UPDATE promotion_requests SET status = ?3
				 WHERE target_peer_id = ?1 AND request_id = ?2",
				params![target, request_id, status],
			)?;
			Ok(changed > 0)
		})
	}

	/// Records a vouch. Duplicate vouchers for the same request are ignored.
	pub fn add_promotion_vouch(&self, vouch: &VouchRecord) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"INSERT OR IGNORE INTO promotion_vouches
					(target_peer_id, request_id, voucher_peer_id, sig, timestamp)
				 VALUES (?1, ?2, ?3, ?4, ?5)",
				params![
					vouch.target_peer_id,
					vouch.request_id,
					vouch.voucher_peer_id,
					vouch.sig,
					vouch.timestamp as i64
				],
			)?;
			Ok(changed > 0)
		})
	}

	pub fn get_promotion_vouches(
		&self, target: &str, request_id: &str,
	) -> Result<Vec<VouchRecord>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(
				"SELECT target_peer_id, request_id, voucher_peer_id, sig, timestamp
				 FROM promotion_vouches
				 WHERE target_peer_id = ?1 AND request_id = ?2
				 ORDER BY timestamp",
			)?;
			let rows = stmt.query_map(params![target, request_id], |row| {
				Ok(VouchRecord {
					target_peer_id: row.get(0)?,
					request_id: row.get(1)?,
					voucher_peer_id: row.get(2)?,
					sig: row.get(3)?,
					timestamp: row.get::<_, i64>(4)? as u64,
				})
			})?;
			rows.collect()
		})
	}

	pub fn prune_old_vouches(&self, older_than: u64) -> Result<u32, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"DELETE FROM promotion_vouches WHERE timestamp < ?1",
				params![older_than as i64],
			)?;
			Ok(changed as u32)
		})
	}

	// =========================================================================
	// Manual promotions (majority member approval)
	// =========================================================================

	pub fn create_admin_promotion(
		&self, target: &str, proposed_by: &str, now: u64,
	) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"INSERT OR IGNORE INTO admin_promotions (target_peer_id, proposed_by, proposed_at)
				 VALUES (?1, ?2, ?3)",
				params![target, proposed_by, now as i64],
			)?;
			Ok(changed > 0)
		})
	}

	pub fn get_admin_promotion_status(&self, target: &str) -> Result<Option<String>, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT status FROM admin_promotions WHERE target_peer_id = ?1",
				params![target],
				|row| row.get(0),
			)
			.optional()
		})
	}

	pub fn add_admin_promotion_approval(
		&self, target: &str, approver: &str, now: u64,
	) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"INSERT OR IGNORE INTO admin_promotion_approvals
					(target_peer_id, approver_peer_id, approved_at)
				 VALUES (?1, ?2, ?3)",
				params![target, approver, now as i64],
			)?;
			Ok(changed > 0)
		})
	}

	pub fn count_admin_promotion_approvals(&self, target: &str) -> Result<u32, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT COUNT(*) FROM admin_promotion_approvals WHERE target_peer_id = ?1",
				params![target],
				|row| row.get::<_, i64>(0).map(|c| c as u32),
			)
		})
	}

	pub fn complete_admin_promotion(&self, target: &str) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"UPDATE admin_promotions SET status = 'completed'
				 WHERE target_peer_id = ?1 AND status = 'pending'",
				params![target],
			)?;
			Ok(changed > 0)
		})
	}

	// =========================================================================
	// Ban proposals and votes
	// =========================================================================

	pub fn create_ban_proposal(&self, proposal: &BanProposalRecord) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"INSERT OR IGNORE INTO ban_proposals
					(proposal_id, target_peer_id, proposer_peer_id, reason, proposed_at,
					 expires_at)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
				params![
					proposal.proposal_id,
					proposal.target_peer_id,
					proposal.proposer_peer_id,
					proposal.reason,
					proposal.proposed_at as i64,
					proposal.expires_at as i64
				],
			)?;
			Ok(changed > 0)
		})
	}

	pub fn get_ban_proposal(
		&self, proposal_id: &str,
	) -> Result<Option<BanProposalRecord>, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT proposal_id, target_peer_id, proposer_peer_id, reason, proposed_at,
						expires_at, status
				 FROM ban_proposals WHERE proposal_id = ?1",
				params![proposal_id],
				row_to_ban_proposal,
			)
			.optional()
		})
	}

	/// The pending proposal for a target, if one exists. While it is pending
	/// any conflicting ban action is held.
	pub fn get_pending_ban_proposal_for_target(
		&self, target: &str,
	) -> Result<Option<BanProposalRecord>, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT proposal_id, target_peer_id, proposer_peer_id, reason, proposed_at,
						expires_at, status
				 FROM ban_proposals
				 WHERE target_peer_id = ?1 AND status = 'pending'
				 ORDER BY proposed_at DESC LIMIT 1",
				params![target],
				row_to_ban_proposal,
			)
			.optional()
		})
	}

	pub fn update_ban_proposal_status(
		&self, proposal_id: &str, status: ProposalStatus,
	) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"UPDATE ban_proposals SET status = ?2 WHERE proposal_id = ?1",
				params![proposal_id, status.as_str()],
			)?;
			Ok(changed > 0)
		})
	}

	pub fn cleanup_expired_ban_proposals(&self, now: u64) -> Result<u32, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"UPDATE ban_proposals SET status = 'expired'
				 WHERE status = 'pending' AND expires_at <= ?1",
				params![now as i64],
			)?;
			Ok(changed as u32)
		})
	}

	pub fn add_ban_vote(&self, vote: &BanVoteRecord) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"INSERT OR IGNORE INTO ban_votes
					(proposal_id, voter_peer_id, vote, voted_at, signature)
				 VALUES (?1, ?2, ?3, ?4, ?5)",
				params![
					vote.proposal_id,
					vote.voter_peer_id,
					vote.vote,
					vote.voted_at as i64,
					vote.signature
				],
			)?;
			Ok(changed > 0)
		})
	}

	pub fn get_ban_votes(&self, proposal_id: &str) -> Result<Vec<BanVoteRecord>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(
				"SELECT proposal_id, voter_peer_id, vote, voted_at, signature
				 FROM ban_votes WHERE proposal_id = ?1 ORDER BY voted_at",
			)?;
			let rows = stmt.query_map(params![proposal_id], |row| {
				Ok(BanVoteRecord {
					proposal_id: row.get(0)?,
					voter_peer_id: row.get(1)?,
					vote: row.get(2)?,
					voted_at: row.get::<_, i64>(3)? as u64,
					signature: row.get(4)?,
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

	#[test]
	fn test_duplicate_vouch_ignored() {
		let store = Store::open_in_memory().unwrap();
		let vouch = VouchRecord {
			target_peer_id: node_id(1),
			request_id: "aabb".into(),
			voucher_peer_id: node_id(2),
			sig: "zb".repeat(40),
			timestamp: 100,
		};
		assert!(store.add_promotion_vouch(&vouch).unwrap());
		assert!(!store.add_promotion_vouch(&vouch).unwrap());
		assert_eq!(store.get_promotion_vouches(&node_id(1), "aabb").unwrap().len(), 1);
	}

	#[test]
	fn test_ban_proposal_lifecycle() {
		let store = Store::open_in_memory().unwrap();
		let proposal = BanProposalRecord {
			proposal_id: "cafe".into(),
			target_peer_id: node_id(7),
			proposer_peer_id: node_id(1),
			reason: "leech".into(),
			proposed_at: 100,
			expires_at: 500,
			status: "pending".into(),
		};
		assert!(store.create_ban_proposal(&proposal).unwrap());
		assert!(store
			.get_pending_ban_proposal_for_target(&node_id(7))
			.unwrap()
			.is_some());

		store
			.add_ban_vote(&BanVoteRecord {
				proposal_id: "cafe".into(),
				voter_peer_id: node_id(2),
				vote: "approve".into(),
				voted_at: 120,
				signature: "s".into(),
			})
			.unwrap();
		assert_eq!(store.get_ban_votes("cafe").unwrap().len(), 1);

		assert_eq!(store.cleanup_expired_ban_proposals(500).unwrap(), 1);
		assert!(store.get_pending_ban_proposal_for_target(&node_id(7)).unwrap().is_none());
	}
}
