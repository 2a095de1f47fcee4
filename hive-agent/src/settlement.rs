// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Distributed revenue settlement over ISO-week periods.
//!
//! At period end one member proposes a settlement identified by a
//! deterministic hash over the gossiped contribution data. Every recipient
//! rebuilds the contributions from its own gossip and votes READY only when
//! its hash matches; a silent non-vote is the anti-gaming signal. Once a
//! majority agrees, each member computes its own balance and debtors pay
//! their largest creditor over BOLT12. A period marked settled is final.

use std::sync::Arc;

use bitcoin_hashes::{sha256, Hash};
use chrono::{Datelike, TimeZone, Utc};
use hive_proto::msgs::{
	HiveMessage, SettlementExecuted, SettlementPropose, SettlementReady,
};
use hive_proto::signing;
use log::{debug, info, warn};
use rand::RngCore;

use crate::error::{HiveError, HiveErrorCode};
use crate::gateway::Gateway;
use crate::store::settlement::{
	SettlementExecutionRecord, SettlementProposalRecord, SettlementStatus,
};
use crate::store::Store;

/// Fair-share component weights.
const WEIGHT_CAPACITY: f64 = 0.30;
const WEIGHT_FORWARDS: f64 = 0.60;
const WEIGHT_UPTIME: f64 = 0.10;

/// Payments below this are dust and skipped.
pub const MIN_PAYMENT_SATS: i64 = 1000;

/// Contributions are gathered from fee reports no older than this.
const CONTRIBUTION_WINDOW_SECONDS: u64 = 8 * 86400;

/// A member's contribution metrics for one settlement period.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberContribution {
	pub peer_id: String,
	pub capacity_sats: u64,
	pub forwards_sats: u64,
	pub fees_earned_sats: u64,
	pub uptime_pct: u32,
}

/// Fair share and balance for one member. A positive balance is owed money,
/// a negative balance owes.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementResult {
	pub peer_id: String,
	pub fees_earned: u64,
	pub fair_share: u64,
	pub balance: i64,
}

/// The ISO week period string `YYYY-Www` containing `timestamp`.
pub fn period_string(timestamp: u64) -> String {
	let dt = Utc.timestamp_opt(timestamp as i64, 0).single().unwrap_or_else(Utc::now);
	let week = dt.iso_week();
	format!("{}-W{:02}", week.year(), week.week())
}

/// The period one week before `timestamp`.
pub fn previous_period(timestamp: u64) -> String {
	period_string(timestamp.saturating_sub(7 * 86400))
}

/// Deterministic hash over the period and its contributions, the object of
/// the READY vote. Contributions are sorted by peer id; forwards are not
/// covered so reporting noise there cannot split the vote.
pub fn settlement_hash(period: &str, contributions: &[MemberContribution]) -> String {
	let mut sorted: Vec<&MemberContribution> = contributions.iter().collect();
	sorted.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));

	let mut canonical = String::from(period);
	for c in sorted {
		canonical.push('|');
		canonical.push_str(&format!(
			"{}:{}:{}:{}",
			c.peer_id, c.fees_earned_sats, c.capacity_sats, c.uptime_pct
		));
	}
	sha256::Hash::hash(canonical.as_bytes()).to_string()
}

/// Splits the period's total fees by weighted contribution proportions.
/// Component proportions are normalized across members so balances always
/// sum to (rounding of) zero; a component nobody reported falls back to the
/// capacity proportion, and failing that to an equal split.
pub fn calculate_fair_shares(contributions: &[MemberContribution]) -> Vec<SettlementResult> {
	if contributions.is_empty() {
		return Vec::new();
	}
	let n = contributions.len() as f64;
	let total_fees: u64 = contributions.iter().map(|c| c.fees_earned_sats).sum();
	if total_fees == 0 {
		return contributions
			.iter()
			.map(|c| SettlementResult {
				peer_id: c.peer_id.clone(),
				fees_earned: 0,
				fair_share: 0,
				balance: 0,
			})
			.collect();
	}

	let total_capacity: u64 = contributions.iter().map(|c| c.capacity_sats).sum();
	let total_forwards: u64 = contributions.iter().map(|c| c.forwards_sats).sum();
	let total_uptime: u64 = contributions.iter().map(|c| c.uptime_pct as u64).sum();

	let capacity_share = |c: &MemberContribution| {
		if total_capacity > 0 {
			c.capacity_sats as f64 / total_capacity as f64
		} else {
			1.0 / n
		}
	};

	contributions
		.iter()
		.map(|c| {
			let cap = capacity_share(c);
			let fwd = if total_forwards > 0 {
				c.forwards_sats as f64 / total_forwards as f64
			} else {
				capacity_share(c)
			};
			let up = if total_uptime > 0 {
				c.uptime_pct as f64 / total_uptime as f64
			} else {
				1.0 / n
			};

			let weighted = WEIGHT_CAPACITY * cap + WEIGHT_FORWARDS * fwd + WEIGHT_UPTIME * up;
			let fair_share = (total_fees as f64 * weighted) as u64;
			SettlementResult {
				peer_id: c.peer_id.clone(),
				fees_earned: c.fees_earned_sats,
				fair_share,
				balance: fair_share as i64 - c.fees_earned_sats as i64,
			}
		})
		.collect()
}

pub struct SettlementManager {
	store: Arc<Store>,
	gateway: Arc<Gateway>,
	our_id: String,
}

impl SettlementManager {
	pub fn new(store: Arc<Store>, gateway: Arc<Gateway>, our_id: String) -> Self {
		SettlementManager { store, gateway, our_id }
	}

	/// Registers our own BOLT12 offer for receiving settlement payments,
	/// generating one through the host if none is registered yet. Called on
	/// join and on startup.
	pub fn ensure_own_offer(&self, now: u64) -> Result<Option<String>, HiveError> {
		if let Some(existing) = self.store.get_settlement_offer(&self.our_id)? {
			return Ok(Some(existing));
		}
		let offer = match self.gateway.offer(now, "any", "hive settlement") {
			Ok(result) => result.bolt12,
			Err(e) => {
				warn!("could not generate settlement offer: {}", e);
				return Ok(None);
			},
		};
		self.store.register_settlement_offer(&self.our_id, &offer, now)?;
		info!("registered settlement offer");
		Ok(Some(offer))
	}

	/// Member contributions as this node sees them: the latest fee report
	/// from each admitted member inside the contribution window.
	pub fn gather_contributions(&self, now: u64) -> Result<Vec<MemberContribution>, HiveError> {
		let since = now.saturating_sub(CONTRIBUTION_WINDOW_SECONDS);
		let reports = self.store.get_latest_fee_report_per_reporter(since)?;
		let mut contributions = Vec::with_capacity(reports.len());
		for report in reports {
			if self.store.get_member(&report.reporter)?.is_none() {
				continue;
			}
			contributions.push(MemberContribution {
				peer_id: report.reporter.clone(),
				capacity_sats: report.capacity_sats,
				forwards_sats: report.forward_volume_sats,
				fees_earned_sats: report.fees_earned_sats,
				uptime_pct: report.uptime_pct,
			});
		}
		Ok(contributions)
	}

	/// Scheduler hook: propose settlement of the previous period if nobody
	/// has, it is not settled, and there is data to settle.
	pub fn maybe_propose(
		&self, now: u64, peers: &[String],
	) -> Result<Option<(String, Vec<(String, HiveMessage)>)>, HiveError> {
		let period = previous_period(now);
		if self.store.is_period_settled(&period)? {
			return Ok(None);
		}
		if self.store.get_settlement_proposal_by_period(&period)?.is_some() {
			return Ok(None);
		}

		let contributions = self.gather_contributions(now)?;
		if contributions.is_empty() {
			debug!("no contributions to settle for {}", period);
			return Ok(None);
		}

		let data_hash = settlement_hash(&period, &contributions);
		let total_fees: u64 = contributions.iter().map(|c| c.fees_earned_sats).sum();
		let proposal_id = random_hex(16);

		let mut propose = SettlementPropose {
			proposal_id: proposal_id.clone(),
			period: period.clone(),
			proposer: self.our_id.clone(),
			data_hash: data_hash.clone(),
			total_fees_sats: total_fees,
			member_count: contributions.len() as u32,
			timestamp: now,
			signature: String::new(),
		};
		propose.signature = self
			.gateway
			.sign_message(now, &signing::settlement_propose(&propose))
			.map_err(HiveError::from)?;

		self.store.add_settlement_proposal(&SettlementProposalRecord {
			proposal_id: proposal_id.clone(),
			period: period.clone(),
			proposer_peer_id: self.our_id.clone(),
			data_hash,
			total_fees_sats: total_fees,
			member_count: contributions.len() as u32,
			status: SettlementStatus::Pending,
			created_at: now,
		})?;
		info!(
			"proposed settlement {} for {}: {} sats over {} members",
			short_id(&proposal_id),
			period,
			total_fees,
			contributions.len()
		);

		// The proposer's own hash agreement counts as a vote.
		let mut outbound = self.vote_ready(&proposal_id, &period, now, peers)?;
		let msg = HiveMessage::SettlementPropose(propose);
		outbound.extend(peers.iter().map(|peer| (peer.clone(), msg.clone())));
		Ok(Some((proposal_id, outbound)))
	}

	/// A proposal arrived: rebuild contributions from our own gossip and
	/// vote READY only on an exact hash match. A mismatch is silently not
	/// voted.
	pub fn handle_propose(
		&self, _sender: &str, msg: &SettlementPropose, now: u64, peers: &[String],
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		let verified = self
			.gateway
			.verify_signature(now, &signing::settlement_propose(msg), &msg.signature, &msg.proposer)
			.map_err(HiveError::from)?;
		if !verified {
			return Err(HiveError::new(HiveErrorCode::SignatureMismatch, "settlement proposal"));
		}
		if self.store.is_period_settled(&msg.period)? {
			return Err(HiveError::new(HiveErrorCode::Stale, "period already settled"));
		}

		self.store.add_settlement_proposal(&SettlementProposalRecord {
			proposal_id: msg.proposal_id.clone(),
			period: msg.period.clone(),
			proposer_peer_id: msg.proposer.clone(),
			data_hash: msg.data_hash.clone(),
			total_fees_sats: msg.total_fees_sats,
			member_count: msg.member_count,
			status: SettlementStatus::Pending,
			created_at: now,
		})?;

		let our_contributions = self.gather_contributions(now)?;
		let our_hash = settlement_hash(&msg.period, &our_contributions);
		if our_hash != msg.data_hash {
			warn!(
				"settlement hash mismatch for {}: ours {} theirs {}",
				short_id(&msg.proposal_id),
				&our_hash[..16],
				&msg.data_hash[..16]
			);
			return Ok(Vec::new());
		}

		self.vote_ready(&msg.proposal_id, &msg.period, now, peers)
	}

	fn vote_ready(
		&self, proposal_id: &str, period: &str, now: u64, peers: &[String],
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		if self.store.has_voted_settlement(proposal_id, &self.our_id)? {
			return Ok(Vec::new());
		}
		let contributions = self.gather_contributions(now)?;
		let data_hash = settlement_hash(period, &contributions);

		let mut ready = SettlementReady {
			proposal_id: proposal_id.to_string(),
			voter: self.our_id.clone(),
			data_hash: data_hash.clone(),
			timestamp: now,
			signature: String::new(),
		};
		ready.signature = self
			.gateway
			.sign_message(now, &signing::settlement_ready(&ready))
			.map_err(HiveError::from)?;

		self.store.add_settlement_ready_vote(
			proposal_id,
			&self.our_id,
			&data_hash,
			&ready.signature,
			now,
		)?;
		self.check_quorum(proposal_id)?;

		let msg = HiveMessage::SettlementReady(ready);
		Ok(peers.iter().map(|peer| (peer.clone(), msg.clone())).collect())
	}

	/// A READY vote arrived; tally it and mark the proposal ready at
	/// majority.
	pub fn handle_ready(
		&self, _sender: &str, msg: &SettlementReady, now: u64,
	) -> Result<(), HiveError> {
		let verified = self
			.gateway
			.verify_signature(now, &signing::settlement_ready(msg), &msg.signature, &msg.voter)
			.map_err(HiveError::from)?;
		if !verified {
			return Err(HiveError::new(HiveErrorCode::SignatureMismatch, "settlement vote"));
		}
		let Some(proposal) = self.store.get_settlement_proposal(&msg.proposal_id)? else {
			return Err(HiveError::new(HiveErrorCode::NotFound, "settlement proposal unknown"));
		};
		if msg.data_hash != proposal.data_hash {
			// The voter disagrees with the proposal it claims to be voting
			// for; that vote is meaningless.
			return Err(HiveError::new(HiveErrorCode::InvalidPayload, "vote hash mismatch"));
		}

		self.store.add_settlement_ready_vote(
			&msg.proposal_id,
			&msg.voter,
			&msg.data_hash,
			&msg.signature,
			now,
		)?;
		self.check_quorum(&msg.proposal_id)?;
		Ok(())
	}

	fn check_quorum(&self, proposal_id: &str) -> Result<bool, HiveError> {
		let Some(proposal) = self.store.get_settlement_proposal(proposal_id)? else {
			return Ok(false);
		};
		if proposal.status != SettlementStatus::Pending {
			return Ok(false);
		}
		let votes = self.store.count_settlement_ready_votes(proposal_id)?;
		let quorum = proposal.member_count / 2 + 1;
		if votes >= quorum {
			self.store.update_settlement_proposal_status(proposal_id, SettlementStatus::Ready)?;
			info!(
				"settlement {} reached quorum ({}/{})",
				short_id(proposal_id),
				votes,
				proposal.member_count
			);
			return Ok(true);
		}
		Ok(false)
	}

	/// Our own balance under the current contribution snapshot, and the
	/// creditor we should pay when we owe. There is no per-period ledger;
	/// proposals only pin a hash of this snapshot, which is why at most one
	/// proposal may be ready at a time (see [`Self::execute_ready`]).
	pub fn calculate_our_balance(&self, now: u64) -> Result<(i64, Option<String>), HiveError> {
		let contributions = self.gather_contributions(now)?;
		let results = calculate_fair_shares(&contributions);

		let Some(ours) = results.iter().find(|r| r.peer_id == self.our_id) else {
			return Ok((0, None));
		};

		if ours.balance < -MIN_PAYMENT_SATS {
			let mut creditors: Vec<&SettlementResult> =
				results.iter().filter(|r| r.balance > MIN_PAYMENT_SATS).collect();
			creditors.sort_by(|a, b| b.balance.cmp(&a.balance));
			return Ok((ours.balance, creditors.first().map(|c| c.peer_id.clone())));
		}
		Ok((ours.balance, None))
	}

	/// Executes our side of the ready proposal: pay our largest creditor
	/// when we owe, and either way broadcast a signed execution record so
	/// participation is confirmed.
	///
	/// Balances come from the live contribution snapshot, so only the
	/// newest ready proposal executes; any older backlog (a missed cycle,
	/// a late quorum on a stale period) no longer matches the data its
	/// hash was agreed over and is marked stale instead.
	pub fn execute_ready(
		&self, now: u64, peers: &[String],
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		let mut ready =
			self.store.get_settlement_proposals_with_status(SettlementStatus::Ready)?;
		ready.sort_by_key(|proposal| proposal.created_at);
		let newest = ready.pop();
		for stale in ready {
			warn!(
				"superseded settlement {} for {} marked stale",
				short_id(&stale.proposal_id),
				stale.period
			);
			self.store
				.update_settlement_proposal_status(&stale.proposal_id, SettlementStatus::Stale)?;
		}

		let mut outbound = Vec::new();
		if let Some(proposal) = newest {
			if self.store.has_executed_settlement(&proposal.proposal_id, &self.our_id)? {
				return Ok(outbound);
			}

			let (balance, creditor) = self.calculate_our_balance(now)?;
			let (payment_hash, amount_paid) = if balance < -MIN_PAYMENT_SATS {
				match self.pay_creditor(creditor.as_deref(), (-balance) as u64, now)? {
					Some(hash) => (Some(hash), (-balance) as u64),
					None => {
						// Payment failed; retried next cycle.
						return Ok(outbound);
					},
				}
			} else {
				(None, 0)
			};

			let mut executed = SettlementExecuted {
				proposal_id: proposal.proposal_id.clone(),
				executor: self.our_id.clone(),
				payment_hash: payment_hash.clone(),
				amount_paid_sats: amount_paid,
				timestamp: now,
				signature: String::new(),
			};
			executed.signature = self
				.gateway
				.sign_message(now, &signing::settlement_executed(&executed))
				.map_err(HiveError::from)?;

			self.store.add_settlement_execution(&SettlementExecutionRecord {
				proposal_id: proposal.proposal_id.clone(),
				executor_peer_id: self.our_id.clone(),
				payment_hash,
				amount_paid_sats: amount_paid,
				signature: executed.signature.clone(),
				executed_at: now,
			})?;
			info!(
				"executed settlement {} (paid {} sats)",
				short_id(&proposal.proposal_id),
				amount_paid
			);
			self.check_completion(&proposal.proposal_id, now)?;

			let msg = HiveMessage::SettlementExecuted(executed);
			outbound.extend(peers.iter().map(|peer| (peer.clone(), msg.clone())));
		}
		Ok(outbound)
	}

	fn pay_creditor(
		&self, creditor: Option<&str>, amount_sats: u64, now: u64,
	) -> Result<Option<String>, HiveError> {
		let Some(creditor) = creditor else {
			return Ok(None);
		};
		let Some(offer) = self.store.get_settlement_offer(creditor)? else {
			warn!("no settlement offer registered for {}", &creditor[..16]);
			return Ok(None);
		};
		let invoice = match self.gateway.fetch_invoice(now, &offer, amount_sats * 1000) {
			Ok(invoice) => invoice,
			Err(e) => {
				warn!("fetch_invoice failed: {}", e);
				return Ok(None);
			},
		};
		match self.gateway.pay(now, &invoice) {
			Ok(result) if result.status == "complete" => Ok(result.payment_hash),
			Ok(result) => {
				warn!("settlement payment status {}", result.status);
				Ok(None)
			},
			Err(e) => {
				warn!("settlement payment failed: {}", e);
				Ok(None)
			},
		}
	}

	/// An execution record arrived from a member.
	pub fn handle_executed(
		&self, _sender: &str, msg: &SettlementExecuted, now: u64,
	) -> Result<(), HiveError> {
		let verified = self
			.gateway
			.verify_signature(
				now,
				&signing::settlement_executed(msg),
				&msg.signature,
				&msg.executor,
			)
			.map_err(HiveError::from)?;
		if !verified {
			return Err(HiveError::new(HiveErrorCode::SignatureMismatch, "settlement execution"));
		}
		if self.store.get_settlement_proposal(&msg.proposal_id)?.is_none() {
			return Err(HiveError::new(HiveErrorCode::NotFound, "settlement proposal unknown"));
		}

		self.store.add_settlement_execution(&SettlementExecutionRecord {
			proposal_id: msg.proposal_id.clone(),
			executor_peer_id: msg.executor.clone(),
			payment_hash: msg.payment_hash.clone(),
			amount_paid_sats: msg.amount_paid_sats,
			signature: msg.signature.clone(),
			executed_at: msg.timestamp,
		})?;
		self.check_completion(&msg.proposal_id, now)?;
		Ok(())
	}

	/// When every member has confirmed execution the proposal completes and
	/// the period is marked settled, permanently.
	fn check_completion(&self, proposal_id: &str, now: u64) -> Result<bool, HiveError> {
		let Some(proposal) = self.store.get_settlement_proposal(proposal_id)? else {
			return Ok(false);
		};
		if proposal.status != SettlementStatus::Ready {
			return Ok(false);
		}
		let executions = self.store.get_settlement_executions(proposal_id)?;
		if (executions.len() as u32) < proposal.member_count {
			return Ok(false);
		}

		let total_distributed: u64 = executions.iter().map(|e| e.amount_paid_sats).sum();
		self.store.update_settlement_proposal_status(proposal_id, SettlementStatus::Completed)?;
		self.store.mark_period_settled(&proposal.period, proposal_id, total_distributed, now)?;

		// Final distribution ledger, one row per member of the period.
		let contributions = self.gather_contributions(now)?;
		for result in calculate_fair_shares(&contributions) {
			self.store.record_pool_distribution(&crate::store::pool::PoolDistribution {
				period: proposal.period.clone(),
				member_id: result.peer_id.clone(),
				contribution_share: if proposal.total_fees_sats > 0 {
					result.fair_share as f64 / proposal.total_fees_sats as f64
				} else {
					0.0
				},
				revenue_share_sats: result.fair_share,
				total_pool_revenue_sats: proposal.total_fees_sats,
				settled_at: now,
			})?;
		}
		info!(
			"settlement {} completed: {} sats distributed for {}",
			short_id(proposal_id),
			total_distributed,
			proposal.period
		);
		Ok(true)
	}
}

fn short_id(id: &str) -> &str {
	&id[..id.len().min(12)]
}

fn random_hex(bytes: usize) -> String {
	let mut buf = vec![0u8; bytes];
	rand::thread_rng().fill_bytes(&mut buf);
	buf.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::gateway::test_util::MockHostRpc;
	use crate::store::Tier;
	use hive_proto::msgs::FeeReport;

	fn node_id(tag: u8) -> String {
		format!("02{:02x}{}", tag, "ab".repeat(31))
	}

	fn contribution(tag: u8, fees: u64, capacity: u64, uptime: u32) -> MemberContribution {
		MemberContribution {
			peer_id: node_id(tag),
			capacity_sats: capacity,
			forwards_sats: 0,
			fees_earned_sats: fees,
			uptime_pct: uptime,
		}
	}

	fn manager(our_id: &str) -> (SettlementManager, Arc<Store>) {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let gateway = Arc::new(Gateway::new(Arc::new(MockHostRpc::new(our_id))));
		(SettlementManager::new(Arc::clone(&store), gateway, our_id.to_string()), store)
	}

	fn seed_fee_report(
		store: &Store, reporter: &str, fees: u64, capacity: u64, uptime: u32, ts: u64,
	) {
		store.add_member(reporter, Tier::Member, 0).unwrap();
		store.touch_member(reporter, ts).unwrap();
		store
			.store_fee_report(&FeeReport {
				reporter: reporter.to_string(),
				target: node_id(99),
				timestamp: ts,
				our_fee_ppm: 0,
				their_fee_ppm: 0,
				forward_count: 0,
				forward_volume_sats: 0,
				revenue_sats: 0,
				flow_direction: "balanced".into(),
				utilization_pct: 0.0,
				days_observed: 7,
				fees_earned_sats: fees,
				capacity_sats: capacity,
				uptime_pct: uptime,
				bolt12_offer: Some("lno1offer".into()),
				signature: "s".into(),
			})
			.unwrap();
		store.register_settlement_offer(reporter, "lno1offer", ts).unwrap();
	}

	#[test]
	fn test_period_strings() {
		// 2025-01-15 is in ISO week 3 of 2025.
		let ts = 1736899200;
		assert_eq!(period_string(ts), "2025-W03");
		assert_eq!(previous_period(ts), "2025-W02");
	}

	#[test]
	fn test_hash_is_order_independent() {
		let a = vec![contribution(1, 100, 10, 100), contribution(2, 50, 10, 100)];
		let b = vec![contribution(2, 50, 10, 100), contribution(1, 100, 10, 100)];
		assert_eq!(settlement_hash("2025-W03", &a), settlement_hash("2025-W03", &b));
		// Different period, different hash.
		assert_ne!(settlement_hash("2025-W03", &a), settlement_hash("2025-W04", &a));
	}

	#[test]
	fn test_fair_shares_equal_members() {
		// Equal capacity and uptime, no forwards reported: shares split the
		// 150 sats of fees evenly, so the high earner owes the low earner.
		let contributions = vec![contribution(1, 100, 10, 100), contribution(2, 50, 10, 100)];
		let results = calculate_fair_shares(&contributions);
		assert_eq!(results[0].fair_share, 75);
		assert_eq!(results[1].fair_share, 75);
		assert_eq!(results[0].balance, -25);
		assert_eq!(results[1].balance, 25);
		assert_eq!(results.iter().map(|r| r.balance).sum::<i64>(), 0);
	}

	#[test]
	fn test_fair_shares_weight_forwards() {
		let mut heavy = contribution(1, 0, 10, 100);
		heavy.forwards_sats = 900;
		let mut light = contribution(2, 300, 10, 100);
		light.forwards_sats = 100;
		let results = calculate_fair_shares(&[heavy, light]);
		// Forwards dominate at 60%: the router earns most of the pool.
		// cap 0.5/0.5, fwd 0.9/0.1, up 0.5/0.5
		// heavy: 0.3*0.5 + 0.6*0.9 + 0.1*0.5 = 0.74 -> 222 of 300
		assert_eq!(results[0].fair_share, 222);
		assert_eq!(results[1].fair_share, 78);
	}

	#[test]
	fn test_zero_fees_settles_to_zero() {
		let results = calculate_fair_shares(&[contribution(1, 0, 10, 100)]);
		assert_eq!(results[0].balance, 0);
	}

	#[test]
	fn test_propose_vote_execute_complete() {
		let a_id = node_id(1);
		let b_id = node_id(2);
		let (a, a_store) = manager(&a_id);
		let (b, b_store) = manager(&b_id);
		let now = 1736899200; // 2025-W03; previous period 2025-W02.

		// Both nodes hold identical gossip.
		for store in [&*a_store, &*b_store] {
			seed_fee_report(store, &a_id, 100_000, 10, 100, now - 100);
			seed_fee_report(store, &b_id, 50_000, 10, 100, now - 100);
		}

		// A proposes; its own vote is included.
		let (proposal_id, outbound) =
			a.maybe_propose(now, &[b_id.clone()]).unwrap().unwrap();
		let propose_msg = outbound
			.iter()
			.find_map(|(_, m)| match m {
				HiveMessage::SettlementPropose(p) => Some(p.clone()),
				_ => None,
			})
			.unwrap();
		assert_eq!(propose_msg.period, "2025-W02");
		assert_eq!(propose_msg.member_count, 2);
		assert_eq!(propose_msg.total_fees_sats, 150_000);

		// B recomputes the same hash and votes ready.
		let b_out = b.handle_propose(&a_id, &propose_msg, now + 1, &[a_id.clone()]).unwrap();
		let ready_msg = b_out
			.iter()
			.find_map(|(_, m)| match m {
				HiveMessage::SettlementReady(r) => Some(r.clone()),
				_ => None,
			})
			.expect("hash match must produce a vote");

		// A tallies B's vote: 2 of 2 voters clears the majority, ready.
		a.handle_ready(&b_id, &ready_msg, now + 2).unwrap();
		let proposal = a_store.get_settlement_proposal(&proposal_id).unwrap().unwrap();
		assert_eq!(proposal.status, SettlementStatus::Ready);

		// A owes 25k (earned 100k, fair share 75k) and pays B.
		let exec_out = a.execute_ready(now + 3, &[b_id.clone()]).unwrap();
		let executed_msg = exec_out
			.iter()
			.find_map(|(_, m)| match m {
				HiveMessage::SettlementExecuted(e) => Some(e.clone()),
				_ => None,
			})
			.unwrap();
		assert_eq!(executed_msg.amount_paid_sats, 25_000);
		assert!(executed_msg.payment_hash.is_some());

		// B's side: mark its proposal ready, then execute (net creditor,
		// zero payment) and absorb A's execution record.
		let b_proposal = b_store.get_settlement_proposal(&proposal_id).unwrap().unwrap();
		assert_eq!(b_proposal.status, SettlementStatus::Pending);
		let mut a_ready = SettlementReady {
			proposal_id: proposal_id.clone(),
			voter: a_id.clone(),
			data_hash: propose_msg.data_hash.clone(),
			timestamp: now + 1,
			signature: String::new(),
		};
		a_ready.signature =
			MockHostRpc::sign_for(&a_id, &signing::settlement_ready(&a_ready));
		b.handle_ready(&a_id, &a_ready, now + 2).unwrap();

		let b_exec = b.execute_ready(now + 3, &[a_id.clone()]).unwrap();
		let b_executed = b_exec
			.iter()
			.find_map(|(_, m)| match m {
				HiveMessage::SettlementExecuted(e) => Some(e.clone()),
				_ => None,
			})
			.unwrap();
		assert_eq!(b_executed.amount_paid_sats, 0);

		b.handle_executed(&a_id, &executed_msg, now + 4).unwrap();
		assert!(b_store.is_period_settled("2025-W02").unwrap());
		let settled = b_store.get_settled_period("2025-W02").unwrap().unwrap();
		assert_eq!(settled.total_distributed_sats, 25_000);

		// A completes once B's execution arrives.
		a.handle_executed(&b_id, &b_executed, now + 4).unwrap();
		assert!(a_store.is_period_settled("2025-W02").unwrap());
	}

	#[test]
	fn test_hash_mismatch_is_silent_no_vote() {
		let a_id = node_id(1);
		let b_id = node_id(2);
		let (b, b_store) = manager(&b_id);
		let now = 1736899200;
		// B has different gossip than the proposal was computed from.
		seed_fee_report(&b_store, &a_id, 999, 10, 100, now - 100);

		let mut propose = SettlementPropose {
			proposal_id: "ab".repeat(16),
			period: "2025-W02".into(),
			proposer: a_id.clone(),
			data_hash: "cd".repeat(32),
			total_fees_sats: 150,
			member_count: 2,
			timestamp: now,
			signature: String::new(),
		};
		propose.signature =
			MockHostRpc::sign_for(&a_id, &signing::settlement_propose(&propose));

		let out = b.handle_propose(&a_id, &propose, now, &[a_id.clone()]).unwrap();
		assert!(out.is_empty());
		assert_eq!(b_store.count_settlement_ready_votes(&"ab".repeat(16)).unwrap(), 0);
	}

	#[test]
	fn test_ready_backlog_executes_only_newest() {
		let a_id = node_id(1);
		let (a, a_store) = manager(&a_id);
		let now = 1736899200;
		seed_fee_report(&a_store, &a_id, 100_000, 10, 100, now - 100);

		// Two periods reached quorum; the older one's hash no longer matches
		// anything the live snapshot can reproduce.
		for (proposal_id, period, created_at) in
			[("aa".repeat(16), "2025-W01", now - 700_000), ("bb".repeat(16), "2025-W02", now - 100)]
		{
			a_store
				.add_settlement_proposal(&SettlementProposalRecord {
					proposal_id: proposal_id.clone(),
					period: period.into(),
					proposer_peer_id: a_id.clone(),
					data_hash: "cd".repeat(32),
					total_fees_sats: 100_000,
					member_count: 1,
					status: SettlementStatus::Ready,
					created_at,
				})
				.unwrap();
		}

		a.execute_ready(now, &[]).unwrap();

		let old = a_store.get_settlement_proposal(&"aa".repeat(16)).unwrap().unwrap();
		assert_eq!(old.status, SettlementStatus::Stale);
		assert!(!a_store.has_executed_settlement(&"aa".repeat(16), &a_id).unwrap());
		// Only the newest proposal carries our execution record.
		assert!(a_store.has_executed_settlement(&"bb".repeat(16), &a_id).unwrap());
	}

	#[test]
	fn test_settled_period_never_reproposed() {
		let a_id = node_id(1);
		let (a, a_store) = manager(&a_id);
		let now = 1736899200;
		seed_fee_report(&a_store, &a_id, 100, 10, 100, now - 100);
		a_store.mark_period_settled("2025-W02", "old", 1234, now - 10).unwrap();

		assert!(a.maybe_propose(now, &[]).unwrap().is_none());

		// An inbound proposal for the settled period is refused too.
		let mut propose = SettlementPropose {
			proposal_id: "ab".repeat(16),
			period: "2025-W02".into(),
			proposer: node_id(2),
			data_hash: "cd".repeat(32),
			total_fees_sats: 1,
			member_count: 1,
			timestamp: now,
			signature: String::new(),
		};
		propose.signature =
			MockHostRpc::sign_for(&node_id(2), &signing::settlement_propose(&propose));
		let err = a.handle_propose(&node_id(2), &propose, now, &[]).unwrap_err();
		assert_eq!(err.code, HiveErrorCode::Stale);
		assert_eq!(
			a_store.get_settled_period("2025-W02").unwrap().unwrap().total_distributed_sats,
			1234
		);
	}
}
