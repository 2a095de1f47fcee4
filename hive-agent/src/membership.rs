// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Tier management, promotion evaluation, vouch quorum, and ban voting.

use std::collections::HashSet;
use std::sync::Arc;

use hive_proto::msgs::{
	BanPropose, BanVote, HiveMessage, Promotion, PromotionRequest, Vouch,
	MAX_VOUCHES_IN_PROMOTION, VOUCH_TTL_SECONDS,
};
use hive_proto::signing;
use log::{debug, info, warn};
use rand::RngCore;

use crate::config::ConfigSnapshot;
use crate::error::{HiveError, HiveErrorCode};
use crate::gateway::Gateway;
use crate::store::membership::{BanProposalRecord, BanVoteRecord, ProposalStatus, VouchRecord};
use crate::store::{BanRecord, Store, Tier};

/// A member counts as active if seen within this window.
pub const ACTIVE_MEMBER_WINDOW_SECONDS: u64 = 24 * 3600;
/// Rolling uptime must clear this percentage for promotion.
pub const UPTIME_PASS_THRESHOLD: f64 = 99.5;
/// Presence accumulators roll over a 30 day window.
pub const PRESENCE_WINDOW_SECONDS: u64 = 30 * 86400;
/// Ban proposals stay open for voting this long.
const BAN_PROPOSAL_TTL_SECONDS: u64 = 24 * 3600;
const EVENT_TOPOLOGY_WINDOW_SECONDS: u64 = 90 * 86400;

#[derive(Debug, Clone, PartialEq)]
pub struct PromotionEligibility {
	pub eligible: bool,
	pub reasons: Vec<&'static str>,
	pub uptime_pct: f64,
	pub contribution_ratio: f64,
	pub unique_peers: Vec<String>,
}

pub struct MembershipManager {
	store: Arc<Store>,
	gateway: Arc<Gateway>,
	our_id: String,
}

impl MembershipManager {
	pub fn new(store: Arc<Store>, gateway: Arc<Gateway>, our_id: String) -> Self {
		MembershipManager { store, gateway, our_id }
	}

	// =========================================================================
	// Tier and activity queries
	// =========================================================================

	/// Full members seen within the activity window and not banned.
	pub fn get_active_members(&self, now: u64) -> Result<Vec<String>, HiveError> {
		let mut active = Vec::new();
		for member in self.store.get_all_members()? {
			if !member.tier.is_full_member() {
				continue;
			}
			let Some(last_seen) = member.last_seen else { continue };
			if now.saturating_sub(last_seen) > ACTIVE_MEMBER_WINDOW_SECONDS {
				continue;
			}
			if self.store.is_banned(&member.peer_id, now)? {
				continue;
			}
			active.push(member.peer_id);
		}
		Ok(active)
	}

	/// Everyone we gossip to: active members, excluding ourselves.
	pub fn broadcast_targets(&self, now: u64) -> Result<Vec<String>, HiveError> {
		Ok(self
			.get_active_members(now)?
			.into_iter()
			.filter(|peer| peer != &self.our_id)
			.collect())
	}

	pub fn calculate_quorum(&self, active_members: u32, snapshot: &ConfigSnapshot) -> u32 {
		let threshold = (active_members as f64 * snapshot.vouch_threshold_pct).ceil() as u32;
		threshold.max(snapshot.min_vouch_count)
	}

	pub fn calculate_uptime(&self, peer_id: &str, now: u64) -> Result<f64, HiveError> {
		let Some(presence) = self.store.get_presence(peer_id)? else {
			return Ok(0.0);
		};
		let mut online = presence.online_seconds_rolling;
		if presence.is_online {
			online += now.saturating_sub(presence.last_change_ts);
		}
		let window = now.saturating_sub(presence.window_start_ts).max(1);
		Ok(((online as f64 / window as f64) * 100.0).min(100.0))
	}

	/// Sets a peer's tier and pushes the matching fee policy to the host.
	/// Full members get the hive fee rate.
	pub fn set_tier(
		&self, peer_id: &str, tier: Tier, now: u64, snapshot: &ConfigSnapshot,
	) -> Result<bool, HiveError> {
		let promoted_at = if tier.is_full_member() { Some(now) } else { None };
		if !self.store.set_member_tier(peer_id, tier, promoted_at)? {
			return Ok(false);
		}
		if tier.is_full_member() {
			if let Err(e) = self.gateway.set_peer_fee_policy(now, peer_id, snapshot.member_fee_ppm)
			{
				warn!("fee policy update failed for {}: {}", short(peer_id), e);
			}
		}
		Ok(true)
	}

	// =========================================================================
	// Promotion path
	// =========================================================================

	/// Checks every promotion condition for a neophyte. Reasons name the
	/// failing conditions so the operator surface can show them.
	pub fn evaluate_promotion(
		&self, peer_id: &str, now: u64, snapshot: &ConfigSnapshot,
	) -> Result<PromotionEligibility, HiveError> {
		let mut reasons = Vec::new();

		let Some(member) = self.store.get_member(peer_id)? else {
			return Ok(PromotionEligibility {
				eligible: false,
				reasons: vec!["unknown_peer"],
				uptime_pct: 0.0,
				contribution_ratio: 0.0,
				unique_peers: Vec::new(),
			});
		};
		if member.tier != Tier::Neophyte {
			reasons.push("not_neophyte");
		}

		let probation_seconds = snapshot.probation_days as u64 * 86400;
		if now < member.joined_at + probation_seconds {
			reasons.push("probation_incomplete");
		}

		let uptime = self.calculate_uptime(peer_id, now)?;
		if uptime < UPTIME_PASS_THRESHOLD {
			reasons.push("uptime_below_threshold");
		}

		let since = now.saturating_sub(30 * 86400);
		let ratio = self.store.get_contribution_stats(peer_id, since)?.ratio();
		if ratio < 1.0 {
			reasons.push("contribution_ratio_below_threshold");
		}

		let unique_peers = self.unique_peers(peer_id, now)?;
		if unique_peers.is_empty() {
			reasons.push("no_unique_peers");
		}

		Ok(PromotionEligibility {
			eligible: reasons.is_empty(),
			reasons,
			uptime_pct: uptime,
			contribution_ratio: ratio,
			unique_peers,
		})
	}

	/// External peers the candidate has reported events about that no full
	/// member covers. A measure of topology gain.
	fn unique_peers(&self, peer_id: &str, now: u64) -> Result<Vec<String>, HiveError> {
		let since = now.saturating_sub(EVENT_TOPOLOGY_WINDOW_SECONDS);
		let candidate: HashSet<String> =
			self.store.get_event_subjects_by_reporter(peer_id, since)?.into_iter().collect();
		if candidate.is_empty() {
			return Ok(Vec::new());
		}

		let mut covered = HashSet::new();
		for member in self.store.get_all_members()? {
			if member.tier != Tier::Member || member.peer_id == peer_id {
				continue;
			}
			for subject in self.store.get_event_subjects_by_reporter(&member.peer_id, since)? {
				covered.insert(subject);
			}
		}

		Ok(candidate.difference(&covered).cloned().collect())
	}

	/// Neophyte side: issue a promotion request for ourselves.
	pub fn request_promotion(
		&self, now: u64,
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		let mut id_bytes = [0u8; 16];
		rand::thread_rng().fill_bytes(&mut id_bytes);
		let request_id = hex_encode(&id_bytes);

		let mut request = PromotionRequest {
			target: self.our_id.clone(),
			request_id: request_id.clone(),
			timestamp: now,
			signature: String::new(),
		};
		request.signature = self
			.gateway
			.sign_message(now, &signing::promotion_request(&request))
			.map_err(HiveError::from)?;

		self.store.add_promotion_request(&self.our_id, &request_id, now)?;
		info!("issued promotion request {}", short_id(&request_id));

		let msg = HiveMessage::PromotionRequest(request);
		Ok(self
			.broadcast_targets(now)?
			.into_iter()
			.map(|peer| (peer, msg.clone()))
			.collect())
	}

	/// Member side: a neophyte asks for promotion. Eligible vouchers answer
	/// with a signed vouch when auto-vouching is on.
	pub fn handle_promotion_request(
		&self, sender: &str, msg: &PromotionRequest, now: u64, snapshot: &ConfigSnapshot,
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		let verified = self
			.gateway
			.verify_signature(now, &signing::promotion_request(msg), &msg.signature, &msg.target)
			.map_err(HiveError::from)?;
		if !verified {
			return Err(HiveError::new(HiveErrorCode::SignatureMismatch, "promotion request"));
		}

		self.store.add_promotion_request(&msg.target, &msg.request_id, now)?;

		let our_tier = self.store.get_member(&self.our_id)?.map(|m| m.tier);
		if our_tier != Some(Tier::Member) && our_tier != Some(Tier::Admin) {
			return Ok(Vec::new());
		}
		if !snapshot.auto_vouch_enabled {
			return Ok(Vec::new());
		}

		let evaluation = self.evaluate_promotion(&msg.target, now, snapshot)?;
		if !evaluation.eligible {
			debug!(
				"not vouching for {}: {:?}",
				short(&msg.target),
				evaluation.reasons
			);
			return Ok(Vec::new());
		}

		let mut vouch = Vouch {
			target: msg.target.clone(),
			request_id: msg.request_id.clone(),
			voucher: self.our_id.clone(),
			timestamp: now,
			signature: String::new(),
		};
		vouch.signature =
			self.gateway.sign_message(now, &signing::vouch(&vouch)).map_err(HiveError::from)?;

		self.store.add_promotion_vouch(&VouchRecord {
			target_peer_id: vouch.target.clone(),
			request_id: vouch.request_id.clone(),
			voucher_peer_id: vouch.voucher.clone(),
			sig: vouch.signature.clone(),
			timestamp: vouch.timestamp,
		})?;

		// The vouch goes to the candidate, who assembles the quorum.
		Ok(vec![(sender.to_string(), HiveMessage::Vouch(vouch))])
	}

	/// Candidate side (mostly): collect vouches; once quorum is reached we
	/// broadcast the PROMOTION claim carrying them.
	pub fn handle_vouch(
		&self, _sender: &str, msg: &Vouch, now: u64, snapshot: &ConfigSnapshot,
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		if now.saturating_sub(msg.timestamp) > VOUCH_TTL_SECONDS {
			return Err(HiveError::new(HiveErrorCode::Stale, "vouch past ttl"));
		}
		let voucher = self.store.get_member(&msg.voucher)?;
		if !voucher.map(|m| m.tier.is_full_member()).unwrap_or(false) {
			return Err(HiveError::new(HiveErrorCode::NotMember, "voucher not a member"));
		}
		let verified = self
			.gateway
			.verify_signature(now, &signing::vouch(msg), &msg.signature, &msg.voucher)
			.map_err(HiveError::from)?;
		if !verified {
			return Err(HiveError::new(HiveErrorCode::SignatureMismatch, "vouch"));
		}

		self.store.add_promotion_vouch(&VouchRecord {
			target_peer_id: msg.target.clone(),
			request_id: msg.request_id.clone(),
			voucher_peer_id: msg.voucher.clone(),
			sig: msg.signature.clone(),
			timestamp: msg.timestamp,
		})?;

		if msg.target != self.our_id {
			return Ok(Vec::new());
		}

		let vouches = self.store.get_promotion_vouches(&msg.target, &msg.request_id)?;
		let fresh: Vec<&VouchRecord> = vouches
			.iter()
			.filter(|v| now.saturating_sub(v.timestamp) <= VOUCH_TTL_SECONDS)
			.collect();
		let active = self.get_active_members(now)?.len() as u32;
		let quorum = self.calculate_quorum(active, snapshot);
		if (fresh.len() as u32) < quorum {
			debug!("vouch progress {}/{} for {}", fresh.len(), quorum, short_id(&msg.request_id));
			return Ok(Vec::new());
		}

		let promotion = Promotion {
			target: self.our_id.clone(),
			request_id: msg.request_id.clone(),
			timestamp: now,
			vouches: fresh
				.into_iter()
				.take(MAX_VOUCHES_IN_PROMOTION)
				.map(|v| Vouch {
					target: v.target_peer_id.clone(),
					request_id: v.request_id.clone(),
					voucher: v.voucher_peer_id.clone(),
					timestamp: v.timestamp,
					signature: v.sig.clone(),
				})
				.collect(),
		};
		info!("promotion quorum reached for request {}", short_id(&msg.request_id));

		// Apply our own promotion locally; the broadcast convinces the rest.
		self.set_tier(&self.our_id, Tier::Member, now, snapshot)?;
		self.store.bump_vouch_count(&self.our_id, promotion.vouches.len() as u32)?;
		self.store.update_promotion_request_status(&self.our_id, &msg.request_id, "complete")?;

		let msg = HiveMessage::Promotion(promotion);
		Ok(self
			.broadcast_targets(now)?
			.into_iter()
			.map(|peer| (peer, msg.clone()))
			.collect())
	}

	/// Verify the carried vouches and, on quorum, promote the target.
	pub fn handle_promotion(
		&self, _sender: &str, msg: &Promotion, now: u64, snapshot: &ConfigSnapshot,
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		let target = self.store.get_member(&msg.target)?.ok_or_else(|| {
			HiveError::new(HiveErrorCode::NotMember, "promotion target unknown")
		})?;
		if target.tier.is_full_member() {
			// Idempotent on replay.
			return Ok(Vec::new());
		}

		let mut seen = HashSet::new();
		let mut valid = 0u32;
		for vouch in msg.vouches.iter().take(MAX_VOUCHES_IN_PROMOTION) {
			if vouch.target != msg.target || vouch.request_id != msg.request_id {
				continue;
			}
			if now.saturating_sub(vouch.timestamp) > VOUCH_TTL_SECONDS {
				continue;
			}
			if !seen.insert(vouch.voucher.clone()) {
				continue;
			}
			let is_member = self
				.store
				.get_member(&vouch.voucher)?
				.map(|m| m.tier.is_full_member())
				.unwrap_or(false);
			if !is_member {
				continue;
			}
			let verified = self
				.gateway
				.verify_signature(now, &signing::vouch(vouch), &vouch.signature, &vouch.voucher)
				.map_err(HiveError::from)?;
			if verified {
				valid += 1;
			}
		}

		let active = self.get_active_members(now)?.len() as u32;
		let quorum = self.calculate_quorum(active, snapshot);
		if valid < quorum {
			return Err(HiveError::new(
				HiveErrorCode::InvalidPayload,
				format!("promotion carries {} valid vouches, quorum is {}", valid, quorum),
			));
		}

		self.set_tier(&msg.target, Tier::Member, now, snapshot)?;
		self.store.bump_vouch_count(&msg.target, valid)?;
		self.store.update_promotion_request_status(&msg.target, &msg.request_id, "complete")?;
		info!("promoted {} to member ({} vouches)", short(&msg.target), valid);
		Ok(Vec::new())
	}

	// =========================================================================
	// Ban path
	// =========================================================================

	/// Opens a ban proposal. An already pending proposal for the target is
	/// returned instead of a duplicate.
	pub fn propose_ban(
		&self, target: &str, reason: &str, now: u64,
	) -> Result<(String, Vec<(String, HiveMessage)>), HiveError> {
		if let Some(existing) = self.store.get_pending_ban_proposal_for_target(target)? {
			return Ok((existing.proposal_id, Vec::new()));
		}

		let mut id_bytes = [0u8; 16];
		rand::thread_rng().fill_bytes(&mut id_bytes);
		let proposal_id = hex_encode(&id_bytes);

		let mut propose = BanPropose {
			proposal_id: proposal_id.clone(),
			target: target.to_string(),
			proposer: self.our_id.clone(),
			reason: reason.to_string(),
			expires_at: now + BAN_PROPOSAL_TTL_SECONDS,
			timestamp: now,
			signature: String::new(),
		};
		propose.signature = self
			.gateway
			.sign_message(now, &signing::ban_propose(&propose))
			.map_err(HiveError::from)?;

		self.store.create_ban_proposal(&BanProposalRecord {
			proposal_id: proposal_id.clone(),
			target_peer_id: target.to_string(),
			proposer_peer_id: self.our_id.clone(),
			reason: reason.to_string(),
			proposed_at: now,
			expires_at: propose.expires_at,
			status: "pending".into(),
		})?;
		info!("proposed ban of {} ({})", short(target), reason);

		let msg = HiveMessage::BanPropose(propose);
		let out =
			self.broadcast_targets(now)?.into_iter().map(|peer| (peer, msg.clone())).collect();
		Ok((proposal_id, out))
	}

	/// A member proposed a ban. Store it and cast our own ballot: approve
	/// when our local evidence agrees the peer is a drain, reject otherwise.
	pub fn handle_ban_propose(
		&self, sender: &str, msg: &BanPropose, now: u64,
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		let verified = self
			.gateway
			.verify_signature(now, &signing::ban_propose(msg), &msg.signature, &msg.proposer)
			.map_err(HiveError::from)?;
		if !verified {
			return Err(HiveError::new(HiveErrorCode::SignatureMismatch, "ban proposal"));
		}

		self.store.create_ban_proposal(&BanProposalRecord {
			proposal_id: msg.proposal_id.clone(),
			target_peer_id: msg.target.clone(),
			proposer_peer_id: msg.proposer.clone(),
			reason: msg.reason.clone(),
			proposed_at: msg.timestamp,
			expires_at: msg.expires_at,
			status: "pending".into(),
		})?;

		let our_tier = self.store.get_member(&self.our_id)?.map(|m| m.tier);
		if !our_tier.map(|t| t.is_full_member()).unwrap_or(false) {
			return Ok(Vec::new());
		}

		let agrees = self.store.get_leech_flag(&msg.target)?.is_some();
		let mut vote = BanVote {
			proposal_id: msg.proposal_id.clone(),
			voter: self.our_id.clone(),
			vote: if agrees { "approve" } else { "reject" }.to_string(),
			timestamp: now,
			signature: String::new(),
		};
		vote.signature =
			self.gateway.sign_message(now, &signing::ban_vote(&vote)).map_err(HiveError::from)?;

		self.store.add_ban_vote(&BanVoteRecord {
			proposal_id: vote.proposal_id.clone(),
			voter_peer_id: vote.voter.clone(),
			vote: vote.vote.clone(),
			voted_at: now,
			signature: vote.signature.clone(),
		})?;

		// Ballot goes back to the proposer and the rest of the fleet.
		let ballot = HiveMessage::BanVote(vote);
		let mut out: Vec<(String, HiveMessage)> = self
			.broadcast_targets(now)?
			.into_iter()
			.filter(|peer| peer != sender)
			.map(|peer| (peer, ballot.clone()))
			.collect();
		out.push((sender.to_string(), ballot));
		Ok(out)
	}

	/// Tallies a ballot; quorum of approvals commits the ban.
	pub fn handle_ban_vote(
		&self, _sender: &str, msg: &BanVote, now: u64, snapshot: &ConfigSnapshot,
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		let voter_is_member = self
			.store
			.get_member(&msg.voter)?
			.map(|m| m.tier.is_full_member())
			.unwrap_or(false);
		if !voter_is_member {
			return Err(HiveError::new(HiveErrorCode::NotMember, "ban voter not a member"));
		}
		let verified = self
			.gateway
			.verify_signature(now, &signing::ban_vote(msg), &msg.signature, &msg.voter)
			.map_err(HiveError::from)?;
		if !verified {
			return Err(HiveError::new(HiveErrorCode::SignatureMismatch, "ban vote"));
		}

		let Some(proposal) = self.store.get_ban_proposal(&msg.proposal_id)? else {
			return Err(HiveError::new(HiveErrorCode::NotFound, "ban proposal unknown"));
		};
		if proposal.status != "pending" {
			return Ok(Vec::new());
		}
		if now >= proposal.expires_at {
			self.store.update_ban_proposal_status(&msg.proposal_id, ProposalStatus::Expired)?;
			return Err(HiveError::new(HiveErrorCode::Stale, "ban proposal expired"));
		}

		self.store.add_ban_vote(&BanVoteRecord {
			proposal_id: msg.proposal_id.clone(),
			voter_peer_id: msg.voter.clone(),
			vote: msg.vote.clone(),
			voted_at: msg.timestamp,
			signature: msg.signature.clone(),
		})?;

		let votes = self.store.get_ban_votes(&msg.proposal_id)?;
		let approvals = votes.iter().filter(|v| v.vote == "approve").count() as u32;
		let rejections = votes.iter().filter(|v| v.vote == "reject").count() as u32;
		let active = self.get_active_members(now)?.len() as u32;
		let quorum = self.calculate_quorum(active, snapshot);

		if approvals >= quorum {
			self.store.update_ban_proposal_status(&msg.proposal_id, ProposalStatus::Approved)?;
			self.store.add_ban(&BanRecord {
				peer_id: proposal.target_peer_id.clone(),
				reason: proposal.reason.clone(),
				reporter: proposal.proposer_peer_id.clone(),
				signature: None,
				banned_at: now,
				expires_at: None,
			})?;
			self.store.remove_member(&proposal.target_peer_id)?;
			info!(
				"ban committed for {} ({} approvals)",
				short(&proposal.target_peer_id),
				approvals
			);
		} else if rejections >= quorum {
			self.store.update_ban_proposal_status(&msg.proposal_id, ProposalStatus::Rejected)?;
		}

		Ok(Vec::new())
	}
}

fn hex_encode(bytes: &[u8]) -> String {
	use std::fmt::Write;
	let mut out = String::with_capacity(bytes.len() * 2);
	for b in bytes {
		let _ = write!(out, "{:02x}", b);
	}
	out
}

fn short_id(id: &str) -> &str {
	&id[..id.len().min(12)]
}

fn short(peer_id: &str) -> &str {
	&peer_id[..peer_id.len().min(16)]
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::GovernanceMode;
	use crate::gateway::test_util::MockHostRpc;

	fn node_id(tag: u8) -> String {
		format!("02{:02x}{}", tag, "ab".repeat(31))
	}

	fn snapshot() -> ConfigSnapshot {
		ConfigSnapshot {
			governance_mode: GovernanceMode::Autonomous,
			membership_enabled: true,
			auto_vouch_enabled: true,
			auto_promote_enabled: true,
			ban_autotrigger_enabled: false,
			neophyte_fee_discount_pct: 0.5,
			member_fee_ppm: 0,
			probation_days: 30,
			vouch_threshold_pct: 0.51,
			min_vouch_count: 2,
			max_members: 50,
			intent_hold_seconds: 60,
			intent_expire_seconds: 300,
			heartbeat_interval_seconds: 300,
			gossip_max_age_hours: 168,
			daily_budget_sats: 10_000_000,
			budget_reserve_pct: 0.2,
			budget_max_per_channel_pct: 0.5,
			settlement_enabled: true,
		}
	}

	fn manager(our_id: &str) -> (MembershipManager, Arc<Store>) {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let gateway = Arc::new(Gateway::new(Arc::new(MockHostRpc::new(our_id))));
		(MembershipManager::new(Arc::clone(&store), gateway, our_id.to_string()), store)
	}

	#[test]
	fn test_quorum_formula() {
		let (manager, _) = manager(&node_id(1));
		let snap = snapshot();
		// max(min_vouch_count, ceil(active * 51%))
		assert_eq!(manager.calculate_quorum(0, &snap), 2);
		assert_eq!(manager.calculate_quorum(3, &snap), 2);
		assert_eq!(manager.calculate_quorum(10, &snap), 6);
	}

	#[test]
	fn test_active_members_filters() {
		let our_id = node_id(1);
		let (manager, store) = manager(&our_id);
		let now = 100_000;

		store.add_member(&node_id(2), Tier::Member, 0).unwrap();
		store.touch_member(&node_id(2), now - 100).unwrap();
		// Stale member.
		store.add_member(&node_id(3), Tier::Member, 0).unwrap();
		store.touch_member(&node_id(3), now - ACTIVE_MEMBER_WINDOW_SECONDS - 1).unwrap();
		// Neophyte does not count.
		store.add_member(&node_id(4), Tier::Neophyte, 0).unwrap();
		store.touch_member(&node_id(4), now).unwrap();
		// Banned member does not count.
		store.add_member(&node_id(5), Tier::Member, 0).unwrap();
		store.touch_member(&node_id(5), now).unwrap();
		store
			.add_ban(&BanRecord {
				peer_id: node_id(5),
				reason: "test".into(),
				reporter: our_id.clone(),
				signature: None,
				banned_at: now,
				expires_at: None,
			})
			.unwrap();

		assert_eq!(manager.get_active_members(now).unwrap(), vec![node_id(2)]);
	}

	#[test]
	fn test_promotion_eligibility_reasons() {
		let our_id = node_id(1);
		let (manager, store) = manager(&our_id);
		let candidate = node_id(9);
		let now = 100 * 86400;

		store.add_member(&candidate, Tier::Neophyte, now - 86400).unwrap();
		let eval = manager.evaluate_promotion(&candidate, now, &snapshot()).unwrap();
		assert!(!eval.eligible);
		assert!(eval.reasons.contains(&"probation_incomplete"));
		assert!(eval.reasons.contains(&"uptime_below_threshold"));
		assert!(eval.reasons.contains(&"no_unique_peers"));
		// Zero traffic both ways is a neutral 1.0 ratio, which passes.
		assert!(!eval.reasons.contains(&"contribution_ratio_below_threshold"));
	}

	#[test]
	fn test_promotion_quorum_commits_tier() {
		let our_id = node_id(1);
		let (manager, store) = manager(&our_id);
		let now = 1000;
		let snap = snapshot();

		let candidate = node_id(9);
		store.add_member(&candidate, Tier::Neophyte, 0).unwrap();
		for tag in 2..=4 {
			store.add_member(&node_id(tag), Tier::Member, 0).unwrap();
			store.touch_member(&node_id(tag), now).unwrap();
		}

		let make_vouch = |tag: u8| {
			let mut vouch = Vouch {
				target: candidate.clone(),
				request_id: "aa".repeat(8),
				voucher: node_id(tag),
				timestamp: now,
				signature: String::new(),
			};
			vouch.signature = MockHostRpc::sign_for(&node_id(tag), &signing::vouch(&vouch));
			vouch
		};

		let promotion = Promotion {
			target: candidate.clone(),
			request_id: "aa".repeat(8),
			timestamp: now,
			vouches: vec![make_vouch(2), make_vouch(3), make_vouch(4)],
		};
		manager.handle_promotion(&candidate, &promotion, now, &snap).unwrap();

		let member = store.get_member(&candidate).unwrap().unwrap();
		assert_eq!(member.tier, Tier::Member);
		assert_eq!(member.promoted_at, Some(now));
	}

	#[test]
	fn test_promotion_below_quorum_rejected() {
		let our_id = node_id(1);
		let (manager, store) = manager(&our_id);
		let now = 1000;
		let candidate = node_id(9);
		store.add_member(&candidate, Tier::Neophyte, 0).unwrap();
		for tag in 2..=5 {
			store.add_member(&node_id(tag), Tier::Member, 0).unwrap();
			store.touch_member(&node_id(tag), now).unwrap();
		}

		let mut vouch = Vouch {
			target: candidate.clone(),
			request_id: "aa".repeat(8),
			voucher: node_id(2),
			timestamp: now,
			signature: String::new(),
		};
		vouch.signature = MockHostRpc::sign_for(&node_id(2), &signing::vouch(&vouch));

		// Duplicate voucher entries collapse to one.
		let promotion = Promotion {
			target: candidate.clone(),
			request_id: "aa".repeat(8),
			timestamp: now,
			vouches: vec![vouch.clone(), vouch.clone(), vouch],
		};
		let err = manager.handle_promotion(&candidate, &promotion, now, &snapshot()).unwrap_err();
		assert_eq!(err.code, HiveErrorCode::InvalidPayload);
		assert_eq!(store.get_member(&candidate).unwrap().unwrap().tier, Tier::Neophyte);
	}

	#[test]
	fn test_ban_vote_quorum_commits_ban() {
		let our_id = node_id(1);
		let (manager, store) = manager(&our_id);
		let now = 1000;
		let snap = snapshot();
		let target = node_id(9);

		store.add_member(&target, Tier::Member, 0).unwrap();
		for tag in 2..=3 {
			store.add_member(&node_id(tag), Tier::Member, 0).unwrap();
			store.touch_member(&node_id(tag), now).unwrap();
		}

		let proposal = BanProposalRecord {
			proposal_id: "dd".repeat(8),
			target_peer_id: target.clone(),
			proposer_peer_id: node_id(2),
			reason: "leech".into(),
			proposed_at: now,
			expires_at: now + 600,
			status: "pending".into(),
		};
		store.create_ban_proposal(&proposal).unwrap();

		for tag in 2..=3 {
			let mut ballot = BanVote {
				proposal_id: "dd".repeat(8),
				voter: node_id(tag),
				vote: "approve".into(),
				timestamp: now,
				signature: String::new(),
			};
			ballot.signature = MockHostRpc::sign_for(&node_id(tag), &signing::ban_vote(&ballot));
			manager.handle_ban_vote(&node_id(tag), &ballot, now, &snap).unwrap();
		}

		assert!(store.is_banned(&target, now).unwrap());
		assert!(store.get_member(&target).unwrap().is_none());
		assert_eq!(store.get_ban_proposal(&"dd".repeat(8)).unwrap().unwrap().status, "approved");
	}

	#[test]
	fn test_duplicate_ban_proposal_returns_existing() {
		let our_id = node_id(1);
		let (manager, store) = manager(&our_id);
		store.add_member(&our_id, Tier::Member, 0).unwrap();
		let (first, _) = manager.propose_ban(&node_id(9), "leech", 100).unwrap();
		let (second, out) = manager.propose_ban(&node_id(9), "leech again", 200).unwrap();
		assert_eq!(first, second);
		assert!(out.is_empty());
	}
}
