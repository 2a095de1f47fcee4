// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The operator command surface.
//!
//! Every command returns a structured, serializable response, never free
//! text. Missing or expired entities come back as typed errors so callers
//! can map them to exit codes.

use log::info;
use serde::Serialize;

use crate::error::{HiveError, HiveErrorCode};
use crate::gateway::breaker::CircuitState;
use crate::service::{date_key, CounterSnapshot, Kernel};
use crate::store::settlement::SettlementStatus;

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
	pub our_id: String,
	pub tier: Option<String>,
	pub member_count: u32,
	pub active_rounds: usize,
	pub pending_actions: usize,
	pub circuit_state: String,
	pub governance_mode: String,
	pub tracked_reputations: usize,
	pub counters: CounterSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberInfo {
	pub peer_id: String,
	pub tier: String,
	pub joined_at: u64,
	pub promoted_at: Option<u64>,
	pub contribution_ratio: f64,
	pub uptime_pct: f64,
	pub vouch_count: u32,
	pub last_seen: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundInfo {
	pub round_id: String,
	pub target: String,
	pub state: String,
	pub trigger_event: String,
	pub trigger_reporter: String,
	pub nomination_count: usize,
	pub elected: Option<String>,
	pub recommended_size_sats: u64,
	pub quality_score: f64,
	pub started_at: u64,
	pub expires_at: u64,
	pub completed_at: u64,
	pub result: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HoldInfo {
	pub hold_id: String,
	pub round_id: String,
	pub peer_id: String,
	pub amount_sats: u64,
	pub status: String,
	pub expires_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetSummary {
	pub date_key: String,
	pub daily_budget_sats: u64,
	pub spent_today_sats: u64,
	pub held_sats: u64,
	pub available_sats: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionInfo {
	pub id: i64,
	pub action_type: String,
	pub payload: String,
	pub proposed_at: u64,
	pub expires_at: Option<u64>,
	pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
	pub id: i64,
	pub status: String,
	pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementStatusResponse {
	pub pending_proposals: usize,
	pub ready_proposals: usize,
	pub settled_periods: Vec<SettledPeriodInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettledPeriodInfo {
	pub period: String,
	pub total_distributed_sats: u64,
	pub settled_at: u64,
}

pub fn status(kernel: &Kernel, _now: u64) -> Result<StatusResponse, HiveError> {
	let snapshot = kernel.snapshot();
	let circuit_state = match kernel.gateway.circuit_state() {
		CircuitState::Closed => "closed",
		CircuitState::Open => "open",
		CircuitState::HalfOpen => "half_open",
	};
	Ok(StatusResponse {
		our_id: kernel.our_id.clone(),
		tier: kernel.store.get_member(&kernel.our_id)?.map(|m| m.tier.as_str().to_string()),
		member_count: kernel.store.member_count()?,
		active_rounds: kernel.expansion.get_active_rounds().len(),
		pending_actions: kernel.store.get_pending_actions()?.len(),
		circuit_state: circuit_state.to_string(),
		governance_mode: format!("{:?}", snapshot.governance_mode).to_lowercase(),
		tracked_reputations: kernel.reputation.tracked_peer_count(),
		counters: kernel.counters.snapshot(),
	})
}

pub fn list_members(kernel: &Kernel) -> Result<Vec<MemberInfo>, HiveError> {
	Ok(kernel
		.store
		.get_all_members()?
		.into_iter()
		.map(|m| MemberInfo {
			peer_id: m.peer_id,
			tier: m.tier.as_str().to_string(),
			joined_at: m.joined_at,
			promoted_at: m.promoted_at,
			contribution_ratio: m.contribution_ratio,
			uptime_pct: m.uptime_pct,
			vouch_count: m.vouch_count,
			last_seen: m.last_seen,
		})
		.collect())
}

pub fn list_rounds(kernel: &Kernel) -> Result<Vec<RoundInfo>, HiveError> {
	Ok(kernel
		.expansion
		.get_active_rounds()
		.into_iter()
		.map(|r| RoundInfo {
			round_id: r.round_id,
			target: r.target,
			state: r.state.as_str().to_string(),
			trigger_event: r.trigger_event,
			trigger_reporter: r.trigger_reporter,
			nomination_count: r.nominations.len(),
			elected: r.elected,
			recommended_size_sats: r.recommended_size_sats,
			quality_score: r.quality_score,
			started_at: r.started_at,
			expires_at: r.expires_at,
			completed_at: r.completed_at,
			result: r.result,
		})
		.collect())
}

pub fn list_holds(kernel: &Kernel, now: u64) -> Result<Vec<HoldInfo>, HiveError> {
	Ok(kernel
		.store
		.get_active_holds(now)?
		.into_iter()
		.map(|h| HoldInfo {
			hold_id: h.hold_id,
			round_id: h.round_id,
			peer_id: h.peer_id,
			amount_sats: h.amount_sats,
			status: h.status.as_str().to_string(),
			expires_at: h.expires_at,
		})
		.collect())
}

pub fn budget_summary(kernel: &Kernel, now: u64) -> Result<BudgetSummary, HiveError> {
	let snapshot = kernel.snapshot();
	let key = date_key(now);
	let spent = kernel.store.get_daily_spend(&key)?;
	let held = kernel.store.active_hold_total(now)?;
	Ok(BudgetSummary {
		date_key: key,
		daily_budget_sats: snapshot.daily_budget_sats,
		spent_today_sats: spent,
		held_sats: held,
		available_sats: snapshot.daily_budget_sats.saturating_sub(spent).saturating_sub(held),
	})
}

pub fn list_pending_actions(kernel: &Kernel) -> Result<Vec<ActionInfo>, HiveError> {
	Ok(kernel
		.store
		.get_pending_actions()?
		.into_iter()
		.map(|a| ActionInfo {
			id: a.id,
			action_type: a.action_type,
			payload: a.payload,
			proposed_at: a.proposed_at,
			expires_at: a.expires_at,
			status: a.status,
		})
		.collect())
}

/// Approves a queued action and executes it. Channel opens go out through
/// the gateway; anything unexecutable is surfaced as a typed error.
pub fn approve_action(kernel: &Kernel, id: i64, now: u64) -> Result<ActionResult, HiveError> {
	let action = kernel
		.store
		.get_pending_action(id)?
		.ok_or_else(|| HiveError::new(HiveErrorCode::NotFound, format!("action {}", id)))?;
	if action.status != "pending" {
		return Err(HiveError::new(
			HiveErrorCode::Stale,
			format!("action {} is {}", id, action.status),
		));
	}
	if let Some(expires_at) = action.expires_at {
		if now >= expires_at {
			kernel.store.update_action_status(id, "expired")?;
			return Err(HiveError::new(HiveErrorCode::Stale, format!("action {} expired", id)));
		}
	}

	let detail = match action.action_type.as_str() {
		"channel_open" => {
			let payload: serde_json::Value =
				serde_json::from_str(&action.payload).map_err(|e| {
					HiveError::new(HiveErrorCode::InvalidRequest, format!("bad payload: {}", e))
				})?;
			let target = payload["target"].as_str().ok_or_else(|| {
				HiveError::new(HiveErrorCode::InvalidRequest, "payload missing target")
			})?;
			let amount = payload["amount_sats"].as_u64().ok_or_else(|| {
				HiveError::new(HiveErrorCode::InvalidRequest, "payload missing amount_sats")
			})?;

			let txid =
				kernel.gateway.open_channel(now, target, amount).map_err(HiveError::from)?;
			kernel
				.store
				.record_budget_spend(&date_key(now), "channel_open", amount, Some(target), now)?;
			if let Some(round_id) = payload["round_id"].as_str() {
				kernel.expansion.complete_round(round_id, true, &txid, now)?;
			}
			Some(txid)
		},
		_ => None,
	};

	kernel.store.update_action_status(id, "approved")?;
	kernel
		.store
		.log_planner_action(now, &action.action_type, None, "approved", detail.as_deref())?;
	info!("operator approved action {}", id);
	Ok(ActionResult { id, status: "approved".into(), detail })
}

pub fn reject_action(kernel: &Kernel, id: i64, now: u64) -> Result<ActionResult, HiveError> {
	let action = kernel
		.store
		.get_pending_action(id)?
		.ok_or_else(|| HiveError::new(HiveErrorCode::NotFound, format!("action {}", id)))?;
	if action.status != "pending" {
		return Err(HiveError::new(
			HiveErrorCode::Stale,
			format!("action {} is {}", id, action.status),
		));
	}
	kernel.store.update_action_status(id, "rejected")?;
	kernel.store.log_planner_action(now, &action.action_type, None, "rejected", None)?;
	info!("operator rejected action {}", id);
	Ok(ActionResult { id, status: "rejected".into(), detail: None })
}

/// Proposes a channel open: the target resource is reserved with an intent
/// lock and the action queued for approval (or for the scheduler in
/// autonomous mode, where approval is implicit).
pub fn propose_action(
	kernel: &Kernel, action_type: &str, target: &str, amount_sats: u64, now: u64,
) -> Result<ActionInfo, HiveError> {
	if action_type != "channel_open" {
		return Err(HiveError::new(
			HiveErrorCode::InvalidRequest,
			format!("unsupported action type '{}'", action_type),
		));
	}
	if !hive_proto::is_node_id(target) {
		return Err(HiveError::new(HiveErrorCode::InvalidRequest, "bad target node id"));
	}

	let snapshot = kernel.snapshot();
	let peers = kernel.membership.broadcast_targets(now)?;
	let (_, outbound) = kernel.intent.announce(
		hive_proto::msgs::IntentType::ChannelOpen,
		target,
		now,
		&snapshot,
		&peers,
	)?;
	kernel.send_outbound(outbound, now);

	let payload = serde_json::json!({ "target": target, "amount_sats": amount_sats }).to_string();
	let id = kernel.store.add_pending_action(action_type, &payload, now, Some(now + 86400))?;
	kernel.store.log_planner_action(now, action_type, Some(target), "proposed", None)?;
	info!("operator proposed {} for {}", action_type, &target[..16]);

	Ok(ActionInfo {
		id,
		action_type: action_type.to_string(),
		payload,
		proposed_at: now,
		expires_at: Some(now + 86400),
		status: "pending".into(),
	})
}

/// Opens a manual promotion for a neophyte, bypassing the vouch path. The
/// promotion completes once a majority of active members has approved it
/// through this surface.
pub fn propose_promotion(kernel: &Kernel, target: &str, now: u64) -> Result<ActionResult, HiveError> {
	let member = kernel
		.store
		.get_member(target)?
		.ok_or_else(|| HiveError::new(HiveErrorCode::NotFound, "target not admitted"))?;
	if member.tier.is_full_member() {
		return Err(HiveError::new(HiveErrorCode::InvalidRequest, "target already a member"));
	}
	kernel.store.create_admin_promotion(target, &kernel.our_id, now)?;
	kernel.store.log_planner_action(now, "manual_promotion", Some(target), "proposed", None)?;
	Ok(ActionResult { id: 0, status: "promotion_proposed".into(), detail: None })
}

/// Records a manual-promotion approval; at majority the target is promoted.
pub fn approve_promotion(kernel: &Kernel, target: &str, now: u64) -> Result<ActionResult, HiveError> {
	match kernel.store.get_admin_promotion_status(target)? {
		None => return Err(HiveError::new(HiveErrorCode::NotFound, "no promotion proposed")),
		Some(status) if status != "pending" => {
			return Err(HiveError::new(
				HiveErrorCode::Stale,
				format!("promotion is {}", status),
			));
		},
		Some(_) => {},
	}

	kernel.store.add_admin_promotion_approval(target, &kernel.our_id, now)?;
	let approvals = kernel.store.count_admin_promotion_approvals(target)?;
	let active = kernel.membership.get_active_members(now)?.len() as u32;
	let majority = active / 2 + 1;

	if approvals >= majority {
		let snapshot = kernel.snapshot();
		kernel.membership.set_tier(target, crate::store::Tier::Member, now, &snapshot)?;
		kernel.store.complete_admin_promotion(target)?;
		kernel.store.log_planner_action(now, "manual_promotion", Some(target), "completed", None)?;
		return Ok(ActionResult {
			id: 0,
			status: "promotion_completed".into(),
			detail: Some(format!("{}/{} approvals", approvals, active)),
		});
	}
	Ok(ActionResult {
		id: 0,
		status: "approval_recorded".into(),
		detail: Some(format!("{}/{} toward majority {}", approvals, active, majority)),
	})
}

/// Starts a coordinated splice with a member on a shared channel.
pub fn initiate_splice(
	kernel: &Kernel, peer: &str, channel_id: &str, splice_type: &str, amount_sats: u64, now: u64,
) -> Result<ActionResult, HiveError> {
	match splice_type {
		"splice_in" | "splice_out" => {},
		other => {
			return Err(HiveError::new(
				HiveErrorCode::InvalidRequest,
				format!("bad splice type '{}'", other),
			));
		},
	}
	let outbound = kernel.splice.initiate(peer, channel_id, splice_type, amount_sats, now)?;
	kernel.send_outbound(outbound, now);
	Ok(ActionResult { id: 0, status: "splice_initiated".into(), detail: None })
}

pub fn settlement_status(kernel: &Kernel) -> Result<SettlementStatusResponse, HiveError> {
	let pending =
		kernel.store.get_settlement_proposals_with_status(SettlementStatus::Pending)?;
	let ready = kernel.store.get_settlement_proposals_with_status(SettlementStatus::Ready)?;
	let settled = kernel
		.store
		.get_settled_periods(5)?
		.into_iter()
		.map(|p| SettledPeriodInfo {
			period: p.period,
			total_distributed_sats: p.total_distributed_sats,
			settled_at: p.settled_at,
		})
		.collect();
	Ok(SettlementStatusResponse {
		pending_proposals: pending.len(),
		ready_proposals: ready.len(),
		settled_periods: settled,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{load_config, ArgsConfig};
	use crate::gateway::test_util::MockHostRpc;
	use crate::gateway::Gateway;
	use crate::store::{Store, Tier};
	use std::sync::Arc;

	fn node_id(tag: u8) -> String {
		format!("02{:02x}{}", tag, "ab".repeat(31))
	}

	fn kernel(our_id: &str) -> (Kernel, Arc<MockHostRpc>) {
		let config = load_config(&ArgsConfig {
			config_file: None,
			storage_dir_path: Some("/tmp/hive-test".into()),
			rpc_socket_path: Some("/tmp/lightning-rpc".into()),
			governance_mode: Some("advisor".into()),
			daily_budget_sats: None,
		})
		.unwrap();
		let store = Arc::new(Store::open_in_memory().unwrap());
		let rpc = Arc::new(MockHostRpc::new(our_id));
		let gateway = Arc::new(Gateway::new(Arc::<MockHostRpc>::clone(&rpc)));
		(Kernel::new(config, store, gateway, our_id.to_string()), rpc)
	}

	#[test]
	fn test_status_shape() {
		let me = node_id(1);
		let (kernel, _) = kernel(&me);
		kernel.store.add_member(&me, Tier::Member, 0).unwrap();
		let response = status(&kernel, 100).unwrap();
		assert_eq!(response.our_id, me);
		assert_eq!(response.tier.as_deref(), Some("member"));
		assert_eq!(response.member_count, 1);
		assert_eq!(response.governance_mode, "advisor");
		assert_eq!(response.circuit_state, "closed");
	}

	#[test]
	fn test_approve_executes_channel_open() {
		let me = node_id(1);
		let (kernel, rpc) = kernel(&me);
		let target = node_id(9);
		let payload = serde_json::json!({
			"round_id": "deadbeef00000000",
			"target": target,
			"amount_sats": 2_000_000u64,
		})
		.to_string();
		let id = kernel.store.add_pending_action("channel_open", &payload, 100, Some(500)).unwrap();

		let result = approve_action(&kernel, id, 200).unwrap();
		assert_eq!(result.status, "approved");
		assert!(result.detail.is_some());
		assert_eq!(rpc.opened.lock().unwrap().as_slice(), &[(target, 2_000_000)]);
		assert_eq!(kernel.store.get_daily_spend(&date_key(200)).unwrap(), 2_000_000);

		// Approving again is a typed stale error, not a double open.
		let err = approve_action(&kernel, id, 210).unwrap_err();
		assert_eq!(err.code, HiveErrorCode::Stale);
		assert_eq!(rpc.opened.lock().unwrap().len(), 1);
	}

	#[test]
	fn test_approve_missing_action_not_found() {
		let (kernel, _) = kernel(&node_id(1));
		let err = approve_action(&kernel, 42, 100).unwrap_err();
		assert_eq!(err.code, HiveErrorCode::NotFound);
	}

	#[test]
	fn test_approve_expired_action_stale() {
		let (kernel, rpc) = kernel(&node_id(1));
		let id = kernel.store.add_pending_action("channel_open", "{}", 100, Some(150)).unwrap();
		let err = approve_action(&kernel, id, 150).unwrap_err();
		assert_eq!(err.code, HiveErrorCode::Stale);
		assert!(rpc.opened.lock().unwrap().is_empty());
		assert_eq!(kernel.store.get_pending_action(id).unwrap().unwrap().status, "expired");
	}

	#[test]
	fn test_reject_marks_action() {
		let (kernel, _) = kernel(&node_id(1));
		let id = kernel.store.add_pending_action("channel_open", "{}", 100, None).unwrap();
		let result = reject_action(&kernel, id, 110).unwrap();
		assert_eq!(result.status, "rejected");
		assert!(list_pending_actions(&kernel).unwrap().is_empty());
	}

	#[test]
	fn test_budget_summary_math() {
		let (kernel, _) = kernel(&node_id(1));
		let now = 1785585600;
		kernel
			.store
			.record_budget_spend(&date_key(now), "channel_open", 1_000_000, None, now)
			.unwrap();
		kernel
			.store
			.create_budget_hold("h1", "r1", &node_id(9), 2_000_000, now, now + 500, 10_000_000)
			.unwrap();
		let summary = budget_summary(&kernel, now).unwrap();
		assert_eq!(summary.spent_today_sats, 1_000_000);
		assert_eq!(summary.held_sats, 2_000_000);
		assert_eq!(summary.available_sats, 7_000_000);
	}
}
