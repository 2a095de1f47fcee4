// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Long-lived timers driving every time-based transition.
//!
//! One worker per kernel. Each job is idempotent and works only from
//! durable state, so a restart between jobs is safe. Handler errors are
//! logged and absorbed; nothing propagates out of the cycle.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};

use crate::membership::PRESENCE_WINDOW_SECONDS;
use crate::service::Kernel;
use crate::util::now_seconds;

/// Vouches are pruned once they have been expired this long.
const VOUCH_RETENTION_SECONDS: u64 = 24 * 3600;
/// Contribution ledger rows older than this are pruned.
const CONTRIBUTION_RETENTION_SECONDS: u64 = 45 * 86400;
/// Planner audit rows older than this are pruned.
const PLANNER_LOG_RETENTION_SECONDS: u64 = 30 * 86400;
/// Flow samples older than this are pruned.
const FLOW_RETENTION_SECONDS: u64 = 30 * 86400;
/// Temporal patterns condense samples from this window.
const PATTERN_WINDOW_SECONDS: u64 = 14 * 86400;

/// Runs the worker loop until shutdown is signalled.
pub async fn run(kernel: Arc<Kernel>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
	let interval_seconds = kernel.snapshot().heartbeat_interval_seconds;
	let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
	loop {
		tokio::select! {
			_ = ticker.tick() => {
				let kernel = Arc::clone(&kernel);
				// Cycles block on host RPCs and store writes; keep them off
				// the async executor threads.
				let _ = tokio::task::spawn_blocking(move || {
					run_cycle(&kernel, now_seconds());
				})
				.await;
			},
			_ = shutdown.changed() => {
				if *shutdown.borrow() {
					break;
				}
			},
		}
	}
}

/// One scheduler pass. A config snapshot is captured up front so a live
/// reconfiguration cannot tear a running decision.
pub fn run_cycle(kernel: &Kernel, now: u64) {
	let snapshot = kernel.snapshot();
	let peers = match kernel.membership.broadcast_targets(now) {
		Ok(peers) => peers,
		Err(e) => {
			warn!("cycle skipped, member query failed: {}", e);
			return;
		},
	};

	// Intent resolution and reaping.
	match kernel.intent.resolve_ready(now, &snapshot, &peers) {
		Ok((committed, outbound)) => {
			kernel.send_outbound(outbound, now);
			for intent in committed {
				// The committed action executes through its own subsystem
				// (expansion rounds size and open channels); the lock's job
				// ends at winning the resource.
				kernel
					.store
					.log_planner_action(
						now,
						"intent_committed",
						Some(&intent.target),
						intent.intent_type.as_str(),
						None,
					)
					.ok();
			}
		},
		Err(e) => warn!("intent resolution failed: {}", e),
	}
	if let Err(e) = kernel.intent.reap_expired(now) {
		warn!("intent reaper failed: {}", e);
	}

	// Expansion rounds: elections for closed windows, then expiry.
	for round_id in kernel.expansion.rounds_ready_for_election(now) {
		match kernel.expansion.elect_winner(&round_id, now, &peers) {
			Ok((_, outbound, action)) => {
				kernel.send_outbound(outbound, now);
				kernel.run_expansion_action(action, now, &snapshot);
			},
			Err(e) => warn!("election for round {} failed: {}", short_id(&round_id), e),
		}
	}
	if let Err(e) = kernel.expansion.cleanup_expired_rounds(now) {
		warn!("round expiry failed: {}", e);
	}
	if let Err(e) = kernel.store.expire_budget_holds(now) {
		warn!("hold expiry failed: {}", e);
	}

	// Membership upkeep.
	if let Err(e) = kernel.store.cleanup_expired_ban_proposals(now) {
		warn!("ban proposal expiry failed: {}", e);
	}
	if let Err(e) = kernel.store.clamp_presence_windows(now, PRESENCE_WINDOW_SECONDS) {
		warn!("presence clamp failed: {}", e);
	}
	if let Err(e) =
		kernel.store.prune_old_vouches(now.saturating_sub(VOUCH_RETENTION_SECONDS))
	{
		warn!("vouch prune failed: {}", e);
	}
	if let Err(e) = kernel.store.cleanup_expired_actions(now) {
		warn!("pending action expiry failed: {}", e);
	}
	refresh_member_metrics(kernel, now);
	kernel.handshake.prune_expired(now);
	kernel.splice.cleanup_expired_sessions(now);

	// A neophyte that clears every promotion condition asks for promotion
	// on its own, once per open request.
	if snapshot.membership_enabled && snapshot.auto_promote_enabled {
		maybe_request_promotion(kernel, now, &snapshot);
	}

	// Gossip pruning.
	let gossip_cutoff = now.saturating_sub(snapshot.gossip_max_age_hours * 3600);
	if let Err(e) = kernel.fee_intel.prune(gossip_cutoff, now) {
		warn!("fee intel prune failed: {}", e);
	}
	if let Err(e) = kernel.routes.prune(gossip_cutoff, now) {
		warn!("route probe prune failed: {}", e);
	}
	if let Err(e) = kernel.liquidity.prune(gossip_cutoff, now) {
		warn!("liquidity need prune failed: {}", e);
	}
	if let Err(e) = kernel.peer_events.prune(gossip_cutoff, now) {
		warn!("peer event prune failed: {}", e);
	}
	if let Err(e) = kernel.reputation.cleanup_stale(now) {
		warn!("reputation cleanup failed: {}", e);
	}
	kernel.reputation.prune_rate_windows(now);
	if let Err(e) =
		kernel.store.prune_old_contributions(now.saturating_sub(CONTRIBUTION_RETENTION_SECONDS))
	{
		warn!("contribution prune failed: {}", e);
	}
	if let Err(e) =
		kernel.store.prune_planner_logs(now.saturating_sub(PLANNER_LOG_RETENTION_SECONDS))
	{
		warn!("planner log prune failed: {}", e);
	}
	if let Err(e) = kernel.store.prune_flow_samples(now.saturating_sub(FLOW_RETENTION_SECONDS)) {
		warn!("flow sample prune failed: {}", e);
	}
	match kernel
		.store
		.detect_temporal_patterns(now.saturating_sub(PATTERN_WINDOW_SECONDS), now)
	{
		Ok(detected) if detected > 0 => debug!("detected {} temporal patterns", detected),
		Ok(_) => {},
		Err(e) => warn!("pattern detection failed: {}", e),
	}

	// Settlement: weekly proposer, ready-vote driving, execution.
	if snapshot.settlement_enabled {
		if let Err(e) = kernel.settlement.ensure_own_offer(now) {
			warn!("settlement offer upkeep failed: {}", e);
		}
		match kernel.settlement.maybe_propose(now, &peers) {
			Ok(Some((proposal_id, outbound))) => {
				debug!("settlement proposer fired: {}", short_id(&proposal_id));
				kernel.send_outbound(outbound, now);
			},
			Ok(None) => {},
			Err(e) => warn!("settlement proposer failed: {}", e),
		}
		match kernel.settlement.execute_ready(now, &peers) {
			Ok(outbound) => kernel.send_outbound(outbound, now),
			Err(e) => warn!("settlement execution failed: {}", e),
		}
	}
}

fn maybe_request_promotion(kernel: &Kernel, now: u64, snapshot: &crate::config::ConfigSnapshot) {
	let is_neophyte = match kernel.store.get_member(&kernel.our_id) {
		Ok(Some(member)) => member.tier == crate::store::Tier::Neophyte,
		_ => false,
	};
	if !is_neophyte {
		return;
	}
	match kernel.store.has_pending_promotion_request(&kernel.our_id) {
		Ok(true) => return,
		Ok(false) => {},
		Err(e) => {
			warn!("promotion request lookup failed: {}", e);
			return;
		},
	}
	match kernel.membership.evaluate_promotion(&kernel.our_id, now, snapshot) {
		Ok(evaluation) if evaluation.eligible => {
			match kernel.membership.request_promotion(now) {
				Ok(outbound) => kernel.send_outbound(outbound, now),
				Err(e) => warn!("promotion request failed: {}", e),
			}
		},
		Ok(_) => {},
		Err(e) => warn!("promotion evaluation failed: {}", e),
	}
}

fn short_id(id: &str) -> &str {
	&id[..id.len().min(12)]
}

/// Refreshes each member row's cached uptime and contribution ratio.
fn refresh_member_metrics(kernel: &Kernel, now: u64) {
	let members = match kernel.store.get_all_members() {
		Ok(members) => members,
		Err(e) => {
			warn!("member metric refresh failed: {}", e);
			return;
		},
	};
	for member in members {
		let uptime = kernel.membership.calculate_uptime(&member.peer_id, now).unwrap_or(0.0);
		let ratio = kernel
			.contribution
			.contribution_ratio(&member.peer_id, now, 30)
			.unwrap_or(1.0);
		let stored_ratio = if ratio.is_finite() { ratio } else { f64::MAX };
		if let Err(e) = kernel.store.update_member_metrics(&member.peer_id, stored_ratio, uptime)
		{
			warn!("metric update for {} failed: {}", &member.peer_id[..16], e);
		}
	}
}
