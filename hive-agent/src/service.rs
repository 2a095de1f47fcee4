// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The kernel: subsystem wiring and inbound message dispatch.
//!
//! Inbound custom messages arrive one at a time from the host hook, pass
//! the codec, a payload validation predicate, identity binding and a
//! per-sender rate check, then route by type to their subsystem. Outbound
//! messages and channel actions flow back through the gateway. Handler
//! failures never escalate: unauthenticated noise is dropped and counted,
//! only signed misbehavior ever feeds reputation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use hive_proto::msgs::HiveMessage;
use hive_proto::{codec, FrameError};
use log::{debug, info, warn};
use serde::Serialize;

use crate::config::{Config, ConfigSnapshot, GovernanceMode};
use crate::contribution::{ContributionManager, ForwardEvent};
use crate::error::{HiveError, HiveErrorCode};
use crate::expansion::{ExpansionAction, ExpansionManager};
use crate::gateway::Gateway;
use crate::gossip::fee_intel::FeeIntelManager;
use crate::gossip::liquidity::LiquidityCoordinator;
use crate::gossip::peer_events::{PeerEventAction, PeerEventsManager};
use crate::gossip::reputation::ReputationAggregator;
use crate::gossip::routes::RouteIntelManager;
use crate::gossip::RateLimiter;
use crate::handshake::HandshakeManager;
use crate::intent::IntentManager;
use crate::membership::MembershipManager;
use crate::quality::QualityScorer;
use crate::settlement::SettlementManager;
use crate::splice::SpliceManager;
use crate::store::Store;

/// Drop/handled counters, exported through the operator surface.
#[derive(Default)]
pub struct Counters {
	pub handled: AtomicU64,
	pub invalid_frames: AtomicU64,
	pub invalid_payloads: AtomicU64,
	pub identity_rejects: AtomicU64,
	pub signature_rejects: AtomicU64,
	pub rate_limited: AtomicU64,
	pub stale_dropped: AtomicU64,
	pub not_member_dropped: AtomicU64,
	pub unknown_types: AtomicU64,
	pub other_dropped: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CounterSnapshot {
	pub handled: u64,
	pub invalid_frames: u64,
	pub invalid_payloads: u64,
	pub identity_rejects: u64,
	pub signature_rejects: u64,
	pub rate_limited: u64,
	pub stale_dropped: u64,
	pub not_member_dropped: u64,
	pub unknown_types: u64,
	pub other_dropped: u64,
}

impl Counters {
	pub fn snapshot(&self) -> CounterSnapshot {
		CounterSnapshot {
			handled: self.handled.load(Ordering::Relaxed),
			invalid_frames: self.invalid_frames.load(Ordering::Relaxed),
			invalid_payloads: self.invalid_payloads.load(Ordering::Relaxed),
			identity_rejects: self.identity_rejects.load(Ordering::Relaxed),
			signature_rejects: self.signature_rejects.load(Ordering::Relaxed),
			rate_limited: self.rate_limited.load(Ordering::Relaxed),
			stale_dropped: self.stale_dropped.load(Ordering::Relaxed),
			not_member_dropped: self.not_member_dropped.load(Ordering::Relaxed),
			unknown_types: self.unknown_types.load(Ordering::Relaxed),
			other_dropped: self.other_dropped.load(Ordering::Relaxed),
		}
	}

	fn count_error(&self, code: HiveErrorCode) {
		let counter = match code {
			HiveErrorCode::InvalidFrame => &self.invalid_frames,
			HiveErrorCode::InvalidPayload => &self.invalid_payloads,
			HiveErrorCode::IdentityMismatch => &self.identity_rejects,
			HiveErrorCode::SignatureMismatch => &self.signature_rejects,
			HiveErrorCode::RateLimited => &self.rate_limited,
			HiveErrorCode::Stale => &self.stale_dropped,
			HiveErrorCode::NotMember => &self.not_member_dropped,
			_ => &self.other_dropped,
		};
		counter.fetch_add(1, Ordering::Relaxed);
	}
}

/// One kernel per agent instance.
pub struct Kernel {
	pub config: Mutex<Config>,
	pub store: Arc<Store>,
	pub gateway: Arc<Gateway>,
	pub our_id: String,
	pub handshake: HandshakeManager,
	pub membership: MembershipManager,
	pub contribution: ContributionManager,
	pub intent: IntentManager,
	pub expansion: ExpansionManager,
	pub quality: Arc<QualityScorer>,
	pub reputation: ReputationAggregator,
	pub fee_intel: FeeIntelManager,
	pub routes: RouteIntelManager,
	pub liquidity: LiquidityCoordinator,
	pub peer_events: PeerEventsManager,
	pub settlement: SettlementManager,
	pub splice: SpliceManager,
	pub counters: Counters,
	service_rate: RateLimiter,
}

impl Kernel {
	pub fn new(config: Config, store: Arc<Store>, gateway: Arc<Gateway>, our_id: String) -> Self {
		let quality = Arc::new(QualityScorer::new(Arc::clone(&store)));
		Kernel {
			handshake: HandshakeManager::new(
				Arc::clone(&store),
				Arc::clone(&gateway),
				our_id.clone(),
			),
			membership: MembershipManager::new(
				Arc::clone(&store),
				Arc::clone(&gateway),
				our_id.clone(),
			),
			contribution: ContributionManager::new(
				Arc::clone(&store),
				Arc::clone(&gateway),
				our_id.clone(),
			),
			intent: IntentManager::new(Arc::clone(&store), Arc::clone(&gateway), our_id.clone()),
			expansion: ExpansionManager::new(
				Arc::clone(&store),
				Arc::clone(&gateway),
				Arc::clone(&quality),
				our_id.clone(),
			),
			reputation: ReputationAggregator::new(
				Arc::clone(&store),
				Arc::clone(&gateway),
				our_id.clone(),
			),
			fee_intel: FeeIntelManager::new(Arc::clone(&store), Arc::clone(&gateway)),
			routes: RouteIntelManager::new(Arc::clone(&store), Arc::clone(&gateway)),
			liquidity: LiquidityCoordinator::new(Arc::clone(&store), Arc::clone(&gateway)),
			peer_events: PeerEventsManager::new(Arc::clone(&store), Arc::clone(&gateway)),
			settlement: SettlementManager::new(
				Arc::clone(&store),
				Arc::clone(&gateway),
				our_id.clone(),
			),
			splice: SpliceManager::new(Arc::clone(&store), Arc::clone(&gateway), our_id.clone()),
			quality,
			counters: Counters::default(),
			service_rate: RateLimiter::new(),
			config: Mutex::new(config),
			store,
			gateway,
			our_id,
		}
	}

	pub fn snapshot(&self) -> ConfigSnapshot {
		self.config.lock().expect("config mutex poisoned").snapshot()
	}

	/// Startup: rebuild in-memory aggregations from the store and make sure
	/// our settlement offer exists.
	pub fn startup(&self, now: u64) -> Result<(), HiveError> {
		let rebuilt = self.reputation.rebuild_from_store(now)?;
		info!("rebuilt {} reputation aggregates from store", rebuilt);
		if self.snapshot().settlement_enabled {
			self.settlement.ensure_own_offer(now)?;
		}
		Ok(())
	}

	/// Entry point for the host's custom-message hook. Frames with foreign
	/// magic return immediately so other plugins see them untouched.
	pub fn handle_custom_msg(&self, sender: &str, frame: &[u8], now: u64) {
		match self.dispatch_frame(sender, frame, now) {
			Ok(true) => {
				self.counters.handled.fetch_add(1, Ordering::Relaxed);
			},
			Ok(false) => {},
			Err(e) => {
				self.counters.count_error(e.code);
				debug!("dropped {} byte frame from {}: {}", frame.len(), short(sender), e);
			},
		}
	}

	fn dispatch_frame(&self, sender: &str, frame: &[u8], now: u64) -> Result<bool, HiveError> {
		let msg = match codec::decode(frame) {
			Ok(Some(msg)) => msg,
			Ok(None) => return Ok(false),
			Err(FrameError::InvalidPayload(e)) => {
				return Err(HiveError::new(HiveErrorCode::InvalidPayload, e));
			},
			Err(e) => return Err(HiveError::new(HiveErrorCode::InvalidFrame, e.to_string())),
		};

		if let HiveMessage::Unknown { msg_type } = &msg {
			// Valid magic, unknown type: recorded but otherwise ignored.
			self.counters.unknown_types.fetch_add(1, Ordering::Relaxed);
			debug!("unknown hive message type {} from {}", msg_type, short(sender));
			return Ok(false);
		}

		msg.validate().map_err(|e| HiveError::new(HiveErrorCode::InvalidPayload, e))?;

		if msg.claimed_sender() != Some(sender) {
			return Err(HiveError::new(
				HiveErrorCode::IdentityMismatch,
				format!("{} claims a sender other than the transport peer", msg.name()),
			));
		}

		// Beyond the handshake, only admitted members are heard at all.
		let is_handshake = matches!(
			msg,
			HiveMessage::Hello(_)
				| HiveMessage::Challenge(_)
				| HiveMessage::Attest(_)
				| HiveMessage::Welcome(_)
		);
		if !is_handshake && self.store.get_member(sender)?.is_none() {
			return Err(HiveError::new(
				HiveErrorCode::NotMember,
				format!("{} from unadmitted peer", msg.name()),
			));
		}

		// Gossip topics run their own limiter inside the admission gate.
		let self_limited = matches!(
			msg,
			HiveMessage::PeerAvailable(_)
				| HiveMessage::FeeReport(_)
				| HiveMessage::LiquidityNeed(_)
				| HiveMessage::RouteProbe(_)
				| HiveMessage::PeerReputation(_)
		);
		if !self_limited {
			if let Some(limit) = msg.rate_limit() {
				if !self.service_rate.check_and_record(sender, limit, now) {
					return Err(HiveError::new(HiveErrorCode::RateLimited, msg.name()));
				}
			}
		}

		let snapshot = self.snapshot();
		let peers = self.membership.broadcast_targets(now)?;
		let max_age = snapshot.gossip_max_age_hours * 3600;
		let mut outbound = Vec::new();

		match &msg {
			HiveMessage::Hello(m) => {
				outbound = self.handshake.handle_hello(sender, m, now)?;
			},
			HiveMessage::Challenge(m) => {
				outbound = self.handshake.handle_challenge(sender, m, now)?;
			},
			HiveMessage::Attest(m) => {
				outbound = self.handshake.handle_attest(sender, m, now)?;
			},
			HiveMessage::Welcome(m) => {
				outbound = self.handshake.handle_welcome(sender, m, now)?;
			},
			HiveMessage::PromotionRequest(m) => {
				if snapshot.membership_enabled {
					outbound =
						self.membership.handle_promotion_request(sender, m, now, &snapshot)?;
				}
			},
			HiveMessage::Vouch(m) => {
				if snapshot.membership_enabled {
					outbound = self.membership.handle_vouch(sender, m, now, &snapshot)?;
				}
			},
			HiveMessage::Promotion(m) => {
				if snapshot.membership_enabled {
					outbound = self.membership.handle_promotion(sender, m, now, &snapshot)?;
				}
			},
			HiveMessage::BanPropose(m) => {
				outbound = self.membership.handle_ban_propose(sender, m, now)?;
			},
			HiveMessage::BanVote(m) => {
				outbound = self.membership.handle_ban_vote(sender, m, now, &snapshot)?;
			},
			HiveMessage::Intent(m) => {
				outbound = self.intent.handle_intent(sender, m, now, &snapshot, &peers)?;
			},
			HiveMessage::IntentAbort(m) => {
				outbound = self.intent.handle_abort(sender, m, now)?;
			},
			HiveMessage::ExpansionNominate(m) => {
				outbound = self.expansion.handle_nominate(sender, m, now, &snapshot, &peers)?;
			},
			HiveMessage::ExpansionElect(m) => {
				let action = self.expansion.handle_elect(sender, m, now)?;
				self.run_expansion_action(action, now, &snapshot);
			},
			HiveMessage::ExpansionCancelled(m) => {
				self.expansion.handle_cancelled(sender, m, now)?;
			},
			HiveMessage::PeerAvailable(m) => {
				let action = self.peer_events.handle_event(sender, m, now, max_age)?;
				if let PeerEventAction::EvaluateExpansion {
					target,
					event_type,
					reporter,
					capacity_sats,
				} = action
				{
					if let Some((_, nominate_out)) = self.expansion.evaluate_expansion(
						&target,
						&event_type,
						&reporter,
						capacity_sats,
						None,
						now,
						&snapshot,
						&peers,
					)? {
						outbound = nominate_out;
					}
				}
			},
			HiveMessage::FeeReport(m) => {
				self.fee_intel.handle_report(sender, m, now, max_age)?;
			},
			HiveMessage::LiquidityNeed(m) => {
				self.liquidity.handle_need(sender, m, now, max_age)?;
			},
			HiveMessage::RouteProbe(m) => {
				self.routes.handle_probe(sender, m, now, max_age)?;
			},
			HiveMessage::PeerReputation(m) => {
				self.reputation.handle_report(sender, m, now, max_age)?;
			},
			HiveMessage::SettlementPropose(m) => {
				if snapshot.settlement_enabled {
					outbound = self.settlement.handle_propose(sender, m, now, &peers)?;
				}
			},
			HiveMessage::SettlementReady(m) => {
				if snapshot.settlement_enabled {
					self.settlement.handle_ready(sender, m, now)?;
				}
			},
			HiveMessage::SettlementExecuted(m) => {
				if snapshot.settlement_enabled {
					self.settlement.handle_executed(sender, m, now)?;
				}
			},
			HiveMessage::SpliceInitRequest(m) => {
				outbound = self.splice.handle_init_request(sender, m, now)?;
			},
			HiveMessage::SpliceInitResponse(m) => {
				outbound = self.splice.handle_init_response(sender, m, now)?;
			},
			HiveMessage::SpliceUpdate(m) => {
				outbound = self.splice.handle_update(sender, m, now)?;
			},
			HiveMessage::SpliceSigned(m) => {
				outbound = self.splice.handle_signed(sender, m, now)?;
			},
			HiveMessage::SpliceAbort(m) => {
				self.splice.handle_abort(sender, m, now)?;
			},
			HiveMessage::Unknown { .. } => unreachable!("filtered above"),
		}

		self.store.touch_member(sender, now).ok();
		self.send_outbound(outbound, now);
		Ok(true)
	}

	/// Host forward-event hook: credit contributions, escalate leeches only
	/// when configured to.
	pub fn handle_forward_event(&self, event: &ForwardEvent, now: u64) {
		let snapshot = self.snapshot();
		match self.contribution.handle_forward_event(
			event,
			now,
			snapshot.ban_autotrigger_enabled,
		) {
			Ok(statuses) => {
				for (peer, status) in statuses {
					if status.ban_trigger {
						match self.membership.propose_ban(&peer, "leech", now) {
							Ok((_, outbound)) => self.send_outbound(outbound, now),
							Err(e) => warn!("leech ban proposal failed: {}", e),
						}
					}
				}
			},
			Err(e) => warn!("forward event handling failed: {}", e),
		}
	}

	/// Executes an elected channel open under the configured governance
	/// mode: autonomous opens immediately, advisor queues a pending action.
	pub fn run_expansion_action(
		&self, action: ExpansionAction, now: u64, snapshot: &ConfigSnapshot,
	) {
		let ExpansionAction::OpenChannel { round_id, target, channel_size_sats } = action else {
			return;
		};

		if snapshot.governance_mode == GovernanceMode::Advisor {
			let payload = serde_json::json!({
				"round_id": round_id,
				"target": target,
				"amount_sats": channel_size_sats,
			})
			.to_string();
			match self.store.add_pending_action("channel_open", &payload, now, Some(now + 86400))
			{
				Ok(id) => {
					info!("queued channel open to {} as pending action {}", short(&target), id);
					self.store
						.log_planner_action(
							now,
							"channel_open",
							Some(&target),
							"queued",
							Some(&payload),
						)
						.ok();
				},
				Err(e) => warn!("failed to queue pending action: {}", e),
			}
			return;
		}

		match self.gateway.open_channel(now, &target, channel_size_sats) {
			Ok(txid) => {
				info!("opened {} sat channel to {}: {}", channel_size_sats, short(&target), txid);
				self.store
					.record_budget_spend(
						&date_key(now),
						"channel_open",
						channel_size_sats,
						Some(&target),
						now,
					)
					.ok();
				self.expansion.complete_round(&round_id, true, &txid, now).ok();
				self.store
					.log_planner_action(now, "channel_open", Some(&target), "opened", Some(&txid))
					.ok();
			},
			Err(e) => {
				// Transient host trouble; the round stays open for a retry
				// until it expires.
				warn!("channel open to {} failed: {}", short(&target), e);
				self.store
					.log_planner_action(
						now,
						"channel_open",
						Some(&target),
						"failed",
						Some(&e.to_string()),
					)
					.ok();
			},
		}
	}

	/// Encodes and ships outbound messages through the gateway. Send
	/// failures are logged, never retried here; the breaker owns retries.
	pub fn send_outbound(&self, outbound: Vec<(String, HiveMessage)>, now: u64) {
		for (peer, msg) in outbound {
			match codec::encode(&msg) {
				Ok(frame) => {
					if let Err(e) = self.gateway.send_custom_msg(now, &peer, &frame) {
						debug!("send {} to {} failed: {}", msg.name(), short(&peer), e);
					}
				},
				Err(e) => warn!("encode {} failed: {}", msg.name(), e),
			}
		}
	}

	fn peer_events(&self) -> PeerEventsManager {
		PeerEventsManager::new(Arc::clone(&self.store), Arc::clone(&self.gateway))
	}
}

/// Budget tracking date key, UTC calendar day.
pub fn date_key(now: u64) -> String {
	let dt = Utc.timestamp_opt(now as i64, 0).single().unwrap_or_else(Utc::now);
	dt.format("%Y-%m-%d").to_string()
}

fn short(peer_id: &str) -> &str {
	&peer_id[..peer_id.len().min(16)]
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::gateway::test_util::MockHostRpc;
	use crate::store::Tier;
	use hive_proto::msgs::{Hello, ReputationReport};
	use hive_proto::signing;

	fn node_id(tag: u8) -> String {
		format!("02{:02x}{}", tag, "ab".repeat(31))
	}

	fn test_config() -> Config {
		use crate::config::{load_config, ArgsConfig};
		load_config(&ArgsConfig {
			config_file: None,
			storage_dir_path: Some("/tmp/hive-test".into()),
			rpc_socket_path: Some("/tmp/lightning-rpc".into()),
			governance_mode: Some("autonomous".into()),
			daily_budget_sats: None,
		})
		.unwrap()
	}

	fn kernel(our_id: &str, rpc: MockHostRpc) -> (Kernel, Arc<MockHostRpc>) {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let rpc = Arc::new(rpc);
		let gateway = Arc::new(Gateway::new(Arc::<MockHostRpc>::clone(&rpc)));
		(Kernel::new(test_config(), store, gateway, our_id.to_string()), rpc)
	}

	fn drain_sent(rpc: &MockHostRpc) -> Vec<(String, Vec<u8>)> {
		rpc.sent.lock().unwrap().drain(..).collect()
	}

	#[test]
	fn test_foreign_frames_pass_untouched() {
		let (kernel, _) = kernel(&node_id(1), MockHostRpc::new(&node_id(1)));
		kernel.handle_custom_msg(&node_id(2), &[0xde, 0xad, 0xbe, 0xef, 0x01], 100);
		let counters = kernel.counters.snapshot();
		assert_eq!(counters.handled, 0);
		assert_eq!(counters.invalid_frames, 0);
	}

	#[test]
	fn test_unknown_type_counted() {
		let (kernel, _) = kernel(&node_id(1), MockHostRpc::new(&node_id(1)));
		let mut frame = Vec::from(hive_proto::HIVE_MAGIC);
		frame.push(0xEE);
		frame.extend_from_slice(&2u16.to_be_bytes());
		frame.extend_from_slice(b"{}");
		kernel.handle_custom_msg(&node_id(2), &frame, 100);
		assert_eq!(kernel.counters.snapshot().unknown_types, 1);
	}

	#[test]
	fn test_identity_mismatch_dropped() {
		let a = node_id(2);
		let mallory = node_id(3);
		let (kernel, _) =
			kernel(&node_id(1), MockHostRpc::new(&node_id(1)).with_channel(&a, 1_000_000));

		// Mallory relays A's hello as its own traffic.
		let hello = HiveMessage::Hello(Hello { pubkey: a.clone(), timestamp: 100 });
		let frame = codec::encode(&hello).unwrap();
		kernel.handle_custom_msg(&mallory, &frame, 100);

		let counters = kernel.counters.snapshot();
		assert_eq!(counters.identity_rejects, 1);
		assert_eq!(counters.handled, 0);
	}

	#[test]
	fn test_reputation_identity_binding_end_to_end() {
		let our_id = node_id(1);
		let reporter = node_id(2);
		let mallory = node_id(3);
		let (kernel, _) = kernel(&our_id, MockHostRpc::new(&our_id));
		kernel.store.add_member(&reporter, Tier::Member, 0).unwrap();
		kernel.store.add_member(&mallory, Tier::Member, 0).unwrap();

		let mut report = ReputationReport {
			reporter: reporter.clone(),
			peer: node_id(9),
			timestamp: 100,
			uptime_pct: 0.9,
			response_time_ms: 10,
			force_close_count: 0,
			fee_stability: 1.0,
			htlc_success_rate: 0.9,
			channel_age_days: 10,
			total_routed_sats: 0,
			warnings: vec![],
			observation_days: 7,
			signature: String::new(),
		};
		report.signature =
			MockHostRpc::sign_for(&reporter, &signing::peer_reputation(&report));
		let frame = codec::encode(&HiveMessage::PeerReputation(report)).unwrap();

		// Relayed by mallory: dropped on identity binding.
		kernel.handle_custom_msg(&mallory, &frame, 150);
		assert!(kernel.reputation.get_reputation(&node_id(9)).is_none());

		// From the reporter itself: accepted.
		kernel.handle_custom_msg(&reporter, &frame, 150);
		assert!(kernel.reputation.get_reputation(&node_id(9)).is_some());
	}

	#[test]
	fn test_full_handshake_through_dispatch() {
		let a_id = node_id(0xa1);
		let b_id = node_id(0xb2);
		let (a, a_rpc) = kernel(&a_id, MockHostRpc::new(&a_id).with_channel(&b_id, 1_000_000));
		let (b, b_rpc) = kernel(&b_id, MockHostRpc::new(&b_id).with_channel(&a_id, 1_000_000));

		// A initiates, then frames pump between the kernels through the
		// mock hosts' outboxes: hello, challenge, attest, welcome.
		let hello = a.handshake.initiate_join(&b_id, 100);
		a.send_outbound(hello, 100);

		for (_, frame) in drain_sent(&a_rpc) {
			b.handle_custom_msg(&a_id, &frame, 101);
		}
		for (_, frame) in drain_sent(&b_rpc) {
			a.handle_custom_msg(&b_id, &frame, 102);
		}
		for (_, frame) in drain_sent(&a_rpc) {
			b.handle_custom_msg(&a_id, &frame, 103);
		}
		for (_, frame) in drain_sent(&b_rpc) {
			a.handle_custom_msg(&b_id, &frame, 104);
		}

		assert_eq!(b.store.get_member(&a_id).unwrap().unwrap().tier, Tier::Neophyte);
		assert_eq!(a.store.get_member(&a_id).unwrap().unwrap().tier, Tier::Neophyte);
		assert_eq!(a.store.get_member(&b_id).unwrap().unwrap().tier, Tier::Member);
	}

	#[test]
	fn test_date_key() {
		// 2026-08-01T12:00:00Z
		assert_eq!(date_key(1785585600), "2026-08-01");
	}
}
