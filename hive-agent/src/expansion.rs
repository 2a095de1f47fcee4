// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Cooperative expansion: electing a single opener per available peer.
//!
//! When an external peer becomes available (typically after a remote close
//! reported by any member), interested members self-nominate into a round.
//! After the nomination window every participant computes the same weighted
//! score, so the election needs no coordinator. Two rounds independently
//! started for the same target merge onto the smaller round id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use hive_proto::msgs::{ExpansionCancelled, ExpansionElect, ExpansionNominate, HiveMessage};
use hive_proto::signing;
use log::{debug, info, warn};
use rand::RngCore;

use crate::config::ConfigSnapshot;
use crate::error::{HiveError, HiveErrorCode};
use crate::gateway::Gateway;
use crate::quality::QualityScorer;
use crate::store::Store;

pub const NOMINATION_WINDOW_SECONDS: u64 = 30;
pub const ROUND_EXPIRE_SECONDS: u64 = 120;
pub const COOLDOWN_SECONDS: u64 = 300;
pub const MAX_ACTIVE_ROUNDS: usize = 5;
pub const MIN_NOMINATIONS_FOR_ELECTION: usize = 1;
pub const MIN_QUALITY_SCORE: f64 = 0.45;
/// Smallest liquidity worth nominating with.
pub const MIN_NOMINATION_LIQUIDITY_SATS: u64 = 1_000_000;

const WEIGHT_LIQUIDITY: f64 = 0.25;
const WEIGHT_CHANNEL_COUNT: f64 = 0.30;
const WEIGHT_RECENT_OPENS: f64 = 0.20;
const WEIGHT_QUALITY_AGREEMENT: f64 = 0.25;

const TERMINAL_ROUND_RETENTION_SECONDS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
	Nominating,
	Electing,
	Elected,
	Completed,
	Cancelled,
	Expired,
}

impl RoundState {
	pub fn as_str(&self) -> &'static str {
		match self {
			RoundState::Nominating => "nominating",
			RoundState::Electing => "electing",
			RoundState::Elected => "elected",
			RoundState::Completed => "completed",
			RoundState::Cancelled => "cancelled",
			RoundState::Expired => "expired",
		}
	}

	pub fn is_active(&self) -> bool {
		matches!(self, RoundState::Nominating | RoundState::Electing)
	}

	/// Terminal states are absorbing.
	pub fn is_terminal(&self) -> bool {
		matches!(self, RoundState::Completed | RoundState::Cancelled | RoundState::Expired)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Nomination {
	pub nominator: String,
	pub target: String,
	pub timestamp: u64,
	pub available_liquidity_sats: u64,
	pub quality_score: f64,
	pub has_existing_channel: bool,
	pub channel_count: u32,
	pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionRound {
	pub round_id: String,
	pub target: String,
	pub started_at: u64,
	pub state: RoundState,
	pub trigger_event: String,
	pub trigger_reporter: String,
	pub nominations: HashMap<String, Nomination>,
	pub elected: Option<String>,
	pub recommended_size_sats: u64,
	pub quality_score: f64,
	pub expires_at: u64,
	pub completed_at: u64,
	pub result: String,
	/// Our budget hold backing this round, if we nominated.
	pub hold_id: Option<String>,
}

/// What the caller must do after handling an election.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpansionAction {
	None,
	/// We are the elected opener.
	OpenChannel { round_id: String, target: String, channel_size_sats: u64 },
}

pub struct ExpansionManager {
	store: Arc<Store>,
	gateway: Arc<Gateway>,
	quality: Arc<QualityScorer>,
	our_id: String,
	rounds: Mutex<HashMap<String, ExpansionRound>>,
	recent_opens: Mutex<HashMap<String, u64>>,
	cooldowns: Mutex<HashMap<String, u64>>,
}

impl ExpansionManager {
	pub fn new(
		store: Arc<Store>, gateway: Arc<Gateway>, quality: Arc<QualityScorer>, our_id: String,
	) -> Self {
		ExpansionManager {
			store,
			gateway,
			quality,
			our_id,
			rounds: Mutex::new(HashMap::new()),
			recent_opens: Mutex::new(HashMap::new()),
			cooldowns: Mutex::new(HashMap::new()),
		}
	}

	// =========================================================================
	// Round lifecycle
	// =========================================================================

	/// Evaluates whether a newly available peer warrants a round. Gates:
	/// per-target cooldown, one active round per target, the global round
	/// cap, and the minimum quality score.
	pub fn evaluate_expansion(
		&self, target: &str, event_type: &str, reporter: &str, capacity_sats: u64,
		quality_score: Option<f64>, now: u64, snapshot: &ConfigSnapshot, peers: &[String],
	) -> Result<Option<(String, Vec<(String, HiveMessage)>)>, HiveError> {
		let cooldown_until =
			self.cooldowns.lock().expect("lock poisoned").get(target).copied().unwrap_or(0);
		if now < cooldown_until {
			debug!("target {} on cooldown until {}", short(target), cooldown_until);
			return Ok(None);
		}

		{
			let rounds = self.rounds.lock().expect("lock poisoned");
			if rounds.values().any(|r| r.target == target && r.state.is_active()) {
				return Ok(None);
			}
			if rounds.values().filter(|r| r.state.is_active()).count() >= MAX_ACTIVE_ROUNDS {
				debug!("max active rounds reached");
				return Ok(None);
			}
		}

		let quality = match quality_score {
			Some(q) => q,
			None => self.quality.calculate_score(target, now)?.overall_score,
		};
		if quality < MIN_QUALITY_SCORE {
			debug!("target {} quality too low: {:.2}", short(target), quality);
			return Ok(None);
		}

		let (round_id, outbound) = self.start_round(
			target,
			event_type,
			reporter,
			quality,
			capacity_sats,
			now,
			snapshot,
			peers,
		)?;
		Ok(Some((round_id, outbound)))
	}

	#[allow(clippy::too_many_arguments)]
	fn start_round(
		&self, target: &str, trigger_event: &str, trigger_reporter: &str, quality_score: f64,
		recommended_size_sats: u64, now: u64, snapshot: &ConfigSnapshot, peers: &[String],
	) -> Result<(String, Vec<(String, HiveMessage)>), HiveError> {
		let round_id = random_hex(8);
		let round = ExpansionRound {
			round_id: round_id.clone(),
			target: target.to_string(),
			started_at: now,
			state: RoundState::Nominating,
			trigger_event: trigger_event.to_string(),
			trigger_reporter: trigger_reporter.to_string(),
			nominations: HashMap::new(),
			elected: None,
			recommended_size_sats,
			quality_score,
			expires_at: now + ROUND_EXPIRE_SECONDS,
			completed_at: 0,
			result: String::new(),
			hold_id: None,
		};
		self.rounds.lock().expect("lock poisoned").insert(round_id.clone(), round);
		info!(
			"started expansion round {} for {} (quality {:.2}, trigger {})",
			short_id(&round_id),
			short(target),
			quality_score,
			trigger_event
		);

		let outbound = self.auto_nominate(&round_id, now, snapshot, peers)?;
		Ok((round_id, outbound))
	}

	/// Nominates ourselves if we have no channel to the target and enough
	/// budget-constrained liquidity; the nomination reserves its size as a
	/// budget hold for the lifetime of the round.
	fn auto_nominate(
		&self, round_id: &str, now: u64, snapshot: &ConfigSnapshot, peers: &[String],
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		let (target, quality_score, recommended) = {
			let rounds = self.rounds.lock().expect("lock poisoned");
			let Some(round) = rounds.get(round_id) else { return Ok(Vec::new()) };
			(round.target.clone(), round.quality_score, round.recommended_size_sats)
		};

		match self.gateway.has_channel_with(now, &target) {
			Ok(true) => {
				debug!("not nominating, channel to {} exists", short(&target));
				return Ok(Vec::new());
			},
			Ok(false) => {},
			Err(e) => {
				warn!("nomination skipped, host unavailable: {}", e);
				return Ok(Vec::new());
			},
		}

		let available = self.budget_constrained_liquidity(now, snapshot)?;
		if available < MIN_NOMINATION_LIQUIDITY_SATS {
			debug!("not nominating, {} sats available", available);
			return Ok(Vec::new());
		}

		let hold_amount = if recommended > 0 { recommended.min(available) } else { available };
		let hold_id = random_hex(8);
		if let Err(e) = self.store.create_budget_hold(
			&hold_id,
			round_id,
			&target,
			hold_amount,
			now,
			now + ROUND_EXPIRE_SECONDS,
			snapshot.daily_budget_sats,
		) {
			debug!("not nominating, hold refused: {}", e);
			return Ok(Vec::new());
		}

		let channel_count = match self.gateway.list_peer_channels(now, None) {
			Ok(channels) => channels.len() as u32,
			Err(_) => 0,
		};

		let nomination = Nomination {
			nominator: self.our_id.clone(),
			target: target.clone(),
			timestamp: now,
			available_liquidity_sats: available,
			quality_score,
			has_existing_channel: false,
			channel_count,
			reason: "auto_nominate".to_string(),
		};

		{
			let mut rounds = self.rounds.lock().expect("lock poisoned");
			if let Some(round) = rounds.get_mut(round_id) {
				if round.state != RoundState::Nominating {
					self.store.release_budget_hold(&hold_id)?;
					return Ok(Vec::new());
				}
				round.nominations.insert(self.our_id.clone(), nomination.clone());
				round.hold_id = Some(hold_id);
			}
		}

		let mut msg = ExpansionNominate {
			round_id: round_id.to_string(),
			target,
			nominator: self.our_id.clone(),
			timestamp: now,
			available_liquidity_sats: nomination.available_liquidity_sats,
			quality_score: nomination.quality_score,
			has_existing_channel: false,
			channel_count: nomination.channel_count,
			reason: nomination.reason.clone(),
			signature: String::new(),
		};
		msg.signature = self
			.gateway
			.sign_message(now, &signing::expansion_nominate(&msg))
			.map_err(HiveError::from)?;

		let msg = HiveMessage::ExpansionNominate(msg);
		Ok(peers.iter().map(|peer| (peer.clone(), msg.clone())).collect())
	}

	/// Liquidity usable for one channel open: on-chain balance after the
	/// reserve, capped by the daily budget and the per-channel share of it.
	fn budget_constrained_liquidity(
		&self, now: u64, snapshot: &ConfigSnapshot,
	) -> Result<u64, HiveError> {
		let funds = self.gateway.list_funds(now).map_err(HiveError::from)?;
		let after_reserve =
			(funds.onchain_confirmed_sats as f64 * (1.0 - snapshot.budget_reserve_pct)) as u64;
		let max_per_channel =
			(snapshot.daily_budget_sats as f64 * snapshot.budget_max_per_channel_pct) as u64;
		Ok(after_reserve.min(snapshot.daily_budget_sats).min(max_per_channel))
	}

	// =========================================================================
	// Message handlers
	// =========================================================================

	/// An EXPANSION_NOMINATE arrived. Unknown round ids either merge into our
	/// active round for the same target (smaller id wins, nominations
	/// migrate) or create the round locally so the fleet converges on one.
	pub fn handle_nominate(
		&self, sender: &str, msg: &ExpansionNominate, now: u64, snapshot: &ConfigSnapshot,
		peers: &[String],
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		let verified = self
			.gateway
			.verify_signature(now, &signing::expansion_nominate(msg), &msg.signature, &msg.nominator)
			.map_err(HiveError::from)?;
		if !verified {
			return Err(HiveError::new(HiveErrorCode::SignatureMismatch, "nomination"));
		}
		if msg.has_existing_channel {
			return Err(HiveError::new(
				HiveErrorCode::InvalidPayload,
				"nominator already has a channel to the target",
			));
		}

		let mut outbound = Vec::new();
		let effective_round_id;
		{
			let mut rounds = self.rounds.lock().expect("lock poisoned");
			if rounds.contains_key(&msg.round_id) {
				effective_round_id = msg.round_id.clone();
			} else {
				let existing_id = rounds
					.values()
					.find(|r| r.target == msg.target && r.state.is_active())
					.map(|r| r.round_id.clone());
				match existing_id {
					Some(existing) if msg.round_id < existing => {
						// The remote round wins; migrate our nominations.
						info!(
							"merging round {} into remote {}",
							short_id(&existing),
							short_id(&msg.round_id)
						);
						let mut old = rounds.remove(&existing).expect("checked above");
						old.round_id = msg.round_id.clone();
						old.trigger_event = "merged".to_string();
						old.trigger_reporter = sender.to_string();
						old.expires_at = now + ROUND_EXPIRE_SECONDS;
						rounds.insert(msg.round_id.clone(), old);
						effective_round_id = msg.round_id.clone();
					},
					Some(existing) => {
						// Ours wins; fold their nomination into it.
						debug!(
							"keeping round {}, ignoring remote {}",
							short_id(&existing),
							short_id(&msg.round_id)
						);
						effective_round_id = existing;
					},
					None => {
						rounds.insert(
							msg.round_id.clone(),
							ExpansionRound {
								round_id: msg.round_id.clone(),
								target: msg.target.clone(),
								started_at: now,
								state: RoundState::Nominating,
								trigger_event: "joined".to_string(),
								trigger_reporter: sender.to_string(),
								nominations: HashMap::new(),
								elected: None,
								recommended_size_sats: 0,
								quality_score: msg.quality_score,
								expires_at: now + ROUND_EXPIRE_SECONDS,
								completed_at: 0,
								result: String::new(),
								hold_id: None,
							},
						);
						effective_round_id = msg.round_id.clone();
						drop(rounds);
						outbound =
							self.auto_nominate(&effective_round_id, now, snapshot, peers)?;
					},
				}
			}
		}

		let mut rounds = self.rounds.lock().expect("lock poisoned");
		let round = rounds.get_mut(&effective_round_id).ok_or_else(|| {
			HiveError::new(HiveErrorCode::NotFound, "round vanished during merge")
		})?;
		if round.state != RoundState::Nominating {
			return Err(HiveError::new(
				HiveErrorCode::Stale,
				format!("state {} != nominating", round.state.as_str()),
			));
		}
		round.nominations.insert(
			msg.nominator.clone(),
			Nomination {
				nominator: msg.nominator.clone(),
				target: msg.target.clone(),
				timestamp: msg.timestamp,
				available_liquidity_sats: msg.available_liquidity_sats,
				quality_score: msg.quality_score,
				has_existing_channel: false,
				channel_count: msg.channel_count,
				reason: msg.reason.clone(),
			},
		);
		debug!(
			"nomination from {} in round {} ({} total)",
			short(&msg.nominator),
			short_id(&effective_round_id),
			round.nominations.len()
		);

		Ok(outbound)
	}

	/// Closes the nomination window: every participant scores the same
	/// nominations, so everyone agrees on the winner. If the winner is us we
	/// announce the election and the caller proceeds to open.
	pub fn elect_winner(
		&self, round_id: &str, now: u64, peers: &[String],
	) -> Result<(Option<String>, Vec<(String, HiveMessage)>, ExpansionAction), HiveError> {
		let (nominations, target, recommended, our_hold) = {
			let mut rounds = self.rounds.lock().expect("lock poisoned");
			let Some(round) = rounds.get_mut(round_id) else {
				return Ok((None, Vec::new(), ExpansionAction::None));
			};
			if round.state != RoundState::Nominating {
				return Ok((None, Vec::new(), ExpansionAction::None));
			}
			if round.nominations.len() < MIN_NOMINATIONS_FOR_ELECTION {
				round.state = RoundState::Cancelled;
				round.result = format!("insufficient_nominations ({})", round.nominations.len());
				let hold = round.hold_id.clone();
				drop(rounds);
				if let Some(hold_id) = hold {
					self.store.release_budget_hold(&hold_id)?;
				}
				return Ok((None, Vec::new(), ExpansionAction::None));
			}
			round.state = RoundState::Electing;
			(
				round.nominations.values().cloned().collect::<Vec<_>>(),
				round.target.clone(),
				round.recommended_size_sats,
				round.hold_id.clone(),
			)
		};

		let recent_opens = self.recent_opens.lock().expect("lock poisoned").clone();
		let mut scored: Vec<(f64, &Nomination)> = nominations
			.iter()
			.map(|nom| (score_nomination(nom, &recent_opens, now), nom))
			.collect();
		// Highest score first; equal scores fall back to the smaller pubkey
		// so every member elects the same winner.
		scored.sort_by(|a, b| {
			b.0.partial_cmp(&a.0)
				.unwrap_or(std::cmp::Ordering::Equal)
				.then_with(|| a.1.nominator.cmp(&b.1.nominator))
		});
		let (winner_score, winner) = (scored[0].0, scored[0].1.clone());

		let channel_size = if recommended > 0 {
			recommended.min(winner.available_liquidity_sats)
		} else {
			winner.available_liquidity_sats
		};

		{
			let mut rounds = self.rounds.lock().expect("lock poisoned");
			if let Some(round) = rounds.get_mut(round_id) {
				round.state = RoundState::Elected;
				round.elected = Some(winner.nominator.clone());
				round.recommended_size_sats = channel_size;
				round.result = format!("elected with score {:.3}", winner_score);
			}
		}
		info!(
			"round {} elected {} (score {:.3})",
			short_id(round_id),
			short(&winner.nominator),
			winner_score
		);

		self.recent_opens.lock().expect("lock poisoned").insert(winner.nominator.clone(), now);
		self.cooldowns
			.lock()
			.expect("lock poisoned")
			.insert(target.clone(), now + COOLDOWN_SECONDS);

		let mut outbound = Vec::new();
		let mut action = ExpansionAction::None;
		if winner.nominator == self.our_id {
			let mut elect = ExpansionElect {
				round_id: round_id.to_string(),
				target: target.clone(),
				elected: winner.nominator.clone(),
				channel_size_sats: channel_size,
				reporter: self.our_id.clone(),
				timestamp: now,
				signature: String::new(),
			};
			elect.signature = self
				.gateway
				.sign_message(now, &signing::expansion_elect(&elect))
				.map_err(HiveError::from)?;
			let msg = HiveMessage::ExpansionElect(elect);
			outbound.extend(peers.iter().map(|peer| (peer.clone(), msg.clone())));
			action = ExpansionAction::OpenChannel {
				round_id: round_id.to_string(),
				target,
				channel_size_sats: channel_size,
			};
		} else if let Some(hold_id) = our_hold {
			// We lost; the reservation goes back to the budget.
			self.store.release_budget_hold(&hold_id)?;
		}

		Ok((Some(winner.nominator), outbound, action))
	}

	/// An EXPANSION_ELECT arrived: the round is decided. Losers release
	/// their holds; the elected member is told to open.
	pub fn handle_elect(
		&self, _sender: &str, msg: &ExpansionElect, now: u64,
	) -> Result<ExpansionAction, HiveError> {
		let verified = self
			.gateway
			.verify_signature(now, &signing::expansion_elect(msg), &msg.signature, &msg.reporter)
			.map_err(HiveError::from)?;
		if !verified {
			return Err(HiveError::new(HiveErrorCode::SignatureMismatch, "election"));
		}

		let our_hold = {
			let mut rounds = self.rounds.lock().expect("lock poisoned");
			match rounds.get_mut(&msg.round_id) {
				Some(round) => {
					if round.state.is_terminal() {
						return Ok(ExpansionAction::None);
					}
					round.state = RoundState::Completed;
					round.elected = Some(msg.elected.clone());
					round.recommended_size_sats = msg.channel_size_sats;
					round.completed_at = now;
					round.result = format!("elected:{}", short(&msg.elected));
					round.hold_id.clone()
				},
				None => None,
			}
		};
		self.cooldowns
			.lock()
			.expect("lock poisoned")
			.insert(msg.target.clone(), now + COOLDOWN_SECONDS);

		if msg.elected == self.our_id {
			return Ok(ExpansionAction::OpenChannel {
				round_id: msg.round_id.clone(),
				target: msg.target.clone(),
				channel_size_sats: msg.channel_size_sats,
			});
		}
		if let Some(hold_id) = our_hold {
			self.store.release_budget_hold(&hold_id)?;
		}
		Ok(ExpansionAction::None)
	}

	/// Cooperative cancellation of a round we may be tracking.
	pub fn handle_cancelled(
		&self, _sender: &str, msg: &ExpansionCancelled, now: u64,
	) -> Result<(), HiveError> {
		let verified = self
			.gateway
			.verify_signature(
				now,
				&signing::expansion_cancelled(msg),
				&msg.signature,
				&msg.reporter,
			)
			.map_err(HiveError::from)?;
		if !verified {
			return Err(HiveError::new(HiveErrorCode::SignatureMismatch, "cancellation"));
		}
		self.cancel_round(&msg.round_id, &msg.reason)?;
		Ok(())
	}

	pub fn cancel_round(&self, round_id: &str, reason: &str) -> Result<(), HiveError> {
		let hold = {
			let mut rounds = self.rounds.lock().expect("lock poisoned");
			match rounds.get_mut(round_id) {
				Some(round) if round.state.is_active() => {
					round.state = RoundState::Cancelled;
					round.result =
						if reason.is_empty() { "cancelled".into() } else { reason.to_string() };
					round.hold_id.clone()
				},
				_ => None,
			}
		};
		if let Some(hold_id) = hold {
			self.store.release_budget_hold(&hold_id)?;
		}
		Ok(())
	}

	/// Marks the elected open as done and consumes our hold.
	pub fn complete_round(
		&self, round_id: &str, success: bool, result: &str, now: u64,
	) -> Result<(), HiveError> {
		let hold = {
			let mut rounds = self.rounds.lock().expect("lock poisoned");
			match rounds.get_mut(round_id) {
				Some(round) => {
					round.state = RoundState::Completed;
					round.completed_at = now;
					round.result = if result.is_empty() {
						if success { "success".into() } else { "failed".into() }
					} else {
						result.to_string()
					};
					round.hold_id.take()
				},
				None => None,
			}
		};
		if let Some(hold_id) = hold {
			if success {
				self.store.consume_budget_hold(&hold_id, "channel_open", now)?;
			} else {
				self.store.release_budget_hold(&hold_id)?;
			}
		}
		Ok(())
	}

	// =========================================================================
	// Scheduler hooks and queries
	// =========================================================================

	/// Rounds whose nomination window has closed and want an election.
	pub fn rounds_ready_for_election(&self, now: u64) -> Vec<String> {
		let rounds = self.rounds.lock().expect("lock poisoned");
		rounds
			.values()
			.filter(|r| {
				r.state == RoundState::Nominating
					&& now >= r.started_at + NOMINATION_WINDOW_SECONDS
			})
			.map(|r| r.round_id.clone())
			.collect()
	}

	/// Expires overdue rounds (releasing holds) and drops old terminal ones.
	pub fn cleanup_expired_rounds(&self, now: u64) -> Result<u32, HiveError> {
		let mut holds = Vec::new();
		let mut expired = 0;
		{
			let mut rounds = self.rounds.lock().expect("lock poisoned");
			for round in rounds.values_mut() {
				if round.state.is_active() && round.expires_at > 0 && now > round.expires_at {
					round.state = RoundState::Expired;
					round.result = "expired".to_string();
					expired += 1;
					if let Some(hold_id) = round.hold_id.take() {
						holds.push(hold_id);
					}
				}
			}
			let cutoff = now.saturating_sub(TERMINAL_ROUND_RETENTION_SECONDS);
			rounds.retain(|_, r| !(r.state.is_terminal() && r.started_at < cutoff));
		}
		for hold_id in holds {
			self.store.release_budget_hold(&hold_id)?;
		}
		if expired > 0 {
			debug!("expired {} expansion rounds", expired);
		}
		Ok(expired)
	}

	pub fn get_round(&self, round_id: &str) -> Option<ExpansionRound> {
		self.rounds.lock().expect("lock poisoned").get(round_id).cloned()
	}

	pub fn get_active_rounds(&self) -> Vec<ExpansionRound> {
		self.rounds
			.lock()
			.expect("lock poisoned")
			.values()
			.filter(|r| r.state.is_active())
			.cloned()
			.collect()
	}

	pub fn get_rounds_for_target(&self, target: &str) -> Vec<ExpansionRound> {
		self.rounds
			.lock()
			.expect("lock poisoned")
			.values()
			.filter(|r| r.target == target)
			.cloned()
			.collect()
	}
}

/// The shared election score. Deterministic in its inputs so every member
/// ranks nominations identically.
fn score_nomination(nom: &Nomination, recent_opens: &HashMap<String, u64>, now: u64) -> f64 {
	// Liquidity on a log scale, saturating at 1 BTC.
	let liquidity_btc = nom.available_liquidity_sats as f64 / 100_000_000.0;
	let liquidity_score = (0.3 + 0.7 * liquidity_btc.max(0.01).log10() / 2.0).min(1.0);

	// Fewer channels score higher, for load spreading.
	let channel_score = (1.0 - nom.channel_count as f64 / 70.0).max(0.3);

	// Members that have not opened recently are favoured, for fairness.
	let last_open = recent_opens.get(&nom.nominator).copied().unwrap_or(0);
	let since = now.saturating_sub(last_open);
	let recent_score = if since >= 86400 {
		1.0
	} else if since >= 3600 {
		0.7
	} else {
		0.3
	};

	liquidity_score * WEIGHT_LIQUIDITY
		+ channel_score * WEIGHT_CHANNEL_COUNT
		+ recent_score * WEIGHT_RECENT_OPENS
		+ nom.quality_score * WEIGHT_QUALITY_AGREEMENT
}

fn random_hex(bytes: usize) -> String {
	let mut buf = vec![0u8; bytes];
	rand::thread_rng().fill_bytes(&mut buf);
	buf.iter().map(|b| format!("{:02x}", b)).collect()
}

fn short_id(id: &str) -> &str {
	&id[..id.len().min(12)]
}

fn short(peer_id: &str) -> &str {
	&peer_id[..peer_id.len().min(16)]
}
