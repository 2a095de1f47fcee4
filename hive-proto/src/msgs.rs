// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The hive message catalog.
//!
//! Each message type has a payload struct, a validation predicate on shape
//! and bounds, a per-sender rate limit, and (for gossip topics) a maximum
//! accepted age. Signing strings are defined in [`crate::signing`].

use serde::{Deserialize, Serialize};

use crate::{is_hex32, is_node_id};

/// TYPE byte values, grouped by subsystem.
pub mod msg_type {
	pub const HELLO: u8 = 1;
	pub const CHALLENGE: u8 = 2;
	pub const ATTEST: u8 = 3;
	pub const WELCOME: u8 = 4;

	pub const PROMOTION_REQUEST: u8 = 10;
	pub const VOUCH: u8 = 11;
	pub const PROMOTION: u8 = 12;
	pub const BAN_PROPOSE: u8 = 13;
	pub const BAN_VOTE: u8 = 14;

	pub const INTENT: u8 = 20;
	pub const INTENT_ABORT: u8 = 21;

	pub const EXPANSION_NOMINATE: u8 = 30;
	pub const EXPANSION_ELECT: u8 = 31;
	pub const EXPANSION_CANCELLED: u8 = 32;

	pub const PEER_AVAILABLE: u8 = 40;
	pub const FEE_REPORT: u8 = 41;
	pub const LIQUIDITY_NEED: u8 = 42;
	pub const ROUTE_PROBE: u8 = 43;
	pub const PEER_REPUTATION: u8 = 44;

	pub const SETTLEMENT_PROPOSE: u8 = 50;
	pub const SETTLEMENT_READY: u8 = 51;
	pub const SETTLEMENT_EXECUTED: u8 = 52;

	pub const SPLICE_INIT_REQUEST: u8 = 60;
	pub const SPLICE_INIT_RESPONSE: u8 = 61;
	pub const SPLICE_UPDATE: u8 = 62;
	pub const SPLICE_SIGNED: u8 = 63;
	pub const SPLICE_ABORT: u8 = 64;
}

/// A per-sender rate limit: at most `count` messages per `window_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
	pub count: u32,
	pub window_seconds: u64,
}

pub const PEER_AVAILABLE_RATE_LIMIT: RateLimit = RateLimit { count: 30, window_seconds: 3600 };
pub const FEE_REPORT_RATE_LIMIT: RateLimit = RateLimit { count: 12, window_seconds: 3600 };
pub const LIQUIDITY_NEED_RATE_LIMIT: RateLimit = RateLimit { count: 12, window_seconds: 3600 };
pub const ROUTE_PROBE_RATE_LIMIT: RateLimit = RateLimit { count: 30, window_seconds: 3600 };
pub const PEER_REPUTATION_RATE_LIMIT: RateLimit = RateLimit { count: 10, window_seconds: 3600 };
pub const INTENT_RATE_LIMIT: RateLimit = RateLimit { count: 20, window_seconds: 3600 };
pub const EXPANSION_RATE_LIMIT: RateLimit = RateLimit { count: 20, window_seconds: 3600 };
pub const MEMBERSHIP_RATE_LIMIT: RateLimit = RateLimit { count: 10, window_seconds: 3600 };
pub const SETTLEMENT_RATE_LIMIT: RateLimit = RateLimit { count: 10, window_seconds: 3600 };
pub const SPLICE_INIT_REQUEST_RATE_LIMIT: RateLimit = RateLimit { count: 4, window_seconds: 3600 };
pub const SPLICE_MESSAGE_RATE_LIMIT: RateLimit = RateLimit { count: 60, window_seconds: 3600 };
pub const HANDSHAKE_RATE_LIMIT: RateLimit = RateLimit { count: 6, window_seconds: 3600 };

/// Challenge nonces expire after this many seconds.
pub const CHALLENGE_TTL_SECONDS: u64 = 60;
/// A vouch older than this is not counted toward a promotion quorum.
pub const VOUCH_TTL_SECONDS: u64 = 3600;
/// Hard cap on vouches carried by a single PROMOTION message.
pub const MAX_VOUCHES_IN_PROMOTION: usize = 50;
/// Gossip reports older than this are refused on arrival.
pub const GOSSIP_MAX_AGE_SECONDS: u64 = 6 * 3600;
/// Reputation reports stay part of the aggregate for this long.
pub const REPUTATION_STALENESS_SECONDS: u64 = 168 * 3600;
/// Warning codes accepted in reputation reports.
pub const VALID_WARNINGS: [&str; 5] =
	["force_closer", "fee_instability", "htlc_failures", "extended_offline", "uncooperative_close"];
/// At most this many warnings per report.
pub const MAX_WARNINGS_COUNT: usize = 5;

const MAX_REASON_LEN: usize = 256;
const MAX_PATH_HOPS: usize = 20;
const MAX_CAPABILITIES: usize = 16;

/// The action class an intent lock reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
	ChannelOpen,
	Rebalance,
	BanPeer,
}

impl IntentType {
	pub fn as_str(&self) -> &'static str {
		match self {
			IntentType::ChannelOpen => "channel_open",
			IntentType::Rebalance => "rebalance",
			IntentType::BanPeer => "ban_peer",
		}
	}
}

impl std::fmt::Display for IntentType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A candidate announcing itself to a member it has a channel with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
	pub pubkey: String,
	pub timestamp: u64,
}

/// A member answering a HELLO with a fresh nonce to sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
	/// The challenging member.
	pub member: String,
	/// 32 random bytes, hex encoded. Single use.
	pub nonce: String,
	pub ttl_seconds: u64,
	pub timestamp: u64,
}

/// The candidate's signed manifest binding its key to the challenge nonce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attest {
	pub pubkey: String,
	pub nonce: String,
	pub timestamp: u64,
	pub capabilities: Vec<String>,
	pub signature: String,
}

/// Admission notice: the candidate is now a neophyte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Welcome {
	/// The admitting member.
	pub member: String,
	/// The admitted candidate.
	pub pubkey: String,
	pub tier: String,
	pub timestamp: u64,
}

/// A neophyte asking to be considered for promotion to member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRequest {
	pub target: String,
	pub request_id: String,
	pub timestamp: u64,
	pub signature: String,
}

/// A member's signed endorsement of a promotion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vouch {
	pub target: String,
	pub request_id: String,
	pub voucher: String,
	pub timestamp: u64,
	pub signature: String,
}

/// A promotion claim carrying the vouches that form its quorum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
	pub target: String,
	pub request_id: String,
	pub timestamp: u64,
	pub vouches: Vec<Vouch>,
}

/// A proposal to ban a peer, opened for member voting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanPropose {
	pub proposal_id: String,
	pub target: String,
	pub proposer: String,
	pub reason: String,
	pub expires_at: u64,
	pub timestamp: u64,
	pub signature: String,
}

/// A signed ballot on a ban proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanVote {
	pub proposal_id: String,
	pub voter: String,
	/// "approve" or "reject".
	pub vote: String,
	pub timestamp: u64,
	pub signature: String,
}

/// A signed reservation of a cooperative action on a shared target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAnnounce {
	pub intent_type: IntentType,
	pub target: String,
	pub initiator: String,
	pub timestamp: u64,
	pub signature: String,
}

/// The loser of an intent tie-break withdrawing its reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAbort {
	pub intent_type: IntentType,
	pub target: String,
	pub initiator: String,
	pub timestamp: u64,
	pub signature: String,
}

/// A member self-nominating to open a channel in an expansion round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionNominate {
	pub round_id: String,
	pub target: String,
	pub nominator: String,
	pub timestamp: u64,
	pub available_liquidity_sats: u64,
	pub quality_score: f64,
	pub has_existing_channel: bool,
	pub channel_count: u32,
	pub reason: String,
	pub signature: String,
}

/// The election result for an expansion round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionElect {
	pub round_id: String,
	pub target: String,
	pub elected: String,
	pub channel_size_sats: u64,
	pub reporter: String,
	pub timestamp: u64,
	pub signature: String,
}

/// Cooperative cancellation of an expansion round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpansionCancelled {
	pub round_id: String,
	pub target: String,
	pub reporter: String,
	pub reason: String,
	pub timestamp: u64,
	pub signature: String,
}

/// An observation about an external peer: a channel opened, closed, or a
/// forwarding summary. `remote_close` events make the peer a candidate for
/// cooperative expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerEventReport {
	pub reporter: String,
	/// The external peer the event is about.
	pub peer: String,
	pub event_type: String,
	pub timestamp: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub channel_id: Option<String>,
	pub capacity_sats: u64,
	pub duration_days: u32,
	pub total_revenue_sats: u64,
	pub net_pnl_sats: i64,
	pub forward_count: u32,
	pub forward_volume_sats: u64,
	pub our_fee_ppm: u32,
	pub their_fee_ppm: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub opener: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub closer: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
	pub signature: String,
}

/// Fee intelligence about traffic through an external peer, plus the
/// reporter's own period totals used for settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeReport {
	pub reporter: String,
	/// The external peer the observation is about.
	pub target: String,
	pub timestamp: u64,
	pub our_fee_ppm: u32,
	pub their_fee_ppm: u32,
	pub forward_count: u32,
	pub forward_volume_sats: u64,
	pub revenue_sats: u64,
	/// "inbound", "outbound" or "balanced".
	pub flow_direction: String,
	pub utilization_pct: f64,
	pub days_observed: u32,
	/// Reporter's total fees earned in the current settlement period.
	pub fees_earned_sats: u64,
	/// Reporter's total channel capacity.
	pub capacity_sats: u64,
	/// Reporter's self-reported uptime percentage, 0-100.
	pub uptime_pct: u32,
	/// The reporter's BOLT12 offer for settlement payments.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub bolt12_offer: Option<String>,
	pub signature: String,
}

/// A member advertising a directional liquidity imbalance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityNeedMsg {
	pub reporter: String,
	/// "inbound", "outbound" or "rebalance".
	pub need_type: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub target: Option<String>,
	pub amount_sats: u64,
	/// "critical", "high", "medium" or "low".
	pub urgency: String,
	pub max_fee_ppm: u32,
	pub reason: String,
	pub current_balance_pct: f64,
	pub timestamp: u64,
	pub signature: String,
}

/// A route probe observation shared with the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteProbe {
	pub reporter: String,
	pub destination: String,
	pub path: Vec<String>,
	pub timestamp: u64,
	pub success: bool,
	pub latency_ms: u32,
	pub failure_reason: String,
	pub failure_hop: i32,
	pub estimated_capacity_sats: u64,
	pub total_fee_ppm: u32,
	pub amount_probed_sats: u64,
	pub signature: String,
}

/// A reputation report about an external peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationReport {
	pub reporter: String,
	pub peer: String,
	pub timestamp: u64,
	/// 0.0 to 1.0.
	pub uptime_pct: f64,
	pub response_time_ms: u32,
	pub force_close_count: u32,
	/// 0.0 to 1.0.
	pub fee_stability: f64,
	/// 0.0 to 1.0.
	pub htlc_success_rate: f64,
	pub channel_age_days: u32,
	pub total_routed_sats: u64,
	pub warnings: Vec<String>,
	pub observation_days: u32,
	pub signature: String,
}

/// A proposed settlement for a revenue period, identified by its data hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementPropose {
	pub proposal_id: String,
	/// ISO week, `YYYY-Www`.
	pub period: String,
	pub proposer: String,
	pub data_hash: String,
	pub total_fees_sats: u64,
	pub member_count: u32,
	pub timestamp: u64,
	pub signature: String,
}

/// A vote that the voter independently computed the same data hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReady {
	pub proposal_id: String,
	pub voter: String,
	pub data_hash: String,
	pub timestamp: u64,
	pub signature: String,
}

/// Confirmation that a member executed its side of a settlement. Net-zero
/// members send this with a zero amount to confirm participation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementExecuted {
	pub proposal_id: String,
	pub executor: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub payment_hash: Option<String>,
	pub amount_paid_sats: u64,
	pub timestamp: u64,
	pub signature: String,
}

/// A request to start a coordinated splice on a shared channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpliceInitRequest {
	pub session_id: String,
	pub initiator: String,
	pub peer: String,
	pub channel_id: String,
	/// "splice_in" or "splice_out".
	pub splice_type: String,
	pub amount_sats: u64,
	pub timestamp: u64,
	pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpliceInitResponse {
	pub session_id: String,
	pub responder: String,
	pub accept: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reject_reason: Option<String>,
	pub timestamp: u64,
	pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpliceUpdate {
	pub session_id: String,
	pub sender: String,
	pub psbt: String,
	pub timestamp: u64,
	pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpliceSigned {
	pub session_id: String,
	pub sender: String,
	pub psbt: String,
	pub timestamp: u64,
	pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpliceAbort {
	pub session_id: String,
	pub sender: String,
	pub reason: String,
	pub timestamp: u64,
	pub signature: String,
}

/// Every message the hive protocol can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum HiveMessage {
	Hello(Hello),
	Challenge(Challenge),
	Attest(Attest),
	Welcome(Welcome),
	PromotionRequest(PromotionRequest),
	Vouch(Vouch),
	Promotion(Promotion),
	BanPropose(BanPropose),
	BanVote(BanVote),
	Intent(IntentAnnounce),
	IntentAbort(IntentAbort),
	ExpansionNominate(ExpansionNominate),
	ExpansionElect(ExpansionElect),
	ExpansionCancelled(ExpansionCancelled),
	PeerAvailable(PeerEventReport),
	FeeReport(FeeReport),
	LiquidityNeed(LiquidityNeedMsg),
	RouteProbe(RouteProbe),
	PeerReputation(ReputationReport),
	SettlementPropose(SettlementPropose),
	SettlementReady(SettlementReady),
	SettlementExecuted(SettlementExecuted),
	SpliceInitRequest(SpliceInitRequest),
	SpliceInitResponse(SpliceInitResponse),
	SpliceUpdate(SpliceUpdate),
	SpliceSigned(SpliceSigned),
	SpliceAbort(SpliceAbort),
	/// Valid magic, unknown TYPE byte. Recorded but otherwise ignored.
	Unknown { msg_type: u8 },
}

impl HiveMessage {
	pub fn msg_type(&self) -> u8 {
		use msg_type::*;
		match self {
			HiveMessage::Hello(_) => HELLO,
			HiveMessage::Challenge(_) => CHALLENGE,
			HiveMessage::Attest(_) => ATTEST,
			HiveMessage::Welcome(_) => WELCOME,
			HiveMessage::PromotionRequest(_) => PROMOTION_REQUEST,
			HiveMessage::Vouch(_) => VOUCH,
			HiveMessage::Promotion(_) => PROMOTION,
			HiveMessage::BanPropose(_) => BAN_PROPOSE,
			HiveMessage::BanVote(_) => BAN_VOTE,
			HiveMessage::Intent(_) => INTENT,
			HiveMessage::IntentAbort(_) => INTENT_ABORT,
			HiveMessage::ExpansionNominate(_) => EXPANSION_NOMINATE,
			HiveMessage::ExpansionElect(_) => EXPANSION_ELECT,
			HiveMessage::ExpansionCancelled(_) => EXPANSION_CANCELLED,
			HiveMessage::PeerAvailable(_) => PEER_AVAILABLE,
			HiveMessage::FeeReport(_) => FEE_REPORT,
			HiveMessage::LiquidityNeed(_) => LIQUIDITY_NEED,
			HiveMessage::RouteProbe(_) => ROUTE_PROBE,
			HiveMessage::PeerReputation(_) => PEER_REPUTATION,
			HiveMessage::SettlementPropose(_) => SETTLEMENT_PROPOSE,
			HiveMessage::SettlementReady(_) => SETTLEMENT_READY,
			HiveMessage::SettlementExecuted(_) => SETTLEMENT_EXECUTED,
			HiveMessage::SpliceInitRequest(_) => SPLICE_INIT_REQUEST,
			HiveMessage::SpliceInitResponse(_) => SPLICE_INIT_RESPONSE,
			HiveMessage::SpliceUpdate(_) => SPLICE_UPDATE,
			HiveMessage::SpliceSigned(_) => SPLICE_SIGNED,
			HiveMessage::SpliceAbort(_) => SPLICE_ABORT,
			HiveMessage::Unknown { msg_type } => *msg_type,
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			HiveMessage::Hello(_) => "hello",
			HiveMessage::Challenge(_) => "challenge",
			HiveMessage::Attest(_) => "attest",
			HiveMessage::Welcome(_) => "welcome",
			HiveMessage::PromotionRequest(_) => "promotion_request",
			HiveMessage::Vouch(_) => "vouch",
			HiveMessage::Promotion(_) => "promotion",
			HiveMessage::BanPropose(_) => "ban_propose",
			HiveMessage::BanVote(_) => "ban_vote",
			HiveMessage::Intent(_) => "intent",
			HiveMessage::IntentAbort(_) => "intent_abort",
			HiveMessage::ExpansionNominate(_) => "expansion_nominate",
			HiveMessage::ExpansionElect(_) => "expansion_elect",
			HiveMessage::ExpansionCancelled(_) => "expansion_cancelled",
			HiveMessage::PeerAvailable(_) => "peer_available",
			HiveMessage::FeeReport(_) => "fee_report",
			HiveMessage::LiquidityNeed(_) => "liquidity_need",
			HiveMessage::RouteProbe(_) => "route_probe",
			HiveMessage::PeerReputation(_) => "peer_reputation",
			HiveMessage::SettlementPropose(_) => "settlement_propose",
			HiveMessage::SettlementReady(_) => "settlement_ready",
			HiveMessage::SettlementExecuted(_) => "settlement_executed",
			HiveMessage::SpliceInitRequest(_) => "splice_init_request",
			HiveMessage::SpliceInitResponse(_) => "splice_init_response",
			HiveMessage::SpliceUpdate(_) => "splice_update",
			HiveMessage::SpliceSigned(_) => "splice_signed",
			HiveMessage::SpliceAbort(_) => "splice_abort",
			HiveMessage::Unknown { .. } => "unknown",
		}
	}

	/// The pubkey this message claims to come from, used for identity
	/// binding against the transport sender. `None` for unknown frames.
	pub fn claimed_sender(&self) -> Option<&str> {
		match self {
			HiveMessage::Hello(m) => Some(&m.pubkey),
			HiveMessage::Challenge(m) => Some(&m.member),
			HiveMessage::Attest(m) => Some(&m.pubkey),
			HiveMessage::Welcome(m) => Some(&m.member),
			HiveMessage::PromotionRequest(m) => Some(&m.target),
			HiveMessage::Vouch(m) => Some(&m.voucher),
			HiveMessage::Promotion(m) => Some(&m.target),
			HiveMessage::BanPropose(m) => Some(&m.proposer),
			HiveMessage::BanVote(m) => Some(&m.voter),
			HiveMessage::Intent(m) => Some(&m.initiator),
			HiveMessage::IntentAbort(m) => Some(&m.initiator),
			HiveMessage::ExpansionNominate(m) => Some(&m.nominator),
			HiveMessage::ExpansionElect(m) => Some(&m.reporter),
			HiveMessage::ExpansionCancelled(m) => Some(&m.reporter),
			HiveMessage::PeerAvailable(m) => Some(&m.reporter),
			HiveMessage::FeeReport(m) => Some(&m.reporter),
			HiveMessage::LiquidityNeed(m) => Some(&m.reporter),
			HiveMessage::RouteProbe(m) => Some(&m.reporter),
			HiveMessage::PeerReputation(m) => Some(&m.reporter),
			HiveMessage::SettlementPropose(m) => Some(&m.proposer),
			HiveMessage::SettlementReady(m) => Some(&m.voter),
			HiveMessage::SettlementExecuted(m) => Some(&m.executor),
			HiveMessage::SpliceInitRequest(m) => Some(&m.initiator),
			HiveMessage::SpliceInitResponse(m) => Some(&m.responder),
			HiveMessage::SpliceUpdate(m) => Some(&m.sender),
			HiveMessage::SpliceSigned(m) => Some(&m.sender),
			HiveMessage::SpliceAbort(m) => Some(&m.sender),
			HiveMessage::Unknown { .. } => None,
		}
	}

	/// The per-sender rate limit for this message type, if limited.
	pub fn rate_limit(&self) -> Option<RateLimit> {
		match self {
			HiveMessage::Hello(_) | HiveMessage::Challenge(_) => Some(HANDSHAKE_RATE_LIMIT),
			HiveMessage::Attest(_) | HiveMessage::Welcome(_) => Some(HANDSHAKE_RATE_LIMIT),
			HiveMessage::PromotionRequest(_)
			| HiveMessage::Vouch(_)
			| HiveMessage::Promotion(_)
			| HiveMessage::BanPropose(_)
			| HiveMessage::BanVote(_) => Some(MEMBERSHIP_RATE_LIMIT),
			HiveMessage::Intent(_) | HiveMessage::IntentAbort(_) => Some(INTENT_RATE_LIMIT),
			HiveMessage::ExpansionNominate(_)
			| HiveMessage::ExpansionElect(_)
			| HiveMessage::ExpansionCancelled(_) => Some(EXPANSION_RATE_LIMIT),
			HiveMessage::PeerAvailable(_) => Some(PEER_AVAILABLE_RATE_LIMIT),
			HiveMessage::FeeReport(_) => Some(FEE_REPORT_RATE_LIMIT),
			HiveMessage::LiquidityNeed(_) => Some(LIQUIDITY_NEED_RATE_LIMIT),
			HiveMessage::RouteProbe(_) => Some(ROUTE_PROBE_RATE_LIMIT),
			HiveMessage::PeerReputation(_) => Some(PEER_REPUTATION_RATE_LIMIT),
			HiveMessage::SettlementPropose(_)
			| HiveMessage::SettlementReady(_)
			| HiveMessage::SettlementExecuted(_) => Some(SETTLEMENT_RATE_LIMIT),
			HiveMessage::SpliceInitRequest(_) => Some(SPLICE_INIT_REQUEST_RATE_LIMIT),
			HiveMessage::SpliceInitResponse(_)
			| HiveMessage::SpliceUpdate(_)
			| HiveMessage::SpliceSigned(_)
			| HiveMessage::SpliceAbort(_) => Some(SPLICE_MESSAGE_RATE_LIMIT),
			HiveMessage::Unknown { .. } => None,
		}
	}

	/// Maximum accepted age in seconds for the message's `timestamp` field,
	/// if the type is age-bounded.
	pub fn max_age_seconds(&self) -> Option<u64> {
		match self {
			HiveMessage::PeerAvailable(_)
			| HiveMessage::FeeReport(_)
			| HiveMessage::LiquidityNeed(_)
			| HiveMessage::RouteProbe(_)
			| HiveMessage::PeerReputation(_) => Some(GOSSIP_MAX_AGE_SECONDS),
			_ => None,
		}
	}

	pub fn serialize_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
		match self {
			HiveMessage::Hello(m) => serde_json::to_vec(m),
			HiveMessage::Challenge(m) => serde_json::to_vec(m),
			HiveMessage::Attest(m) => serde_json::to_vec(m),
			HiveMessage::Welcome(m) => serde_json::to_vec(m),
			HiveMessage::PromotionRequest(m) => serde_json::to_vec(m),
			HiveMessage::Vouch(m) => serde_json::to_vec(m),
			HiveMessage::Promotion(m) => serde_json::to_vec(m),
			HiveMessage::BanPropose(m) => serde_json::to_vec(m),
			HiveMessage::BanVote(m) => serde_json::to_vec(m),
			HiveMessage::Intent(m) => serde_json::to_vec(m),
			HiveMessage::IntentAbort(m) => serde_json::to_vec(m),
			HiveMessage::ExpansionNominate(m) => serde_json::to_vec(m),
			HiveMessage::ExpansionElect(m) => serde_json::to_vec(m),
			HiveMessage::ExpansionCancelled(m) => serde_json::to_vec(m),
			HiveMessage::PeerAvailable(m) => serde_json::to_vec(m),
			HiveMessage::FeeReport(m) => serde_json::to_vec(m),
			HiveMessage::LiquidityNeed(m) => serde_json::to_vec(m),
			HiveMessage::RouteProbe(m) => serde_json::to_vec(m),
			HiveMessage::PeerReputation(m) => serde_json::to_vec(m),
			HiveMessage::SettlementPropose(m) => serde_json::to_vec(m),
			HiveMessage::SettlementReady(m) => serde_json::to_vec(m),
			HiveMessage::SettlementExecuted(m) => serde_json::to_vec(m),
			HiveMessage::SpliceInitRequest(m) => serde_json::to_vec(m),
			HiveMessage::SpliceInitResponse(m) => serde_json::to_vec(m),
			HiveMessage::SpliceUpdate(m) => serde_json::to_vec(m),
			HiveMessage::SpliceSigned(m) => serde_json::to_vec(m),
			HiveMessage::SpliceAbort(m) => serde_json::to_vec(m),
			HiveMessage::Unknown { .. } => serde_json::to_vec(&serde_json::json!({})),
		}
	}

	pub fn deserialize_payload(msg_type: u8, payload: &[u8]) -> Result<Self, serde_json::Error> {
		use msg_type::*;
		Ok(match msg_type {
			HELLO => HiveMessage::Hello(serde_json::from_slice(payload)?),
			CHALLENGE => HiveMessage::Challenge(serde_json::from_slice(payload)?),
			ATTEST => HiveMessage::Attest(serde_json::from_slice(payload)?),
			WELCOME => HiveMessage::Welcome(serde_json::from_slice(payload)?),
			PROMOTION_REQUEST => HiveMessage::PromotionRequest(serde_json::from_slice(payload)?),
			VOUCH => HiveMessage::Vouch(serde_json::from_slice(payload)?),
			PROMOTION => HiveMessage::Promotion(serde_json::from_slice(payload)?),
			BAN_PROPOSE => HiveMessage::BanPropose(serde_json::from_slice(payload)?),
			BAN_VOTE => HiveMessage::BanVote(serde_json::from_slice(payload)?),
			INTENT => HiveMessage::Intent(serde_json::from_slice(payload)?),
			INTENT_ABORT => HiveMessage::IntentAbort(serde_json::from_slice(payload)?),
			EXPANSION_NOMINATE => HiveMessage::ExpansionNominate(serde_json::from_slice(payload)?),
			EXPANSION_ELECT => HiveMessage::ExpansionElect(serde_json::from_slice(payload)?),
			EXPANSION_CANCELLED => {
				HiveMessage::ExpansionCancelled(serde_json::from_slice(payload)?)
			},
			PEER_AVAILABLE => HiveMessage::PeerAvailable(serde_json::from_slice(payload)?),
			FEE_REPORT => HiveMessage::FeeReport(serde_json::from_slice(payload)?),
			LIQUIDITY_NEED => HiveMessage::LiquidityNeed(serde_json::from_slice(payload)?),
			ROUTE_PROBE => HiveMessage::RouteProbe(serde_json::from_slice(payload)?),
			PEER_REPUTATION => HiveMessage::PeerReputation(serde_json::from_slice(payload)?),
			SETTLEMENT_PROPOSE => HiveMessage::SettlementPropose(serde_json::from_slice(payload)?),
			SETTLEMENT_READY => HiveMessage::SettlementReady(serde_json::from_slice(payload)?),
			SETTLEMENT_EXECUTED => {
				HiveMessage::SettlementExecuted(serde_json::from_slice(payload)?)
			},
			SPLICE_INIT_REQUEST => HiveMessage::SpliceInitRequest(serde_json::from_slice(payload)?),
			SPLICE_INIT_RESPONSE => {
				HiveMessage::SpliceInitResponse(serde_json::from_slice(payload)?)
			},
			SPLICE_UPDATE => HiveMessage::SpliceUpdate(serde_json::from_slice(payload)?),
			SPLICE_SIGNED => HiveMessage::SpliceSigned(serde_json::from_slice(payload)?),
			SPLICE_ABORT => HiveMessage::SpliceAbort(serde_json::from_slice(payload)?),
			other => HiveMessage::Unknown { msg_type: other },
		})
	}

	/// Validates payload shape and bounds. Messages failing validation are
	/// dropped without touching any state.
	pub fn validate(&self) -> Result<(), &'static str> {
		match self {
			HiveMessage::Hello(m) => {
				check_node_id(&m.pubkey)?;
				Ok(())
			},
			HiveMessage::Challenge(m) => {
				check_node_id(&m.member)?;
				if m.nonce.len() != 64 || !m.nonce.bytes().all(|b| b.is_ascii_hexdigit()) {
					return Err("bad nonce");
				}
				if m.ttl_seconds == 0 || m.ttl_seconds > 600 {
					return Err("bad ttl");
				}
				Ok(())
			},
			HiveMessage::Attest(m) => {
				check_node_id(&m.pubkey)?;
				if m.nonce.len() != 64 {
					return Err("bad nonce");
				}
				if m.capabilities.len() > MAX_CAPABILITIES {
					return Err("too many capabilities");
				}
				check_signature(&m.signature)
			},
			HiveMessage::Welcome(m) => {
				check_node_id(&m.member)?;
				check_node_id(&m.pubkey)?;
				match m.tier.as_str() {
					"neophyte" | "member" | "admin" => Ok(()),
					_ => Err("bad tier"),
				}
			},
			HiveMessage::PromotionRequest(m) => {
				check_node_id(&m.target)?;
				check_request_id(&m.request_id)?;
				check_signature(&m.signature)
			},
			HiveMessage::Vouch(m) => validate_vouch(m),
			HiveMessage::Promotion(m) => {
				check_node_id(&m.target)?;
				check_request_id(&m.request_id)?;
				if m.vouches.is_empty() || m.vouches.len() > MAX_VOUCHES_IN_PROMOTION {
					return Err("vouch count out of bounds");
				}
				for v in &m.vouches {
					validate_vouch(v)?;
				}
				Ok(())
			},
			HiveMessage::BanPropose(m) => {
				check_request_id(&m.proposal_id)?;
				check_node_id(&m.target)?;
				check_node_id(&m.proposer)?;
				if m.reason.is_empty() || m.reason.len() > MAX_REASON_LEN {
					return Err("bad reason");
				}
				if m.expires_at <= m.timestamp {
					return Err("expires before proposed");
				}
				check_signature(&m.signature)
			},
			HiveMessage::BanVote(m) => {
				check_request_id(&m.proposal_id)?;
				check_node_id(&m.voter)?;
				match m.vote.as_str() {
					"approve" | "reject" => {},
					_ => return Err("bad vote"),
				}
				check_signature(&m.signature)
			},
			HiveMessage::Intent(m) => {
				check_node_id(&m.target)?;
				check_node_id(&m.initiator)?;
				check_signature(&m.signature)
			},
			HiveMessage::IntentAbort(m) => {
				check_node_id(&m.target)?;
				check_node_id(&m.initiator)?;
				check_signature(&m.signature)
			},
			HiveMessage::ExpansionNominate(m) => {
				check_request_id(&m.round_id)?;
				check_node_id(&m.target)?;
				check_node_id(&m.nominator)?;
				check_unit(m.quality_score)?;
				if m.reason.len() > MAX_REASON_LEN {
					return Err("bad reason");
				}
				check_signature(&m.signature)
			},
			HiveMessage::ExpansionElect(m) => {
				check_request_id(&m.round_id)?;
				check_node_id(&m.target)?;
				check_node_id(&m.elected)?;
				check_node_id(&m.reporter)?;
				check_signature(&m.signature)
			},
			HiveMessage::ExpansionCancelled(m) => {
				check_request_id(&m.round_id)?;
				check_node_id(&m.target)?;
				check_node_id(&m.reporter)?;
				if m.reason.len() > MAX_REASON_LEN {
					return Err("bad reason");
				}
				check_signature(&m.signature)
			},
			HiveMessage::PeerAvailable(m) => {
				check_node_id(&m.reporter)?;
				check_node_id(&m.peer)?;
				if m.event_type.is_empty() || m.event_type.len() > 32 {
					return Err("bad event type");
				}
				check_signature(&m.signature)
			},
			HiveMessage::FeeReport(m) => {
				check_node_id(&m.reporter)?;
				check_node_id(&m.target)?;
				match m.flow_direction.as_str() {
					"inbound" | "outbound" | "balanced" => {},
					_ => return Err("bad flow direction"),
				}
				if !(0.0..=1.0).contains(&m.utilization_pct) {
					return Err("utilization out of range");
				}
				if m.uptime_pct > 100 {
					return Err("uptime out of range");
				}
				if let Some(offer) = &m.bolt12_offer {
					if !offer.starts_with("lno1") {
						return Err("bad bolt12 offer");
					}
				}
				check_signature(&m.signature)
			},
			HiveMessage::LiquidityNeed(m) => {
				check_node_id(&m.reporter)?;
				if let Some(target) = &m.target {
					check_node_id(target)?;
				}
				match m.need_type.as_str() {
					"inbound" | "outbound" | "rebalance" => {},
					_ => return Err("bad need type"),
				}
				match m.urgency.as_str() {
					"critical" | "high" | "medium" | "low" => {},
					_ => return Err("bad urgency"),
				}
				if m.amount_sats == 0 {
					return Err("zero amount");
				}
				check_unit(m.current_balance_pct)?;
				check_signature(&m.signature)
			},
			HiveMessage::RouteProbe(m) => {
				check_node_id(&m.reporter)?;
				check_node_id(&m.destination)?;
				if m.path.is_empty() || m.path.len() > MAX_PATH_HOPS {
					return Err("bad path length");
				}
				for hop in &m.path {
					check_node_id(hop)?;
				}
				check_signature(&m.signature)
			},
			HiveMessage::PeerReputation(m) => {
				check_node_id(&m.reporter)?;
				check_node_id(&m.peer)?;
				check_unit(m.uptime_pct)?;
				check_unit(m.fee_stability)?;
				check_unit(m.htlc_success_rate)?;
				if m.warnings.len() > MAX_WARNINGS_COUNT {
					return Err("too many warnings");
				}
				for w in &m.warnings {
					if !VALID_WARNINGS.contains(&w.as_str()) {
						return Err("unknown warning code");
					}
				}
				check_signature(&m.signature)
			},
			HiveMessage::SettlementPropose(m) => {
				check_request_id(&m.proposal_id)?;
				check_period(&m.period)?;
				check_node_id(&m.proposer)?;
				if !is_hex32(&m.data_hash) {
					return Err("bad data hash");
				}
				if m.member_count == 0 {
					return Err("zero member count");
				}
				check_signature(&m.signature)
			},
			HiveMessage::SettlementReady(m) => {
				check_request_id(&m.proposal_id)?;
				check_node_id(&m.voter)?;
				if !is_hex32(&m.data_hash) {
					return Err("bad data hash");
				}
				check_signature(&m.signature)
			},
			HiveMessage::SettlementExecuted(m) => {
				check_request_id(&m.proposal_id)?;
				check_node_id(&m.executor)?;
				if let Some(h) = &m.payment_hash {
					if !is_hex32(h) {
						return Err("bad payment hash");
					}
				}
				check_signature(&m.signature)
			},
			HiveMessage::SpliceInitRequest(m) => {
				check_request_id(&m.session_id)?;
				check_node_id(&m.initiator)?;
				check_node_id(&m.peer)?;
				match m.splice_type.as_str() {
					"splice_in" | "splice_out" => {},
					_ => return Err("bad splice type"),
				}
				if m.amount_sats == 0 {
					return Err("zero amount");
				}
				check_signature(&m.signature)
			},
			HiveMessage::SpliceInitResponse(m) => {
				check_request_id(&m.session_id)?;
				check_node_id(&m.responder)?;
				check_signature(&m.signature)
			},
			HiveMessage::SpliceUpdate(m) => {
				check_request_id(&m.session_id)?;
				check_node_id(&m.sender)?;
				if m.psbt.is_empty() {
					return Err("empty psbt");
				}
				check_signature(&m.signature)
			},
			HiveMessage::SpliceSigned(m) => {
				check_request_id(&m.session_id)?;
				check_node_id(&m.sender)?;
				if m.psbt.is_empty() {
					return Err("empty psbt");
				}
				check_signature(&m.signature)
			},
			HiveMessage::SpliceAbort(m) => {
				check_request_id(&m.session_id)?;
				check_node_id(&m.sender)?;
				if m.reason.len() > MAX_REASON_LEN {
					return Err("bad reason");
				}
				check_signature(&m.signature)
			},
			HiveMessage::Unknown { .. } => Ok(()),
		}
	}
}

fn validate_vouch(v: &Vouch) -> Result<(), &'static str> {
	check_node_id(&v.target)?;
	check_node_id(&v.voucher)?;
	check_request_id(&v.request_id)?;
	check_signature(&v.signature)
}

fn check_node_id(s: &str) -> Result<(), &'static str> {
	if is_node_id(s) {
		Ok(())
	} else {
		Err("bad node id")
	}
}

fn check_request_id(s: &str) -> Result<(), &'static str> {
	if !s.is_empty() && s.len() <= 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
		Ok(())
	} else {
		Err("bad id")
	}
}

fn check_signature(s: &str) -> Result<(), &'static str> {
	// zbase-encoded signatures from `signmessage` are ~104 chars.
	if !s.is_empty() && s.len() <= 200 {
		Ok(())
	} else {
		Err("bad signature")
	}
}

fn check_unit(v: f64) -> Result<(), &'static str> {
	if (0.0..=1.0).contains(&v) {
		Ok(())
	} else {
		Err("value out of unit range")
	}
}

fn check_period(s: &str) -> Result<(), &'static str> {
	// YYYY-Www, e.g. 2025-W03.
	let bytes = s.as_bytes();
	if bytes.len() == 8
		&& bytes[..4].iter().all(|b| b.is_ascii_digit())
		&& bytes[4] == b'-'
		&& bytes[5] == b'W'
		&& bytes[6].is_ascii_digit()
		&& bytes[7].is_ascii_digit()
	{
		Ok(())
	} else {
		Err("bad period")
	}
}
