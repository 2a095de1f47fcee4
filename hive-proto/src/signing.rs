// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Canonical signing strings.
//!
//! Each signed message type commits to a fixed, ordered subset of its fields
//! rendered as `hive:<kind>:<field>:<field>:...`. The string is built from
//! the deserialized struct, never from raw JSON, so it is byte-stable no
//! matter how a sender ordered its payload keys.

use crate::msgs::*;

pub fn attest(m: &Attest) -> String {
	format!("hive:attest:{}:{}:{}", m.pubkey, m.nonce, m.timestamp)
}

pub fn promotion_request(m: &PromotionRequest) -> String {
	format!("hive:promotion_request:{}:{}:{}", m.target, m.request_id, m.timestamp)
}

pub fn vouch(m: &Vouch) -> String {
	format!("hive:vouch:{}:{}:{}", m.target, m.request_id, m.timestamp)
}

pub fn ban_propose(m: &BanPropose) -> String {
	format!(
		"hive:ban_propose:{}:{}:{}:{}:{}",
		m.proposal_id, m.target, m.proposer, m.expires_at, m.timestamp
	)
}

pub fn ban_vote(m: &BanVote) -> String {
	format!("hive:ban_vote:{}:{}:{}:{}", m.proposal_id, m.voter, m.vote, m.timestamp)
}

pub fn intent(m: &IntentAnnounce) -> String {
	format!("hive:intent:{}:{}:{}:{}", m.intent_type, m.target, m.initiator, m.timestamp)
}

pub fn intent_abort(m: &IntentAbort) -> String {
	format!("hive:intent_abort:{}:{}:{}:{}", m.intent_type, m.target, m.initiator, m.timestamp)
}

pub fn expansion_nominate(m: &ExpansionNominate) -> String {
	format!(
		"hive:expansion_nominate:{}:{}:{}:{}:{}",
		m.round_id, m.target, m.nominator, m.available_liquidity_sats, m.timestamp
	)
}

pub fn expansion_elect(m: &ExpansionElect) -> String {
	format!(
		"hive:expansion_elect:{}:{}:{}:{}:{}",
		m.round_id, m.target, m.elected, m.channel_size_sats, m.timestamp
	)
}

pub fn expansion_cancelled(m: &ExpansionCancelled) -> String {
	format!("hive:expansion_cancelled:{}:{}:{}:{}", m.round_id, m.target, m.reporter, m.timestamp)
}

pub fn peer_event(m: &PeerEventReport) -> String {
	format!("hive:peer_event:{}:{}:{}:{}", m.reporter, m.peer, m.event_type, m.timestamp)
}

pub fn fee_report(m: &FeeReport) -> String {
	format!(
		"hive:fee_report:{}:{}:{}:{}:{}",
		m.reporter, m.target, m.revenue_sats, m.fees_earned_sats, m.timestamp
	)
}

pub fn liquidity_need(m: &LiquidityNeedMsg) -> String {
	format!(
		"hive:liquidity_need:{}:{}:{}:{}:{}",
		m.reporter,
		m.need_type,
		m.target.as_deref().unwrap_or(""),
		m.amount_sats,
		m.timestamp
	)
}

pub fn route_probe(m: &RouteProbe) -> String {
	format!(
		"hive:route_probe:{}:{}:{}:{}",
		m.reporter,
		m.destination,
		if m.success { 1 } else { 0 },
		m.timestamp
	)
}

pub fn peer_reputation(m: &ReputationReport) -> String {
	format!("hive:peer_reputation:{}:{}:{}", m.reporter, m.peer, m.timestamp)
}

pub fn settlement_propose(m: &SettlementPropose) -> String {
	format!(
		"hive:settlement_propose:{}:{}:{}:{}:{}",
		m.proposal_id, m.period, m.proposer, m.data_hash, m.timestamp
	)
}

pub fn settlement_ready(m: &SettlementReady) -> String {
	format!(
		"hive:settlement_ready:{}:{}:{}:{}",
		m.proposal_id, m.voter, m.data_hash, m.timestamp
	)
}

pub fn settlement_executed(m: &SettlementExecuted) -> String {
	format!(
		"hive:settlement_executed:{}:{}:{}:{}:{}",
		m.proposal_id,
		m.executor,
		m.payment_hash.as_deref().unwrap_or(""),
		m.amount_paid_sats,
		m.timestamp
	)
}

pub fn splice_init_request(m: &SpliceInitRequest) -> String {
	format!(
		"hive:splice_init:{}:{}:{}:{}:{}:{}",
		m.session_id, m.initiator, m.peer, m.splice_type, m.amount_sats, m.timestamp
	)
}

pub fn splice_init_response(m: &SpliceInitResponse) -> String {
	format!(
		"hive:splice_init_response:{}:{}:{}:{}",
		m.session_id,
		m.responder,
		if m.accept { 1 } else { 0 },
		m.timestamp
	)
}

pub fn splice_update(m: &SpliceUpdate) -> String {
	format!("hive:splice_update:{}:{}:{}", m.session_id, m.sender, m.timestamp)
}

pub fn splice_signed(m: &SpliceSigned) -> String {
	format!("hive:splice_signed:{}:{}:{}", m.session_id, m.sender, m.timestamp)
}

pub fn splice_abort(m: &SpliceAbort) -> String {
	format!("hive:splice_abort:{}:{}:{}", m.session_id, m.sender, m.timestamp)
}

/// The signing string for any signed message, or `None` for message types
/// that carry no signature of their own.
pub fn signing_string(msg: &HiveMessage) -> Option<String> {
	match msg {
		HiveMessage::Attest(m) => Some(attest(m)),
		HiveMessage::PromotionRequest(m) => Some(promotion_request(m)),
		HiveMessage::Vouch(m) => Some(vouch(m)),
		HiveMessage::BanPropose(m) => Some(ban_propose(m)),
		HiveMessage::BanVote(m) => Some(ban_vote(m)),
		HiveMessage::Intent(m) => Some(intent(m)),
		HiveMessage::IntentAbort(m) => Some(intent_abort(m)),
		HiveMessage::ExpansionNominate(m) => Some(expansion_nominate(m)),
		HiveMessage::ExpansionElect(m) => Some(expansion_elect(m)),
		HiveMessage::ExpansionCancelled(m) => Some(expansion_cancelled(m)),
		HiveMessage::PeerAvailable(m) => Some(peer_event(m)),
		HiveMessage::FeeReport(m) => Some(fee_report(m)),
		HiveMessage::LiquidityNeed(m) => Some(liquidity_need(m)),
		HiveMessage::RouteProbe(m) => Some(route_probe(m)),
		HiveMessage::PeerReputation(m) => Some(peer_reputation(m)),
		HiveMessage::SettlementPropose(m) => Some(settlement_propose(m)),
		HiveMessage::SettlementReady(m) => Some(settlement_ready(m)),
		HiveMessage::SettlementExecuted(m) => Some(settlement_executed(m)),
		HiveMessage::SpliceInitRequest(m) => Some(splice_init_request(m)),
		HiveMessage::SpliceInitResponse(m) => Some(splice_init_response(m)),
		HiveMessage::SpliceUpdate(m) => Some(splice_update(m)),
		HiveMessage::SpliceSigned(m) => Some(splice_signed(m)),
		HiveMessage::SpliceAbort(m) => Some(splice_abort(m)),
		HiveMessage::Hello(_)
		| HiveMessage::Challenge(_)
		| HiveMessage::Welcome(_)
		| HiveMessage::Promotion(_)
		| HiveMessage::Unknown { .. } => None,
	}
}

/// The signature field carried inside the payload, if any.
pub fn carried_signature(msg: &HiveMessage) -> Option<&str> {
	match msg {
		HiveMessage::Attest(m) => Some(&m.signature),
		HiveMessage::PromotionRequest(m) => Some(&m.signature),
		HiveMessage::Vouch(m) => Some(&m.signature),
		HiveMessage::BanPropose(m) => Some(&m.signature),
		HiveMessage::BanVote(m) => Some(&m.signature),
		HiveMessage::Intent(m) => Some(&m.signature),
		HiveMessage::IntentAbort(m) => Some(&m.signature),
		HiveMessage::ExpansionNominate(m) => Some(&m.signature),
		HiveMessage::ExpansionElect(m) => Some(&m.signature),
		HiveMessage::ExpansionCancelled(m) => Some(&m.signature),
		HiveMessage::PeerAvailable(m) => Some(&m.signature),
		HiveMessage::FeeReport(m) => Some(&m.signature),
		HiveMessage::LiquidityNeed(m) => Some(&m.signature),
		HiveMessage::RouteProbe(m) => Some(&m.signature),
		HiveMessage::PeerReputation(m) => Some(&m.signature),
		HiveMessage::SettlementPropose(m) => Some(&m.signature),
		HiveMessage::SettlementReady(m) => Some(&m.signature),
		HiveMessage::SettlementExecuted(m) => Some(&m.signature),
		HiveMessage::SpliceInitRequest(m) => Some(&m.signature),
		HiveMessage::SpliceInitResponse(m) => Some(&m.signature),
		HiveMessage::SpliceUpdate(m) => Some(&m.signature),
		HiveMessage::SpliceSigned(m) => Some(&m.signature),
		HiveMessage::SpliceAbort(m) => Some(&m.signature),
		HiveMessage::Hello(_)
		| HiveMessage::Challenge(_)
		| HiveMessage::Welcome(_)
		| HiveMessage::Promotion(_)
		| HiveMessage::Unknown { .. } => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::msgs::msg_type;

	fn node_id(tag: u8) -> String {
		format!("02{:02x}{}", tag, "ef".repeat(31))
	}

	#[test]
	fn test_attest_signing_string_shape() {
		let m = Attest {
			pubkey: node_id(1),
			nonce: "ab".repeat(32),
			timestamp: 1700000000,
			capabilities: vec![],
			signature: String::new(),
		};
		assert_eq!(
			attest(&m),
			format!("hive:attest:{}:{}:1700000000", m.pubkey, m.nonce)
		);
	}

	#[test]
	fn test_signing_string_stable_under_field_reorder() {
		let id = node_id(3);
		let a = format!(
			r#"{{"target":"{id}","request_id":"abcd","voucher":"{id}","timestamp":7,"signature":"s"}}"#
		);
		let b = format!(
			r#"{{"signature":"s","timestamp":7,"voucher":"{id}","request_id":"abcd","target":"{id}"}}"#
		);
		let ma = HiveMessage::deserialize_payload(msg_type::VOUCH, a.as_bytes()).unwrap();
		let mb = HiveMessage::deserialize_payload(msg_type::VOUCH, b.as_bytes()).unwrap();
		assert_eq!(signing_string(&ma), signing_string(&mb));
		assert_eq!(signing_string(&ma).unwrap(), format!("hive:vouch:{id}:abcd:7"));
	}

	#[test]
	fn test_signed_types_carry_signature() {
		let m = HiveMessage::Vouch(Vouch {
			target: node_id(1),
			request_id: "ff".repeat(8),
			voucher: node_id(2),
			timestamp: 1,
			signature: "zb".repeat(40),
		});
		assert!(signing_string(&m).is_some());
		assert!(carried_signature(&m).is_some());
		let hello = HiveMessage::Hello(Hello { pubkey: node_id(1), timestamp: 1 });
		assert!(signing_string(&hello).is_none());
		assert!(carried_signature(&hello).is_none());
	}
}
