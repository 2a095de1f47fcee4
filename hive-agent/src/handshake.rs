// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Authenticated join: channel-as-proof-of-stake plus challenge-response
//! over the node's signing key.
//!
//! Candidate side: idle → hello_sent → challenged → attested → welcomed.
//! Member side: idle → challenge_sent → welcomed. No state is stored for a
//! candidate until its ATTEST verifies; failures drop the exchange outright.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use hive_proto::msgs::{
	Attest, Challenge, Hello, HiveMessage, Welcome, CHALLENGE_TTL_SECONDS,
};
use hive_proto::signing;
use log::{debug, info};
use rand::RngCore;

use crate::error::{HiveError, HiveErrorCode};
use crate::gateway::Gateway;
use crate::store::{Store, Tier};

/// Capabilities advertised in our ATTEST manifest.
const OUR_CAPABILITIES: [&str; 3] = ["expansion", "settlement", "splice"];

#[derive(Debug, Clone)]
struct IssuedNonce {
	nonce: String,
	issued_at: u64,
	used: bool,
}

pub struct HandshakeManager {
	store: Arc<Store>,
	gateway: Arc<Gateway>,
	our_id: String,
	/// Member side: nonces we issued, keyed by candidate pubkey.
	issued: Mutex<HashMap<String, IssuedNonce>>,
	/// Candidate side: members we sent HELLO to and await WELCOME from.
	pending_joins: Mutex<HashMap<String, u64>>,
}

impl HandshakeManager {
	pub fn new(store: Arc<Store>, gateway: Arc<Gateway>, our_id: String) -> Self {
		HandshakeManager {
			store,
			gateway,
			our_id,
			issued: Mutex::new(HashMap::new()),
			pending_joins: Mutex::new(HashMap::new()),
		}
	}

	/// Candidate side: start a join through `member_peer`.
	pub fn initiate_join(&self, member_peer: &str, now: u64) -> Vec<(String, HiveMessage)> {
		self.pending_joins.lock().expect("lock poisoned").insert(member_peer.to_string(), now);
		vec![(
			member_peer.to_string(),
			HiveMessage::Hello(Hello { pubkey: self.our_id.clone(), timestamp: now }),
		)]
	}

	/// Member side: a candidate announced itself. A direct channel with the
	/// candidate is its proof of stake; without one there is no challenge.
	pub fn handle_hello(
		&self, sender: &str, msg: &Hello, now: u64,
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		if self.store.is_banned(&msg.pubkey, now)? {
			return Err(HiveError::new(HiveErrorCode::NotMember, "candidate is banned"));
		}

		if let Some(member) = self.store.get_member(&msg.pubkey)? {
			// Already admitted; re-welcome so a restarted candidate settles.
			debug!("hello from existing {} member {}", member.tier.as_str(), short(sender));
			return Ok(vec![(
				sender.to_string(),
				HiveMessage::Welcome(Welcome {
					member: self.our_id.clone(),
					pubkey: msg.pubkey.clone(),
					tier: member.tier.as_str().to_string(),
					timestamp: now,
				}),
			)]);
		}

		if !self.gateway.has_channel_with(now, &msg.pubkey).map_err(HiveError::from)? {
			return Err(HiveError::new(
				HiveErrorCode::NotMember,
				"no direct channel with candidate",
			));
		}

		let mut nonce_bytes = [0u8; 32];
		rand::thread_rng().fill_bytes(&mut nonce_bytes);
		let nonce = hex_encode(&nonce_bytes);

		self.issued.lock().expect("lock poisoned").insert(
			msg.pubkey.clone(),
			IssuedNonce { nonce: nonce.clone(), issued_at: now, used: false },
		);

		debug!("challenging candidate {}", short(&msg.pubkey));
		Ok(vec![(
			sender.to_string(),
			HiveMessage::Challenge(Challenge {
				member: self.our_id.clone(),
				nonce,
				ttl_seconds: CHALLENGE_TTL_SECONDS,
				timestamp: now,
			}),
		)])
	}

	/// Candidate side: answer a challenge with our signed manifest.
	pub fn handle_challenge(
		&self, sender: &str, msg: &Challenge, now: u64,
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		if !self.pending_joins.lock().expect("lock poisoned").contains_key(sender) {
			return Err(HiveError::new(
				HiveErrorCode::InvalidPayload,
				"challenge from a member we did not greet",
			));
		}

		let mut attest = Attest {
			pubkey: self.our_id.clone(),
			nonce: msg.nonce.clone(),
			timestamp: now,
			capabilities: OUR_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
			signature: String::new(),
		};
		attest.signature =
			self.gateway.sign_message(now, &signing::attest(&attest)).map_err(HiveError::from)?;

		Ok(vec![(sender.to_string(), HiveMessage::Attest(attest))])
	}

	/// Member side: verify the manifest and admit the candidate.
	pub fn handle_attest(
		&self, sender: &str, msg: &Attest, now: u64,
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		{
			let mut issued = self.issued.lock().expect("lock poisoned");
			let entry = issued.get_mut(sender).ok_or_else(|| {
				HiveError::new(HiveErrorCode::InvalidPayload, "attest without challenge")
			})?;
			if entry.used {
				return Err(HiveError::new(HiveErrorCode::Stale, "nonce replay"));
			}
			if entry.nonce != msg.nonce {
				return Err(HiveError::new(HiveErrorCode::InvalidPayload, "nonce mismatch"));
			}
			if now > entry.issued_at + CHALLENGE_TTL_SECONDS {
				issued.remove(sender);
				return Err(HiveError::new(HiveErrorCode::Stale, "challenge expired"));
			}
			entry.used = true;
		}

		let signing_payload = signing::attest(msg);
		let verified = self
			.gateway
			.verify_signature(now, &signing_payload, &msg.signature, &msg.pubkey)
			.map_err(HiveError::from)?;
		if !verified {
			return Err(HiveError::new(
				HiveErrorCode::SignatureMismatch,
				"attest signature did not verify to the candidate key",
			));
		}

		self.store.add_member(&msg.pubkey, Tier::Neophyte, now)?;
		info!("admitted {} as neophyte", short(&msg.pubkey));

		Ok(vec![(
			sender.to_string(),
			HiveMessage::Welcome(Welcome {
				member: self.our_id.clone(),
				pubkey: msg.pubkey.clone(),
				tier: Tier::Neophyte.as_str().to_string(),
				timestamp: now,
			}),
		)])
	}

	/// Candidate side: the member admitted us. Record both sides locally so
	/// the membership registry is usable immediately.
	pub fn handle_welcome(
		&self, sender: &str, msg: &Welcome, now: u64,
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		if msg.pubkey != self.our_id {
			return Err(HiveError::new(HiveErrorCode::InvalidPayload, "welcome for someone else"));
		}
		if self.pending_joins.lock().expect("lock poisoned").remove(sender).is_none() {
			return Err(HiveError::new(
				HiveErrorCode::InvalidPayload,
				"welcome from a member we did not greet",
			));
		}

		let tier = Tier::from_str(&msg.tier).unwrap_or(Tier::Neophyte);
		self.store.add_member(&self.our_id, tier, now)?;
		self.store.add_member(sender, Tier::Member, now)?;
		info!("joined the hive through {}", short(sender));
		Ok(Vec::new())
	}

	/// Drops expired nonces. Scheduler job.
	pub fn prune_expired(&self, now: u64) {
		self.issued
			.lock()
			.expect("lock poisoned")
			.retain(|_, entry| now <= entry.issued_at + CHALLENGE_TTL_SECONDS);
		self.pending_joins
			.lock()
			.expect("lock poisoned")
			.retain(|_, started| now <= *started + 2 * CHALLENGE_TTL_SECONDS);
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

fn short(peer_id: &str) -> &str {
	&peer_id[..peer_id.len().min(16)]
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::gateway::test_util::MockHostRpc;

	fn node_id(tag: u8) -> String {
		format!("02{:02x}{}", tag, "ab".repeat(31))
	}

	struct Side {
		manager: HandshakeManager,
		store: Arc<Store>,
	}

	fn side(our_id: &str, channel_peer: Option<&str>) -> Side {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let mut rpc = MockHostRpc::new(our_id);
		if let Some(peer) = channel_peer {
			rpc = rpc.with_channel(peer, 1_000_000);
		}
		let gateway = Arc::new(Gateway::new(Arc::new(rpc)));
		Side {
			manager: HandshakeManager::new(Arc::clone(&store), gateway, our_id.to_string()),
			store,
		}
	}

	#[test]
	fn test_full_join_flow() {
		let a_id = node_id(1);
		let b_id = node_id(2);
		let a = side(&a_id, Some(&b_id));
		let b = side(&b_id, Some(&a_id));

		// A -> B: HELLO
		let hello = a.manager.initiate_join(&b_id, 100);
		let HiveMessage::Hello(hello_msg) = &hello[0].1 else { panic!("expected hello") };

		// B -> A: CHALLENGE
		let challenge = b.manager.handle_hello(&a_id, hello_msg, 101).unwrap();
		let HiveMessage::Challenge(challenge_msg) = &challenge[0].1 else {
			panic!("expected challenge")
		};
		assert_eq!(challenge_msg.ttl_seconds, 60);

		// A -> B: ATTEST
		let attest = a.manager.handle_challenge(&b_id, challenge_msg, 102).unwrap();
		let HiveMessage::Attest(attest_msg) = &attest[0].1 else { panic!("expected attest") };
		assert_eq!(
			signing::attest(attest_msg),
			format!("hive:attest:{}:{}:102", a_id, challenge_msg.nonce)
		);

		// B -> A: WELCOME, and B now knows A as neophyte.
		let welcome = b.manager.handle_attest(&a_id, attest_msg, 103).unwrap();
		let HiveMessage::Welcome(welcome_msg) = &welcome[0].1 else { panic!("expected welcome") };
		assert_eq!(b.store.get_member(&a_id).unwrap().unwrap().tier, Tier::Neophyte);

		// A records both sides.
		a.manager.handle_welcome(&b_id, welcome_msg, 104).unwrap();
		assert_eq!(a.store.get_member(&a_id).unwrap().unwrap().tier, Tier::Neophyte);
		assert_eq!(a.store.get_member(&b_id).unwrap().unwrap().tier, Tier::Member);
	}

	#[test]
	fn test_hello_without_channel_rejected() {
		let a_id = node_id(1);
		let b = side(&node_id(2), None);
		let hello = Hello { pubkey: a_id.clone(), timestamp: 100 };
		let err = b.manager.handle_hello(&a_id, &hello, 100).unwrap_err();
		assert_eq!(err.code, HiveErrorCode::NotMember);
		assert!(b.store.get_member(&a_id).unwrap().is_none());
	}

	#[test]
	fn test_banned_candidate_rejected() {
		let a_id = node_id(1);
		let b = side(&node_id(2), Some(&a_id));
		b.store
			.add_ban(&crate::store::BanRecord {
				peer_id: a_id.clone(),
				reason: "test".into(),
				reporter: node_id(2),
				signature: None,
				banned_at: 50,
				expires_at: None,
			})
			.unwrap();
		let hello = Hello { pubkey: a_id.clone(), timestamp: 100 };
		assert!(b.manager.handle_hello(&a_id, &hello, 100).is_err());
	}

	#[test]
	fn test_expired_nonce_rejected() {
		let a_id = node_id(1);
		let b_id = node_id(2);
		let a = side(&a_id, Some(&b_id));
		let b = side(&b_id, Some(&a_id));

		a.manager.initiate_join(&b_id, 100);
		let hello = Hello { pubkey: a_id.clone(), timestamp: 100 };
		let challenge = b.manager.handle_hello(&a_id, &hello, 100).unwrap();
		let HiveMessage::Challenge(challenge_msg) = &challenge[0].1 else { panic!() };
		let attest = a.manager.handle_challenge(&b_id, challenge_msg, 101).unwrap();
		let HiveMessage::Attest(attest_msg) = &attest[0].1 else { panic!() };

		let err = b
			.manager
			.handle_attest(&a_id, attest_msg, 100 + CHALLENGE_TTL_SECONDS + 1)
			.unwrap_err();
		assert_eq!(err.code, HiveErrorCode::Stale);
		assert!(b.store.get_member(&a_id).unwrap().is_none());
	}

	#[test]
	fn test_nonce_replay_detected() {
		let a_id = node_id(1);
		let b_id = node_id(2);
		let a = side(&a_id, Some(&b_id));
		let b = side(&b_id, Some(&a_id));

		a.manager.initiate_join(&b_id, 100);
		let hello = Hello { pubkey: a_id.clone(), timestamp: 100 };
		let challenge = b.manager.handle_hello(&a_id, &hello, 100).unwrap();
		let HiveMessage::Challenge(challenge_msg) = &challenge[0].1 else { panic!() };
		let attest = a.manager.handle_challenge(&b_id, challenge_msg, 101).unwrap();
		let HiveMessage::Attest(attest_msg) = &attest[0].1 else { panic!() };

		assert!(b.manager.handle_attest(&a_id, attest_msg, 102).is_ok());
		// Replaying the same signed attest is caught inside the TTL window.
		let err = b.manager.handle_attest(&a_id, attest_msg, 103).unwrap_err();
		assert_eq!(err.code, HiveErrorCode::Stale);
	}

	#[test]
	fn test_attest_signed_by_wrong_key_rejected() {
		let a_id = node_id(1);
		let b_id = node_id(2);
		let mallory = node_id(3);
		let a = side(&a_id, Some(&b_id));
		let b = side(&b_id, Some(&a_id));

		a.manager.initiate_join(&b_id, 100);
		let hello = Hello { pubkey: a_id.clone(), timestamp: 100 };
		let challenge = b.manager.handle_hello(&a_id, &hello, 100).unwrap();
		let HiveMessage::Challenge(challenge_msg) = &challenge[0].1 else { panic!() };

		let mut attest = Attest {
			pubkey: a_id.clone(),
			nonce: challenge_msg.nonce.clone(),
			timestamp: 101,
			capabilities: vec![],
			signature: String::new(),
		};
		// Mallory signs the canonical string; checkmessage recovers mallory's
		// key which does not match the claimed candidate.
		attest.signature = MockHostRpc::sign_for(&mallory, &signing::attest(&attest));

		let err = b.manager.handle_attest(&a_id, &attest, 102).unwrap_err();
		assert_eq!(err.code, HiveErrorCode::SignatureMismatch);
		assert!(b.store.get_member(&a_id).unwrap().is_none());
	}
}
