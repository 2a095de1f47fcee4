// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Distributed mutual exclusion via the announce-wait-commit protocol.
//!
//! A node announces a signed intent for a `(type, target)` pair, waits out a
//! hold window collecting competing announcements, then either commits or
//! aborts. Conflicts resolve deterministically: the lexicographically
//! smallest initiator pubkey wins, so no clocks are involved.

use std::sync::Arc;

use hive_proto::msgs::{HiveMessage, IntentAbort, IntentAnnounce, IntentType};
use hive_proto::signing;
use log::{debug, info};

use crate::config::ConfigSnapshot;
use crate::error::{HiveError, HiveErrorCode};
use crate::gateway::Gateway;
use crate::store::intents::{IntentRecord, IntentStatus};
use crate::store::Store;

pub struct IntentManager {
	store: Arc<Store>,
	gateway: Arc<Gateway>,
	our_id: String,
}

impl IntentManager {
	pub fn new(store: Arc<Store>, gateway: Arc<Gateway>, our_id: String) -> Self {
		IntentManager { store, gateway, our_id }
	}

	/// Announces an intent for `(intent_type, target)`. At most one pending
	/// intent per pair may be owned by this node.
	pub fn announce(
		&self, intent_type: IntentType, target: &str, now: u64, snapshot: &ConfigSnapshot,
		targets: &[String],
	) -> Result<(i64, Vec<(String, HiveMessage)>), HiveError> {
		let conflicts = self.store.get_conflicting_intents(intent_type, target)?;
		if conflicts.iter().any(|intent| intent.initiator == self.our_id) {
			return Err(HiveError::new(
				HiveErrorCode::InvalidRequest,
				format!("pending intent already exists for {}:{}", intent_type, short(target)),
			));
		}

		let mut announce = IntentAnnounce {
			intent_type,
			target: target.to_string(),
			initiator: self.our_id.clone(),
			timestamp: now,
			signature: String::new(),
		};
		announce.signature = self
			.gateway
			.sign_message(now, &signing::intent(&announce))
			.map_err(HiveError::from)?;

		let id = self.store.create_intent(
			intent_type,
			target,
			&self.our_id,
			now,
			now + snapshot.intent_expire_seconds,
			Some(&announce.signature),
		)?;
		debug!("announced intent {} for {}:{}", id, intent_type, short(target));

		let msg = HiveMessage::Intent(announce);
		Ok((id, targets.iter().map(|peer| (peer.clone(), msg.clone())).collect()))
	}

	/// A competing announcement arrived. Record it; when it beats our own
	/// pending intent for the same pair we abort immediately rather than
	/// waiting out the hold.
	pub fn handle_intent(
		&self, _sender: &str, msg: &IntentAnnounce, now: u64, snapshot: &ConfigSnapshot,
		targets: &[String],
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		let verified = self
			.gateway
			.verify_signature(now, &signing::intent(msg), &msg.signature, &msg.initiator)
			.map_err(HiveError::from)?;
		if !verified {
			return Err(HiveError::new(HiveErrorCode::SignatureMismatch, "intent announce"));
		}

		let conflicts = self.store.get_conflicting_intents(msg.intent_type, &msg.target)?;
		if !conflicts.iter().any(|intent| intent.initiator == msg.initiator) {
			self.store.create_intent(
				msg.intent_type,
				&msg.target,
				&msg.initiator,
				msg.timestamp,
				now + snapshot.intent_expire_seconds,
				Some(&msg.signature),
			)?;
		}

		let Some(ours) = conflicts.iter().find(|intent| intent.initiator == self.our_id) else {
			return Ok(Vec::new());
		};

		if msg.initiator < self.our_id {
			// We lost the tie-break. Not an operator-visible error.
			info!(
				"conflict on {}:{} lost to {}",
				msg.intent_type,
				short(&msg.target),
				short(&msg.initiator)
			);
			self.store.update_intent_status(ours.id, IntentStatus::Aborted)?;
			return self.abort_broadcast(ours, now, targets);
		}

		Ok(Vec::new())
	}

	/// The loser withdraws its announcement.
	pub fn handle_abort(
		&self, _sender: &str, msg: &IntentAbort, now: u64,
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		let verified = self
			.gateway
			.verify_signature(now, &signing::intent_abort(msg), &msg.signature, &msg.initiator)
			.map_err(HiveError::from)?;
		if !verified {
			return Err(HiveError::new(HiveErrorCode::SignatureMismatch, "intent abort"));
		}

		let conflicts = self.store.get_conflicting_intents(msg.intent_type, &msg.target)?;
		for intent in conflicts {
			if intent.initiator == msg.initiator {
				self.store.update_intent_status(intent.id, IntentStatus::Aborted)?;
			}
		}
		Ok(Vec::new())
	}

	/// Resolves our pending intents whose hold window has elapsed. Winners
	/// transition to committed and are returned for execution; losers abort.
	pub fn resolve_ready(
		&self, now: u64, snapshot: &ConfigSnapshot, targets: &[String],
	) -> Result<(Vec<IntentRecord>, Vec<(String, HiveMessage)>), HiveError> {
		let ready =
			self.store.get_pending_intents_ready(&self.our_id, now, snapshot.intent_hold_seconds)?;
		let mut committed = Vec::new();
		let mut outbound = Vec::new();

		for intent in ready {
			let conflicts =
				self.store.get_conflicting_intents(intent.intent_type, &intent.target)?;
			let beaten = conflicts
				.iter()
				.any(|other| other.initiator != self.our_id && other.initiator < self.our_id);

			if beaten {
				self.store.update_intent_status(intent.id, IntentStatus::Aborted)?;
				outbound.extend(self.abort_broadcast(&intent, now, targets)?);
			} else {
				self.store.update_intent_status(intent.id, IntentStatus::Committed)?;
				info!(
					"committed intent {} for {}:{}",
					intent.id,
					intent.intent_type,
					short(&intent.target)
				);
				let mut record = intent;
				record.status = IntentStatus::Committed;
				committed.push(record);
			}
		}

		Ok((committed, outbound))
	}

	/// Scheduler job: expire pending intents past their TTL.
	pub fn reap_expired(&self, now: u64) -> Result<u32, HiveError> {
		self.store.cleanup_expired_intents(now)
	}

	fn abort_broadcast(
		&self, intent: &IntentRecord, now: u64, targets: &[String],
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		let mut abort = IntentAbort {
			intent_type: intent.intent_type,
			target: intent.target.clone(),
			initiator: self.our_id.clone(),
			timestamp: now,
			signature: String::new(),
		};
		abort.signature = self
			.gateway
			.sign_message(now, &signing::intent_abort(&abort))
			.map_err(HiveError::from)?;
		let msg = HiveMessage::IntentAbort(abort);
		Ok(targets.iter().map(|peer| (peer.clone(), msg.clone())).collect())
	}
}

fn short(peer_id: &str) -> &str {
	&peer_id[..peer_id.len().min(16)]
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::test_snapshot;
	use crate::gateway::test_util::MockHostRpc;

	fn node_id(tag: u8) -> String {
		format!("02{:02x}{}", tag, "ab".repeat(31))
	}

	fn manager(our_id: &str) -> (IntentManager, Arc<Store>) {
		let store = Arc::new(Store::open_in_memory().unwrap());
		let gateway = Arc::new(Gateway::new(Arc::new(MockHostRpc::new(our_id))));
		(IntentManager::new(Arc::clone(&store), gateway, our_id.to_string()), store)
	}

	fn announce_from(initiator: &str, target: &str, now: u64) -> IntentAnnounce {
		let mut msg = IntentAnnounce {
			intent_type: IntentType::ChannelOpen,
			target: target.to_string(),
			initiator: initiator.to_string(),
			timestamp: now,
			signature: String::new(),
		};
		msg.signature = MockHostRpc::sign_for(initiator, &signing::intent(&msg));
		msg
	}

	#[test]
	fn test_duplicate_announce_rejected() {
		let me = node_id(2);
		let (manager, _) = manager(&me);
		let snap = test_snapshot();
		let target = node_id(9);
		manager.announce(IntentType::ChannelOpen, &target, 100, &snap, &[]).unwrap();
		let err =
			manager.announce(IntentType::ChannelOpen, &target, 101, &snap, &[]).unwrap_err();
		assert_eq!(err.code, HiveErrorCode::InvalidRequest);
	}

	#[test]
	fn test_smaller_pubkey_wins_tie() {
		// We are 02bb..., the rival is 02aa...: rival wins.
		let me = node_id(0xbb);
		let rival = node_id(0xaa);
		let (manager, store) = manager(&me);
		let snap = test_snapshot();
		let target = node_id(9);
		let peers = vec![rival.clone()];

		let (id, _) =
			manager.announce(IntentType::ChannelOpen, &target, 100, &snap, &peers).unwrap();
		let out = manager
			.handle_intent(&rival, &announce_from(&rival, &target, 100), 101, &snap, &peers)
			.unwrap();

		// We aborted immediately and told the fleet.
		assert_eq!(store.get_intent(id).unwrap().unwrap().status, IntentStatus::Aborted);
		assert!(matches!(out[0].1, HiveMessage::IntentAbort(_)));
	}

	#[test]
	fn test_larger_pubkey_keeps_intent_and_commits() {
		// We are 02aa..., the rival is 02bb...: we win after the hold.
		let me = node_id(0xaa);
		let rival = node_id(0xbb);
		let (manager, store) = manager(&me);
		let snap = test_snapshot();
		let target = node_id(9);
		let peers = vec![rival.clone()];

		let (id, _) =
			manager.announce(IntentType::ChannelOpen, &target, 100, &snap, &peers).unwrap();
		let out = manager
			.handle_intent(&rival, &announce_from(&rival, &target, 100), 101, &snap, &peers)
			.unwrap();
		assert!(out.is_empty());
		assert_eq!(store.get_intent(id).unwrap().unwrap().status, IntentStatus::Pending);

		// Before the hold elapses nothing resolves.
		let (committed, _) = manager.resolve_ready(100, &snap, &peers).unwrap();
		assert!(committed.is_empty());

		let (committed, aborts) =
			manager.resolve_ready(100 + snap.intent_hold_seconds, &snap, &peers).unwrap();
		assert_eq!(committed.len(), 1);
		assert_eq!(committed[0].id, id);
		assert!(aborts.is_empty());
		assert_eq!(store.get_intent(id).unwrap().unwrap().status, IntentStatus::Committed);
	}

	#[test]
	fn test_exactly_one_committed_across_pair() {
		// Both nodes see both announcements; only the smaller key commits.
		let a_id = node_id(0xaa);
		let b_id = node_id(0xbb);
		let (a, a_store) = manager(&a_id);
		let (b, b_store) = manager(&b_id);
		let snap = test_snapshot();
		let target = node_id(9);

		let (a_intent, _) =
			a.announce(IntentType::ChannelOpen, &target, 100, &snap, &[b_id.clone()]).unwrap();
		let (b_intent, _) =
			b.announce(IntentType::ChannelOpen, &target, 100, &snap, &[a_id.clone()]).unwrap();

		a.handle_intent(&b_id, &announce_from(&b_id, &target, 100), 100, &snap, &[]).unwrap();
		let b_out =
			b.handle_intent(&a_id, &announce_from(&a_id, &target, 100), 100, &snap, &[]).unwrap();

		// B lost immediately and broadcast an abort; feed it to A.
		assert_eq!(
			b_store.get_intent(b_intent).unwrap().unwrap().status,
			IntentStatus::Aborted
		);
		let resolve_time = 100 + snap.intent_hold_seconds;
		let (a_committed, _) = a.resolve_ready(resolve_time, &snap, &[]).unwrap();
		assert_eq!(a_committed.len(), 1);

		let (b_committed, _) = b.resolve_ready(resolve_time, &snap, &[]).unwrap();
		assert!(b_committed.is_empty());
		assert_eq!(
			a_store.get_intent(a_intent).unwrap().unwrap().status,
			IntentStatus::Committed
		);
	}

	#[test]
	fn test_abort_marks_remote_intent() {
		let me = node_id(0xaa);
		let rival = node_id(0xbb);
		let (manager, store) = manager(&me);
		let snap = test_snapshot();
		let target = node_id(9);

		manager
			.handle_intent(&rival, &announce_from(&rival, &target, 100), 100, &snap, &[])
			.unwrap();
		let mut abort = IntentAbort {
			intent_type: IntentType::ChannelOpen,
			target: target.clone(),
			initiator: rival.clone(),
			timestamp: 101,
			signature: String::new(),
		};
		abort.signature = MockHostRpc::sign_for(&rival, &signing::intent_abort(&abort));
		manager.handle_abort(&rival, &abort, 101).unwrap();

		assert!(store
			.get_conflicting_intents(IntentType::ChannelOpen, &target)
			.unwrap()
			.is_empty());
	}

	#[test]
	fn test_resolution_waits_for_hold_window() {
		let me = node_id(0xaa);
		let (manager, _) = manager(&me);
		let snap = test_snapshot();
		manager.announce(IntentType::Rebalance, &node_id(9), 100, &snap, &[]).unwrap();

		let (committed, _) =
			manager.resolve_ready(100 + snap.intent_hold_seconds - 1, &snap, &[]).unwrap();
		assert!(committed.is_empty());
	}
}
