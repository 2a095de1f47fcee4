// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Coordinated splicing between hive members.
//!
//! The initiator proposes a splice on a shared channel; on acceptance the
//! parties walk the host's init → update → signed flow, echoing PSBTs over
//! the splice message set. Sessions time out cooperatively; an abort from
//! either side ends the session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use hive_proto::msgs::{
	HiveMessage, SpliceAbort, SpliceInitRequest, SpliceInitResponse, SpliceSigned, SpliceUpdate,
};
use hive_proto::signing;
use log::{debug, info, warn};
use rand::RngCore;

use crate::error::{HiveError, HiveErrorCode};
use crate::gateway::Gateway;
use crate::store::Store;

pub const SPLICE_SESSION_TIMEOUT_SECONDS: u64 = 600;

pub const REJECT_NOT_MEMBER: &str = "not_member";
pub const REJECT_NO_CHANNEL: &str = "no_channel";
pub const REJECT_NO_SPLICING: &str = "no_splicing";
pub const REJECT_SESSION_EXISTS: &str = "session_exists";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpliceState {
	InitSent,
	InitReceived,
	Updating,
	Signing,
	Completed,
	Aborted,
	Failed,
}

impl SpliceState {
	pub fn as_str(&self) -> &'static str {
		match self {
			SpliceState::InitSent => "init_sent",
			SpliceState::InitReceived => "init_received",
			SpliceState::Updating => "updating",
			SpliceState::Signing => "signing",
			SpliceState::Completed => "completed",
			SpliceState::Aborted => "aborted",
			SpliceState::Failed => "failed",
		}
	}

	pub fn is_live(&self) -> bool {
		!matches!(self, SpliceState::Completed | SpliceState::Aborted | SpliceState::Failed)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpliceSession {
	pub session_id: String,
	pub peer: String,
	pub channel_id: String,
	pub splice_type: String,
	pub amount_sats: u64,
	pub state: SpliceState,
	pub created_at: u64,
	pub updated_at: u64,
	pub result: String,
}

pub struct SpliceManager {
	store: Arc<Store>,
	gateway: Arc<Gateway>,
	our_id: String,
	sessions: Mutex<HashMap<String, SpliceSession>>,
}

impl SpliceManager {
	pub fn new(store: Arc<Store>, gateway: Arc<Gateway>, our_id: String) -> Self {
		SpliceManager { store, gateway, our_id, sessions: Mutex::new(HashMap::new()) }
	}

	/// Initiator side: propose a splice on our channel with `peer`.
	pub fn initiate(
		&self, peer: &str, channel_id: &str, splice_type: &str, amount_sats: u64, now: u64,
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		if self.store.get_member(peer)?.is_none() {
			return Err(HiveError::new(HiveErrorCode::NotMember, "splice peer not a member"));
		}
		{
			let sessions = self.sessions.lock().expect("lock poisoned");
			if sessions.values().any(|s| s.peer == peer && s.state.is_live()) {
				return Err(HiveError::new(
					HiveErrorCode::InvalidRequest,
					"live splice session with peer exists",
				));
			}
		}

		let session_id = random_hex(8);
		let mut request = SpliceInitRequest {
			session_id: session_id.clone(),
			initiator: self.our_id.clone(),
			peer: peer.to_string(),
			channel_id: channel_id.to_string(),
			splice_type: splice_type.to_string(),
			amount_sats,
			timestamp: now,
			signature: String::new(),
		};
		request.signature = self
			.gateway
			.sign_message(now, &signing::splice_init_request(&request))
			.map_err(HiveError::from)?;

		self.sessions.lock().expect("lock poisoned").insert(
			session_id.clone(),
			SpliceSession {
				session_id,
				peer: peer.to_string(),
				channel_id: channel_id.to_string(),
				splice_type: splice_type.to_string(),
				amount_sats,
				state: SpliceState::InitSent,
				created_at: now,
				updated_at: now,
				result: String::new(),
			},
		);

		Ok(vec![(peer.to_string(), HiveMessage::SpliceInitRequest(request))])
	}

	/// Responder side: accept when the channel exists and the host can
	/// splice; otherwise reject with a coded reason.
	pub fn handle_init_request(
		&self, sender: &str, msg: &SpliceInitRequest, now: u64,
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		let verified = self
			.gateway
			.verify_signature(
				now,
				&signing::splice_init_request(msg),
				&msg.signature,
				&msg.initiator,
			)
			.map_err(HiveError::from)?;
		if !verified {
			return Err(HiveError::new(HiveErrorCode::SignatureMismatch, "splice init"));
		}

		let reject_reason = if self.store.get_member(&msg.initiator)?.is_none() {
			Some(REJECT_NOT_MEMBER)
		} else if !self.gateway.has_channel_with(now, &msg.initiator).unwrap_or(false) {
			Some(REJECT_NO_CHANNEL)
		} else if !self.gateway.get_info(now).map(|i| i.supports_splicing).unwrap_or(false) {
			Some(REJECT_NO_SPLICING)
		} else if self
			.sessions
			.lock()
			.expect("lock poisoned")
			.values()
			.any(|s| s.peer == msg.initiator && s.state.is_live())
		{
			Some(REJECT_SESSION_EXISTS)
		} else {
			None
		};

		let accept = reject_reason.is_none();
		if accept {
			self.sessions.lock().expect("lock poisoned").insert(
				msg.session_id.clone(),
				SpliceSession {
					session_id: msg.session_id.clone(),
					peer: msg.initiator.clone(),
					channel_id: msg.channel_id.clone(),
					splice_type: msg.splice_type.clone(),
					amount_sats: msg.amount_sats,
					state: SpliceState::InitReceived,
					created_at: now,
					updated_at: now,
					result: String::new(),
				},
			);
			info!("accepted splice {} from {}", short_id(&msg.session_id), short(&msg.initiator));
		} else {
			debug!(
				"rejected splice {} from {}: {}",
				short_id(&msg.session_id),
				short(&msg.initiator),
				reject_reason.unwrap_or("")
			);
		}

		let mut response = SpliceInitResponse {
			session_id: msg.session_id.clone(),
			responder: self.our_id.clone(),
			accept,
			reject_reason: reject_reason.map(|r| r.to_string()),
			timestamp: now,
			signature: String::new(),
		};
		response.signature = self
			.gateway
			.sign_message(now, &signing::splice_init_response(&response))
			.map_err(HiveError::from)?;

		Ok(vec![(sender.to_string(), HiveMessage::SpliceInitResponse(response))])
	}

	/// Initiator side: on acceptance, drive the host's splice_init and send
	/// the resulting PSBT across.
	pub fn handle_init_response(
		&self, sender: &str, msg: &SpliceInitResponse, now: u64,
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		let verified = self
			.gateway
			.verify_signature(
				now,
				&signing::splice_init_response(msg),
				&msg.signature,
				&msg.responder,
			)
			.map_err(HiveError::from)?;
		if !verified {
			return Err(HiveError::new(HiveErrorCode::SignatureMismatch, "splice response"));
		}

		let (channel_id, relative_sats) = {
			let mut sessions = self.sessions.lock().expect("lock poisoned");
			let session = sessions.get_mut(&msg.session_id).ok_or_else(|| {
				HiveError::new(HiveErrorCode::NotFound, "splice session unknown")
			})?;
			if session.state != SpliceState::InitSent {
				return Err(HiveError::new(HiveErrorCode::Stale, "session not awaiting response"));
			}
			if !msg.accept {
				session.state = SpliceState::Aborted;
				session.result =
					msg.reject_reason.clone().unwrap_or_else(|| "declined".to_string());
				session.updated_at = now;
				return Ok(Vec::new());
			}
			session.state = SpliceState::Updating;
			session.updated_at = now;
			let sign = if session.splice_type == "splice_out" { -1i64 } else { 1i64 };
			(session.channel_id.clone(), sign * session.amount_sats as i64)
		};

		let psbt = match self.gateway.splice_init(now, &channel_id, relative_sats) {
			Ok(psbt) => psbt,
			Err(e) => {
				self.fail_session(&msg.session_id, &format!("splice_init: {}", e), now);
				return Err(HiveError::from(e));
			},
		};

		let mut update = SpliceUpdate {
			session_id: msg.session_id.clone(),
			sender: self.our_id.clone(),
			psbt,
			timestamp: now,
			signature: String::new(),
		};
		update.signature = self
			.gateway
			.sign_message(now, &signing::splice_update(&update))
			.map_err(HiveError::from)?;

		Ok(vec![(sender.to_string(), HiveMessage::SpliceUpdate(update))])
	}

	/// Either side: fold the PSBT through the host and answer with the
	/// signed step once the host reports completion.
	pub fn handle_update(
		&self, sender: &str, msg: &SpliceUpdate, now: u64,
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		let verified = self
			.gateway
			.verify_signature(now, &signing::splice_update(msg), &msg.signature, &msg.sender)
			.map_err(HiveError::from)?;
		if !verified {
			return Err(HiveError::new(HiveErrorCode::SignatureMismatch, "splice update"));
		}

		let channel_id = {
			let mut sessions = self.sessions.lock().expect("lock poisoned");
			let session = sessions.get_mut(&msg.session_id).ok_or_else(|| {
				HiveError::new(HiveErrorCode::NotFound, "splice session unknown")
			})?;
			if !session.state.is_live() {
				return Err(HiveError::new(HiveErrorCode::Stale, "session finished"));
			}
			session.state = SpliceState::Signing;
			session.updated_at = now;
			session.channel_id.clone()
		};

		let psbt = match self.gateway.splice_update(now, &channel_id, &msg.psbt) {
			Ok(psbt) => psbt,
			Err(e) => {
				self.fail_session(&msg.session_id, &format!("splice_update: {}", e), now);
				return Err(HiveError::from(e));
			},
		};

		let mut signed = SpliceSigned {
			session_id: msg.session_id.clone(),
			sender: self.our_id.clone(),
			psbt,
			timestamp: now,
			signature: String::new(),
		};
		signed.signature = self
			.gateway
			.sign_message(now, &signing::splice_signed(&signed))
			.map_err(HiveError::from)?;

		Ok(vec![(sender.to_string(), HiveMessage::SpliceSigned(signed))])
	}

	/// Final step: hand the signed PSBT to the host and close the session.
	pub fn handle_signed(
		&self, _sender: &str, msg: &SpliceSigned, now: u64,
	) -> Result<Vec<(String, HiveMessage)>, HiveError> {
		let verified = self
			.gateway
			.verify_signature(now, &signing::splice_signed(msg), &msg.signature, &msg.sender)
			.map_err(HiveError::from)?;
		if !verified {
			return Err(HiveError::new(HiveErrorCode::SignatureMismatch, "splice signed"));
		}

		let channel_id = {
			let sessions = self.sessions.lock().expect("lock poisoned");
			let session = sessions.get(&msg.session_id).ok_or_else(|| {
				HiveError::new(HiveErrorCode::NotFound, "splice session unknown")
			})?;
			if !session.state.is_live() {
				return Err(HiveError::new(HiveErrorCode::Stale, "session finished"));
			}
			session.channel_id.clone()
		};

		match self.gateway.splice_signed(now, &channel_id, &msg.psbt) {
			Ok(txid) => {
				let mut sessions = self.sessions.lock().expect("lock poisoned");
				if let Some(session) = sessions.get_mut(&msg.session_id) {
					session.state = SpliceState::Completed;
					session.result = txid;
					session.updated_at = now;
				}
				info!("splice {} completed", short_id(&msg.session_id));
				Ok(Vec::new())
			},
			Err(e) => {
				self.fail_session(&msg.session_id, &format!("splice_signed: {}", e), now);
				Err(HiveError::from(e))
			},
		}
	}

	pub fn handle_abort(
		&self, _sender: &str, msg: &SpliceAbort, now: u64,
	) -> Result<(), HiveError> {
		let verified = self
			.gateway
			.verify_signature(now, &signing::splice_abort(msg), &msg.signature, &msg.sender)
			.map_err(HiveError::from)?;
		if !verified {
			return Err(HiveError::new(HiveErrorCode::SignatureMismatch, "splice abort"));
		}
		let mut sessions = self.sessions.lock().expect("lock poisoned");
		if let Some(session) = sessions.get_mut(&msg.session_id) {
			if session.state.is_live() {
				session.state = SpliceState::Aborted;
				session.result = msg.reason.clone();
				session.updated_at = now;
				warn!("splice {} aborted: {}", short_id(&msg.session_id), msg.reason);
			}
		}
		Ok(())
	}

	/// Times out stale live sessions. Scheduler job.
	pub fn cleanup_expired_sessions(&self, now: u64) -> u32 {
		let mut sessions = self.sessions.lock().expect("lock poisoned");
		let mut expired = 0;
		for session in sessions.values_mut() {
			if session.state.is_live()
				&& now.saturating_sub(session.updated_at) > SPLICE_SESSION_TIMEOUT_SECONDS
			{
				session.state = SpliceState::Failed;
				session.result = "timeout".to_string();
				expired += 1;
			}
		}
		expired
	}

	pub fn get_session(&self, session_id: &str) -> Option<SpliceSession> {
		self.sessions.lock().expect("lock poisoned").get(session_id).cloned()
	}

	fn fail_session(&self, session_id: &str, reason: &str, now: u64) {
		let mut sessions = self.sessions.lock().expect("lock poisoned");
		if let Some(session) = sessions.get_mut(session_id) {
			session.state = SpliceState::Failed;
			session.result = reason.to_string();
			session.updated_at = now;
		}
	}
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
