// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Core Lightning JSON-RPC transport over the daemon's unix socket.
//!
//! One connection per call with a hard operation timeout; a hung host
//! surfaces as an error instead of a blocked kernel thread.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hex::DisplayHex;
use serde_json::{json, Value};

use crate::gateway::{
	CheckMessageResult, Funds, GatewayError, HostRpc, NodeInfo, OfferResult, PayResult,
	PeerChannel,
};

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ClnRpc {
	socket_path: PathBuf,
	next_id: AtomicU64,
}

impl ClnRpc {
	pub fn new(socket_path: impl Into<PathBuf>) -> Self {
		ClnRpc { socket_path: socket_path.into(), next_id: AtomicU64::new(1) }
	}

	fn call(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let request = json!({
			"jsonrpc": "2.0",
			"id": id,
			"method": method,
			"params": params,
		});

		let mut stream = UnixStream::connect(&self.socket_path)
			.map_err(|e| GatewayError::Rpc(format!("connect {:?}: {}", self.socket_path, e)))?;
		stream
			.set_read_timeout(Some(RPC_TIMEOUT))
			.and_then(|_| stream.set_write_timeout(Some(RPC_TIMEOUT)))
			.map_err(|e| GatewayError::Rpc(format!("socket timeout setup: {}", e)))?;

		let mut payload = serde_json::to_vec(&request)
			.map_err(|e| GatewayError::Rpc(format!("encode {}: {}", method, e)))?;
		payload.extend_from_slice(b"\n\n");
		stream
			.write_all(&payload)
			.map_err(|e| GatewayError::Rpc(format!("write {}: {}", method, e)))?;

		// Responses are terminated by a double newline.
		let mut buf = Vec::new();
		let mut chunk = [0u8; 4096];
		loop {
			let n = stream
				.read(&mut chunk)
				.map_err(|e| GatewayError::Rpc(format!("read {}: {}", method, e)))?;
			if n == 0 {
				break;
			}
			buf.extend_from_slice(&chunk[..n]);
			if buf.windows(2).rev().take(8).any(|w| w == b"\n\n") {
				break;
			}
		}

		let response: Value = serde_json::from_slice(&buf)
			.map_err(|e| GatewayError::Rpc(format!("decode {}: {}", method, e)))?;
		if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
			return Err(GatewayError::Rpc(format!("{}: {}", method, error)));
		}
		response
			.get("result")
			.cloned()
			.ok_or_else(|| GatewayError::Rpc(format!("{}: missing result", method)))
	}
}

/// CLN renders msat amounts as integers or "<n>msat" strings depending on
/// version; accept both.
fn parse_msat(value: &Value) -> u64 {
	match value {
		Value::Number(n) => n.as_u64().unwrap_or(0),
		Value::String(s) => s.trim_end_matches("msat").parse().unwrap_or(0),
		Value::Object(o) => o.get("msat").map(parse_msat).unwrap_or(0),
		_ => 0,
	}
}

fn field_str(value: &Value, key: &str) -> String {
	value.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

impl HostRpc for ClnRpc {
	fn get_info(&self) -> Result<NodeInfo, GatewayError> {
		let info = self.call("getinfo", json!({}))?;
		// Splicing is an experimental option; probe the live config for it.
		let supports_splicing = self
			.call("listconfigs", json!({}))
			.map(|configs| {
				configs
					.get("configs")
					.unwrap_or(&configs)
					.get("experimental-splicing")
					.is_some()
			})
			.unwrap_or(false);
		Ok(NodeInfo {
			id: field_str(&info, "id"),
			alias: field_str(&info, "alias"),
			supports_splicing,
		})
	}

	fn sign_message(&self, message: &str) -> Result<String, GatewayError> {
		let result = self.call("signmessage", json!({ "message": message }))?;
		Ok(field_str(&result, "zbase"))
	}

	fn check_message(
		&self, message: &str, zbase: &str,
	) -> Result<CheckMessageResult, GatewayError> {
		let result =
			self.call("checkmessage", json!({ "message": message, "zbase": zbase }))?;
		Ok(CheckMessageResult {
			verified: result.get("verified").and_then(Value::as_bool).unwrap_or(false),
			pubkey: result.get("pubkey").and_then(Value::as_str).map(|s| s.to_string()),
		})
	}

	fn list_peer_channels(&self, peer_id: Option<&str>) -> Result<Vec<PeerChannel>, GatewayError> {
		let params = match peer_id {
			Some(id) => json!({ "id": id }),
			None => json!({}),
		};
		let result = self.call("listpeerchannels", params)?;
		let channels = result.get("channels").and_then(Value::as_array).cloned().unwrap_or_default();
		Ok(channels
			.iter()
			.map(|channel| PeerChannel {
				peer_id: field_str(channel, "peer_id"),
				short_channel_id: channel
					.get("short_channel_id")
					.and_then(Value::as_str)
					.map(|s| s.to_string()),
				state: field_str(channel, "state"),
				total_sat: channel.get("total_msat").map(parse_msat).unwrap_or(0) / 1000,
				spendable_sat: channel.get("spendable_msat").map(parse_msat).unwrap_or(0) / 1000,
			})
			.collect())
	}

	fn list_funds(&self) -> Result<Funds, GatewayError> {
		let result = self.call("listfunds", json!({}))?;
		let outputs = result.get("outputs").and_then(Value::as_array).cloned().unwrap_or_default();
		let onchain: u64 = outputs
			.iter()
			.filter(|o| o.get("status").and_then(Value::as_str) == Some("confirmed"))
			.map(|o| o.get("amount_msat").map(parse_msat).unwrap_or(0) / 1000)
			.sum();
		let channels = result.get("channels").and_then(Value::as_array).cloned().unwrap_or_default();
		let channel_sats: u64 = channels
			.iter()
			.map(|c| c.get("our_amount_msat").map(parse_msat).unwrap_or(0) / 1000)
			.sum();
		Ok(Funds { onchain_confirmed_sats: onchain, channel_sats })
	}

	fn send_custom_msg(&self, peer_id: &str, payload: &[u8]) -> Result<(), GatewayError> {
		self.call(
			"sendcustommsg",
			json!({ "node_id": peer_id, "msg": payload.to_lower_hex_string() }),
		)?;
		Ok(())
	}

	fn open_channel(&self, peer_id: &str, amount_sats: u64) -> Result<String, GatewayError> {
		let result =
			self.call("fundchannel", json!({ "id": peer_id, "amount": amount_sats }))?;
		Ok(field_str(&result, "txid"))
	}

	fn close_channel(&self, channel_id: &str) -> Result<(), GatewayError> {
		self.call("close", json!({ "id": channel_id }))?;
		Ok(())
	}

	fn splice_init(&self, channel_id: &str, relative_sats: i64) -> Result<String, GatewayError> {
		let result = self.call(
			"splice_init",
			json!({ "channel_id": channel_id, "relative_amount": relative_sats }),
		)?;
		Ok(field_str(&result, "psbt"))
	}

	fn splice_update(&self, channel_id: &str, psbt: &str) -> Result<String, GatewayError> {
		let result =
			self.call("splice_update", json!({ "channel_id": channel_id, "psbt": psbt }))?;
		Ok(field_str(&result, "psbt"))
	}

	fn splice_signed(&self, channel_id: &str, psbt: &str) -> Result<String, GatewayError> {
		let result =
			self.call("splice_signed", json!({ "channel_id": channel_id, "psbt": psbt }))?;
		Ok(field_str(&result, "txid"))
	}

	fn offer(&self, amount: &str, description: &str) -> Result<OfferResult, GatewayError> {
		let result =
			self.call("offer", json!({ "amount": amount, "description": description }))?;
		Ok(OfferResult {
			bolt12: field_str(&result, "bolt12"),
			offer_id: field_str(&result, "offer_id"),
		})
	}

	fn fetch_invoice(&self, offer: &str, amount_msat: u64) -> Result<String, GatewayError> {
		let result = self.call(
			"fetchinvoice",
			json!({ "offer": offer, "amount_msat": format!("{}msat", amount_msat) }),
		)?;
		Ok(field_str(&result, "invoice"))
	}

	fn pay(&self, invoice: &str) -> Result<PayResult, GatewayError> {
		let result = self.call("pay", json!({ "bolt11": invoice }))?;
		Ok(PayResult {
			status: field_str(&result, "status"),
			payment_hash: result
				.get("payment_hash")
				.and_then(Value::as_str)
				.map(|s| s.to_string()),
		})
	}

	fn set_peer_fee_policy(&self, peer_id: &str, fee_ppm: u32) -> Result<(), GatewayError> {
		self.call("setchannel", json!({ "id": peer_id, "feeppm": fee_ppm }))?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_msat_variants() {
		assert_eq!(parse_msat(&json!(1500)), 1500);
		assert_eq!(parse_msat(&json!("2500msat")), 2500);
		assert_eq!(parse_msat(&json!({"msat": 3500})), 3500);
		assert_eq!(parse_msat(&json!(null)), 0);
		assert_eq!(parse_msat(&json!("garbage")), 0);
	}

	#[test]
	fn test_unreachable_socket_is_rpc_error() {
		let rpc = ClnRpc::new("/nonexistent/lightning-rpc");
		match rpc.sign_message("hello") {
			Err(GatewayError::Rpc(e)) => assert!(e.contains("connect")),
			other => panic!("expected rpc error, got {:?}", other),
		}
	}
}
