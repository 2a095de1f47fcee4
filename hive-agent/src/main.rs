// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

mod config;
mod contribution;
mod error;
mod expansion;
mod gateway;
mod gossip;
mod handshake;
mod intent;
mod membership;
mod ops;
mod quality;
mod scheduler;
mod service;
mod settlement;
mod splice;
mod store;
mod util;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::SignalKind;

use crate::config::{load_config, ArgsConfig};
use crate::contribution::ForwardEvent;
use crate::gateway::cln::ClnRpc;
use crate::gateway::Gateway;
use crate::membership::PRESENCE_WINDOW_SECONDS;
use crate::service::Kernel;
use crate::store::Store;
use crate::util::now_seconds;

/// One line of the host event stream. A thin plugin shim inside the host
/// daemon forwards its hooks here as JSON lines on stdin.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum HostEvent {
	Custommsg { peer_id: String, payload: String },
	Forward { in_channel: String, out_channel: String, in_msat: u64, out_msat: u64, status: String },
	Connect { peer_id: String },
	Disconnect { peer_id: String },
	/// Operator command; the structured response goes to stdout.
	Command {
		command: String,
		#[serde(default)]
		action_id: Option<i64>,
		#[serde(default)]
		target: Option<String>,
		#[serde(default)]
		amount_sats: Option<u64>,
		#[serde(default)]
		channel_id: Option<String>,
		#[serde(default)]
		splice_type: Option<String>,
	},
}

fn main() {
	let args = ArgsConfig::parse();

	let config = match load_config(&args) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("Invalid configuration: {}", e);
			std::process::exit(-1);
		},
	};

	if let Err(e) = std::fs::create_dir_all(&config.storage_dir_path) {
		eprintln!("Unable to create storage directory: {}", e);
		std::process::exit(-1);
	}

	let store = match Store::open(&Path::new(&config.storage_dir_path).join("hive.db")) {
		Ok(store) => Arc::new(store),
		Err(e) => {
			eprintln!("Failed to open state store: {}", e);
			std::process::exit(-1);
		},
	};

	let rpc = Arc::new(ClnRpc::new(config.rpc_socket_path.clone()));
	let gateway = Arc::new(Gateway::new(rpc));

	let now = now_seconds();
	let our_id = match gateway.get_info(now) {
		Ok(info) => info.id,
		Err(e) => {
			eprintln!("Failed to reach host daemon: {}", e);
			std::process::exit(-1);
		},
	};

	let kernel = Arc::new(Kernel::new(config, store, gateway, our_id.clone()));
	if let Err(e) = kernel.startup(now) {
		eprintln!("Kernel startup failed: {}", e);
		std::process::exit(-1);
	}

	let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
		Ok(runtime) => runtime,
		Err(e) => {
			eprintln!("Failed to setup tokio runtime: {}", e);
			std::process::exit(-1);
		},
	};

	println!("hive-agent running as {}", our_id);

	runtime.block_on(async {
		let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
		let worker = tokio::spawn(scheduler::run(Arc::clone(&kernel), shutdown_rx));

		let mut sigterm_stream = match tokio::signal::unix::signal(SignalKind::terminate()) {
			Ok(stream) => stream,
			Err(e) => {
				eprintln!("Failed to register for SIGTERM stream: {}", e);
				std::process::exit(-1);
			},
		};

		let mut lines = BufReader::new(tokio::io::stdin()).lines();
		loop {
			tokio::select! {
				line = lines.next_line() => {
					match line {
						Ok(Some(line)) => handle_host_line(&kernel, &line),
						Ok(None) => {
							// Host hook stream closed; keep the worker alive
							// for timer-driven duties.
							tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
						},
						Err(e) => eprintln!("Failed to read host event: {}", e),
					}
				}
				_ = tokio::signal::ctrl_c() => {
					println!("Received CTRL-C, shutting down..");
					break;
				}
				_ = sigterm_stream.recv() => {
					println!("Received SIGTERM, shutting down..");
					break;
				}
			}
		}

		let _ = shutdown_tx.send(true);
		let _ = worker.await;
	});

	println!("Shutdown complete..");
}

fn handle_host_line(kernel: &Kernel, line: &str) {
	let line = line.trim();
	if line.is_empty() {
		return;
	}
	let now = now_seconds();
	match serde_json::from_str::<HostEvent>(line) {
		Ok(HostEvent::Custommsg { peer_id, payload }) => {
			match hex_decode(&payload) {
				Some(frame) => kernel.handle_custom_msg(&peer_id, &frame, now),
				None => eprintln!("Undecodable custommsg payload from {}", peer_id),
			}
		},
		Ok(HostEvent::Forward { in_channel, out_channel, in_msat, out_msat, status }) => {
			kernel.handle_forward_event(
				&ForwardEvent {
					in_channel,
					out_channel,
					in_msat,
					out_msat,
					settled: status == "settled",
				},
				now,
			);
		},
		Ok(HostEvent::Connect { peer_id }) => {
			if let Err(e) =
				kernel.store.update_presence(&peer_id, true, now, PRESENCE_WINDOW_SECONDS)
			{
				eprintln!("Presence update failed: {}", e);
			}
		},
		Ok(HostEvent::Disconnect { peer_id }) => {
			if let Err(e) =
				kernel.store.update_presence(&peer_id, false, now, PRESENCE_WINDOW_SECONDS)
			{
				eprintln!("Presence update failed: {}", e);
			}
		},
		Ok(HostEvent::Command { command, action_id, target, amount_sats, channel_id, splice_type }) => {
			let params = CommandParams { action_id, target, amount_sats, channel_id, splice_type };
			match run_command(kernel, &command, &params, now) {
				Ok(response) => println!("{}", response),
				Err(e) => {
					println!(
						"{}",
						serde_json::json!({ "error": { "code": format!("{:?}", e.code), "message": e.message } })
					);
				},
			}
		},
		Err(e) => eprintln!("Unknown host event: {}", e),
	}
}

struct CommandParams {
	action_id: Option<i64>,
	target: Option<String>,
	amount_sats: Option<u64>,
	channel_id: Option<String>,
	splice_type: Option<String>,
}

fn run_command(
	kernel: &Kernel, command: &str, params: &CommandParams, now: u64,
) -> Result<String, error::HiveError> {
	use error::{HiveError, HiveErrorCode};

	let encode = |value: serde_json::Result<String>| {
		value.map_err(|e| HiveError::new(HiveErrorCode::Fatal, e.to_string()))
	};
	let missing =
		|field: &str| HiveError::new(HiveErrorCode::InvalidRequest, format!("missing {}", field));
	match command {
		"status" => encode(serde_json::to_string(&ops::status(kernel, now)?)),
		"list_members" => encode(serde_json::to_string(&ops::list_members(kernel)?)),
		"list_rounds" => encode(serde_json::to_string(&ops::list_rounds(kernel)?)),
		"list_holds" => encode(serde_json::to_string(&ops::list_holds(kernel, now)?)),
		"budget" => encode(serde_json::to_string(&ops::budget_summary(kernel, now)?)),
		"list_actions" => encode(serde_json::to_string(&ops::list_pending_actions(kernel)?)),
		"propose_action" => {
			let target = params.target.as_deref().ok_or_else(|| missing("target"))?;
			let amount = params.amount_sats.ok_or_else(|| missing("amount_sats"))?;
			encode(serde_json::to_string(&ops::propose_action(
				kernel,
				"channel_open",
				target,
				amount,
				now,
			)?))
		},
		"approve_action" => {
			let id = params.action_id.ok_or_else(|| missing("action_id"))?;
			encode(serde_json::to_string(&ops::approve_action(kernel, id, now)?))
		},
		"reject_action" => {
			let id = params.action_id.ok_or_else(|| missing("action_id"))?;
			encode(serde_json::to_string(&ops::reject_action(kernel, id, now)?))
		},
		"propose_promotion" => {
			let target = params.target.as_deref().ok_or_else(|| missing("target"))?;
			encode(serde_json::to_string(&ops::propose_promotion(kernel, target, now)?))
		},
		"approve_promotion" => {
			let target = params.target.as_deref().ok_or_else(|| missing("target"))?;
			encode(serde_json::to_string(&ops::approve_promotion(kernel, target, now)?))
		},
		"splice" => {
			let peer = params.target.as_deref().ok_or_else(|| missing("target"))?;
			let channel_id = params.channel_id.as_deref().ok_or_else(|| missing("channel_id"))?;
			let splice_type =
				params.splice_type.as_deref().ok_or_else(|| missing("splice_type"))?;
			let amount = params.amount_sats.ok_or_else(|| missing("amount_sats"))?;
			encode(serde_json::to_string(&ops::initiate_splice(
				kernel,
				peer,
				channel_id,
				splice_type,
				amount,
				now,
			)?))
		},
		"settlement_status" => encode(serde_json::to_string(&ops::settlement_status(kernel)?)),
		other => Err(HiveError::new(
			HiveErrorCode::InvalidRequest,
			format!("unknown command '{}'", other),
		)),
	}
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
	if s.len() % 2 != 0 {
		return None;
	}
	(0..s.len())
		.step_by(2)
		.map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_hex_decode() {
		assert_eq!(hex_decode("48495645"), Some(vec![0x48, 0x49, 0x56, 0x45]));
		assert_eq!(hex_decode("4849564"), None);
		assert_eq!(hex_decode("zz"), None);
		assert_eq!(hex_decode(""), Some(vec![]));
	}

	#[test]
	fn test_host_event_parsing() {
		let line = r#"{"event":"custommsg","peer_id":"02aa","payload":"48495645"}"#;
		assert!(matches!(
			serde_json::from_str::<HostEvent>(line).unwrap(),
			HostEvent::Custommsg { .. }
		));

		let line = r#"{"event":"forward","in_channel":"1x1x1","out_channel":"2x2x2","in_msat":1000,"out_msat":990,"status":"settled"}"#;
		assert!(matches!(
			serde_json::from_str::<HostEvent>(line).unwrap(),
			HostEvent::Forward { .. }
		));

		let line = r#"{"event":"connect","peer_id":"02aa"}"#;
		assert!(matches!(
			serde_json::from_str::<HostEvent>(line).unwrap(),
			HostEvent::Connect { .. }
		));
	}
}
