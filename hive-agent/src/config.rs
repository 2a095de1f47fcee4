// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::path::PathBuf;
use std::str::FromStr;
use std::{fs, io};

use clap::Parser;
use log::LevelFilter;
use serde::{Deserialize, Serialize};

/// Governance mode for actions that spend or move funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernanceMode {
	/// Proposed actions are queued for operator approval.
	Advisor,
	/// Approved classes of actions execute without operator involvement.
	Autonomous,
}

impl FromStr for GovernanceMode {
	type Err = io::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"advisor" => Ok(GovernanceMode::Advisor),
			"autonomous" => Ok(GovernanceMode::Autonomous),
			other => Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				format!("Invalid governance mode '{}'. Valid: advisor, autonomous", other),
			)),
		}
	}
}

/// Configuration for the hive agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
	pub storage_dir_path: String,
	/// Path to the host daemon's JSON-RPC unix socket.
	pub rpc_socket_path: String,
	pub governance_mode: GovernanceMode,

	pub membership_enabled: bool,
	pub auto_vouch_enabled: bool,
	pub auto_promote_enabled: bool,
	pub ban_autotrigger_enabled: bool,

	pub neophyte_fee_discount_pct: f64,
	pub member_fee_ppm: u32,
	pub probation_days: u32,

	pub vouch_threshold_pct: f64,
	pub min_vouch_count: u32,
	pub max_members: u32,

	pub intent_hold_seconds: u64,
	pub intent_expire_seconds: u64,

	pub heartbeat_interval_seconds: u64,
	pub gossip_max_age_hours: u64,

	pub daily_budget_sats: u64,
	pub budget_reserve_pct: f64,
	pub budget_max_per_channel_pct: f64,

	pub settlement_enabled: bool,

	pub log_level: LevelFilter,
	pub log_file_path: Option<String>,
}

/// An immutable snapshot of [`Config`] captured at the start of a worker
/// cycle, so a live reconfiguration cannot tear a running decision.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
	pub governance_mode: GovernanceMode,
	pub membership_enabled: bool,
	pub auto_vouch_enabled: bool,
	pub auto_promote_enabled: bool,
	pub ban_autotrigger_enabled: bool,
	pub neophyte_fee_discount_pct: f64,
	pub member_fee_ppm: u32,
	pub probation_days: u32,
	pub vouch_threshold_pct: f64,
	pub min_vouch_count: u32,
	pub max_members: u32,
	pub intent_hold_seconds: u64,
	pub intent_expire_seconds: u64,
	pub heartbeat_interval_seconds: u64,
	pub gossip_max_age_hours: u64,
	pub daily_budget_sats: u64,
	pub budget_reserve_pct: f64,
	pub budget_max_per_channel_pct: f64,
	pub settlement_enabled: bool,
}

impl Config {
	pub fn snapshot(&self) -> ConfigSnapshot {
		ConfigSnapshot {
			governance_mode: self.governance_mode,
			membership_enabled: self.membership_enabled,
			auto_vouch_enabled: self.auto_vouch_enabled,
			auto_promote_enabled: self.auto_promote_enabled,
			ban_autotrigger_enabled: self.ban_autotrigger_enabled,
			neophyte_fee_discount_pct: self.neophyte_fee_discount_pct,
			member_fee_ppm: self.member_fee_ppm,
			probation_days: self.probation_days,
			vouch_threshold_pct: self.vouch_threshold_pct,
			min_vouch_count: self.min_vouch_count,
			max_members: self.max_members,
			intent_hold_seconds: self.intent_hold_seconds,
			intent_expire_seconds: self.intent_expire_seconds,
			heartbeat_interval_seconds: self.heartbeat_interval_seconds,
			gossip_max_age_hours: self.gossip_max_age_hours,
			daily_budget_sats: self.daily_budget_sats,
			budget_reserve_pct: self.budget_reserve_pct,
			budget_max_per_channel_pct: self.budget_max_per_channel_pct,
			settlement_enabled: self.settlement_enabled,
		}
	}

	/// Validates range constraints on numeric fields.
	pub fn validate(&self) -> io::Result<()> {
		range_check("neophyte_fee_discount_pct", self.neophyte_fee_discount_pct, 0.0, 1.0)?;
		range_check("vouch_threshold_pct", self.vouch_threshold_pct, 0.0, 1.0)?;
		range_check("budget_reserve_pct", self.budget_reserve_pct, 0.0, 1.0)?;
		range_check("budget_max_per_channel_pct", self.budget_max_per_channel_pct, 0.0, 1.0)?;
		range_check("probation_days", self.probation_days as f64, 1.0, 365.0)?;
		range_check("min_vouch_count", self.min_vouch_count as f64, 1.0, 50.0)?;
		range_check("max_members", self.max_members as f64, 2.0, 100.0)?;
		range_check("intent_hold_seconds", self.intent_hold_seconds as f64, 10.0, 600.0)?;
		range_check("intent_expire_seconds", self.intent_expire_seconds as f64, 60.0, 3600.0)?;
		range_check(
			"heartbeat_interval_seconds",
			self.heartbeat_interval_seconds as f64,
			10.0,
			3600.0,
		)?;
		Ok(())
	}
}

fn range_check(field: &str, value: f64, min: f64, max: f64) -> io::Result<()> {
	if value < min || value > max {
		return Err(io::Error::new(
			io::ErrorKind::InvalidInput,
			format!("Config {}={} out of range [{}, {}]", field, value, min, max),
		));
	}
	Ok(())
}

/// A builder for `Config`.
#[derive(Default)]
struct ConfigBuilder {
	storage_dir_path: Option<String>,
	rpc_socket_path: Option<String>,
	governance_mode: Option<String>,
	membership_enabled: Option<bool>,
	auto_vouch_enabled: Option<bool>,
	auto_promote_enabled: Option<bool>,
	ban_autotrigger_enabled: Option<bool>,
	neophyte_fee_discount_pct: Option<f64>,
	member_fee_ppm: Option<u32>,
	probation_days: Option<u32>,
	vouch_threshold_pct: Option<f64>,
	min_vouch_count: Option<u32>,
	max_members: Option<u32>,
	intent_hold_seconds: Option<u64>,
	intent_expire_seconds: Option<u64>,
	heartbeat_interval_seconds: Option<u64>,
	gossip_max_age_hours: Option<u64>,
	daily_budget_sats: Option<u64>,
	budget_reserve_pct: Option<f64>,
	budget_max_per_channel_pct: Option<f64>,
	settlement_enabled: Option<bool>,
	log_level: Option<String>,
	log_file_path: Option<String>,
}

impl ConfigBuilder {
	fn merge_toml(&mut self, toml: TomlConfig) {
		if let Some(node) = toml.node {
			self.rpc_socket_path = node.rpc_socket_path.or(self.rpc_socket_path.clone());
			self.governance_mode = node.governance_mode.or(self.governance_mode.clone());
			self.heartbeat_interval_seconds =
				node.heartbeat_interval_seconds.or(self.heartbeat_interval_seconds);
		}

		if let Some(storage) = toml.storage {
			self.storage_dir_path =
				storage.disk.and_then(|d| d.dir_path).or(self.storage_dir_path.clone());
		}

		if let Some(membership) = toml.membership {
			self.membership_enabled = membership.enabled.or(self.membership_enabled);
			self.auto_vouch_enabled = membership.auto_vouch.or(self.auto_vouch_enabled);
			self.auto_promote_enabled = membership.auto_promote.or(self.auto_promote_enabled);
			self.ban_autotrigger_enabled =
				membership.ban_autotrigger.or(self.ban_autotrigger_enabled);
			self.neophyte_fee_discount_pct =
				membership.neophyte_fee_discount_pct.or(self.neophyte_fee_discount_pct);
			self.member_fee_ppm = membership.member_fee_ppm.or(self.member_fee_ppm);
			self.probation_days = membership.probation_days.or(self.probation_days);
			self.vouch_threshold_pct =
				membership.vouch_threshold_pct.or(self.vouch_threshold_pct);
			self.min_vouch_count = membership.min_vouch_count.or(self.min_vouch_count);
			self.max_members = membership.max_members.or(self.max_members);
		}

		if let Some(intent) = toml.intent {
			self.intent_hold_seconds = intent.hold_seconds.or(self.intent_hold_seconds);
			self.intent_expire_seconds = intent.expire_seconds.or(self.intent_expire_seconds);
		}

		if let Some(gossip) = toml.gossip {
			self.gossip_max_age_hours = gossip.max_age_hours.or(self.gossip_max_age_hours);
		}

		if let Some(budget) = toml.budget {
			self.daily_budget_sats = budget.daily_budget_sats.or(self.daily_budget_sats);
			self.budget_reserve_pct = budget.reserve_pct.or(self.budget_reserve_pct);
			self.budget_max_per_channel_pct =
				budget.max_per_channel_pct.or(self.budget_max_per_channel_pct);
		}

		if let Some(settlement) = toml.settlement {
			self.settlement_enabled = settlement.enabled.or(self.settlement_enabled);
		}

		if let Some(log) = toml.log {
			self.log_level = log.level.or(self.log_level.clone());
			self.log_file_path = log.file.or(self.log_file_path.clone());
		}
	}

	fn merge_args(&mut self, args: &ArgsConfig) {
		if let Some(storage_dir_path) = &args.storage_dir_path {
			self.storage_dir_path = Some(storage_dir_path.clone());
		}

		if let Some(rpc_socket_path) = &args.rpc_socket_path {
			self.rpc_socket_path = Some(rpc_socket_path.clone());
		}

		if let Some(governance_mode) = &args.governance_mode {
			self.governance_mode = Some(governance_mode.clone());
		}

		if let Some(daily_budget_sats) = args.daily_budget_sats {
			self.daily_budget_sats = Some(daily_budget_sats);
		}
	}

	fn build(self) -> io::Result<Config> {
		let storage_dir_path =
			self.storage_dir_path.ok_or_else(|| missing_field_err("storage_dir_path"))?;

		let rpc_socket_path =
			self.rpc_socket_path.ok_or_else(|| missing_field_err("rpc_socket_path"))?;

		let governance_mode = self
			.governance_mode
			.as_deref()
			.map(GovernanceMode::from_str)
			.transpose()?
			.unwrap_or(GovernanceMode::Advisor);

		let log_level = self
			.log_level
			.as_ref()
			.map(|level_str| {
				LevelFilter::from_str(level_str).map_err(|e| {
					io::Error::new(
						io::ErrorKind::InvalidInput,
						format!("Invalid log level configured: {}", e),
					)
				})
			})
			.transpose()?
			.unwrap_or(LevelFilter::Debug);

		let config = Config {
			storage_dir_path,
			rpc_socket_path,
			governance_mode,
			membership_enabled: self.membership_enabled.unwrap_or(true),
			auto_vouch_enabled: self.auto_vouch_enabled.unwrap_or(true),
			auto_promote_enabled: self.auto_promote_enabled.unwrap_or(true),
			ban_autotrigger_enabled: self.ban_autotrigger_enabled.unwrap_or(false),
			neophyte_fee_discount_pct: self.neophyte_fee_discount_pct.unwrap_or(0.5),
			member_fee_ppm: self.member_fee_ppm.unwrap_or(0),
			probation_days: self.probation_days.unwrap_or(30),
			vouch_threshold_pct: self.vouch_threshold_pct.unwrap_or(0.51),
			min_vouch_count: self.min_vouch_count.unwrap_or(3),
			max_members: self.max_members.unwrap_or(50),
			intent_hold_seconds: self.intent_hold_seconds.unwrap_or(60),
			intent_expire_seconds: self.intent_expire_seconds.unwrap_or(300),
			heartbeat_interval_seconds: self.heartbeat_interval_seconds.unwrap_or(300),
			gossip_max_age_hours: self.gossip_max_age_hours.unwrap_or(168),
			daily_budget_sats: self.daily_budget_sats.unwrap_or(10_000_000),
			budget_reserve_pct: self.budget_reserve_pct.unwrap_or(0.20),
			budget_max_per_channel_pct: self.budget_max_per_channel_pct.unwrap_or(0.50),
			settlement_enabled: self.settlement_enabled.unwrap_or(true),
			log_level,
			log_file_path: self.log_file_path,
		};

		config.validate()?;
		Ok(config)
	}
}

/// Configuration loaded from a TOML file.
#[derive(Deserialize, Serialize)]
pub struct TomlConfig {
	node: Option<NodeConfig>,
	storage: Option<StorageConfig>,
	membership: Option<MembershipConfig>,
	intent: Option<IntentConfig>,
	gossip: Option<GossipConfig>,
	budget: Option<BudgetConfig>,
	settlement: Option<SettlementConfig>,
	log: Option<LogConfig>,
}

#[derive(Deserialize, Serialize)]
struct NodeConfig {
	rpc_socket_path: Option<String>,
	governance_mode: Option<String>,
	heartbeat_interval_seconds: Option<u64>,
}

#[derive(Deserialize, Serialize)]
struct StorageConfig {
	disk: Option<DiskConfig>,
}

#[derive(Deserialize, Serialize)]
struct DiskConfig {
	dir_path: Option<String>,
}

#[derive(Deserialize, Serialize)]
struct MembershipConfig {
	enabled: Option<bool>,
	auto_vouch: Option<bool>,
	auto_promote: Option<bool>,
	ban_autotrigger: Option<bool>,
	neophyte_fee_discount_pct: Option<f64>,
	member_fee_ppm: Option<u32>,
	probation_days: Option<u32>,
	vouch_threshold_pct: Option<f64>,
	min_vouch_count: Option<u32>,
	max_members: Option<u32>,
}

#[derive(Deserialize, Serialize)]
struct IntentConfig {
	hold_seconds: Option<u64>,
	expire_seconds: Option<u64>,
}

#[derive(Deserialize, Serialize)]
struct GossipConfig {
	max_age_hours: Option<u64>,
}

#[derive(Deserialize, Serialize)]
struct BudgetConfig {
	daily_budget_sats: Option<u64>,
	reserve_pct: Option<f64>,
	max_per_channel_pct: Option<f64>,
}

#[derive(Deserialize, Serialize)]
struct SettlementConfig {
	enabled: Option<bool>,
}

#[derive(Deserialize, Serialize)]
struct LogConfig {
	level: Option<String>,
	file: Option<String>,
}

#[derive(Parser, Debug)]
#[command(
	version,
	about = "Hive Agent Configuration",
	long_about = None,
	override_usage = "hive-agent [config_path]"
)]
pub struct ArgsConfig {
	#[arg(required = false, help = "The configuration file for running the hive agent.")]
	pub config_file: Option<String>,

	#[arg(
		long,
		env = "HIVE_AGENT_STORAGE_DIR_PATH",
		help = "The path where the agent persists its coordination state."
	)]
	pub storage_dir_path: Option<String>,

	#[arg(
		long,
		env = "HIVE_AGENT_RPC_SOCKET_PATH",
		help = "Path to the host Lightning daemon's JSON-RPC unix socket."
	)]
	pub rpc_socket_path: Option<String>,

	#[arg(
		long,
		env = "HIVE_AGENT_GOVERNANCE_MODE",
		help = "Governance mode for fund-moving actions: advisor or autonomous."
	)]
	pub governance_mode: Option<String>,

	#[arg(
		long,
		env = "HIVE_AGENT_DAILY_BUDGET_SATS",
		help = "Daily spend budget in satoshis for autonomous channel opens."
	)]
	pub daily_budget_sats: Option<u64>,
}

pub fn load_config(args: &ArgsConfig) -> io::Result<Config> {
	let mut builder = ConfigBuilder::default();

	if let Some(path) = &args.config_file {
		let path = PathBuf::from(path);
		let content = fs::read_to_string(&path).map_err(|e| {
			io::Error::new(e.kind(), format!("Failed to read config file '{:?}': {}", path, e))
		})?;
		let toml_config: TomlConfig = toml::from_str(&content).map_err(|e| {
			io::Error::new(
				io::ErrorKind::InvalidData,
				format!("Config file contains invalid TOML format: {}", e),
			)
		})?;

		builder.merge_toml(toml_config);
	}

	builder.merge_args(args);

	builder.build()
}

fn missing_field_err(field: &str) -> io::Error {
	io::Error::new(
		io::ErrorKind::InvalidInput,
		format!(
			"Missing `{}`. Please provide it via config file, CLI argument, or environment variable.",
			field
		),
	)
}

/// A snapshot with library defaults, for tests that need config context.
#[cfg(test)]
pub(crate) fn test_snapshot() -> ConfigSnapshot {
	ConfigSnapshot {
		governance_mode: GovernanceMode::Autonomous,
		membership_enabled: true,
		auto_vouch_enabled: true,
		auto_promote_enabled: true,
		ban_autotrigger_enabled: false,
		neophyte_fee_discount_pct: 0.5,
		member_fee_ppm: 0,
		probation_days: 30,
		vouch_threshold_pct: 0.51,
		min_vouch_count: 2,
		max_members: 50,
		intent_hold_seconds: 60,
		intent_expire_seconds: 300,
		heartbeat_interval_seconds: 300,
		gossip_max_age_hours: 168,
		daily_budget_sats: 10_000_000,
		budget_reserve_pct: 0.2,
		budget_max_per_channel_pct: 0.5,
		settlement_enabled: true,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const DEFAULT_CONFIG: &str = r#"
				[node]
				rpc_socket_path = "/tmp/lightning-rpc"
				governance_mode = "autonomous"
				heartbeat_interval_seconds = 120

				[storage.disk]
				dir_path = "/tmp/hive"

				[membership]
				probation_days = 14
				min_vouch_count = 2
				ban_autotrigger = false

				[intent]
				hold_seconds = 45
				expire_seconds = 240

				[budget]
				daily_budget_sats = 5000000
				reserve_pct = 0.25
				max_per_channel_pct = 0.4

				[settlement]
				enabled = true

				[log]
				level = "Trace"
				file = "/var/log/hive-agent.log"
				"#;

	fn empty_args_config() -> ArgsConfig {
		ArgsConfig {
			config_file: None,
			storage_dir_path: None,
			rpc_socket_path: None,
			governance_mode: None,
			daily_budget_sats: None,
		}
	}

	#[test]
	fn test_config_from_file() {
		let storage_path = std::env::temp_dir();
		let config_file_name = "test_hive_config_from_file.toml";

		fs::write(storage_path.join(config_file_name), DEFAULT_CONFIG).unwrap();

		let mut args_config = empty_args_config();
		args_config.config_file =
			Some(storage_path.join(config_file_name).to_string_lossy().to_string());

		let config = load_config(&args_config).unwrap();

		assert_eq!(config.storage_dir_path, "/tmp/hive");
		assert_eq!(config.rpc_socket_path, "/tmp/lightning-rpc");
		assert_eq!(config.governance_mode, GovernanceMode::Autonomous);
		assert_eq!(config.heartbeat_interval_seconds, 120);
		assert_eq!(config.probation_days, 14);
		assert_eq!(config.min_vouch_count, 2);
		assert!(!config.ban_autotrigger_enabled);
		assert_eq!(config.intent_hold_seconds, 45);
		assert_eq!(config.intent_expire_seconds, 240);
		assert_eq!(config.daily_budget_sats, 5_000_000);
		assert_eq!(config.budget_reserve_pct, 0.25);
		assert_eq!(config.log_level, LevelFilter::Trace);
		assert_eq!(config.log_file_path.as_deref(), Some("/var/log/hive-agent.log"));
		// Unset knobs fall back to defaults.
		assert_eq!(config.vouch_threshold_pct, 0.51);
		assert_eq!(config.max_members, 50);
	}

	#[test]
	fn test_args_config_overrides_file() {
		let storage_path = std::env::temp_dir();
		let config_file_name = "test_hive_args_override.toml";
		fs::write(storage_path.join(config_file_name), DEFAULT_CONFIG).unwrap();

		let mut args_config = empty_args_config();
		args_config.config_file =
			Some(storage_path.join(config_file_name).to_string_lossy().to_string());
		args_config.storage_dir_path = Some("/tmp/hive-cli".to_string());
		args_config.governance_mode = Some("advisor".to_string());
		args_config.daily_budget_sats = Some(123_456);

		let config = load_config(&args_config).unwrap();
		assert_eq!(config.storage_dir_path, "/tmp/hive-cli");
		assert_eq!(config.governance_mode, GovernanceMode::Advisor);
		assert_eq!(config.daily_budget_sats, 123_456);
	}

	#[test]
	fn test_missing_storage_dir_is_error() {
		let result = load_config(&empty_args_config());
		assert!(result.is_err());
		let err = result.unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
		assert!(err.to_string().contains("storage_dir_path"));
	}

	#[test]
	fn test_out_of_range_value_rejected() {
		let storage_path = std::env::temp_dir();
		let config_file_name = "test_hive_bad_range.toml";
		let toml_config = r#"
				[node]
				rpc_socket_path = "/tmp/lightning-rpc"

				[storage.disk]
				dir_path = "/tmp/hive"

				[membership]
				probation_days = 9999
				"#;
		fs::write(storage_path.join(config_file_name), toml_config).unwrap();

		let mut args_config = empty_args_config();
		args_config.config_file =
			Some(storage_path.join(config_file_name).to_string_lossy().to_string());

		let err = load_config(&args_config).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
		assert!(err.to_string().contains("probation_days"));
	}

	#[test]
	fn test_invalid_governance_mode_rejected() {
		let mut args_config = empty_args_config();
		args_config.storage_dir_path = Some("/tmp/hive".to_string());
		args_config.rpc_socket_path = Some("/tmp/lightning-rpc".to_string());
		args_config.governance_mode = Some("oracle".to_string());
		let err = load_config(&args_config).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
	}

	#[test]
	fn test_snapshot_matches_config() {
		let mut args_config = empty_args_config();
		args_config.storage_dir_path = Some("/tmp/hive".to_string());
		args_config.rpc_socket_path = Some("/tmp/lightning-rpc".to_string());
		let config = load_config(&args_config).unwrap();
		let snap = config.snapshot();
		assert_eq!(snap.governance_mode, config.governance_mode);
		assert_eq!(snap.daily_budget_sats, config.daily_budget_sats);
		assert_eq!(snap.intent_hold_seconds, config.intent_hold_seconds);
	}
}
