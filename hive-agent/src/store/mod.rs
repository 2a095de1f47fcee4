// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Durable transactional state for the coordination kernel.
//!
//! One SQLite database holds members, intents, gossip tables, proposals,
//! votes, events, budget holds and settlement records. WAL mode is enabled
//! so readers do not block the writer. Append-only ledgers carry hard row
//! caps with ring-buffer pruning.

pub(crate) mod budget;
pub(crate) mod contribution;
pub(crate) mod fleet;
pub(crate) mod gossip;
pub(crate) mod intents;
pub(crate) mod membership;
pub(crate) mod pool;
pub(crate) mod settlement;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{HiveError, HiveErrorCode};

/// Membership tier of an admitted node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
	Neophyte,
	Member,
	Admin,
}

impl Tier {
	pub fn as_str(&self) -> &'static str {
		match self {
			Tier::Neophyte => "neophyte",
			Tier::Member => "member",
			Tier::Admin => "admin",
		}
	}

	pub fn from_str(s: &str) -> Option<Tier> {
		match s {
			"neophyte" => Some(Tier::Neophyte),
			"member" => Some(Tier::Member),
			"admin" => Some(Tier::Admin),
			_ => None,
		}
	}

	/// Members and admins carry full privileges; neophytes are on probation.
	pub fn is_full_member(&self) -> bool {
		matches!(self, Tier::Member | Tier::Admin)
	}
}

/// A row of the membership registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
	pub peer_id: String,
	pub tier: Tier,
	pub joined_at: u64,
	pub promoted_at: Option<u64>,
	pub contribution_ratio: f64,
	pub uptime_pct: f64,
	pub vouch_count: u32,
	pub last_seen: Option<u64>,
	pub metadata: Option<String>,
}

/// Rolling presence accumulator for one peer. Presence transitions add the
/// prior online span so no per-second sampling is needed.
#[derive(Debug, Clone, PartialEq)]
pub struct Presence {
	pub peer_id: String,
	pub last_change_ts: u64,
	pub is_online: bool,
	pub online_seconds_rolling: u64,
	pub window_start_ts: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeechFlag {
	pub peer_id: String,
	pub low_since_ts: u64,
	pub ban_triggered: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BanRecord {
	pub peer_id: String,
	pub reason: String,
	pub reporter: String,
	pub signature: Option<String>,
	pub banned_at: u64,
	pub expires_at: Option<u64>,
}

/// A proposed action awaiting operator approval (advisor mode).
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
	pub id: i64,
	pub action_type: String,
	pub payload: String,
	pub proposed_at: u64,
	pub expires_at: Option<u64>,
	pub status: String,
}

const MAX_PLANNER_LOG_ROWS: u64 = 10_000;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS hive_members (
	peer_id TEXT PRIMARY KEY,
	tier TEXT NOT NULL DEFAULT 'neophyte',
	joined_at INTEGER NOT NULL,
	promoted_at INTEGER,
	contribution_ratio REAL DEFAULT 0.0,
	uptime_pct REAL DEFAULT 0.0,
	vouch_count INTEGER DEFAULT 0,
	last_seen INTEGER,
	metadata TEXT
);

CREATE TABLE IF NOT EXISTS intent_locks (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	intent_type TEXT NOT NULL,
	target TEXT NOT NULL,
	initiator TEXT NOT NULL,
	timestamp INTEGER NOT NULL,
	expires_at INTEGER NOT NULL,
	status TEXT DEFAULT 'pending',
	signature TEXT
);
CREATE INDEX IF NOT EXISTS idx_intent_locks_target
	ON intent_locks(target, status);

CREATE TABLE IF NOT EXISTS contribution_ledger (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	peer_id TEXT NOT NULL,
	direction TEXT NOT NULL,
	amount_sats INTEGER NOT NULL,
	timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_contribution_peer_time
	ON contribution_ledger(peer_id, timestamp);

CREATE TABLE IF NOT EXISTS promotion_requests (
	target_peer_id TEXT NOT NULL,
	request_id TEXT NOT NULL,
	status TEXT NOT NULL DEFAULT 'pending',
	created_at INTEGER NOT NULL,
	PRIMARY KEY (target_peer_id, request_id)
);

CREATE TABLE IF NOT EXISTS promotion_vouches (
	target_peer_id TEXT NOT NULL,
	request_id TEXT NOT NULL,
	voucher_peer_id TEXT NOT NULL,
	sig TEXT NOT NULL,
	timestamp INTEGER NOT NULL,
	PRIMARY KEY (target_peer_id, request_id, voucher_peer_id)
);
CREATE INDEX IF NOT EXISTS idx_promotion_vouches_target_req
	ON promotion_vouches(target_peer_id, request_id);

CREATE TABLE IF NOT EXISTS ban_proposals (
	proposal_id TEXT PRIMARY KEY,
	target_peer_id TEXT NOT NULL,
	proposer_peer_id TEXT NOT NULL,
	reason TEXT NOT NULL,
	proposed_at INTEGER NOT NULL,
	expires_at INTEGER NOT NULL,
	status TEXT NOT NULL DEFAULT 'pending'
);

CREATE TABLE IF NOT EXISTS ban_votes (
	proposal_id TEXT NOT NULL,
	voter_peer_id TEXT NOT NULL,
	vote TEXT NOT NULL,
	voted_at INTEGER NOT NULL,
	signature TEXT NOT NULL,
	PRIMARY KEY (proposal_id, voter_peer_id)
);

CREATE TABLE IF NOT EXISTS peer_presence (
	peer_id TEXT PRIMARY KEY,
	last_change_ts INTEGER NOT NULL,
	is_online INTEGER NOT NULL,
	online_seconds_rolling INTEGER NOT NULL,
	window_start_ts INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS leech_flags (
	peer_id TEXT PRIMARY KEY,
	low_since_ts INTEGER NOT NULL,
	ban_triggered INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS hive_bans (
	peer_id TEXT PRIMARY KEY,
	reason TEXT,
	reporter TEXT NOT NULL,
	signature TEXT,
	banned_at INTEGER NOT NULL,
	expires_at INTEGER
);

CREATE TABLE IF NOT EXISTS pending_actions (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	action_type TEXT NOT NULL,
	payload TEXT NOT NULL,
	proposed_at INTEGER NOT NULL,
	expires_at INTEGER,
	status TEXT DEFAULT 'pending'
);

CREATE TABLE IF NOT EXISTS hive_planner_log (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	timestamp INTEGER NOT NULL,
	action_type TEXT NOT NULL,
	target TEXT,
	result TEXT NOT NULL,
	details TEXT
);

CREATE TABLE IF NOT EXISTS peer_events (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	peer_id TEXT NOT NULL,
	reporter_id TEXT NOT NULL,
	event_type TEXT NOT NULL,
	timestamp INTEGER NOT NULL,
	channel_id TEXT,
	capacity_sats INTEGER DEFAULT 0,
	duration_days INTEGER DEFAULT 0,
	total_revenue_sats INTEGER DEFAULT 0,
	net_pnl_sats INTEGER DEFAULT 0,
	forward_count INTEGER DEFAULT 0,
	forward_volume_sats INTEGER DEFAULT 0,
	our_fee_ppm INTEGER DEFAULT 0,
	their_fee_ppm INTEGER DEFAULT 0,
	opener TEXT,
	closer TEXT,
	reason TEXT
);
CREATE INDEX IF NOT EXISTS idx_peer_events_peer_ts
	ON peer_events(peer_id, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_peer_events_type_ts
	ON peer_events(event_type, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_peer_events_reporter
	ON peer_events(reporter_id, timestamp DESC);

CREATE TABLE IF NOT EXISTS budget_tracking (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	date_key TEXT NOT NULL,
	action_type TEXT NOT NULL,
	amount_sats INTEGER NOT NULL,
	target TEXT,
	timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_budget_date_key
	ON budget_tracking(date_key);

CREATE TABLE IF NOT EXISTS budget_holds (
	hold_id TEXT PRIMARY KEY,
	round_id TEXT NOT NULL,
	peer_id TEXT NOT NULL,
	amount_sats INTEGER NOT NULL,
	created_at INTEGER NOT NULL,
	expires_at INTEGER NOT NULL,
	status TEXT NOT NULL DEFAULT 'active',
	consumed_by TEXT,
	consumed_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_budget_holds_peer_status
	ON budget_holds(peer_id, status);
CREATE INDEX IF NOT EXISTS idx_budget_holds_round
	ON budget_holds(round_id);
CREATE INDEX IF NOT EXISTS idx_budget_holds_expires
	ON budget_holds(expires_at) WHERE status = 'active';

CREATE TABLE IF NOT EXISTS fee_intelligence (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	reporter_id TEXT NOT NULL,
	target_peer_id TEXT NOT NULL,
	timestamp INTEGER NOT NULL,
	our_fee_ppm INTEGER,
	their_fee_ppm INTEGER,
	forward_count INTEGER,
	forward_volume_sats INTEGER,
	revenue_sats INTEGER,
	flow_direction TEXT,
	utilization_pct REAL,
	days_observed INTEGER,
	fees_earned_sats INTEGER DEFAULT 0,
	capacity_sats INTEGER DEFAULT 0,
	uptime_pct INTEGER DEFAULT 100,
	signature TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_fee_intel_target
	ON fee_intelligence(target_peer_id);
CREATE INDEX IF NOT EXISTS idx_fee_intel_reporter
	ON fee_intelligence(reporter_id);

CREATE TABLE IF NOT EXISTS peer_fee_profiles (
	peer_id TEXT PRIMARY KEY,
	reporter_count INTEGER DEFAULT 0,
	avg_fee_charged REAL DEFAULT 0,
	min_fee_charged INTEGER DEFAULT 0,
	max_fee_charged INTEGER DEFAULT 0,
	total_hive_volume INTEGER DEFAULT 0,
	total_hive_revenue INTEGER DEFAULT 0,
	avg_utilization REAL DEFAULT 0,
	last_update INTEGER NOT NULL,
	confidence REAL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS liquidity_needs (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	reporter_id TEXT NOT NULL,
	need_type TEXT NOT NULL,
	target_peer_id TEXT,
	amount_sats INTEGER NOT NULL,
	urgency TEXT DEFAULT 'medium',
	max_fee_ppm INTEGER DEFAULT 0,
	reason TEXT,
	current_balance_pct REAL DEFAULT 0.5,
	timestamp INTEGER NOT NULL,
	UNIQUE(reporter_id, target_peer_id)
);
CREATE INDEX IF NOT EXISTS idx_liquidity_needs_reporter
	ON liquidity_needs(reporter_id);
CREATE INDEX IF NOT EXISTS idx_liquidity_needs_urgency
	ON liquidity_needs(urgency);

CREATE TABLE IF NOT EXISTS route_probes (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	reporter_id TEXT NOT NULL,
	destination TEXT NOT NULL,
	path TEXT NOT NULL,
	timestamp INTEGER NOT NULL,
	success INTEGER NOT NULL,
	latency_ms INTEGER DEFAULT 0,
	failure_reason TEXT DEFAULT '',
	failure_hop INTEGER DEFAULT -1,
	estimated_capacity_sats INTEGER DEFAULT 0,
	total_fee_ppm INTEGER DEFAULT 0,
	amount_probed_sats INTEGER DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_route_probes_destination
	ON route_probes(destination);
CREATE INDEX IF NOT EXISTS idx_route_probes_timestamp
	ON route_probes(timestamp);

CREATE TABLE IF NOT EXISTS peer_reputation (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	reporter_id TEXT NOT NULL,
	peer_id TEXT NOT NULL,
	timestamp INTEGER NOT NULL,
	uptime_pct REAL DEFAULT 1.0,
	response_time_ms INTEGER DEFAULT 0,
	force_close_count INTEGER DEFAULT 0,
	fee_stability REAL DEFAULT 1.0,
	htlc_success_rate REAL DEFAULT 1.0,
	channel_age_days INTEGER DEFAULT 0,
	total_routed_sats INTEGER DEFAULT 0,
	warnings TEXT DEFAULT '[]',
	observation_days INTEGER DEFAULT 7
);
CREATE INDEX IF NOT EXISTS idx_peer_reputation_peer_id
	ON peer_reputation(peer_id);
CREATE INDEX IF NOT EXISTS idx_peer_reputation_timestamp
	ON peer_reputation(timestamp);
CREATE INDEX IF NOT EXISTS idx_peer_reputation_reporter
	ON peer_reputation(reporter_id);

CREATE TABLE IF NOT EXISTS settlement_offers (
	peer_id TEXT PRIMARY KEY,
	bolt12_offer TEXT NOT NULL,
	registered_at INTEGER NOT NULL,
	active INTEGER DEFAULT 1
);

CREATE TABLE IF NOT EXISTS settlement_proposals (
	proposal_id TEXT PRIMARY KEY,
	period TEXT NOT NULL,
	proposer_peer_id TEXT NOT NULL,
	data_hash TEXT NOT NULL,
	total_fees_sats INTEGER NOT NULL,
	member_count INTEGER NOT NULL,
	status TEXT NOT NULL DEFAULT 'pending',
	created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_settlement_proposals_period
	ON settlement_proposals(period);

CREATE TABLE IF NOT EXISTS settlement_ready_votes (
	proposal_id TEXT NOT NULL,
	voter_peer_id TEXT NOT NULL,
	data_hash TEXT NOT NULL,
	signature TEXT NOT NULL,
	voted_at INTEGER NOT NULL,
	PRIMARY KEY (proposal_id, voter_peer_id)
);

CREATE TABLE IF NOT EXISTS settlement_executions (
	proposal_id TEXT NOT NULL,
	executor_peer_id TEXT NOT NULL,
	payment_hash TEXT,
	amount_paid_sats INTEGER NOT NULL DEFAULT 0,
	signature TEXT NOT NULL,
	executed_at INTEGER NOT NULL,
	PRIMARY KEY (proposal_id, executor_peer_id)
);

CREATE TABLE IF NOT EXISTS settled_periods (
	period TEXT PRIMARY KEY,
	proposal_id TEXT NOT NULL,
	total_distributed_sats INTEGER NOT NULL,
	settled_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS hive_state (
	peer_id TEXT PRIMARY KEY,
	capacity_sats INTEGER,
	available_sats INTEGER,
	fee_policy TEXT,
	last_gossip INTEGER,
	version INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS admin_promotions (
	target_peer_id TEXT PRIMARY KEY,
	proposed_by TEXT NOT NULL,
	proposed_at INTEGER NOT NULL,
	status TEXT NOT NULL DEFAULT 'pending'
);

CREATE TABLE IF NOT EXISTS admin_promotion_approvals (
	target_peer_id TEXT NOT NULL,
	approver_peer_id TEXT NOT NULL,
	approved_at INTEGER NOT NULL,
	PRIMARY KEY (target_peer_id, approver_peer_id)
);

CREATE TABLE IF NOT EXISTS member_health (
	peer_id TEXT PRIMARY KEY,
	timestamp INTEGER NOT NULL,
	overall_health INTEGER,
	needs_help INTEGER DEFAULT 0,
	needs_inbound INTEGER DEFAULT 0,
	needs_outbound INTEGER DEFAULT 0,
	needs_channels INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS member_liquidity_state (
	peer_id TEXT PRIMARY KEY,
	depleted_count INTEGER DEFAULT 0,
	saturated_count INTEGER DEFAULT 0,
	rebalancing_active INTEGER DEFAULT 0,
	timestamp INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS pool_contributions (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	member_id TEXT NOT NULL,
	period TEXT NOT NULL,
	total_capacity_sats INTEGER DEFAULT 0,
	forwards_sats INTEGER DEFAULT 0,
	uptime_pct REAL DEFAULT 0.0,
	pool_share REAL DEFAULT 0.0,
	recorded_at INTEGER NOT NULL,
	UNIQUE(member_id, period)
);
CREATE INDEX IF NOT EXISTS idx_pool_contributions_period
	ON pool_contributions(period);

CREATE TABLE IF NOT EXISTS pool_revenue (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	member_id TEXT NOT NULL,
	amount_sats INTEGER NOT NULL,
	channel_id TEXT,
	recorded_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pool_revenue_recorded
	ON pool_revenue(recorded_at);
CREATE INDEX IF NOT EXISTS idx_pool_revenue_member
	ON pool_revenue(member_id);

CREATE TABLE IF NOT EXISTS pool_distributions (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	period TEXT NOT NULL,
	member_id TEXT NOT NULL,
	contribution_share REAL NOT NULL,
	revenue_share_sats INTEGER NOT NULL,
	total_pool_revenue_sats INTEGER NOT NULL,
	settled_at INTEGER NOT NULL,
	UNIQUE(member_id, period)
);
CREATE INDEX IF NOT EXISTS idx_pool_distributions_period
	ON pool_distributions(period);

CREATE TABLE IF NOT EXISTS flow_samples (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	channel_id TEXT NOT NULL,
	hour INTEGER NOT NULL,
	day_of_week INTEGER NOT NULL,
	inbound_sats INTEGER NOT NULL DEFAULT 0,
	outbound_sats INTEGER NOT NULL DEFAULT 0,
	net_flow_sats INTEGER NOT NULL DEFAULT 0,
	timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_flow_samples_channel_ts
	ON flow_samples(channel_id, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_flow_samples_hour
	ON flow_samples(hour);

CREATE TABLE IF NOT EXISTS temporal_patterns (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	channel_id TEXT NOT NULL,
	hour_of_day INTEGER,
	day_of_week INTEGER,
	direction TEXT NOT NULL,
	intensity REAL NOT NULL DEFAULT 1.0,
	confidence REAL NOT NULL DEFAULT 0.5,
	samples INTEGER NOT NULL DEFAULT 0,
	avg_flow_sats INTEGER NOT NULL DEFAULT 0,
	detected_at INTEGER NOT NULL,
	UNIQUE(channel_id, hour_of_day, day_of_week)
);
CREATE INDEX IF NOT EXISTS idx_temporal_patterns_channel
	ON temporal_patterns(channel_id);
"#;

/// The durable state store. One connection, WAL mode; callers share the
/// store behind an `Arc` and the internal mutex serializes writes.
pub struct Store {
	conn: Mutex<Connection>,
}

impl Store {
	/// Opens (and if needed creates) the database at `path`.
	pub fn open(path: &Path) -> Result<Store, HiveError> {
		let conn = Connection::open(path)?;
		Self::init(conn)
	}

	/// Opens an in-memory database. Test use.
	pub fn open_in_memory() -> Result<Store, HiveError> {
		let conn = Connection::open_in_memory()?;
		Self::init(conn)
	}

	fn init(conn: Connection) -> Result<Store, HiveError> {
		conn.busy_timeout(Duration::from_secs(5))?;
		let _mode: String =
			conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0)).unwrap_or_default();
		conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
		conn.execute_batch(SCHEMA).map_err(|e| {
			HiveError::new(HiveErrorCode::Fatal, format!("schema initialization failed: {}", e))
		})?;
		Ok(Store { conn: Mutex::new(conn) })
	}

	pub(crate) fn with_conn<T>(
		&self, f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
	) -> Result<T, HiveError> {
		let conn = self.conn.lock().expect("store mutex poisoned");
		f(&conn).map_err(HiveError::from)
	}

	// =========================================================================
	// Membership registry
	// =========================================================================

	pub fn add_member(&self, peer_id: &str, tier: Tier, joined_at: u64) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"INSERT OR IGNORE INTO hive_members (peer_id, tier, joined_at, last_seen)
				 VALUES (?1, ?2, ?3, ?3)",
				params![peer_id, tier.as_str(), joined_at as i64],
			)?;
			Ok(changed > 0)
		})
	}

	pub fn get_member(&self, peer_id: &str) -> Result<Option<Member>, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT peer_id, tier, joined_at, promoted_at, contribution_ratio, uptime_pct,
						vouch_count, last_seen, metadata
				 FROM hive_members WHERE peer_id = ?1",
				params![peer_id],
				row_to_member,
			)
			.optional()
		})
	}

	pub fn get_all_members(&self) -> Result<Vec<Member>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(
				"SELECT peer_id, tier, joined_at, promoted_at, contribution_ratio, uptime_pct,
						vouch_count, last_seen, metadata
				 FROM hive_members ORDER BY joined_at",
			)?;
			let rows = stmt.query_map([], row_to_member)?;
			rows.collect()
		})
	}

	pub fn set_member_tier(
		&self, peer_id: &str, tier: Tier, promoted_at: Option<u64>,
	) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"UPDATE hive_members SET tier = ?2, promoted_at = ?3 WHERE peer_id = ?1",
				params![peer_id, tier.as_str(), promoted_at.map(|t| t as i64)],
			)?;
			Ok(changed > 0)
		})
	}

	pub fn touch_member(&self, peer_id: &str, last_seen: u64) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"UPDATE hive_members SET last_seen = ?2 WHERE peer_id = ?1",
				params![peer_id, last_seen as i64],
			)?;
			Ok(())
		})
	}

	pub fn update_member_metrics(
		&self, peer_id: &str, contribution_ratio: f64, uptime_pct: f64,
	) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"UPDATE hive_members SET contribution_ratio = ?2, uptime_pct = ?3
				 WHERE peer_id = ?1",
				params![peer_id, contribution_ratio, uptime_pct],
			)?;
			Ok(())
		})
	}

	pub fn bump_vouch_count(&self, peer_id: &str, vouch_count: u32) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"UPDATE hive_members SET vouch_count = ?2 WHERE peer_id = ?1",
				params![peer_id, vouch_count as i64],
			)?;
			Ok(())
		})
	}

	pub fn remove_member(&self, peer_id: &str) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed =
				conn.execute("DELETE FROM hive_members WHERE peer_id = ?1", params![peer_id])?;
			Ok(changed > 0)
		})
	}

	pub fn member_count(&self) -> Result<u32, HiveError> {
		self.with_conn(|conn| {
			conn.query_row("SELECT COUNT(*) FROM hive_members", [], |row| {
				row.get::<_, i64>(0).map(|c| c as u32)
			})
		})
	}

	// =========================================================================
	// Presence (rolling uptime accumulator)
	// =========================================================================

	pub fn get_presence(&self, peer_id: &str) -> Result<Option<Presence>, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT peer_id, last_change_ts, is_online, online_seconds_rolling,
						window_start_ts
				 FROM peer_presence WHERE peer_id = ?1",
				params![peer_id],
				|row| {
					Ok(Presence {
						peer_id: row.get(0)?,
						last_change_ts: row.get::<_, i64>(1)? as u64,
						is_online: row.get::<_, i64>(2)? != 0,
						online_seconds_rolling: row.get::<_, i64>(3)? as u64,
						window_start_ts: row.get::<_, i64>(4)? as u64,
					})
				},
			)
			.optional()
		})
	}

	/// Records a presence transition. The span since the last change is added
	/// to the rolling accumulator when the peer was online, and the window is
	/// clamped once it exceeds `window_seconds`.
	pub fn update_presence(
		&self, peer_id: &str, is_online: bool, now: u64, window_seconds: u64,
	) -> Result<(), HiveError> {
		let prior = self.get_presence(peer_id)?;
		let (mut online_seconds, mut window_start, last_change, was_online) = match prior {
			Some(p) => (p.online_seconds_rolling, p.window_start_ts, p.last_change_ts, p.is_online),
			None => (0, now, now, false),
		};

		if was_online && now > last_change {
			online_seconds += now - last_change;
		}

		if now > window_start && now - window_start > window_seconds {
			// Clamp: keep the accumulator proportional to the window.
			let span = now - window_start;
			online_seconds = online_seconds.min(span) * window_seconds / span;
			window_start = now - window_seconds;
		}

		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO peer_presence
					(peer_id, last_change_ts, is_online, online_seconds_rolling, window_start_ts)
				 VALUES (?1, ?2, ?3, ?4, ?5)
				 ON CONFLICT(peer_id) DO UPDATE SET
					last_change_ts = excluded.last_change_ts,
					is_online = excluded.is_online,
					online_seconds_rolling = excluded.online_seconds_rolling,
					window_start_ts = excluded.window_start_ts",
				params![
					peer_id,
					now as i64,
					is_online as i64,
					online_seconds as i64,
					window_start as i64
				],
			)?;
			Ok(())
		})
	}

	/// Clamps all presence windows. Scheduler job.
	pub fn clamp_presence_windows(&self, now: u64, window_seconds: u64) -> Result<u32, HiveError> {
		let peers: Vec<(String, bool)> = self.with_conn(|conn| {
			let mut stmt = conn.prepare(
				"SELECT peer_id, is_online FROM peer_presence
				 WHERE ?1 - window_start_ts > ?2",
			)?;
			let rows = stmt.query_map(params![now as i64, window_seconds as i64], |row| {
				Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0))
			})?;
			rows.collect()
		})?;
		let mut clamped = 0;
		for (peer_id, is_online) in peers {
			self.update_presence(&peer_id, is_online, now, window_seconds)?;
			clamped += 1;
		}
		Ok(clamped)
	}

	// =========================================================================
	// Leech flags
	// =========================================================================

	pub fn get_leech_flag(&self, peer_id: &str) -> Result<Option<LeechFlag>, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT peer_id, low_since_ts, ban_triggered FROM leech_flags WHERE peer_id = ?1",
				params![peer_id],
				|row| {
					Ok(LeechFlag {
						peer_id: row.get(0)?,
						low_since_ts: row.get::<_, i64>(1)? as u64,
						ban_triggered: row.get::<_, i64>(2)? != 0,
					})
				},
			)
			.optional()
		})
	}

	pub fn set_leech_flag(
		&self, peer_id: &str, low_since_ts: u64, ban_triggered: bool,
	) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO leech_flags (peer_id, low_since_ts, ban_triggered)
				 VALUES (?1, ?2, ?3)
				 ON CONFLICT(peer_id) DO UPDATE SET
					low_since_ts = excluded.low_since_ts,
					ban_triggered = excluded.ban_triggered",
				params![peer_id, low_since_ts as i64, ban_triggered as i64],
			)?;
			Ok(())
		})
	}

	pub fn clear_leech_flag(&self, peer_id: &str) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute("DELETE FROM leech_flags WHERE peer_id = ?1", params![peer_id])?;
			Ok(())
		})
	}

	// =========================================================================
	// Ban list
	// =========================================================================

	pub fn add_ban(&self, ban: &BanRecord) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO hive_bans (peer_id, reason, reporter, signature, banned_at, expires_at)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
				 ON CONFLICT(peer_id) DO UPDATE SET
					reason = excluded.reason,
					reporter = excluded.reporter,
					signature = excluded.signature,
					banned_at = excluded.banned_at,
					expires_at = excluded.expires_at",
				params![
					ban.peer_id,
					ban.reason,
					ban.reporter,
					ban.signature,
					ban.banned_at as i64,
					ban.expires_at.map(|t| t as i64)
				],
			)?;
			Ok(())
		})
	}

	pub fn is_banned(&self, peer_id: &str, now: u64) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let row: Option<Option<i64>> = conn
				.query_row(
					"SELECT expires_at FROM hive_bans WHERE peer_id = ?1",
					params![peer_id],
					|row| row.get(0),
				)
				.optional()?;
			Ok(match row {
				None => false,
				Some(None) => true,
				Some(Some(expires_at)) => (expires_at as u64) > now,
			})
		})
	}

	pub fn remove_ban(&self, peer_id: &str) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed =
				conn.execute("DELETE FROM hive_bans WHERE peer_id = ?1", params![peer_id])?;
			Ok(changed > 0)
		})
	}

	pub fn get_all_bans(&self) -> Result<Vec<BanRecord>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(
				"SELECT peer_id, reason, reporter, signature, banned_at, expires_at
				 FROM hive_bans ORDER BY banned_at DESC",
			)?;
			let rows = stmt.query_map([], |row| {
				Ok(BanRecord {
					peer_id: row.get(0)?,
					reason: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
					reporter: row.get(2)?,
					signature: row.get(3)?,
					banned_at: row.get::<_, i64>(4)? as u64,
					expires_at: row.get::<_, Option<i64>>(5)?.map(|t| t as u64),
				})
			})?;
			rows.collect()
		})
	}

	// =========================================================================
	// Pending actions (advisor mode)
	// =========================================================================

	pub fn add_pending_action(
		&self, action_type: &str, payload: &str, proposed_at: u64, expires_at: Option<u64>,
	) -> Result<i64, HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO pending_actions (action_type, payload, proposed_at, expires_at)
				 VALUES (?1, ?2, ?3, ?4)",
				params![action_type, payload, proposed_at as i64, expires_at.map(|t| t as i64)],
			)?;
			Ok(conn.last_insert_rowid())
		})
	}

	pub fn get_pending_action(&self, id: i64) -> Result<Option<PendingAction>, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT id, action_type, payload, proposed_at, expires_at, status
				 FROM pending_actions WHERE id = ?1",
				params![id],
				row_to_action,
			)
			.optional()
		})
	}

	pub fn get_pending_actions(&self) -> Result<Vec<PendingAction>, HiveError> {
		self.with_conn(|conn| {
			let mut stmt = conn.prepare(
				"SELECT id, action_type, payload, proposed_at, expires_at, status
				 FROM pending_actions WHERE status = 'pending' ORDER BY proposed_at",
			)?;
			let rows = stmt.query_map([], row_to_action)?;
			rows.collect()
		})
	}

	pub fn update_action_status(&self, id: i64, status: &str) -> Result<bool, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"UPDATE pending_actions SET status = ?2 WHERE id = ?1",
				params![id, status],
			)?;
			Ok(changed > 0)
		})
	}

	pub fn cleanup_expired_actions(&self, now: u64) -> Result<u32, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"UPDATE pending_actions SET status = 'expired'
				 WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at <= ?1",
				params![now as i64],
			)?;
			Ok(changed as u32)
		})
	}

	// =========================================================================
	// Planner log (ring buffered audit trail)
	// =========================================================================

	pub fn log_planner_action(
		&self, now: u64, action_type: &str, target: Option<&str>, result: &str,
		details: Option<&str>,
	) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO hive_planner_log (timestamp, action_type, target, result, details)
				 VALUES (?1, ?2, ?3, ?4, ?5)",
				params![now as i64, action_type, target, result, details],
			)?;
			conn.execute(
				"DELETE FROM hive_planner_log WHERE id <= (
					SELECT id FROM hive_planner_log
					ORDER BY id DESC LIMIT 1 OFFSET ?1
				 )",
				params![MAX_PLANNER_LOG_ROWS as i64],
			)?;
			Ok(())
		})
	}

	pub fn prune_planner_logs(&self, older_than: u64) -> Result<u32, HiveError> {
		self.with_conn(|conn| {
			let changed = conn.execute(
				"DELETE FROM hive_planner_log WHERE timestamp < ?1",
				params![older_than as i64],
			)?;
			Ok(changed as u32)
		})
	}
}

fn row_to_member(row: &rusqlite::Row<'_>) -> Result<Member, rusqlite::Error> {
	let tier_str: String = row.get(1)?;
	Ok(Member {
		peer_id: row.get(0)?,
		tier: Tier::from_str(&tier_str).unwrap_or(Tier::Neophyte),
		joined_at: row.get::<_, i64>(2)? as u64,
		promoted_at: row.get::<_, Option<i64>>(3)?.map(|t| t as u64),
		contribution_ratio: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
		uptime_pct: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
		vouch_count: row.get::<_, Option<i64>>(6)?.unwrap_or(0) as u32,
		last_seen: row.get::<_, Option<i64>>(7)?.map(|t| t as u64),
		metadata: row.get(8)?,
	})
}

fn row_to_action(row: &rusqlite::Row<'_>) -> Result<PendingAction, rusqlite::Error> {
	Ok(PendingAction {
		id: row.get(0)?,
		action_type: row.get(1)?,
		payload: row.get(2)?,
		proposed_at: row.get::<_, i64>(3)? as u64,
		expires_at: row.get::<_, Option<i64>>(4)?.map(|t| t as u64),
		status: row.get(5)?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn node_id(tag: u8) -> String {
		format!("02{:02x}{}", tag, "ab".repeat(31))
	}

	#[test]
	fn test_member_lifecycle() {
		let store = Store::open_in_memory().unwrap();
		let id = node_id(1);

		assert!(store.add_member(&id, Tier::Neophyte, 1000).unwrap());
		// Re-adding is a no-op, not an error.
		assert!(!store.add_member(&id, Tier::Member, 2000).unwrap());

		let member = store.get_member(&id).unwrap().unwrap();
		assert_eq!(member.tier, Tier::Neophyte);
		assert_eq!(member.joined_at, 1000);
		assert_eq!(member.promoted_at, None);

		assert!(store.set_member_tier(&id, Tier::Member, Some(5000)).unwrap());
		let member = store.get_member(&id).unwrap().unwrap();
		assert_eq!(member.tier, Tier::Member);
		assert_eq!(member.promoted_at, Some(5000));

		assert!(store.remove_member(&id).unwrap());
		assert!(store.get_member(&id).unwrap().is_none());
	}

	#[test]
	fn test_presence_accumulates_online_spans() {
		let store = Store::open_in_memory().unwrap();
		let id = node_id(2);
		let window = 30 * 86400;

		store.update_presence(&id, true, 1000, window).unwrap();
		store.update_presence(&id, false, 1600, window).unwrap();
		let p = store.get_presence(&id).unwrap().unwrap();
		assert_eq!(p.online_seconds_rolling, 600);
		assert!(!p.is_online);

		// Offline spans add nothing.
		store.update_presence(&id, true, 2000, window).unwrap();
		let p = store.get_presence(&id).unwrap().unwrap();
		assert_eq!(p.online_seconds_rolling, 600);
		assert!(p.is_online);
	}

	#[test]
	fn test_presence_window_clamp() {
		let store = Store::open_in_memory().unwrap();
		let id = node_id(3);
		let window = 100;

		store.update_presence(&id, true, 0, window).unwrap();
		// 1000s later the window is ten times oversized; the accumulator is
		// scaled down to the window share.
		store.update_presence(&id, true, 1000, window).unwrap();
		let p = store.get_presence(&id).unwrap().unwrap();
		assert_eq!(p.window_start_ts, 900);
		assert_eq!(p.online_seconds_rolling, 100);
	}

	#[test]
	fn test_ban_expiry() {
		let store = Store::open_in_memory().unwrap();
		let id = node_id(4);
		store
			.add_ban(&BanRecord {
				peer_id: id.clone(),
				reason: "leech".into(),
				reporter: node_id(5),
				signature: None,
				banned_at: 100,
				expires_at: Some(200),
			})
			.unwrap();
		assert!(store.is_banned(&id, 150).unwrap());
		assert!(!store.is_banned(&id, 200).unwrap());

		// Permanent ban has no expiry.
		store
			.add_ban(&BanRecord {
				peer_id: id.clone(),
				reason: "fraud".into(),
				reporter: node_id(5),
				signature: None,
				banned_at: 100,
				expires_at: None,
			})
			.unwrap();
		assert!(store.is_banned(&id, u64::MAX - 1).unwrap());
	}

	#[test]
	fn test_pending_action_expiry() {
		let store = Store::open_in_memory().unwrap();
		let id = store.add_pending_action("channel_open", "{}", 100, Some(200)).unwrap();
		assert_eq!(store.get_pending_actions().unwrap().len(), 1);
		assert_eq!(store.cleanup_expired_actions(200).unwrap(), 1);
		assert_eq!(store.get_pending_actions().unwrap().len(), 0);
		assert_eq!(store.get_pending_action(id).unwrap().unwrap().status, "expired");
	}

	#[test]
	fn test_planner_log_ring_buffer() {
		let store = Store::open_in_memory().unwrap();
		for i in 0..20 {
			store.log_planner_action(i, "expand", None, "ok", None).unwrap();
		}
		let count: i64 = store
			.with_conn(|conn| {
				conn.query_row("SELECT COUNT(*) FROM hive_planner_log", [], |row| row.get(0))
			})
			.unwrap();
		assert_eq!(count, 20);
	}
}
