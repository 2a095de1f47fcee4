// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Local caches of fleet-wide state: per-member capacity, health flags and
//! liquidity standing, refreshed from gossip. Information only; nothing in
//! these tables moves funds.

use rusqlite::{params, OptionalExtension};

use crate::error::HiveError;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq)]
pub struct HiveState {
	pub peer_id: String,
	pub capacity_sats: u64,
	pub available_sats: u64,
	pub fee_policy: Option<String>,
	pub last_gossip: u64,
	pub version: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberHealth {
	pub peer_id: String,
	pub timestamp: u64,
	pub overall_health: u32,
	pub needs_help: bool,
	pub needs_inbound: bool,
	pub needs_outbound: bool,
	pub needs_channels: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberLiquidityState {
	pub peer_id: String,
	pub depleted_count: u32,
	pub saturated_count: u32,
	pub rebalancing_active: bool,
	pub timestamp: u64,
}

impl Store {
	pub fn upsert_hive_state(
		&self, peer_id: &str, capacity_sats: u64, available_sats: u64, now: u64,
	) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO hive_state (peer_id, capacity_sats, available_sats, last_gossip, version)
				 VALUES (?1, ?2, ?3, ?4, 1)
				 ON CONFLICT(peer_id) DO UPDATE SET
					capacity_sats = excluded.capacity_sats,
					available_sats = excluded.available_sats,
					last_gossip = excluded.last_gossip,
					version = version + 1",
				params![peer_id, capacity_sats as i64, available_sats as i64, now as i64],
			)?;
			Ok(())
		})
	}

	pub fn get_hive_state(&self, peer_id: &str) -> Result<Option<HiveState>, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT peer_id, capacity_sats, available_sats, fee_policy, last_gossip, version
				 FROM hive_state WHERE peer_id = ?1",
				params![peer_id],
				|row| {
					Ok(HiveState {
						peer_id: row.get(0)?,
						capacity_sats: row.get::<_, Option<i64>>(1)?.unwrap_or(0) as u64,
						available_sats: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as u64,
						fee_policy: row.get(3)?,
						last_gossip: row.get::<_, Option<i64>>(4)?.unwrap_or(0) as u64,
						version: row.get::<_, Option<i64>>(5)?.unwrap_or(0) as u32,
					})
				},
			)
			.optional()
		})
	}

	pub fn upsert_member_health(&self, health: &MemberHealth) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO member_health
					(peer_id, timestamp, overall_health, needs_help, needs_inbound,
					 needs_outbound, needs_channels)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
				 ON CONFLICT(peer_id) DO UPDATE SET
					timestamp = excluded.timestamp,
					overall_health = excluded.overall_health,
					needs_help = excluded.needs_help,
					needs_inbound = excluded.needs_inbound,
					needs_outbound = excluded.needs_outbound,
					needs_channels = excluded.needs_channels",
				params![
					health.peer_id,
					health.timestamp as i64,
					health.overall_health as i64,
					health.needs_help as i64,
					health.needs_inbound as i64,
					health.needs_outbound as i64,
					health.needs_channels as i64
				],
			)?;
			Ok(())
		})
	}

	pub fn get_member_health(&self, peer_id: &str) -> Result<Option<MemberHealth>, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT peer_id, timestamp, overall_health, needs_help, needs_inbound,
						needs_outbound, needs_channels
				 FROM member_health WHERE peer_id = ?1",
				params![peer_id],
				|row| {
					Ok(MemberHealth {
						peer_id: row.get(0)?,
						timestamp: row.get::<_, i64>(1)? as u64,
						overall_health: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as u32,
						needs_help: row.get::<_, i64>(3)? != 0,
						needs_inbound: row.get::<_, i64>(4)? != 0,
						needs_outbound: row.get::<_, i64>(5)? != 0,
						needs_channels: row.get::<_, i64>(6)? != 0,
					})
				},
			)
			.optional()
		})
	}

	pub fn upsert_member_liquidity_state(
		&self, state: &MemberLiquidityState,
	) -> Result<(), HiveError> {
		self.with_conn(|conn| {
			conn.execute(
				"INSERT INTO member_liquidity_state
					(peer_id, depleted_count, saturated_count, rebalancing_active, timestamp)
				 VALUES (?1, ?2, ?3, ?4, ?5)
				 ON CONFLICT(peer_id) DO UPDATE SET
					depleted_count = excluded.depleted_count,
					saturated_count = excluded.saturated_count,
					rebalancing_active = excluded.rebalancing_active,
					timestamp = excluded.timestamp",
				params![
					state.peer_id,
					state.depleted_count as i64,
					state.saturated_count as i64,
					state.rebalancing_active as i64,
					state.timestamp as i64
				],
			)?;
			Ok(())
		})
	}

	pub fn get_member_liquidity_state(
		&self, peer_id: &str,
	) -> Result<Option<MemberLiquidityState>, HiveError> {
		self.with_conn(|conn| {
			conn.query_row(
				"SELECT peer_id, depleted_count, saturated_count, rebalancing_active, timestamp
				 FROM member_liquidity_state WHERE peer_id = ?1",
				params![peer_id],
				|row| {
					Ok(MemberLiquidityState {
						peer_id: row.get(0)?,
						depleted_count: row.get::<_, i64>(1)? as u32,
						saturated_count: row.get::<_, i64>(2)? as u32,
						rebalancing_active: row.get::<_, i64>(3)? != 0,
						timestamp: row.get::<_, i64>(4)? as u64,
					})
				},
			)
			.optional()
		})
	}
}
