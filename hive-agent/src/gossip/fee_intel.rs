// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Fee intelligence about external peers, aggregated into per-peer profiles.

use std::sync::Arc;

use hive_proto::msgs::{FeeReport, FEE_REPORT_RATE_LIMIT};
use hive_proto::signing;
use log::debug;

use crate::error::HiveError;
use crate::gateway::Gateway;
use crate::gossip::{admit_report, RateLimiter};
use crate::store::gossip::PeerFeeProfile;
use crate::store::Store;

const PROFILE_WINDOW_SECONDS: u64 = 7 * 86400;

pub struct FeeIntelManager {
	store: Arc<Store>,
	gateway: Arc<Gateway>,
	limiter: RateLimiter,
}

impl FeeIntelManager {
	pub fn new(store: Arc<Store>, gateway: Arc<Gateway>) -> Self {
		FeeIntelManager { store, gateway, limiter: RateLimiter::new() }
	}

	pub fn handle_report(
		&self, sender: &str, msg: &FeeReport, now: u64, max_age_seconds: u64,
	) -> Result<(), HiveError> {
		admit_report(
			&self.store,
			&self.gateway,
			&self.limiter,
			sender,
			&msg.reporter,
			msg.timestamp,
			now,
			max_age_seconds,
			FEE_REPORT_RATE_LIMIT,
			&signing::fee_report(msg),
			&msg.signature,
		)?;

		self.store.store_fee_report(msg)?;
		if let Some(offer) = &msg.bolt12_offer {
			// The reporter's settlement offer rides along with fee intel.
			self.store.register_settlement_offer(&msg.reporter, offer, now)?;
		}
		// Fee reports also refresh the fleet-state cache for the reporter.
		self.store.upsert_hive_state(&msg.reporter, msg.capacity_sats, 0, now)?;
		self.update_profile(&msg.target, now)?;
		debug!("fee report from {} about {}", &msg.reporter[..16], &msg.target[..16]);
		Ok(())
	}

	/// Recomputes the aggregated fee profile for one external peer from the
	/// reports inside the profile window.
	fn update_profile(&self, target: &str, now: u64) -> Result<(), HiveError> {
		let since = now.saturating_sub(PROFILE_WINDOW_SECONDS);
		let reports = self.store.get_fee_reports_for_target(target, since)?;
		if reports.is_empty() {
			return Ok(());
		}

		let reporters: std::collections::HashSet<&str> =
			reports.iter().map(|r| r.reporter.as_str()).collect();
		let fees: Vec<u32> = reports.iter().map(|r| r.their_fee_ppm).collect();
		let avg_fee = fees.iter().map(|f| *f as f64).sum::<f64>() / fees.len() as f64;
		let total_volume: u64 = reports.iter().map(|r| r.forward_volume_sats).sum();
		let total_revenue: u64 = reports.iter().map(|r| r.revenue_sats).sum();
		let avg_utilization =
			reports.iter().map(|r| r.utilization_pct).sum::<f64>() / reports.len() as f64;

		// Confidence grows with independent reporters, capped at 1.
		let confidence = (reporters.len() as f64 / 3.0).min(1.0);

		self.store.upsert_fee_profile(&PeerFeeProfile {
			peer_id: target.to_string(),
			reporter_count: reporters.len() as u32,
			avg_fee_charged: avg_fee,
			min_fee_charged: fees.iter().copied().min().unwrap_or(0),
			max_fee_charged: fees.iter().copied().max().unwrap_or(0),
			total_hive_volume: total_volume,
			total_hive_revenue: total_revenue,
			avg_utilization,
			last_update: now,
			confidence,
		})
	}

	pub fn get_profile(&self, target: &str) -> Result<Option<PeerFeeProfile>, HiveError> {
		self.store.get_fee_profile(target)
	}

	pub fn prune(&self, older_than: u64, now: u64) -> Result<u32, HiveError> {
		self.limiter.prune(now, FEE_REPORT_RATE_LIMIT.window_seconds);
		self.store.prune_fee_reports(older_than)
	}
}
