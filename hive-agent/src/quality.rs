// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Quality scoring for external peers from shared channel-event history.
//!
//! Scores predict whether a peer is worth opening a channel to. A pattern of
//! remote-initiated closures, short-lived channels or dead routing earns a
//! low score; long cooperative history earns a high one.

use std::sync::Arc;

use crate::error::HiveError;
use crate::store::gossip::PeerEventSummary;
use crate::store::Store;

const WEIGHT_RELIABILITY: f64 = 0.35;
const WEIGHT_PROFITABILITY: f64 = 0.25;
const WEIGHT_ROUTING: f64 = 0.25;
const WEIGHT_CONSISTENCY: f64 = 0.15;

const REMOTE_CLOSE_PENALTY: f64 = 0.3;
const MAX_REMOTE_CLOSE_PENALTY: f64 = 0.6;
const MUTUAL_CLOSE_BONUS: f64 = 0.05;
const MAX_MUTUAL_CLOSE_BONUS: f64 = 0.15;
const DURATION_BONUS_PER_MONTH: f64 = 0.05;
const MAX_DURATION_BONUS: f64 = 0.3;
const SHORT_DURATION_THRESHOLD_DAYS: f64 = 30.0;

const BREAK_EVEN_DAILY_SATS: f64 = 10.0;
const GOOD_DAILY_SATS: f64 = 100.0;
const EXCELLENT_DAILY_SATS: f64 = 500.0;

const LOW_FORWARD_COUNT: u64 = 10;
const MEDIUM_FORWARD_COUNT: u64 = 100;
const HIGH_FORWARD_COUNT: u64 = 1000;

const MIN_EVENTS_FOR_CONFIDENCE: u32 = 3;
const GOOD_CONFIDENCE_EVENTS: u32 = 10;
const HIGH_CONFIDENCE_EVENTS: u32 = 25;

pub const EXCELLENT_THRESHOLD: f64 = 0.80;
pub const GOOD_THRESHOLD: f64 = 0.65;
pub const NEUTRAL_THRESHOLD: f64 = 0.45;
pub const CAUTION_THRESHOLD: f64 = 0.30;

const DEFAULT_HISTORY_DAYS: u64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
	Excellent,
	Good,
	Neutral,
	Caution,
	Avoid,
}

impl Recommendation {
	pub fn as_str(&self) -> &'static str {
		match self {
			Recommendation::Excellent => "excellent",
			Recommendation::Good => "good",
			Recommendation::Neutral => "neutral",
			Recommendation::Caution => "caution",
			Recommendation::Avoid => "avoid",
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityResult {
	pub peer_id: String,
	pub overall_score: f64,
	pub reliability_score: f64,
	pub profitability_score: f64,
	pub routing_score: f64,
	pub consistency_score: f64,
	pub confidence: f64,
	pub recommendation: Recommendation,
}

pub struct QualityScorer {
	store: Arc<Store>,
}

impl QualityScorer {
	pub fn new(store: Arc<Store>) -> Self {
		QualityScorer { store }
	}

	pub fn calculate_score(&self, peer_id: &str, now: u64) -> Result<QualityResult, HiveError> {
		let since = now.saturating_sub(DEFAULT_HISTORY_DAYS * 86400);
		let summary = self.store.get_peer_event_summary(peer_id, since)?;
		Ok(score_summary(peer_id, &summary))
	}
}

/// Pure scoring over an event summary.
pub fn score_summary(peer_id: &str, summary: &PeerEventSummary) -> QualityResult {
	if summary.event_count == 0 {
		// Unknown peers sit exactly at neutral.
		return QualityResult {
			peer_id: peer_id.to_string(),
			overall_score: 0.5,
			reliability_score: 0.5,
			profitability_score: 0.5,
			routing_score: 0.5,
			consistency_score: 0.5,
			confidence: 0.0,
			recommendation: Recommendation::Neutral,
		};
	}

	let reliability = reliability_score(summary);
	let profitability = profitability_score(summary);
	let routing = routing_score(summary);
	let consistency = consistency_score(summary);

	let overall = WEIGHT_RELIABILITY * reliability
		+ WEIGHT_PROFITABILITY * profitability
		+ WEIGHT_ROUTING * routing
		+ WEIGHT_CONSISTENCY * consistency;

	QualityResult {
		peer_id: peer_id.to_string(),
		overall_score: overall,
		reliability_score: reliability,
		profitability_score: profitability,
		routing_score: routing,
		consistency_score: consistency,
		confidence: confidence(summary.event_count),
		recommendation: recommendation(overall),
	}
}

fn reliability_score(summary: &PeerEventSummary) -> f64 {
	let mut score = 0.5;

	if summary.close_count > 0 {
		let closes = summary.close_count as f64;
		let remote_ratio = summary.remote_close_count as f64 / closes;
		score -= (remote_ratio * REMOTE_CLOSE_PENALTY * closes).min(MAX_REMOTE_CLOSE_PENALTY);

		let mutual_ratio = summary.mutual_close_count as f64 / closes;
		score += (mutual_ratio * MUTUAL_CLOSE_BONUS * closes).min(MAX_MUTUAL_CLOSE_BONUS);
	}

	if summary.avg_duration_days > 0.0 {
		let months = summary.avg_duration_days / 30.0;
		score += (months * DURATION_BONUS_PER_MONTH).min(MAX_DURATION_BONUS);
		if summary.avg_duration_days < SHORT_DURATION_THRESHOLD_DAYS && summary.close_count > 0 {
			score -= 0.1;
		}
	}

	score.clamp(0.0, 1.0)
}

fn profitability_score(summary: &PeerEventSummary) -> f64 {
	let days = summary.avg_duration_days.max(1.0);
	let daily_sats = summary.total_revenue_sats as f64 / days;

	let score = if summary.net_pnl_sats < 0 && summary.total_revenue_sats == 0 {
		0.1
	} else if daily_sats >= EXCELLENT_DAILY_SATS {
		1.0
	} else if daily_sats >= GOOD_DAILY_SATS {
		0.75 + 0.25 * (daily_sats - GOOD_DAILY_SATS) / (EXCELLENT_DAILY_SATS - GOOD_DAILY_SATS)
	} else if daily_sats >= BREAK_EVEN_DAILY_SATS {
		0.5 + 0.25 * (daily_sats - BREAK_EVEN_DAILY_SATS) / (GOOD_DAILY_SATS - BREAK_EVEN_DAILY_SATS)
	} else {
		0.2 + 0.3 * daily_sats / BREAK_EVEN_DAILY_SATS
	};

	score.clamp(0.0, 1.0)
}

fn routing_score(summary: &PeerEventSummary) -> f64 {
	let forwards = summary.total_forward_count;
	if forwards == 0 {
		0.2
	} else if forwards < LOW_FORWARD_COUNT {
		0.3
	} else if forwards < MEDIUM_FORWARD_COUNT {
		let span = (MEDIUM_FORWARD_COUNT - LOW_FORWARD_COUNT) as f64;
		0.3 + 0.4 * (forwards - LOW_FORWARD_COUNT) as f64 / span
	} else if forwards < HIGH_FORWARD_COUNT {
		let span = (HIGH_FORWARD_COUNT - MEDIUM_FORWARD_COUNT) as f64;
		0.7 + 0.3 * (forwards - MEDIUM_FORWARD_COUNT) as f64 / span
	} else {
		1.0
	}
}

fn consistency_score(summary: &PeerEventSummary) -> f64 {
	// Agreement across independent reporters; one voice is weak evidence.
	match summary.reporter_count {
		0 | 1 => 0.5,
		2 => 0.7,
		_ => 0.9,
	}
}

fn confidence(event_count: u32) -> f64 {
	if event_count == 0 {
		0.0
	} else if event_count < MIN_EVENTS_FOR_CONFIDENCE {
		0.2
	} else if event_count < GOOD_CONFIDENCE_EVENTS {
		0.5
	} else if event_count < HIGH_CONFIDENCE_EVENTS {
		0.75
	} else {
		1.0
	}
}

fn recommendation(overall: f64) -> Recommendation {
	if overall >= EXCELLENT_THRESHOLD {
		Recommendation::Excellent
	} else if overall >= GOOD_THRESHOLD {
		Recommendation::Good
	} else if overall >= NEUTRAL_THRESHOLD {
		Recommendation::Neutral
	} else if overall >= CAUTION_THRESHOLD {
		Recommendation::Caution
	} else {
		Recommendation::Avoid
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn summary() -> PeerEventSummary {
		PeerEventSummary::default()
	}

	#[test]
	fn test_unknown_peer_is_neutral() {
		let result = score_summary("peer", &summary());
		assert_eq!(result.overall_score, 0.5);
		assert_eq!(result.confidence, 0.0);
		assert_eq!(result.recommendation, Recommendation::Neutral);
	}

	#[test]
	fn test_remote_closer_scores_low() {
		let mut s = summary();
		s.event_count = 6;
		s.close_count = 4;
		s.remote_close_count = 4;
		s.avg_duration_days = 10.0;
		s.reporter_count = 3;
		let result = score_summary("peer", &s);
		// Full remote-close penalty plus short-duration penalty.
		assert!(result.reliability_score < 0.1);
		assert!(result.overall_score < NEUTRAL_THRESHOLD);
	}

	#[test]
	fn test_long_lived_profitable_peer_scores_high() {
		let mut s = summary();
		s.event_count = 30;
		s.close_count = 2;
		s.mutual_close_count = 2;
		s.avg_duration_days = 240.0;
		s.total_revenue_sats = 240 * 600;
		s.total_forward_count = 5_000;
		s.reporter_count = 4;
		let result = score_summary("peer", &s);
		assert!(result.reliability_score >= 0.9);
		assert_eq!(result.routing_score, 1.0);
		assert_eq!(result.profitability_score, 1.0);
		assert_eq!(result.confidence, 1.0);
		assert!(matches!(
			result.recommendation,
			Recommendation::Excellent | Recommendation::Good
		));
	}

	#[test]
	fn test_confidence_bands() {
		assert_eq!(confidence(0), 0.0);
		assert_eq!(confidence(2), 0.2);
		assert_eq!(confidence(5), 0.5);
		assert_eq!(confidence(20), 0.75);
		assert_eq!(confidence(25), 1.0);
	}

	#[test]
	fn test_recommendation_bands() {
		assert_eq!(recommendation(0.85), Recommendation::Excellent);
		assert_eq!(recommendation(0.7), Recommendation::Good);
		assert_eq!(recommendation(0.5), Recommendation::Neutral);
		assert_eq!(recommendation(0.35), Recommendation::Caution);
		assert_eq!(recommendation(0.1), Recommendation::Avoid);
	}
}
