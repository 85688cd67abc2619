//! Pure reputation scoring. `compute_score` is a deterministic function of
//! one agent's durable history: the same inputs always produce the same
//! output, and it is cheap enough to re-run on every mutation that could
//! change it.

use chrono::{DateTime, Utc};

const SECONDS_PER_MONTH: i64 = 30 * 24 * 3600;

/// Everything the reputation formula needs about one agent.
#[derive(Debug, Clone, Copy)]
pub struct ReputationInputs {
    pub identity_verified: bool,
    pub stake_amount: f64,
    pub vouches_received_count: u32,
    pub total_actions: u64,
    pub successful_actions: u64,
    pub failed_actions: u64,
    pub created_at: DateTime<Utc>,
}

/// Run the formula described in spec §4.1 and return a score clamped to
/// `0..=100`.
pub fn compute_score(inputs: &ReputationInputs, now: DateTime<Utc>) -> u8 {
    let base: f64 = 50.0;

    let identity: f64 = if inputs.identity_verified { 10.0 } else { 0.0 };

    let stake: f64 = if inputs.stake_amount <= 0.0 {
        0.0
    } else {
        (5.0 + (inputs.stake_amount / 100.0).floor()).min(15.0)
    };

    let vouches: f64 = (2.0 * inputs.vouches_received_count as f64).min(20.0);

    let success_rate: f64 = if inputs.total_actions > 0 {
        (20.0 * inputs.successful_actions as f64 / inputs.total_actions as f64).round()
    } else {
        0.0
    };

    let age_seconds = (now - inputs.created_at).num_seconds().max(0);
    let months_since_created = age_seconds / SECONDS_PER_MONTH;
    let age: f64 = (months_since_created as f64).min(10.0);

    let failure_penalty: f64 = 5.0 * inputs.failed_actions as f64;

    let sum = base + identity + stake + vouches + success_rate + age - failure_penalty;

    sum.clamp(0.0, 100.0).round() as u8
}

/// `successRate` as it appears on an issued certificate: `None` when the
/// agent has never acted, otherwise a fraction in `0..=1` rounded to two
/// decimal places.
pub fn success_rate_claim(successful_actions: u64, total_actions: u64) -> Option<f64> {
    if total_actions == 0 {
        return None;
    }
    let ratio = successful_actions as f64 / total_actions as f64;
    Some((ratio * 100.0).round() / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn inputs(overrides: impl FnOnce(&mut ReputationInputs)) -> ReputationInputs {
        let mut base = ReputationInputs {
            identity_verified: false,
            stake_amount: 0.0,
            vouches_received_count: 0,
            total_actions: 0,
            successful_actions: 0,
            failed_actions: 0,
            created_at: Utc::now(),
        };
        overrides(&mut base);
        base
    }

    #[test]
    fn brand_new_unverified_agent_scores_base() {
        let inp = inputs(|_| {});
        assert_eq!(compute_score(&inp, Utc::now()), 50);
    }

    #[test]
    fn identity_verification_adds_ten() {
        let inp = inputs(|i| i.identity_verified = true);
        assert_eq!(compute_score(&inp, Utc::now()), 60);
    }

    #[test]
    fn stake_bonus_boundaries() {
        let now = Utc::now();
        assert_eq!(
            compute_score(&inputs(|i| i.stake_amount = 0.0), now),
            50
        );
        assert_eq!(
            compute_score(&inputs(|i| i.stake_amount = 1.0), now),
            55
        );
        assert_eq!(
            compute_score(&inputs(|i| i.stake_amount = 100.0), now),
            56
        );
        assert_eq!(
            compute_score(&inputs(|i| i.stake_amount = 1000.0), now),
            65
        );
        // saturates at 15 past 1000
        assert_eq!(
            compute_score(&inputs(|i| i.stake_amount = 5000.0), now),
            65
        );
    }

    #[test]
    fn vouch_bonus_saturates_at_twenty() {
        let now = Utc::now();
        assert_eq!(
            compute_score(&inputs(|i| i.vouches_received_count = 10), now),
            70
        );
        assert_eq!(
            compute_score(&inputs(|i| i.vouches_received_count = 11), now),
            70
        );
    }

    #[test]
    fn success_rate_component_rounds() {
        let now = Utc::now();
        let inp = inputs(|i| {
            i.total_actions = 3;
            i.successful_actions = 2;
        });
        // 20 * 2/3 = 13.33 -> rounds to 13
        assert_eq!(compute_score(&inp, now), 50 + 13);
    }

    #[test]
    fn total_actions_zero_contributes_nothing() {
        let now = Utc::now();
        let inp = inputs(|i| {
            i.total_actions = 0;
            i.successful_actions = 0;
        });
        assert_eq!(compute_score(&inp, now), 50);
        assert_eq!(success_rate_claim(0, 0), None);
    }

    #[test]
    fn age_bonus_clamped_to_ten_months() {
        let now = Utc::now();
        let created = now - Duration::days(40 * 30);
        let inp = inputs(|i| i.created_at = created);
        assert_eq!(compute_score(&inp, now), 60);
    }

    #[test]
    fn failure_penalty_clamps_score_at_zero() {
        let now = Utc::now();
        let inp = inputs(|i| {
            i.total_actions = 100;
            i.failed_actions = 100;
        });
        assert_eq!(compute_score(&inp, now), 0);
    }

    #[test]
    fn score_is_a_pure_function_of_its_inputs() {
        let now = Utc::now();
        let inp = inputs(|i| {
            i.identity_verified = true;
            i.stake_amount = 250.0;
            i.vouches_received_count = 4;
            i.total_actions = 10;
            i.successful_actions = 8;
            i.failed_actions = 2;
        });
        let first = compute_score(&inp, now);
        let second = compute_score(&inp, now);
        assert_eq!(first, second);
    }

    #[test]
    fn success_rate_claim_rounds_to_two_decimals() {
        assert_eq!(success_rate_claim(1, 3), Some(0.33));
        assert_eq!(success_rate_claim(1, 1), Some(1.0));
    }
}
