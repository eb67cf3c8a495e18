#![deny(warnings)]

//! Bonus composition: effective durations, costs and rewards.
//!
//! Every caller that shows or charges a price goes through these functions:
//! - Duration divides by `1 + Σ speed% / 100` (hire jobs are exempt)
//! - Money bonuses sum to a percent on top of 100, then apply as a
//!   multiplier: costs divide by it, rewards multiply by it
//! - Monetary outputs are floored to integers
//!
//! Training scores are also produced here, with seeded noise so a given job
//! always yields the same score.

use lab_core::{JobKind, Rewards};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

/// Errors produced by bonus helpers.
#[derive(Debug, Error, PartialEq)]
pub enum EconError {
    /// Total speed bonus at or below -100% would stall or reverse time.
    #[error("speed divisor must be > 0, got {0}")]
    NonPositiveSpeed(Decimal),
    /// Money multiplier at or below zero makes every cost unbounded.
    #[error("money multiplier must be > 0, got {0}")]
    NonPositiveMultiplier(Decimal),
    /// Noise fraction must be within [0, 1).
    #[error("invalid noise fraction: {0}")]
    InvalidNoise(f32),
    /// Numeric conversion failed.
    #[error("non-finite numeric conversion")]
    NonFinite,
}

/// Speed and money contribution of one bonus source, in percent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBonus {
    pub speed_pct: Decimal,
    pub money_pct: Decimal,
}

impl SourceBonus {
    pub fn new(speed_pct: Decimal, money_pct: Decimal) -> Self {
        Self {
            speed_pct,
            money_pct,
        }
    }

    /// Upgrade-rank source: the money track value includes its own 100% base.
    pub fn from_upgrade(speed_pct: Decimal, money_multiplier_pct: Decimal) -> Self {
        Self {
            speed_pct,
            money_pct: money_multiplier_pct - Decimal::ONE_HUNDRED,
        }
    }
}

/// The five independent bonus sources of an owner at a point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerBonuses {
    pub founder: SourceBonus,
    pub upgrade: SourceBonus,
    pub research: SourceBonus,
    /// Sum over in-progress hires with an active effect.
    pub hires: SourceBonus,
    pub level: SourceBonus,
}

impl OwnerBonuses {
    fn sources(&self) -> [SourceBonus; 5] {
        [self.founder, self.upgrade, self.research, self.hires, self.level]
    }

    /// Additive speed bonus over all sources, in percent.
    pub fn total_speed_pct(&self) -> Decimal {
        self.sources().iter().map(|s| s.speed_pct).sum()
    }

    /// 100 plus every money bonus, in percent.
    pub fn money_total_pct(&self) -> Decimal {
        Decimal::ONE_HUNDRED + self.sources().iter().map(|s| s.money_pct).sum::<Decimal>()
    }

    pub fn money_multiplier(&self) -> Decimal {
        self.money_total_pct() / Decimal::ONE_HUNDRED
    }
}

fn to_u64_saturating(d: Decimal) -> u64 {
    if d.is_sign_negative() {
        return 0;
    }
    d.to_u64().unwrap_or(u64::MAX)
}

/// Effective duration in milliseconds, rounded to the nearest millisecond.
///
/// Example: 300000 ms with +15% speed gives 260870 ms.
pub fn effective_duration(
    base_ms: u64,
    kind: JobKind,
    bonuses: &OwnerBonuses,
) -> Result<u64, EconError> {
    if kind == JobKind::Hire {
        return Ok(base_ms);
    }
    let divisor = Decimal::ONE + bonuses.total_speed_pct() / Decimal::ONE_HUNDRED;
    if divisor <= Decimal::ZERO {
        return Err(EconError::NonPositiveSpeed(divisor));
    }
    let scaled = (Decimal::from(base_ms) / divisor)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    trace!(base_ms, %divisor, %scaled, "effective duration");
    Ok(to_u64_saturating(scaled))
}

/// Effective cost: base divided by the money multiplier, floored.
///
/// Example: 1000 at a 1.20 multiplier gives 833.
pub fn effective_cost(base: u64, bonuses: &OwnerBonuses) -> Result<u64, EconError> {
    if base == 0 {
        return Ok(0);
    }
    let mult = bonuses.money_multiplier();
    if mult <= Decimal::ZERO {
        return Err(EconError::NonPositiveMultiplier(mult));
    }
    Ok(to_u64_saturating((Decimal::from(base) / mult).floor()))
}

/// Effective reward: base times the money multiplier, floored at zero.
pub fn effective_reward(base: u64, bonuses: &OwnerBonuses) -> u64 {
    let mult = bonuses.money_multiplier();
    match Decimal::from(base).checked_mul(mult) {
        Some(v) => to_u64_saturating(v.floor()),
        None => u64::MAX,
    }
}

/// Apply the money multiplier to the currency part of a reward bundle.
/// Research points and experience are granted as-is.
pub fn effective_rewards(base: &Rewards, bonuses: &OwnerBonuses) -> Rewards {
    Rewards {
        currency: effective_reward(base.currency, bonuses),
        research_points: base.research_points,
        experience: base.experience,
    }
}

/// Score of a training run: `base_score` scaled by a seeded uniform factor in
/// `[1 - noise_frac, 1 + noise_frac]`, rounded to two decimals.
pub fn training_score(base_score: Decimal, noise_frac: f32, seed: u64) -> Result<Decimal, EconError> {
    if !noise_frac.is_finite() || !(0.0..1.0).contains(&noise_frac) {
        return Err(EconError::InvalidNoise(noise_frac));
    }
    if noise_frac == 0.0 {
        return Ok(base_score.round_dp(2));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let u: f32 = rng.gen_range(-noise_frac..=noise_frac);
    let factor = Decimal::from_f32(1.0 + u).ok_or(EconError::NonFinite)?;
    Ok((base_score * factor).max(Decimal::ZERO).round_dp(2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn speed(pcts: &[i64]) -> OwnerBonuses {
        let mut b = OwnerBonuses::default();
        let slots = [
            &mut b.founder,
            &mut b.upgrade,
            &mut b.research,
            &mut b.hires,
            &mut b.level,
        ];
        for (slot, pct) in slots.into_iter().zip(pcts) {
            slot.speed_pct = Decimal::from(*pct);
        }
        b
    }

    fn money(total_bonus_pct: i64) -> OwnerBonuses {
        OwnerBonuses {
            founder: SourceBonus::new(Decimal::ZERO, Decimal::from(total_bonus_pct)),
            ..OwnerBonuses::default()
        }
    }

    #[test]
    fn duration_divides_by_speed_sum() {
        let b = speed(&[10, 5, 0]);
        assert_eq!(b.total_speed_pct(), Decimal::from(15));
        assert_eq!(
            effective_duration(300_000, JobKind::Training, &b).unwrap(),
            260_870
        );
    }

    #[test]
    fn hires_are_exempt_from_speed() {
        let b = speed(&[50]);
        assert_eq!(effective_duration(60_000, JobKind::Hire, &b).unwrap(), 60_000);
        assert_eq!(effective_duration(60_000, JobKind::Research, &b).unwrap(), 40_000);
    }

    #[test]
    fn stalled_speed_is_rejected() {
        let b = speed(&[-100]);
        assert!(matches!(
            effective_duration(1_000, JobKind::Contract, &b),
            Err(EconError::NonPositiveSpeed(_))
        ));
    }

    #[test]
    fn cost_divides_by_money_multiplier() {
        let b = money(20);
        assert_eq!(b.money_multiplier(), Decimal::new(120, 2));
        assert_eq!(effective_cost(1000, &b).unwrap(), 833);
        assert_eq!(effective_reward(1000, &b), 1200);
    }

    #[test]
    fn upgrade_money_subtracts_its_base() {
        let b = OwnerBonuses {
            founder: SourceBonus::new(Decimal::ZERO, Decimal::from(5)),
            upgrade: SourceBonus::from_upgrade(Decimal::ZERO, Decimal::from(110)),
            research: SourceBonus::new(Decimal::ZERO, Decimal::from(3)),
            hires: SourceBonus::new(Decimal::ZERO, Decimal::from(2)),
            level: SourceBonus::default(),
        };
        assert_eq!(b.money_total_pct(), Decimal::from(120));
        assert_eq!(effective_cost(1000, &b).unwrap(), 833);
    }

    #[test]
    fn zero_cost_stays_zero() {
        assert_eq!(effective_cost(0, &money(-100)).unwrap(), 0);
        assert_eq!(effective_cost(1, &money(500)).unwrap(), 0);
        assert!(effective_cost(10, &money(-100)).is_err());
        assert_eq!(effective_reward(10, &money(-150)), 0);
    }

    #[test]
    fn rewards_scale_currency_only() {
        let base = Rewards {
            currency: 250,
            research_points: 7,
            experience: 15,
        };
        let r = effective_rewards(&base, &money(20));
        assert_eq!(r.currency, 300);
        assert_eq!(r.research_points, 7);
        assert_eq!(r.experience, 15);
    }

    #[test]
    fn score_noise_is_seeded_and_bounded() {
        let base = Decimal::from(80);
        let a = training_score(base, 0.1, 7).unwrap();
        let b = training_score(base, 0.1, 7).unwrap();
        assert_eq!(a, b);
        assert!(a >= Decimal::from(72) && a <= Decimal::from(88));
        assert_eq!(training_score(base, 0.0, 1).unwrap(), base);
        assert!(training_score(base, 1.5, 1).is_err());
    }

    proptest! {
        #[test]
        fn cost_never_increases_with_bonus(base in 0u64..1_000_000, lo in 0i64..200, extra in 0i64..200) {
            let c1 = effective_cost(base, &money(lo)).unwrap();
            let c2 = effective_cost(base, &money(lo + extra)).unwrap();
            prop_assert!(c2 <= c1);
            prop_assert!(c1 <= base);
        }

        #[test]
        fn duration_never_increases_with_speed(base in 1u64..10_000_000, lo in 0i64..300, extra in 0i64..300) {
            let d1 = effective_duration(base, JobKind::Training, &speed(&[lo])).unwrap();
            let d2 = effective_duration(base, JobKind::Training, &speed(&[lo + extra])).unwrap();
            prop_assert!(d2 <= d1);
            prop_assert!(d1 <= base);
        }
    }
}
