//! APR and other values derived from cached quantities.

use crate::format::quantity_to_f64;
use crate::types::Quantity;

pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 60 * 60;

/// Annualised return of `total_rewards` paid over `duration_secs` against `total_staked`.
///
/// Zero when nothing is staked or the duration is zero.
pub fn calculate_apr(total_rewards: Quantity, total_staked: Quantity, duration_secs: u64) -> f64 {
    if total_staked.is_zero() || duration_secs == 0 {
        return 0.0;
    }
    let yearly = match total_rewards.checked_mul(Quantity::from(SECONDS_PER_YEAR)) {
        Some(scaled) => quantity_to_f64(scaled / Quantity::from(duration_secs)),
        // past 256 bits, annualise in floating point
        None => quantity_to_f64(total_rewards) * SECONDS_PER_YEAR as f64 / duration_secs as f64,
    };
    yearly / quantity_to_f64(total_staked)
}

/// A pluggable APR estimate for a staking pool.
pub trait AprModel: Send + Sync {
    fn apr(&self, reward_rate: Quantity, total_staked: Quantity) -> f64;
}

/// A constant APR while anything is staked.
#[derive(Debug, Clone, Copy)]
pub struct FixedApr(pub f64);

impl Default for FixedApr {
    fn default() -> Self {
        FixedApr(0.12)
    }
}

impl AprModel for FixedApr {
    fn apr(&self, _reward_rate: Quantity, total_staked: Quantity) -> f64 {
        if total_staked.is_zero() {
            0.0
        } else {
            self.0
        }
    }
}

/// APR from a per-second reward rate, assuming reward and stake share a unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct RewardRateApr;

impl AprModel for RewardRateApr {
    fn apr(&self, reward_rate: Quantity, total_staked: Quantity) -> f64 {
        calculate_apr(reward_rate, total_staked, 1)
    }
}
