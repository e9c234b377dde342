// src/fee_market.rs
//
// Dynamic fee-floor & suggestion logic used by the mempool:
//
// • Maintains an EMA-based floor price from recent blocks (observed min-accepted fees)
// • Reacts to congestion with a surge multiplier derived from pending gas pressure
// • Provides base/tip split helpers compatible with legacy & dual-fee txs
// • Supplies a single admission policy decision (accept/reject + reason)
//
// Pure module, no IO. All arithmetic is integer; ratios are basis points and
// division truncates toward zero so every node computes the same floor.

use serde::{Deserialize, Serialize};

use crate::transaction::FeeFields;

pub const WEI: u128 = 1;
pub const GWEI: u128 = 1_000_000_000;

/// Basis-points denominator (100.00%).
pub const BPS_DEN: u64 = 10_000;

/* ---------------------------------------------------------------------
   Config & state
---------------------------------------------------------------------*/
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeMarketConfig {
    /// Target utilization of the block gas limit.
    pub target_utilization_bps: u64,

    /// EMA smoothing factors; larger = more responsive.
    pub ema_alpha_price_bps: u64,
    pub ema_alpha_util_bps: u64,

    /// Per-block change clamp for the price floor.
    pub change_limit_bps: u64,

    /// Absolute clamps on the floor, in wei per gas. u64 keeps the config
    /// TOML-serializable; state and prices are widened to u128 internally.
    pub min_base_fee: u64,
    pub max_base_fee: u64,

    /// Tip floor (to avoid 0-tip griefing).
    pub min_tip: u64,

    /// Surge trigger: pending gas worth this many milli-blocks at target capacity.
    pub surge_pending_milliblocks: u64,
    /// Surge multiplier slope per extra pending block.
    pub surge_beta_bps: u64,
    /// Hard cap on the surge multiplier.
    pub surge_cap_bps: u64,
}

impl Default for FeeMarketConfig {
    fn default() -> Self {
        Self {
            target_utilization_bps: 5_000,
            ema_alpha_price_bps: 2_000,
            ema_alpha_util_bps: 2_000,
            change_limit_bps: 1_250,
            min_base_fee: GWEI as u64,
            max_base_fee: 1_000 * GWEI as u64,
            min_tip: GWEI as u64,
            surge_pending_milliblocks: 3_000,
            surge_beta_bps: 2_500,
            surge_cap_bps: 40_000,
        }
    }
}

/// Rolling estimate of the base-fee floor & utilization pressure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeMarketState {
    pub height: u64,
    pub ema_floor: u128,
    pub ema_util_bps: u64,
    /// Consecutive blocks above target utilization.
    pub fullness_streak: u32,
}

impl Default for FeeMarketState {
    fn default() -> Self {
        Self {
            height: 0,
            ema_floor: GWEI,
            ema_util_bps: 5_000,
            fullness_streak: 0,
        }
    }
}

/// Pending gas and counts at the moment of admission/suggestion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MempoolPressure {
    pub pending_txs: usize,
    pub pending_gas: u64,
    /// Gas limit of the current parent, used to normalize pending gas.
    pub block_gas_limit: u64,
}

/* ---------------------------------------------------------------------
   Helpers
---------------------------------------------------------------------*/
fn ema_u128(prev: u128, obs: u128, alpha_bps: u64) -> u128 {
    let a = alpha_bps.min(BPS_DEN) as u128;
    let keep = (BPS_DEN as u128) - a;
    (keep * prev + a * obs) / BPS_DEN as u128
}

fn ema_bps(prev: u64, obs: u64, alpha_bps: u64) -> u64 {
    let a = alpha_bps.min(BPS_DEN);
    (((BPS_DEN - a) as u128 * prev as u128 + a as u128 * obs as u128) / BPS_DEN as u128) as u64
}

fn clamp_u128(val: u128, lo: u128, hi: u128) -> u128 {
    val.max(lo).min(hi)
}

/// Clamp the absolute per-step change to ±limit of prev.
fn clamp_change(prev: u128, next: u128, limit_bps: u64) -> u128 {
    if prev == 0 {
        return next;
    }
    let delta = prev * limit_bps as u128 / BPS_DEN as u128;
    let max_up = prev + delta;
    let max_down = prev - delta;
    next.min(max_up).max(max_down)
}

/* ---------------------------------------------------------------------
   Core update
---------------------------------------------------------------------*/

/// Update the EMA floor & utilization from a new canonical block.
///
/// The price observation prefers the included-fee median, then the minimum
/// accepted fee, and falls back to a synthetic signal scaling the previous
/// floor by utilization pressure relative to target.
pub fn update_on_block(
    state: &FeeMarketState,
    height: u64,
    gas_used: u64,
    gas_limit: u64,
    observed_p50_fee: Option<u128>,
    observed_min_accepted_fee: Option<u128>,
    cfg: &FeeMarketConfig,
) -> FeeMarketState {
    let mut s = state.clone();
    s.height = height;

    let target_gas = gas_limit as u128 * cfg.target_utilization_bps as u128 / BPS_DEN as u128;
    let util_bps = if gas_limit == 0 {
        0
    } else {
        (gas_used as u128 * BPS_DEN as u128 / gas_limit as u128) as u64
    };
    s.ema_util_bps = ema_bps(state.ema_util_bps, util_bps, cfg.ema_alpha_util_bps);

    if (gas_used as u128) > target_gas {
        s.fullness_streak += 1;
    } else {
        s.fullness_streak = 0;
    }

    let obs_price = match (observed_p50_fee, observed_min_accepted_fee) {
        (Some(p50), _) => p50,
        (None, Some(min_fee)) => min_fee,
        (None, None) => {
            // Synthetic signal: scale the previous floor by pressure relative
            // to target, floored at -90%.
            let target = cfg.target_utilization_bps.max(1) as i128;
            let pressure_bps =
                ((util_bps as i128 - target) * BPS_DEN as i128 / target).max(-9_000);
            let scale = (BPS_DEN as i128 + pressure_bps).max(0) as u128;
            state.ema_floor * scale / BPS_DEN as u128
        }
    };

    // Clamp the observation to the ceiling before smoothing; the EMA
    // multiply must stay in u128 range.
    let obs_price = obs_price.min(cfg.max_base_fee as u128);
    let raw_next = ema_u128(state.ema_floor, obs_price, cfg.ema_alpha_price_bps);
    let clamped = clamp_change(state.ema_floor, raw_next, cfg.change_limit_bps);
    s.ema_floor = clamp_u128(clamped, cfg.min_base_fee as u128, cfg.max_base_fee as u128);
    s
}

/* ---------------------------------------------------------------------
   Surge multiplier
---------------------------------------------------------------------*/

/// Convert pending gas into a multiplicative surge factor, in basis points.
///
/// pending_milliblocks = pending_gas·1000 / (target_util · block_gas_limit)
/// multiplier = 1 + beta · max(0, pending_blocks − surge_pending_blocks)
pub fn surge_multiplier_bps(pressure: &MempoolPressure, cfg: &FeeMarketConfig) -> u64 {
    let denom = (pressure.block_gas_limit as u128 * cfg.target_utilization_bps as u128
        / BPS_DEN as u128)
        .max(1);
    let pending_milliblocks = pressure.pending_gas as u128 * 1_000 / denom;
    let over = pending_milliblocks.saturating_sub(cfg.surge_pending_milliblocks as u128);
    let mult = BPS_DEN as u128 + cfg.surge_beta_bps as u128 * over / 1_000;
    (mult.min(cfg.surge_cap_bps as u128) as u64).max(BPS_DEN)
}

/* ---------------------------------------------------------------------
   Floor computation & suggestions
---------------------------------------------------------------------*/
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSuggestion {
    /// Suggested base fee (floor before surge).
    pub base_fee: u128,
    pub surge_multiplier_bps: u64,
    /// Admission floor after surge.
    pub floor_with_surge: u128,
    pub min_tip: u128,
    /// Heuristic: higher of tip floor or ~10% of base.
    pub recommended_tip: u128,
    pub min_total_price: u128,
    pub suggested_legacy_gas_price: u128,
}

pub fn suggest_fees(
    state: &FeeMarketState,
    pressure: &MempoolPressure,
    cfg: &FeeMarketConfig,
) -> FeeSuggestion {
    let base = state.ema_floor;
    let mult = surge_multiplier_bps(pressure, cfg);
    let surged = clamp_u128(
        base * mult as u128 / BPS_DEN as u128,
        cfg.min_base_fee as u128,
        cfg.max_base_fee as u128,
    );
    let tip_floor = cfg.min_tip as u128;
    let tip_suggest = tip_floor.max((base / 10).max(1));
    FeeSuggestion {
        base_fee: base,
        surge_multiplier_bps: mult,
        floor_with_surge: surged,
        min_tip: tip_floor,
        recommended_tip: tip_suggest,
        min_total_price: surged + tip_floor,
        suggested_legacy_gas_price: surged + tip_suggest,
    }
}

/* ---------------------------------------------------------------------
   Base/tip split & admission
---------------------------------------------------------------------*/

/// Compute `(effective_price, base_component, tip_component)` the sender pays.
///
/// Legacy:
///     effective = gas_price
///     base_paid = min(gas_price, base_fee); tip_paid = effective − base_paid
/// Dual:
///     effective = min(max_fee, base_fee + max_priority_fee)
///     base_paid = min(base_fee, max_fee); tip_paid = max(0, effective − base_paid)
pub fn effective_gas_price(fee: &FeeFields, base_fee: u128) -> (u128, u128, u128) {
    match *fee {
        FeeFields::Legacy { gas_price } => {
            let base_paid = gas_price.min(base_fee);
            let tip_paid = gas_price.saturating_sub(base_paid);
            (gas_price, base_paid, tip_paid)
        }
        FeeFields::Dual {
            max_fee,
            max_priority_fee,
        } => {
            let effective = max_fee.min(base_fee.saturating_add(max_priority_fee));
            let base_paid = base_fee.min(max_fee);
            let tip_paid = effective.saturating_sub(base_paid);
            (effective, base_paid, tip_paid)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeVerdict {
    Accept,
    /// Effective price computed to zero; the tx carries no usable fee.
    NoFeeFields,
    BelowFloor,
    TipTooLow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeAdmission {
    pub verdict: FeeVerdict,
    pub floor_with_surge: u128,
    pub base_fee_paid: u128,
    pub tip_paid: u128,
    pub effective_price: u128,
}

impl FeeAdmission {
    pub fn accepted(&self) -> bool {
        self.verdict == FeeVerdict::Accept
    }
}

/// Decide whether to admit a tx given a dynamic floor and tip floor.
pub fn admission_check(fee: &FeeFields, floor_with_surge: u128, min_tip: u128) -> FeeAdmission {
    let (effective, base_paid, tip_paid) = effective_gas_price(fee, floor_with_surge);
    let verdict = if effective == 0 {
        FeeVerdict::NoFeeFields
    } else if effective < floor_with_surge + min_tip {
        FeeVerdict::BelowFloor
    } else if tip_paid < min_tip {
        FeeVerdict::TipTooLow
    } else {
        FeeVerdict::Accept
    };
    FeeAdmission {
        verdict,
        floor_with_surge,
        base_fee_paid: base_paid,
        tip_paid,
        effective_price: effective,
    }
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cfg() -> FeeMarketConfig {
        FeeMarketConfig::default()
    }

    #[test]
    fn full_block_without_observation_stays_within_change_limit() {
        // ema_floor=3 Gwei, util=1.0, no observed price: next floor must land
        // in [3·(1−0.125), 3·(1+0.125)] Gwei and here hits the upper clamp.
        let st = FeeMarketState {
            ema_floor: 3 * GWEI,
            ..Default::default()
        };
        let next = update_on_block(&st, 1, 30_000_000, 30_000_000, None, None, &cfg());
        let lo = 3 * GWEI - 3 * GWEI * 1_250 / 10_000;
        let hi = 3 * GWEI + 3 * GWEI * 1_250 / 10_000;
        assert!(next.ema_floor >= lo && next.ema_floor <= hi);
        assert_eq!(next.ema_floor, hi);
        assert_eq!(next.fullness_streak, 1);
    }

    #[test]
    fn empty_block_resets_streak_and_decays_floor() {
        let st = FeeMarketState {
            ema_floor: 10 * GWEI,
            fullness_streak: 4,
            ..Default::default()
        };
        let next = update_on_block(&st, 2, 0, 30_000_000, None, None, &cfg());
        assert_eq!(next.fullness_streak, 0);
        assert!(next.ema_floor < st.ema_floor);
        assert!(next.ema_floor >= cfg().min_base_fee as u128);
    }

    #[test]
    fn observed_p50_takes_precedence() {
        let st = FeeMarketState {
            ema_floor: 5 * GWEI,
            ..Default::default()
        };
        let up = update_on_block(&st, 3, 10, 30_000_000, Some(100 * GWEI), Some(GWEI), &cfg());
        // p50 pulls the floor up despite an empty-ish block.
        assert!(up.ema_floor > st.ema_floor);
    }

    #[test]
    fn surge_kicks_in_after_pending_blocks_threshold() {
        let c = cfg();
        let quiet = MempoolPressure {
            pending_txs: 10,
            pending_gas: 10_000_000,
            block_gas_limit: 30_000_000,
        };
        assert_eq!(surge_multiplier_bps(&quiet, &c), BPS_DEN);

        // ~10.7 pending blocks at a 15M target: (10.667-3)·0.25 ≈ 2.92x
        let heavy = MempoolPressure {
            pending_txs: 120_000,
            pending_gas: 160_000_000,
            block_gas_limit: 30_000_000,
        };
        let mult = surge_multiplier_bps(&heavy, &c);
        assert!(mult > BPS_DEN && mult <= c.surge_cap_bps);
    }

    #[test]
    fn surge_is_capped() {
        let c = cfg();
        let extreme = MempoolPressure {
            pending_txs: 1_000_000,
            pending_gas: u64::MAX / 2,
            block_gas_limit: 30_000_000,
        };
        assert_eq!(surge_multiplier_bps(&extreme, &c), c.surge_cap_bps);
    }

    #[test]
    fn legacy_split() {
        let fee = FeeFields::Legacy { gas_price: 10 * GWEI };
        let (eff, base, tip) = effective_gas_price(&fee, 4 * GWEI);
        assert_eq!(eff, 10 * GWEI);
        assert_eq!(base, 4 * GWEI);
        assert_eq!(tip, 6 * GWEI);
    }

    #[test]
    fn dual_split_capped_by_max_fee() {
        let fee = FeeFields::Dual {
            max_fee: 5 * GWEI,
            max_priority_fee: 3 * GWEI,
        };
        let (eff, base, tip) = effective_gas_price(&fee, 4 * GWEI);
        assert_eq!(eff, 5 * GWEI); // min(5, 4+3)
        assert_eq!(base, 4 * GWEI);
        assert_eq!(tip, GWEI);
    }

    #[test]
    fn admission_rejects_below_floor_then_tip() {
        let floor = 10 * GWEI;
        let tip = GWEI;

        let cheap = FeeFields::Legacy { gas_price: 5 * GWEI };
        assert_eq!(admission_check(&cheap, floor, tip).verdict, FeeVerdict::BelowFloor);

        let zero = FeeFields::Legacy { gas_price: 0 };
        assert_eq!(admission_check(&zero, floor, tip).verdict, FeeVerdict::NoFeeFields);

        let no_tip = FeeFields::Dual {
            max_fee: 11 * GWEI,
            max_priority_fee: 0,
        };
        assert_eq!(admission_check(&no_tip, floor, tip).verdict, FeeVerdict::TipTooLow);

        let good = FeeFields::Dual {
            max_fee: 200 * GWEI,
            max_priority_fee: 3 * GWEI,
        };
        let res = admission_check(&good, floor, tip);
        assert!(res.accepted());
        assert_eq!(res.effective_price, 13 * GWEI);
    }

    #[test]
    fn suggestion_composes_floor_and_tip() {
        let st = FeeMarketState {
            ema_floor: 30 * GWEI,
            ..Default::default()
        };
        let pressure = MempoolPressure {
            pending_txs: 0,
            pending_gas: 0,
            block_gas_limit: 30_000_000,
        };
        let sug = suggest_fees(&st, &pressure, &cfg());
        assert_eq!(sug.floor_with_surge, 30 * GWEI);
        assert_eq!(sug.recommended_tip, 3 * GWEI);
        assert_eq!(sug.min_total_price, 31 * GWEI);
        assert_eq!(sug.suggested_legacy_gas_price, 33 * GWEI);
    }

    proptest! {
        #[test]
        fn floor_always_bounded(
            floor in 1u128..10_000_000_000_000u128,
            gas_used in 0u64..60_000_000u64,
            obs in proptest::option::of(0u128..10_000_000_000_000u128),
        ) {
            let c = cfg();
            let st = FeeMarketState { ema_floor: floor.clamp(c.min_base_fee as u128, c.max_base_fee as u128), ..Default::default() };
            let next = update_on_block(&st, 1, gas_used, 30_000_000, obs, None, &c);
            prop_assert!(next.ema_floor >= c.min_base_fee as u128);
            prop_assert!(next.ema_floor <= c.max_base_fee as u128);
            let delta = st.ema_floor * c.change_limit_bps as u128 / BPS_DEN as u128;
            prop_assert!(next.ema_floor <= st.ema_floor + delta);
            prop_assert!(next.ema_floor + delta >= st.ema_floor);
        }

        #[test]
        fn split_components_sum_to_effective(
            base in 0u128..1_000_000_000_000u128,
            gp in 0u128..1_000_000_000_000u128,
        ) {
            let (eff, base_paid, tip) = effective_gas_price(&FeeFields::Legacy { gas_price: gp }, base);
            prop_assert_eq!(eff, base_paid + tip);
        }
    }
}
