// ADAPTIVE CONSENSUS WEIGHTS
// Rebalances the relative weight of PoW, PoS and PoH from network demand and
// stake concentration observed on the ledger.
//
// adj = gamma * (D / Dmax + S / Smax)
// pow = 0.40 + alpha * adj
// pos = 0.30 + beta * adj
// poh = 0.30 + (1 - alpha - beta) * adj
//
// Each weight is floored at WEIGHT_FLOOR and the triple is normalized to sum 1.

use crate::engine::ConsensusError;
use log::info;
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use synn_core::Ledger;

const BASE_POW: f64 = 0.40;
const BASE_POS: f64 = 0.30;
const BASE_POH: f64 = 0.30;
const WEIGHT_FLOOR: f64 = 0.075;

/// Fewest recent blocks the manager samples for demand.
pub const MIN_ADAPTIVE_WINDOW: usize = 10;

/// Coefficients of the weight formula.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    /// Demand that counts as saturation (sub-blocks per block)
    pub d_max: f64,
    /// Stake concentration that counts as saturation
    pub s_max: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        WeightConfig {
            alpha: 0.5,
            beta: 0.5,
            gamma: 0.1,
            d_max: 1_000.0,
            s_max: 1.0,
        }
    }
}

impl WeightConfig {
    /// Coefficients must be finite and non-negative. `alpha + beta` may exceed
    /// 1; the PoH weight is then held up by the floor.
    pub fn validate(&self) -> Result<(), ConsensusError> {
        let values = [self.alpha, self.beta, self.gamma, self.d_max, self.s_max];
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ConsensusError::InvalidConfig(
                "weight coefficients must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }

    // Zero maxima behave as 1
    fn maxima(&self) -> (f64, f64) {
        let d_max = if self.d_max == 0.0 { 1.0 } else { self.d_max };
        let s_max = if self.s_max == 0.0 { 1.0 } else { self.s_max };
        (d_max, s_max)
    }
}

/// Relative weights of the three mechanisms. Always sums to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsensusWeights {
    pub pow: f64,
    pub pos: f64,
    pub poh: f64,
}

impl Default for ConsensusWeights {
    fn default() -> Self {
        ConsensusWeights {
            pow: BASE_POW,
            pos: BASE_POS,
            poh: BASE_POH,
        }
    }
}

pub fn calculate_weights(config: &WeightConfig, demand: f64, stake_concentration: f64) -> ConsensusWeights {
    let (d_max, s_max) = config.maxima();
    let adj = config.gamma * (demand / d_max + stake_concentration / s_max);

    let pow = (BASE_POW + config.alpha * adj).max(WEIGHT_FLOOR);
    let pos = (BASE_POS + config.beta * adj).max(WEIGHT_FLOOR);
    let poh = (BASE_POH + (1.0 - config.alpha - config.beta) * adj).max(WEIGHT_FLOOR);

    let total = pow + pos + poh;
    ConsensusWeights {
        pow: pow / total,
        pos: pos / total,
        poh: poh / total,
    }
}

/// Participation threshold implied by the current demand and stake spread.
pub fn compute_threshold(config: &WeightConfig, demand: f64, stake_concentration: f64) -> f64 {
    let (d_max, s_max) = config.maxima();
    config.alpha * (demand / d_max) + config.beta * (stake_concentration / s_max)
}

/// Derives weight inputs from the ledger and keeps the latest weights.
pub struct AdaptiveManager {
    ledger: Arc<dyn Ledger>,
    config: Mutex<WeightConfig>,
    window: usize,
    weights: Mutex<ConsensusWeights>,
}

impl AdaptiveManager {
    pub fn new(ledger: Arc<dyn Ledger>, config: WeightConfig, window: usize) -> Self {
        AdaptiveManager {
            ledger,
            config: Mutex::new(config),
            window: window.max(MIN_ADAPTIVE_WINDOW),
            weights: Mutex::new(ConsensusWeights::default()),
        }
    }

    /// Average number of sub-blocks per block over the recent window.
    pub fn network_demand(&self) -> f64 {
        let blocks = self.ledger.recent_blocks(self.window);
        if blocks.is_empty() {
            return 0.0;
        }
        let sub_blocks: usize = blocks.iter().map(|b| b.body.sub_headers.len()).sum();
        sub_blocks as f64 / blocks.len() as f64
    }

    /// Largest balance as a fraction of all balances, or 0 with no balances.
    pub fn stake_concentration(&self) -> Result<f64, ConsensusError> {
        let balances = self.ledger.balances()?;
        let mut total = BigUint::zero();
        let mut max = BigUint::zero();
        for (_, balance) in balances {
            if balance > max {
                max = balance.clone();
            }
            total += balance;
        }
        if total.is_zero() {
            return Ok(0.0);
        }
        let ratio = match (max.to_f64(), total.to_f64()) {
            (Some(m), Some(t)) if t > 0.0 => m / t,
            _ => 0.0,
        };
        Ok(ratio)
    }

    /// Recompute the weights from current ledger metrics and store them.
    pub fn adjust_weights(&self) -> Result<ConsensusWeights, ConsensusError> {
        let demand = self.network_demand();
        let stake = self.stake_concentration()?;
        let config = *self.config.lock();
        let weights = calculate_weights(&config, demand, stake);
        *self.weights.lock() = weights;
        info!(
            "adaptive weights: pow={:.3} pos={:.3} poh={:.3} (demand={:.2}, stake concentration={:.3}, threshold={:.3})",
            weights.pow,
            weights.pos,
            weights.poh,
            demand,
            stake,
            compute_threshold(&config, demand, stake)
        );
        Ok(weights)
    }

    pub fn weights(&self) -> ConsensusWeights {
        *self.weights.lock()
    }

    pub fn threshold(&self) -> Result<f64, ConsensusError> {
        let config = *self.config.lock();
        Ok(compute_threshold(&config, self.network_demand(), self.stake_concentration()?))
    }

    /// Replace the coefficients at runtime.
    pub fn set_config(&self, config: WeightConfig) -> Result<(), ConsensusError> {
        config.validate()?;
        *self.config.lock() = config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use synn_core::MemoryLedger;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_baseline_weights() {
        let w = calculate_weights(&WeightConfig::default(), 0.0, 0.0);
        assert!(approx(w.pow, 0.40));
        assert!(approx(w.pos, 0.30));
        assert!(approx(w.poh, 0.30));
    }

    #[test]
    fn test_floor_applies_before_normalization() {
        let config = WeightConfig {
            alpha: 1.0,
            beta: 1.0,
            gamma: 1.0,
            d_max: 1.0,
            s_max: 1.0,
        };
        // poh = 0.30 - 1.0 * 2.0 < floor
        let w = calculate_weights(&config, 1.0, 1.0);
        let total = 2.4 + 2.3 + WEIGHT_FLOOR;
        assert!(approx(w.poh, WEIGHT_FLOOR / total));
        assert!(approx(w.pow + w.pos + w.poh, 1.0));
    }

    #[test]
    fn test_zero_maxima_treated_as_one() {
        let config = WeightConfig {
            d_max: 0.0,
            s_max: 0.0,
            ..WeightConfig::default()
        };
        assert!(approx(compute_threshold(&config, 0.5, 0.5), 0.5));
    }

    #[test]
    fn test_validate_allows_overweight_and_zero_maxima() {
        let config = WeightConfig {
            alpha: 1.0,
            beta: 1.0,
            gamma: 0.1,
            d_max: 0.0,
            s_max: 0.0,
        };
        assert!(config.validate().is_ok());

        let negative = WeightConfig {
            beta: -0.1,
            ..WeightConfig::default()
        };
        assert!(negative.validate().is_err());
        let nan = WeightConfig {
            gamma: f64::NAN,
            ..WeightConfig::default()
        };
        assert!(nan.validate().is_err());
        let infinite = WeightConfig {
            d_max: f64::INFINITY,
            ..WeightConfig::default()
        };
        assert!(infinite.validate().is_err());
    }

    #[test]
    fn test_stake_concentration_from_balances() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.credit(b"a", &BigUint::from(300u32)).unwrap();
        ledger.credit(b"b", &BigUint::from(100u32)).unwrap();
        let manager = AdaptiveManager::new(ledger, WeightConfig::default(), 10);
        assert!(approx(manager.stake_concentration().unwrap(), 0.75));
        assert!(approx(manager.network_demand(), 0.0));
    }

    #[test]
    fn test_adjust_weights_stores_result() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.credit(b"a", &BigUint::from(1u32)).unwrap();
        let manager = AdaptiveManager::new(ledger, WeightConfig::default(), 1);
        let w = manager.adjust_weights().unwrap();
        assert_eq!(manager.weights(), w);
        assert!(w.pow > 0.40);
    }

    proptest! {
        #[test]
        fn prop_weights_sum_to_one(demand in 0.0f64..10_000.0, stake in 0.0f64..1.0) {
            let w = calculate_weights(&WeightConfig::default(), demand, stake);
            prop_assert!((w.pow + w.pos + w.poh - 1.0).abs() < 1e-9);
            prop_assert!(w.pow > 0.0 && w.pos > 0.0 && w.poh > 0.0);
        }
    }
}
