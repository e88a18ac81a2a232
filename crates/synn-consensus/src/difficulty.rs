// DIFFICULTY CONTROLLER
// Negative feedback on the average inter-block interval.
//
// actual = (last - first) / (n - 1) over the last `window` seal timestamps
// new    = old * target / actual
//
// SAFETY INVARIANTS:
// 1. Difficulty is never below 1
// 2. Intervals shorter than target strictly raise difficulty; longer ones
//    strictly lower it (unless it is already 1)
// 3. Fewer than two samples is a no-op, never an error
// 4. Recording and retargeting happen under one lock

use crate::config::MIN_RETARGET_WINDOW;
use crate::engine::ConsensusError;
use log::{debug, info};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Debug)]
struct DifficultyState {
    current: BigUint,
    recent: VecDeque<i64>,
}

#[derive(Debug)]
pub struct DifficultyController {
    state: Mutex<DifficultyState>,
    target_interval_ms: u64,
    window: usize,
}

impl DifficultyController {
    pub fn new(initial: BigUint, target_interval_ms: u64, window: usize) -> Result<Self, ConsensusError> {
        if initial.is_zero() {
            return Err(ConsensusError::InvalidConfig("initial difficulty must be > 0".to_string()));
        }
        if target_interval_ms == 0 {
            return Err(ConsensusError::InvalidConfig("target interval must be > 0".to_string()));
        }
        if window < MIN_RETARGET_WINDOW {
            return Err(ConsensusError::InvalidConfig(format!(
                "retarget window must be >= {}",
                MIN_RETARGET_WINDOW
            )));
        }
        Ok(DifficultyController {
            state: Mutex::new(DifficultyState {
                current: initial,
                recent: VecDeque::with_capacity(window),
            }),
            target_interval_ms,
            window,
        })
    }

    pub fn current(&self) -> BigUint {
        self.state.lock().current.clone()
    }

    pub fn samples(&self) -> usize {
        self.state.lock().recent.len()
    }

    /// Add a seal timestamp, evicting the oldest beyond the window.
    pub fn record_seal(&self, timestamp_ms: i64) {
        let mut state = self.state.lock();
        self.push_sample(&mut state, timestamp_ms);
    }

    /// Recompute difficulty from the current window. Returns the new value.
    pub fn retarget_difficulty(&self) -> BigUint {
        let mut state = self.state.lock();
        self.retarget(&mut state)
    }

    /// Record a seal and retarget as one atomic step.
    pub fn record_and_retarget(&self, timestamp_ms: i64) -> BigUint {
        let mut state = self.state.lock();
        self.push_sample(&mut state, timestamp_ms);
        self.retarget(&mut state)
    }

    fn push_sample(&self, state: &mut DifficultyState, timestamp_ms: i64) {
        state.recent.push_back(timestamp_ms);
        while state.recent.len() > self.window {
            state.recent.pop_front();
        }
    }

    fn retarget(&self, state: &mut DifficultyState) -> BigUint {
        let n = state.recent.len();
        let (Some(&first), Some(&last)) = (state.recent.front(), state.recent.back()) else {
            return state.current.clone();
        };
        if n < 2 {
            return state.current.clone();
        }

        // zero or negative spans (clock skew) count as the fastest possible interval
        let span = i128::from(last) - i128::from(first);
        let actual = (span / (n as i128 - 1)).clamp(1, i128::from(u64::MAX)) as u64;
        let target = self.target_interval_ms;
        let old = state.current.clone();

        let mut new = &old * target / actual;
        if actual < target && new <= old {
            new = &old + 1u32;
        } else if actual > target && new >= old && old > BigUint::one() {
            new = &old - 1u32;
        }
        if new.is_zero() {
            new = BigUint::one();
        }

        if new != old {
            info!(
                "difficulty retarget: {} -> {} (avg interval {} ms, target {} ms)",
                old, new, actual, target
            );
        } else {
            debug!("difficulty unchanged at {} (avg interval {} ms)", old, actual);
        }
        state.current = new.clone();
        new
    }
}
