//! Auto-tuning of per-key capacity
//!
//! [`tune`] is a pure function from a metrics window and the current capacity
//! settings to a [`TuningDecision`], so the feedback loop can be tested
//! without timers. The manager calls it on a fixed interval and applies the
//! decision.

use crate::metrics::PoolMetricsSnapshot;
use crate::pool::KeyStats;
use pixpool_core::{PoolKey, TuningConfig};

/// Capacity settings and history the tuner reasons about
#[derive(Debug, Clone, Default)]
pub struct TuningInput {
    /// Pool-wide per-key capacity
    pub max_per_key: usize,
    /// Hard ceiling for any key's capacity
    pub ceiling: usize,
    /// Byte budget of the pool
    pub max_bytes: usize,
    /// Hit rate of the previous window, if one was evaluated
    pub previous_hit_rate: Option<f64>,
    pub keys: Vec<KeyStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningAction {
    /// Raise capacity of the hottest keys
    Grow,
    /// Lower capacity everywhere to give memory back
    Shrink,
    Hold,
}

/// Outcome of one tuning step
#[derive(Debug, Clone, PartialEq)]
pub struct TuningDecision {
    pub action: TuningAction,
    /// New pool-wide per-key capacity
    pub max_per_key: usize,
    /// Per-key capacities to apply
    pub key_capacities: Vec<(PoolKey, usize)>,
    /// Hit rate of the evaluated window
    pub hit_rate: f64,
    pub reason: &'static str,
}

impl TuningDecision {
    fn hold(input: &TuningInput, hit_rate: f64, reason: &'static str) -> Self {
        Self {
            action: TuningAction::Hold,
            max_per_key: input.max_per_key,
            key_capacities: Vec::new(),
            hit_rate,
            reason,
        }
    }
}

/// Decide how capacity should change for the next interval
///
/// - Too few requests in the window: hold.
/// - Hit rate below target while idle bytes exceed the memory budget: shrink
///   every capacity by one (never below one).
/// - Hit rate below target in this and the previous window: grow the most
///   requested keys by `growth_step`, up to the ceiling.
/// - Otherwise hold.
pub fn tune(
    window: &PoolMetricsSnapshot,
    input: &TuningInput,
    config: &TuningConfig,
) -> TuningDecision {
    let hit_rate = window.hit_rate();
    if window.requests() < config.min_samples {
        return TuningDecision::hold(input, hit_rate, "insufficient samples");
    }
    if hit_rate >= config.target_hit_rate {
        return TuningDecision::hold(input, hit_rate, "hit rate on target");
    }

    let budget = (input.max_bytes as f64 * config.memory_budget_fraction) as u64;
    if window.estimated_bytes > budget {
        let max_per_key = input.max_per_key.saturating_sub(1).max(1);
        let key_capacities: Vec<_> = input
            .keys
            .iter()
            .filter(|k| k.capacity > max_per_key)
            .map(|k| (k.key, k.capacity - 1))
            .collect();
        if max_per_key == input.max_per_key && key_capacities.is_empty() {
            return TuningDecision::hold(input, hit_rate, "over budget at minimum capacity");
        }
        return TuningDecision {
            action: TuningAction::Shrink,
            max_per_key,
            key_capacities,
            hit_rate,
            reason: "over memory budget with low hit rate",
        };
    }

    let sustained = input
        .previous_hit_rate
        .map_or(true, |prev| prev < config.target_hit_rate);
    if !sustained {
        return TuningDecision::hold(input, hit_rate, "low hit rate not yet sustained");
    }

    let mut hot: Vec<&KeyStats> = input.keys.iter().filter(|k| k.requests > 0).collect();
    hot.sort_by(|a, b| b.requests.cmp(&a.requests));
    let key_capacities: Vec<_> = hot
        .into_iter()
        .take(config.hot_keys)
        .filter(|k| k.capacity < input.ceiling)
        .map(|k| (k.key, (k.capacity + config.growth_step).min(input.ceiling)))
        .collect();

    if key_capacities.is_empty() {
        return TuningDecision::hold(input, hit_rate, "hot keys at ceiling");
    }
    TuningDecision {
        action: TuningAction::Grow,
        max_per_key: input.max_per_key,
        key_capacities,
        hit_rate,
        reason: "sustained low hit rate",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixpool_core::PixelFormat;

    fn stats(width: u32, requests: u64, capacity: usize) -> KeyStats {
        KeyStats {
            key: PoolKey::new(width, width, PixelFormat::Argb8888),
            idle: 0,
            capacity,
            requests,
            last_access: 0,
        }
    }

    fn window(hits: u64, misses: u64, bytes: u64) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            hits,
            misses,
            estimated_bytes: bytes,
            ..Default::default()
        }
    }

    fn input(keys: Vec<KeyStats>) -> TuningInput {
        TuningInput {
            max_per_key: 3,
            ceiling: 5,
            max_bytes: 1000,
            previous_hit_rate: None,
            keys,
        }
    }

    #[test]
    fn test_hold_without_samples() {
        let d = tune(&window(0, 5, 0), &input(vec![]), &TuningConfig::default());
        assert_eq!(d.action, TuningAction::Hold);
        assert_eq!(d.max_per_key, 3);
    }

    #[test]
    fn test_hold_on_target() {
        let d = tune(&window(90, 10, 0), &input(vec![]), &TuningConfig::default());
        assert_eq!(d.action, TuningAction::Hold);
    }

    #[test]
    fn test_grow_hottest_keys() {
        let config = TuningConfig {
            hot_keys: 2,
            ..Default::default()
        };
        let keys = vec![stats(10, 5, 3), stats(20, 50, 3), stats(30, 20, 3), stats(40, 0, 3)];
        let d = tune(&window(10, 40, 0), &input(keys), &config);
        assert_eq!(d.action, TuningAction::Grow);
        let widths: Vec<_> = d.key_capacities.iter().map(|(k, c)| (k.width, *c)).collect();
        assert_eq!(widths, vec![(20, 4), (30, 4)]);
    }

    #[test]
    fn test_grow_respects_ceiling() {
        let d = tune(
            &window(0, 20, 0),
            &input(vec![stats(10, 20, 5)]),
            &TuningConfig::default(),
        );
        assert_eq!(d.action, TuningAction::Hold);
        assert_eq!(d.reason, "hot keys at ceiling");
    }

    #[test]
    fn test_grow_needs_sustained_low_rate() {
        let mut inp = input(vec![stats(10, 20, 3)]);
        inp.previous_hit_rate = Some(0.95);
        let d = tune(&window(0, 20, 0), &inp, &TuningConfig::default());
        assert_eq!(d.action, TuningAction::Hold);

        inp.previous_hit_rate = Some(0.5);
        let d = tune(&window(0, 20, 0), &inp, &TuningConfig::default());
        assert_eq!(d.action, TuningAction::Grow);
    }

    #[test]
    fn test_shrink_over_budget() {
        let d = tune(
            &window(1, 19, 950),
            &input(vec![stats(10, 20, 5), stats(20, 1, 3)]),
            &TuningConfig::default(),
        );
        assert_eq!(d.action, TuningAction::Shrink);
        assert_eq!(d.max_per_key, 2);
        assert!(d.key_capacities.contains(&(PoolKey::new(10, 10, PixelFormat::Argb8888), 4)));
        assert!(d.key_capacities.contains(&(PoolKey::new(20, 20, PixelFormat::Argb8888), 2)));
    }
}
