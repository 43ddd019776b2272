//! Incremental per-instrument VWAP
//!
//! VWAP = total traded value / total traded volume. State is seeded from the
//! broker's ATP and cumulative volume (VTT) the first time an instrument is
//! seen, then advanced from the per-tick volume delta. A VTT that goes
//! backwards means a session rollover and re-seeds the state.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::tick::Tick;

/// One VWAP observation for an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VwapUpdate {
    pub instrument_key: String,
    /// Last traded time of the tick that produced this update (epoch ms)
    pub timestamp: i64,
    /// Running VWAP, rounded to 2 decimals (ATP on seed/reseed)
    pub vwap: Decimal,
    /// Last traded price of the tick
    pub ltp: Decimal,
    /// Total traded volume backing the VWAP
    pub volume: i64,
}

#[derive(Debug, Clone)]
struct VwapState {
    /// Cumulative traded value (sum of price x volume delta)
    total_value: Decimal,
    /// Cumulative traded volume
    total_volume: i64,
    /// Last observed cumulative session volume
    prev_vtt: i64,
}

impl VwapState {
    /// Seed from the broker-reported average price and session volume
    fn seeded(tick: &Tick) -> Self {
        Self {
            total_value: tick.atp * Decimal::from(tick.vtt),
            total_volume: tick.vtt,
            prev_vtt: tick.vtt,
        }
    }

    fn vwap(&self) -> Decimal {
        if self.total_volume > 0 {
            (self.total_value / Decimal::from(self.total_volume)).round_dp(2)
        } else {
            Decimal::ZERO
        }
    }
}

/// Incremental VWAP engine
///
/// State is an owned per-instrument map; one driving task per engine
/// instance, no shared mutability. Replaying the same tick sequence into a
/// fresh engine reproduces the same updates.
#[derive(Default)]
pub struct VwapEngine {
    state: HashMap<String, VwapState>,
}

impl VwapEngine {
    /// Create an engine with no tracked instruments
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe one tick; always produces an update
    ///
    /// - first sight of an instrument seeds from ATP x VTT and reports ATP
    /// - a positive volume delta accumulates LTP x delta
    /// - a zero delta reports the unchanged running VWAP without mutation
    /// - a negative delta is a session rollover and re-seeds
    pub fn observe(&mut self, tick: &Tick) -> VwapUpdate {
        if let Some(state) = self.state.get_mut(&tick.instrument_key) {
            let delta_volume = tick.vtt - state.prev_vtt;
            if delta_volume >= 0 {
                if delta_volume > 0 {
                    state.total_value += tick.ltp * Decimal::from(delta_volume);
                    state.total_volume += delta_volume;
                    state.prev_vtt = tick.vtt;
                }
                return VwapUpdate {
                    instrument_key: tick.instrument_key.clone(),
                    timestamp: tick.ltt,
                    vwap: state.vwap(),
                    ltp: tick.ltp,
                    volume: state.total_volume,
                };
            }

            // Session rollover: cumulative volume went backwards.
            tracing::debug!(
                instrument = %tick.instrument_key,
                prev_vtt = state.prev_vtt,
                vtt = tick.vtt,
                "session volume reset, reseeding VWAP state"
            );
            *state = VwapState::seeded(tick);
        } else {
            self.state
                .insert(tick.instrument_key.clone(), VwapState::seeded(tick));
        }

        Self::seed_update(tick)
    }

    /// Number of instruments with tracked state
    pub fn tracked_instruments(&self) -> usize {
        self.state.len()
    }

    fn seed_update(tick: &Tick) -> VwapUpdate {
        VwapUpdate {
            instrument_key: tick.instrument_key.clone(),
            timestamp: tick.ltt,
            vwap: tick.atp,
            ltp: tick.ltp,
            volume: tick.vtt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tick(key: &str, ltp: Decimal, vtt: i64, atp: Decimal) -> Tick {
        Tick {
            instrument_key: key.to_string(),
            ltp,
            vtt,
            atp,
            ltt: 1_700_000_000_000,
            ..Tick::default()
        }
    }

    #[test]
    fn test_first_observation_reports_atp() {
        let mut engine = VwapEngine::new();
        let update = engine.observe(&tick("A", dec!(100), 500, dec!(100)));
        assert_eq!(update.vwap, dec!(100));
        assert_eq!(update.volume, 500);
    }

    #[test]
    fn test_incremental_vwap_after_volume_delta() {
        let mut engine = VwapEngine::new();
        engine.observe(&tick("A", dec!(100), 500, dec!(100)));

        // (100*500 + 110*100) / 600 = 101.666... -> 101.67
        let update = engine.observe(&tick("A", dec!(110), 600, dec!(101)));
        assert_eq!(update.vwap, dec!(101.67));
        assert_eq!(update.volume, 600);
    }

    #[test]
    fn test_zero_delta_leaves_state_unchanged() {
        let mut engine = VwapEngine::new();
        engine.observe(&tick("A", dec!(100), 500, dec!(100)));
        let before = engine.observe(&tick("A", dec!(110), 600, dec!(101)));

        // Same vtt, wildly different price: the average must not move.
        let after = engine.observe(&tick("A", dec!(250), 600, dec!(101)));
        assert_eq!(after.vwap, before.vwap);
        assert_eq!(after.volume, before.volume);
    }

    #[test]
    fn test_negative_delta_reseeds_from_atp() {
        let mut engine = VwapEngine::new();
        engine.observe(&tick("A", dec!(100), 500, dec!(100)));
        engine.observe(&tick("A", dec!(110), 600, dec!(101)));

        // New session: vtt dropped to 50.
        let update = engine.observe(&tick("A", dec!(90), 50, dec!(91.5)));
        assert_eq!(update.vwap, dec!(91.5));
        assert_eq!(update.volume, 50);

        // Accumulation continues from the reseeded base:
        // (91.5*50 + 92*50) / 100 = 91.75
        let next = engine.observe(&tick("A", dec!(92), 100, dec!(91.6)));
        assert_eq!(next.vwap, dec!(91.75));
    }

    #[test]
    fn test_zero_volume_seed_never_divides_by_zero() {
        let mut engine = VwapEngine::new();
        let seed = engine.observe(&tick("A", dec!(100), 0, dec!(0)));
        assert_eq!(seed.vwap, dec!(0));

        let idle = engine.observe(&tick("A", dec!(100), 0, dec!(0)));
        assert_eq!(idle.vwap, dec!(0));

        let traded = engine.observe(&tick("A", dec!(100), 10, dec!(100)));
        assert_eq!(traded.vwap, dec!(100.00));
    }

    #[test]
    fn test_instruments_are_independent() {
        let mut engine = VwapEngine::new();
        engine.observe(&tick("A", dec!(100), 500, dec!(100)));
        let b = engine.observe(&tick("B", dec!(7), 10, dec!(7.5)));
        assert_eq!(b.vwap, dec!(7.5));
        assert_eq!(engine.tracked_instruments(), 2);

        let a = engine.observe(&tick("A", dec!(110), 600, dec!(101)));
        assert_eq!(a.vwap, dec!(101.67));
    }

    #[test]
    fn test_replay_is_deterministic() {
        let ticks: Vec<Tick> = vec![
            tick("A", dec!(100), 500, dec!(100)),
            tick("A", dec!(110), 600, dec!(101)),
            tick("A", dec!(110), 600, dec!(101)),
            tick("A", dec!(90), 50, dec!(91.5)),
            tick("A", dec!(92), 100, dec!(91.6)),
        ];

        let run = |ticks: &[Tick]| {
            let mut engine = VwapEngine::new();
            ticks.iter().map(|t| engine.observe(t)).collect::<Vec<_>>()
        };

        assert_eq!(run(&ticks), run(&ticks));
    }
}
