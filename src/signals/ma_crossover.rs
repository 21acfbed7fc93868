//! Moving-average crossover on simple moving averages

use anyhow::Result;
use std::collections::HashSet;

use super::{closes, last_two, Params, SignalStrategy};
use crate::indicators::sma;
use crate::{Candle, SignalAction};

#[derive(Debug, Clone)]
pub struct MaCrossoverStrategy {
    pub fast: usize,
    pub slow: usize,
}

impl MaCrossoverStrategy {
    pub const PARAMETERS: &'static [&'static str] = &["fast", "slow"];

    pub fn new(fast: usize, slow: usize) -> Result<Self> {
        if fast >= slow {
            anyhow::bail!("fast period ({}) must be below slow ({})", fast, slow);
        }
        Ok(MaCrossoverStrategy { fast, slow })
    }

    pub(crate) fn from_params(params: &Params) -> Result<Self> {
        Self::new(params.period("fast")?, params.period("slow")?)
    }
}

impl SignalStrategy for MaCrossoverStrategy {
    fn name(&self) -> &'static str {
        "ma_crossover"
    }

    fn required_parameters(&self) -> HashSet<&'static str> {
        Self::PARAMETERS.iter().copied().collect()
    }

    fn generate_signal(&self, candles: &[Candle]) -> SignalAction {
        let closes = closes(candles);
        let fast = sma(&closes, self.fast);
        let slow = sma(&closes, self.slow);

        let (Some((f0, f1)), Some((s0, s1))) = (last_two(&fast), last_two(&slow)) else {
            return SignalAction::Hold;
        };

        if f0 <= s0 && f1 > s1 {
            SignalAction::Buy
        } else if f0 >= s0 && f1 < s1 {
            SignalAction::Sell
        } else {
            SignalAction::Hold
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::test_support::candles_from_closes;

    #[test]
    fn test_golden_cross_buys() {
        let strategy = MaCrossoverStrategy::new(2, 4).unwrap();
        // Slow decline, then one strong up bar pushes the fast SMA over the slow one
        let closes = vec![110.0, 108.0, 106.0, 104.0, 102.0, 100.0, 120.0];
        assert_eq!(
            strategy.generate_signal(&candles_from_closes(&closes)),
            SignalAction::Buy
        );
    }

    #[test]
    fn test_death_cross_sells() {
        let strategy = MaCrossoverStrategy::new(2, 4).unwrap();
        let closes = vec![100.0, 102.0, 104.0, 106.0, 108.0, 110.0, 90.0];
        assert_eq!(
            strategy.generate_signal(&candles_from_closes(&closes)),
            SignalAction::Sell
        );
    }

    #[test]
    fn test_not_enough_history_holds() {
        let strategy = MaCrossoverStrategy::new(2, 4).unwrap();
        let closes = vec![100.0, 101.0, 102.0];
        assert_eq!(
            strategy.generate_signal(&candles_from_closes(&closes)),
            SignalAction::Hold
        );
    }
}
