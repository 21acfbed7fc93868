//! Signal strategies
//!
//! Indicator-driven strategies that turn a candle history into a
//! buy/sell/hold decision. Each strategy declares the parameters it needs;
//! the registry builds one from a name and a flat parameter map.
//!
//! These are independent of the grid backtester and the parameter searches.

mod bollinger;
mod ma_crossover;
mod macd;
mod rsi;

pub use bollinger::BollingerStrategy;
pub use ma_crossover::MaCrossoverStrategy;
pub use macd::MacdStrategy;
pub use rsi::RsiStrategy;

use anyhow::Result;
use std::collections::{HashMap, HashSet};

use crate::{Candle, SignalAction};

pub trait SignalStrategy: Send + Sync {
    /// Registry name
    fn name(&self) -> &'static str;

    /// Parameter names `create_signal_strategy` must be given
    fn required_parameters(&self) -> HashSet<&'static str>;

    /// Decide on the most recent candle. Not enough history means `Hold`.
    fn generate_signal(&self, candles: &[Candle]) -> SignalAction;
}

const REGISTRY: &[(&str, &[&str])] = &[
    ("rsi", RsiStrategy::PARAMETERS),
    ("macd", MacdStrategy::PARAMETERS),
    ("bollinger", BollingerStrategy::PARAMETERS),
    ("ma_crossover", MaCrossoverStrategy::PARAMETERS),
];

/// Build a strategy by name, rejecting missing parameters
pub fn create_signal_strategy(
    name: &str,
    params: &HashMap<String, f64>,
) -> Result<Box<dyn SignalStrategy>> {
    let (_, required) = REGISTRY
        .iter()
        .find(|(n, _)| *n == name)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown signal strategy: '{}'. Available: {}",
                name,
                available_signal_strategies().join(", ")
            )
        })?;

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|p| !params.contains_key(*p))
        .collect();
    if !missing.is_empty() {
        anyhow::bail!(
            "Signal strategy '{}' is missing parameters: {}",
            name,
            missing.join(", ")
        );
    }

    let params = Params(params);
    let strategy: Box<dyn SignalStrategy> = match name {
        "rsi" => Box::new(RsiStrategy::from_params(&params)?),
        "macd" => Box::new(MacdStrategy::from_params(&params)?),
        "bollinger" => Box::new(BollingerStrategy::from_params(&params)?),
        _ => Box::new(MaCrossoverStrategy::from_params(&params)?),
    };
    Ok(strategy)
}

pub fn available_signal_strategies() -> Vec<&'static str> {
    REGISTRY.iter().map(|(n, _)| *n).collect()
}

/// Textbook settings for a registered strategy
pub fn default_parameters(name: &str) -> Option<HashMap<String, f64>> {
    let values: &[(&str, f64)] = match name {
        "rsi" => &[("period", 14.0), ("oversold", 30.0), ("overbought", 70.0)],
        "macd" => &[("fast", 12.0), ("slow", 26.0), ("signal", 9.0)],
        "bollinger" => &[("period", 20.0), ("num_std", 2.0)],
        "ma_crossover" => &[("fast", 10.0), ("slow", 30.0)],
        _ => return None,
    };
    Some(values.iter().map(|(k, v)| (k.to_string(), *v)).collect())
}

/// Typed access to a flat parameter map
pub(crate) struct Params<'a>(&'a HashMap<String, f64>);

impl Params<'_> {
    fn value(&self, key: &str) -> Result<f64> {
        self.0
            .get(key)
            .copied()
            .filter(|v| v.is_finite())
            .ok_or_else(|| anyhow::anyhow!("Parameter '{}' is missing or not finite", key))
    }

    pub(crate) fn float(&self, key: &str) -> Result<f64> {
        self.value(key)
    }

    pub(crate) fn period(&self, key: &str) -> Result<usize> {
        let v = self.value(key)?;
        if v < 1.0 || v.fract() != 0.0 {
            anyhow::bail!("Parameter '{}' must be a positive integer, got {}", key, v);
        }
        Ok(v as usize)
    }
}

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Last two defined values of a series
fn last_two(series: &[Option<f64>]) -> Option<(f64, f64)> {
    match series {
        [.., Some(prev), Some(cur)] => Some((*prev, *cur)),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::Candle;
    use chrono::{Duration, TimeZone, Utc};

    pub fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                Candle::new_unchecked(start + Duration::hours(i as i64), c, c * 1.01, c * 0.99, c, 1.0)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lists_all() {
        let names = available_signal_strategies();
        assert_eq!(names, vec!["rsi", "macd", "bollinger", "ma_crossover"]);
    }

    #[test]
    fn test_unknown_strategy() {
        let err = create_signal_strategy("ichimoku", &HashMap::new())
            .err()
            .unwrap();
        assert!(err.to_string().contains("Unknown signal strategy"));
    }

    #[test]
    fn test_missing_parameters_reported() {
        let params = HashMap::from([("period".to_string(), 14.0)]);
        let err = create_signal_strategy("rsi", &params).err().unwrap();
        assert!(err.to_string().contains("oversold"));
    }

    #[test]
    fn test_required_parameters_match_registry() {
        let params = HashMap::from([
            ("fast".to_string(), 5.0),
            ("slow".to_string(), 20.0),
        ]);
        let strategy = create_signal_strategy("ma_crossover", &params).unwrap();
        assert_eq!(strategy.name(), "ma_crossover");
        assert_eq!(
            strategy.required_parameters(),
            HashSet::from(["fast", "slow"])
        );
    }

    #[test]
    fn test_fractional_period_rejected() {
        let params = HashMap::from([
            ("fast".to_string(), 5.5),
            ("slow".to_string(), 20.0),
        ]);
        assert!(create_signal_strategy("ma_crossover", &params).is_err());
    }

    #[test]
    fn test_defaults_build_every_strategy() {
        for name in available_signal_strategies() {
            let params = default_parameters(name).unwrap();
            let strategy = create_signal_strategy(name, &params).unwrap();
            assert_eq!(strategy.name(), name);
        }
        assert!(default_parameters("ichimoku").is_none());
    }

    #[test]
    fn test_last_two() {
        assert_eq!(last_two(&[None, Some(1.0), Some(2.0)]), Some((1.0, 2.0)));
        assert_eq!(last_two(&[Some(1.0), None]), None);
    }
}
