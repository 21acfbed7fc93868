//! Technical indicators powered by the `ta` crate
//!
//! Every function returns one entry per input value, `None` while the
//! indicator is still warming up. An invalid period yields all `None`.

use ta::indicators::{
    BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex, SimpleMovingAverage,
};
use ta::Next;

/// (upper, middle, lower) or (macd, signal, histogram)
pub type BandOutput = (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>);

/// Feed `values` through a streaming indicator, masking the first
/// `warmup - 1` outputs.
fn stream<I>(mut indicator: I, values: &[f64], warmup: usize) -> Vec<Option<I::Output>>
where
    I: Next<f64>,
{
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let out = indicator.next(v);
            (i + 1 >= warmup).then_some(out)
        })
        .collect()
}

fn split3<T>(
    series: Vec<Option<T>>,
    f: impl Fn(&T) -> (f64, f64, f64),
) -> BandOutput {
    let mut a = Vec::with_capacity(series.len());
    let mut b = Vec::with_capacity(series.len());
    let mut c = Vec::with_capacity(series.len());
    for item in &series {
        let (x, y, z) = match item {
            Some(v) => {
                let (x, y, z) = f(v);
                (Some(x), Some(y), Some(z))
            }
            None => (None, None, None),
        };
        a.push(x);
        b.push(y);
        c.push(z);
    }
    (a, b, c)
}

pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    match SimpleMovingAverage::new(period) {
        Ok(ind) => stream(ind, values, period),
        Err(_) => vec![None; values.len()],
    }
}

pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    match ExponentialMovingAverage::new(period) {
        Ok(ind) => stream(ind, values, period),
        Err(_) => vec![None; values.len()],
    }
}

/// Relative Strength Index, 0..=100
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    match RelativeStrengthIndex::new(period) {
        Ok(ind) => stream(ind, values, period + 1),
        Err(_) => vec![None; values.len()],
    }
}

/// MACD line, signal line and histogram
pub fn macd(
    values: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> BandOutput {
    match MovingAverageConvergenceDivergence::new(fast_period, slow_period, signal_period) {
        Ok(ind) => split3(stream(ind, values, slow_period), |o| {
            (o.macd, o.signal, o.histogram)
        }),
        Err(_) => (
            vec![None; values.len()],
            vec![None; values.len()],
            vec![None; values.len()],
        ),
    }
}

/// Bollinger Bands as (upper, middle, lower)
pub fn bollinger_bands(values: &[f64], period: usize, num_std: f64) -> BandOutput {
    match BollingerBands::new(period, num_std) {
        Ok(ind) => split3(stream(ind, values, period), |o| (o.upper, o.average, o.lower)),
        Err(_) => (
            vec![None; values.len()],
            vec![None; values.len()],
            vec![None; values.len()],
        ),
    }
}
