//! Real relative strength (RRS)
//!
//! The benchmark's move over `period` bars, measured in benchmark ATRs, gives
//! the move the symbol "should" have made in its own ATRs. RRS is the
//! symbol's actual move minus that expectation, expressed in symbol ATRs.

use std::collections::HashSet;

use crate::indicators::volatility::{calculate_atr, DEFAULT_ATR_PERIOD};
use crate::models::{Bar, RelativeStrengthReading};

pub const DEFAULT_RRS_PERIODS: [usize; 3] = [1, 8, 15];

/// Keep only the dates both series share, trimmed to equal length.
///
/// Both inputs must be sorted by date.
pub fn align_by_date(symbol: &[Bar], benchmark: &[Bar]) -> (Vec<Bar>, Vec<Bar>) {
    let symbol_dates: HashSet<_> = symbol.iter().map(|b| b.date).collect();
    let bench_dates: HashSet<_> = benchmark.iter().map(|b| b.date).collect();

    let sym: Vec<Bar> = symbol
        .iter()
        .filter(|b| bench_dates.contains(&b.date))
        .copied()
        .collect();
    let bench: Vec<Bar> = benchmark
        .iter()
        .filter(|b| symbol_dates.contains(&b.date))
        .copied()
        .collect();

    let len = sym.len().min(bench.len());
    (sym[sym.len() - len..].to_vec(), bench[bench.len() - len..].to_vec())
}

/// RRS over `period` bars. `None` when there is not enough overlapping
/// history for both the move and a 14-bar ATR, or either ATR is zero.
pub fn real_relative_strength(symbol: &[Bar], benchmark: &[Bar], period: usize) -> Option<f64> {
    if period == 0 {
        return None;
    }

    let (sym, bench) = align_by_date(symbol, benchmark);
    let required = (period + 1).max(DEFAULT_ATR_PERIOD + 1);
    if sym.len() < required {
        return None;
    }

    let last = sym.len() - 1;
    let symbol_move = sym[last].close - sym[last - period].close;
    let bench_move = bench[last].close - bench[last - period].close;

    let symbol_atr = calculate_atr(&sym, DEFAULT_ATR_PERIOD)?;
    let bench_atr = calculate_atr(&bench, DEFAULT_ATR_PERIOD)?;
    if symbol_atr == 0.0 || bench_atr == 0.0 {
        return None;
    }

    let power_index = bench_move / bench_atr;
    let expected_move = power_index * symbol_atr;
    Some((symbol_move - expected_move) / symbol_atr)
}

/// RRS for each period the overlapping history covers
pub fn relative_strength_profile(
    symbol: &[Bar],
    benchmark: &[Bar],
    periods: &[usize],
) -> Vec<RelativeStrengthReading> {
    periods
        .iter()
        .filter_map(|&period| {
            real_relative_strength(symbol, benchmark, period)
                .map(|value| RelativeStrengthReading { period, value })
        })
        .collect()
}
