use analysis_core::{Bar, CompanyInfo, FundamentalSnapshot, ScreenError};
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use technical_analysis::{atr, trailing_mean, AtrMethod};

/// Common dates needed before an RS rating is meaningful (about 3 months)
pub const MIN_RS_DATES: usize = 63;

const BARS_3M: usize = 63;
const BARS_6M: usize = 126;

fn pct_change(from: f64, to: f64) -> f64 {
    if from == 0.0 {
        0.0
    } else {
        (to / from - 1.0) * 100.0
    }
}

/// Share of common dates (0-100) on which `bars` had a better daily return
/// than `benchmark`. None with fewer than [`MIN_RS_DATES`] common dates.
pub fn rs_rating(bars: &[Bar], benchmark: &[Bar]) -> Option<f64> {
    let bench: HashMap<NaiveDate, f64> = benchmark.iter().map(|b| (b.date(), b.close)).collect();
    let common: Vec<(f64, f64)> = bars
        .iter()
        .filter_map(|b| bench.get(&b.date()).map(|bc| (b.close, *bc)))
        .collect();

    if common.len() < MIN_RS_DATES {
        return None;
    }

    // The first common date has no return and counts as not outperforming.
    let outperformed = common
        .windows(2)
        .filter(|w| {
            let (prev_t, prev_b) = w[0];
            let (cur_t, cur_b) = w[1];
            prev_t > 0.0 && prev_b > 0.0 && (cur_t / prev_t) > (cur_b / prev_b)
        })
        .count();

    Some(outperformed as f64 / common.len() as f64 * 100.0)
}

/// Build a snapshot from price history and company metadata.
pub fn derive_snapshot(
    ticker: &str,
    bars: &[Bar],
    info: &CompanyInfo,
    benchmark: Option<&[Bar]>,
) -> Result<FundamentalSnapshot, ScreenError> {
    let last = bars
        .last()
        .ok_or_else(|| ScreenError::DataUnavailable(format!("no bars for {}", ticker)))?;
    let current_price = last.close;

    let high_52w = bars.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low_52w = bars.iter().map(|b| b.low).fold(f64::MAX, f64::min);

    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let avg_volume_10d = trailing_mean(&volumes, 10.min(volumes.len())).unwrap_or(0.0);
    let avg_volume_50d = trailing_mean(&volumes, 50).unwrap_or(avg_volume_10d);
    let volume_today = last.volume;
    let volume_surge_ratio = if avg_volume_50d > 0.0 { volume_today / avg_volume_50d } else { 1.0 };

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let ma_50 = trailing_mean(&closes, 50);
    let ma_150 = trailing_mean(&closes, 150);
    let ma_200 = trailing_mean(&closes, 200);
    let vs = |ma: Option<f64>| ma.filter(|m| *m > 0.0).map(|m| pct_change(m, current_price));
    let above = |a: Option<f64>, b: Option<f64>| matches!((a, b), (Some(a), Some(b)) if a > b);

    let lookback_close = |n: usize| {
        if closes.len() >= n {
            closes[closes.len() - n]
        } else {
            closes[0]
        }
    };
    let momentum_3m = pct_change(lookback_close(BARS_3M), current_price);
    let momentum_6m = pct_change(lookback_close(BARS_6M), current_price);

    let atr_14 = match atr(bars, 14, AtrMethod::Wilder) {
        Ok(r) => Some(r.current_atr),
        Err(e) => {
            tracing::debug!("No ATR(14) for {}: {}", ticker, e);
            None
        }
    };

    let rs = benchmark.and_then(|spy| rs_rating(bars, spy));

    let analyst = &info.analyst;
    let target_mean = analyst.target_mean.filter(|t| *t > 0.0);
    let upside = match target_mean {
        Some(t) if current_price > 0.0 => Some((t - current_price) / current_price * 100.0),
        _ => None,
    };

    Ok(FundamentalSnapshot {
        ticker: ticker.to_string(),
        current_price,
        price_52w_high: high_52w,
        price_52w_low: low_52w,
        pct_from_52w_high: pct_change(high_52w, current_price),
        pct_from_52w_low: pct_change(low_52w, current_price),
        avg_volume_10d,
        avg_volume_50d,
        volume_today,
        volume_surge_ratio,
        ma_50,
        ma_150,
        ma_200,
        price_vs_ma_50: vs(ma_50),
        price_vs_ma_150: vs(ma_150),
        price_vs_ma_200: vs(ma_200),
        ma_50_above_ma_150: above(ma_50, ma_150),
        ma_50_above_ma_200: above(ma_50, ma_200),
        ma_150_above_ma_200: above(ma_150, ma_200),
        market_cap: info.market_cap,
        pe_ratio: info.pe_ratio,
        forward_pe: info.forward_pe,
        peg_ratio: info.peg_ratio,
        earnings_growth_qtrly: info.earnings_growth_qtrly,
        earnings_growth_annual: info.earnings_growth_annual,
        revenue_growth_qtrly: info.revenue_growth_qtrly,
        revenue_growth_annual: info.revenue_growth_annual,
        profit_margin: info.profit_margin,
        operating_margin: info.operating_margin,
        roe: info.roe,
        institutional_ownership: info.institutional_ownership,
        rs_rating: rs,
        momentum_3m: Some(momentum_3m),
        momentum_6m: Some(momentum_6m),
        atr_14,
        beta: info.beta,
        analyst_target_mean: target_mean,
        analyst_target_low: analyst.target_low.filter(|t| *t > 0.0),
        analyst_target_high: analyst.target_high.filter(|t| *t > 0.0),
        analyst_target_upside_pct: upside,
        analyst_recommendation_mean: analyst.recommendation_mean,
        analyst_count: analyst.analyst_count,
        recent_upgrades_30d: analyst.upgrades_30d,
        recent_downgrades_30d: analyst.downgrades_30d,
        sector: info.sector.clone(),
        industry: info.industry.clone(),
        fetched_at: Some(Utc::now()),
    })
}
