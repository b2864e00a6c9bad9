/// Calculate Simple Moving Average (SMA) over the most recent `period` prices
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Short and long SMA of the same series, both or nothing
pub fn calculate_sma_pair(prices: &[f64], short: usize, long: usize) -> Option<(f64, f64)> {
    Some((calculate_sma(prices, short)?, calculate_sma(prices, long)?))
}
