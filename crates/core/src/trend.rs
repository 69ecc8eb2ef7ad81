use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Direction of a price window, normalized to [-1, 1].
///
/// Compares the mean of the later half of `prices` (oldest first) with the
/// mean of the earlier half. Returns 0 for fewer than two observations or a
/// zero earlier mean.
pub fn normalized_trend(prices: &[Decimal]) -> f64 {
    if prices.len() < 2 {
        return 0.0;
    }

    let (first, second) = prices.split_at(prices.len() / 2);
    let (Some(first_avg), Some(second_avg)) = (mean(first), mean(second)) else {
        return 0.0;
    };

    if first_avg == 0.0 {
        return 0.0;
    }

    let trend = (second_avg - first_avg) / first_avg;
    if trend.is_finite() {
        trend.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

fn mean(prices: &[Decimal]) -> Option<f64> {
    let (sum, count) = prices
        .iter()
        .filter_map(|p| p.to_f64())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices(values: &[i64]) -> Vec<Decimal> {
        values.iter().copied().map(Decimal::from).collect()
    }

    #[test]
    fn rising_window_is_positive() {
        let t = normalized_trend(&prices(&[40, 40, 50, 50]));
        assert!((t - 0.25).abs() < 1e-12);
    }

    #[test]
    fn falling_window_is_negative() {
        let t = normalized_trend(&prices(&[50, 50, 40, 40]));
        assert!((t - -0.2).abs() < 1e-12);
    }

    #[test]
    fn odd_length_puts_extra_point_in_later_half() {
        // first = [10], second = [20, 30]
        let t = normalized_trend(&prices(&[10, 20, 30]));
        assert_eq!(t, 1.0);
    }

    #[test]
    fn clamps_large_moves() {
        assert_eq!(normalized_trend(&prices(&[10, 10, 100, 100])), 1.0);
    }

    #[test]
    fn mean_averages_over_converted_values() {
        assert_eq!(mean(&prices(&[10, 20, 30])), Some(20.0));
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn degenerate_windows_are_neutral() {
        assert_eq!(normalized_trend(&[]), 0.0);
        assert_eq!(normalized_trend(&prices(&[42])), 0.0);
        assert_eq!(normalized_trend(&prices(&[0, 0, 10, 10])), 0.0);
    }
}
