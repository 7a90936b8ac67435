//! Order statistics over peer sales distributions

/// Percentile `p` (0..=100) of `values` by linear interpolation between
/// closest ranks. Non-finite values are ignored.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    let sorted = sorted_finite(values);
    percentile_sorted(&sorted, p)
}

pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50.0)
}

/// Values within the inclusive `[lower, upper]` percentile band.
pub fn trim(values: &[f64], lower: f64, upper: f64) -> Vec<f64> {
    let sorted = sorted_finite(values);
    let (Some(low), Some(high)) = (percentile_sorted(&sorted, lower), percentile_sorted(&sorted, upper))
    else {
        return Vec::new();
    };

    sorted.into_iter().filter(|value| *value >= low && *value <= high).collect()
}

fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|value| value.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    sorted
}

fn percentile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() || !p.is_finite() {
        return None;
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

#[cfg(test)]
mod tests {
    use super::{median, percentile, trim};

    #[test]
    fn percentile_interpolates_between_ranks() {
        let values = [10.0, 20.0, 30.0, 40.0, 50.0];

        assert_eq!(percentile(&values, 0.0), Some(10.0));
        assert_eq!(percentile(&values, 100.0), Some(50.0));
        assert_eq!(percentile(&values, 50.0), Some(30.0));
        assert_eq!(percentile(&values, 80.0), Some(42.0));
    }

    #[test]
    fn median_of_even_set_averages_middle_pair() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn trim_drops_tails_outside_band() {
        let values = [1.0, 100.0, 110.0, 120.0, 130.0, 140.0, 150.0, 160.0, 170.0, 10_000.0];

        let trimmed = trim(&values, 10.0, 90.0);

        assert!(!trimmed.contains(&1.0));
        assert!(!trimmed.contains(&10_000.0));
        assert_eq!(trimmed.len(), 8);
    }

    #[test]
    fn single_value_survives_trim() {
        assert_eq!(trim(&[42.0], 10.0, 90.0), vec![42.0]);
    }

    #[test]
    fn non_finite_values_are_ignored() {
        assert_eq!(percentile(&[f64::NAN, 5.0, f64::INFINITY], 50.0), Some(5.0));
    }
}
