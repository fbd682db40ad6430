/// Median of a slice of `f64`. Sorts a clone; does not mutate the input.
///
/// `values` must be non-empty.
pub fn median(values: &[f64]) -> f64 {
	assert!(!values.is_empty(), "median of an empty slice is undefined");
	let mut sorted = values.to_vec();
	sorted.sort_by(|a, b| a.total_cmp(b));
	let mid = sorted.len() / 2;
	if sorted.len() % 2 == 0 { (sorted[mid - 1] + sorted[mid]) / 2.0 } else { sorted[mid] }
}

/// Median absolute deviation from `center`, using **unsigned** deviations.
///
/// An earlier revision of the acquisition this pipeline replaces computed this with signed
/// deviations before taking the median; that variant is wrong (it collapses towards zero
/// whenever deviations are roughly symmetric) and must not be reintroduced.
pub fn median_absolute_deviation(values: &[f64], center: f64) -> f64 {
	let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
	median(&deviations)
}

/// Linear-interpolated percentile (`0.0..=100.0`) of a slice of `f64`. Sorts a clone.
///
/// `values` must be non-empty.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
	assert!(!values.is_empty(), "percentile of an empty slice is undefined");
	let mut sorted = values.to_vec();
	sorted.sort_by(|a, b| a.total_cmp(b));
	if sorted.len() == 1 {
		return sorted[0];
	}
	let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
	let lo = rank.floor() as usize;
	let hi = rank.ceil() as usize;
	if lo == hi { sorted[lo] } else { sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64) }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn median_odd_and_even() {
		assert_eq!(median(&[1.0, 2.0, 3.0]), 2.0);
		assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
	}

	#[test]
	fn mad_is_unsigned() {
		// deviations: 2, 0, 2 -> unsigned median is 2, signed median would be 0
		let values = [1.0, 3.0, 5.0];
		assert_eq!(median_absolute_deviation(&values, 3.0), 2.0);
	}

	#[test]
	fn percentile_bounds() {
		let values: Vec<f64> = (0..=100).map(f64::from).collect();
		assert_eq!(percentile(&values, 0.0), 0.0);
		assert_eq!(percentile(&values, 100.0), 100.0);
		assert_eq!(percentile(&values, 50.0), 50.0);
	}
}
