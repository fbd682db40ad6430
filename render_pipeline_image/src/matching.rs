use crate::features::Descriptor;

/// Brute-force nearest-neighbour descriptor matching parameters.
#[derive(Debug, Clone, Copy)]
pub struct MatchParams {
	/// Reject a match unless the best neighbour is closer than `max_ratio` times the
	/// second-best (Lowe's ratio test).
	pub max_ratio: f32,
	/// Require that each match is also the nearest neighbour in the reverse direction.
	pub cross_check: bool,
	/// Reject a match whose (Euclidean, not squared) descriptor distance exceeds this.
	pub max_distance: Option<f32>,
}

impl Default for MatchParams {
	fn default() -> Self {
		MatchParams { max_ratio: 0.8, cross_check: true, max_distance: None }
	}
}

fn squared_distance(a: &Descriptor, b: &Descriptor) -> f32 {
	a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// For each descriptor in `from`, finds its best and second-best match in `to` by squared
/// Euclidean distance.
fn nearest_two(from: &Descriptor, to: &[Descriptor]) -> Option<(usize, f32, f32)> {
	let mut best = (usize::MAX, f32::INFINITY);
	let mut second = f32::INFINITY;
	for (index, candidate) in to.iter().enumerate() {
		let distance = squared_distance(from, candidate);
		if distance < best.1 {
			second = best.1;
			best = (index, distance);
		} else if distance < second {
			second = distance;
		}
	}
	if best.0 == usize::MAX {
		None
	} else {
		Some((best.0, best.1, second))
	}
}

/// Matches descriptors from two images, returning `(index_in_desc1, index_in_desc2)` pairs.
pub fn match_descriptors(desc1: &[Descriptor], desc2: &[Descriptor], params: &MatchParams) -> Vec<(usize, usize)> {
	let max_ratio_sq = params.max_ratio * params.max_ratio;

	let mut matches = Vec::new();
	for (i, d1) in desc1.iter().enumerate() {
		let Some((j, best, second)) = nearest_two(d1, desc2) else { continue };
		if second.is_finite() && best > max_ratio_sq * second {
			continue;
		}
		if let Some(max_distance) = params.max_distance {
			if best > max_distance * max_distance {
				continue;
			}
		}

		if params.cross_check {
			if let Some((back, _, _)) = nearest_two(&desc2[j], desc1) {
				if back != i {
					continue;
				}
			}
		}

		matches.push((i, j));
	}

	matches
}

#[cfg(test)]
mod tests {
	use super::*;

	fn descriptor(values: [f32; 4]) -> Descriptor {
		let mut d = [0.0; 128];
		d[..4].copy_from_slice(&values);
		d
	}

	#[test]
	fn matches_nearest_neighbours() {
		let desc1 = vec![descriptor([1.0, 0.0, 0.0, 0.0]), descriptor([0.0, 1.0, 0.0, 0.0])];
		let desc2 = vec![descriptor([0.0, 1.0, 0.0, 0.0]), descriptor([1.0, 0.0, 0.0, 0.0])];
		let matches = match_descriptors(&desc1, &desc2, &MatchParams::default());
		assert_eq!(matches, vec![(0, 1), (1, 0)]);
	}

	#[test]
	fn rejects_ambiguous_matches_via_ratio_test() {
		let desc1 = vec![descriptor([1.0, 0.0, 0.0, 0.0])];
		let desc2 = vec![descriptor([1.0, 0.0, 0.0, 0.0]), descriptor([0.99, 0.0, 0.0, 0.0])];
		let params = MatchParams { max_ratio: 0.8, cross_check: false, max_distance: None };
		assert!(match_descriptors(&desc1, &desc2, &params).is_empty());
	}

	#[test]
	fn rejects_matches_beyond_max_distance() {
		let desc1 = vec![descriptor([10.0, 0.0, 0.0, 0.0])];
		let desc2 = vec![descriptor([0.0, 0.0, 0.0, 0.0])];
		let params = MatchParams { max_ratio: 1.0, cross_check: false, max_distance: Some(1.0) };
		assert!(match_descriptors(&desc1, &desc2, &params).is_empty());
	}
}
