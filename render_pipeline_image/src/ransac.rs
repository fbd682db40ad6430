use nalgebra::{Matrix2, Vector2};
use rand::Rng;
use render_pipeline_geometry::AffineTransform;

/// RANSAC parameters for fitting a rigid (rotation + translation) transform between two sets
/// of corresponding points.
#[derive(Debug, Clone, Copy)]
pub struct RansacParams {
	pub residual_threshold: f64,
	pub max_trials: u32,
}

impl Default for RansacParams {
	fn default() -> Self {
		RansacParams { residual_threshold: 6.2, max_trials: 2134 }
	}
}

/// Fits a Euclidean (rotation + translation, no scale or shear) transform mapping `points_p`
/// onto `points_q` by RANSAC, sampling `min_samples` correspondences per trial and keeping the
/// model with the most inliers under `residual_threshold`. Returns the model refit over its
/// full inlier set, and the inlier mask over the original correspondence list.
pub fn ransac_euclidean(points_p: &[[f64; 2]], points_q: &[[f64; 2]], min_samples: usize, params: &RansacParams) -> Option<(AffineTransform, Vec<bool>)> {
	let n = points_p.len();
	if n < min_samples.max(2) {
		return None;
	}

	let mut rng = rand::rng();
	let mut best_inliers = 0usize;
	let mut best_model: Option<AffineTransform> = None;
	let mut best_mask = vec![false; n];

	for _ in 0..params.max_trials {
		let mut indices: Vec<usize> = (0..min_samples).map(|_| rng.random_range(0..n)).collect();
		indices.sort_unstable();
		indices.dedup();
		if indices.len() < 2 {
			continue;
		}

		let sample_p: Vec<[f64; 2]> = indices.iter().map(|&i| points_p[i]).collect();
		let sample_q: Vec<[f64; 2]> = indices.iter().map(|&i| points_q[i]).collect();
		let Some(model) = fit_euclidean(&sample_p, &sample_q) else { continue };

		let mut mask = vec![false; n];
		let mut inliers = 0;
		for i in 0..n {
			if residual(&model, points_p[i], points_q[i]) <= params.residual_threshold {
				mask[i] = true;
				inliers += 1;
			}
		}

		if inliers > best_inliers {
			best_inliers = inliers;
			best_model = Some(model);
			best_mask = mask;
		}
	}

	if best_inliers < min_samples {
		return None;
	}

	let inlier_p: Vec<[f64; 2]> = (0..n).filter(|&i| best_mask[i]).map(|i| points_p[i]).collect();
	let inlier_q: Vec<[f64; 2]> = (0..n).filter(|&i| best_mask[i]).map(|i| points_q[i]).collect();
	let model = fit_euclidean(&inlier_p, &inlier_q).or(best_model)?;

	Some((model, best_mask))
}

fn residual(model: &AffineTransform, p: [f64; 2], q: [f64; 2]) -> f64 {
	let predicted = model.apply_point(p);
	((predicted[0] - q[0]).powi(2) + (predicted[1] - q[1]).powi(2)).sqrt()
}

fn centroid(points: &[[f64; 2]]) -> Vector2<f64> {
	let n = points.len() as f64;
	let sum = points.iter().fold(Vector2::zeros(), |acc, p| acc + Vector2::new(p[0], p[1]));
	sum / n
}

/// Closed-form rigid-motion fit via the Kabsch algorithm: builds the cross-covariance of the
/// centred point sets, takes its SVD, and composes the rotation that best aligns them
/// (reflecting the fit if the naive solution comes out improper).
fn fit_euclidean(p: &[[f64; 2]], q: &[[f64; 2]]) -> Option<AffineTransform> {
	if p.len() < 2 || p.len() != q.len() {
		return None;
	}

	let centroid_p = centroid(p);
	let centroid_q = centroid(q);

	let mut cross_covariance = Matrix2::zeros();
	for (pi, qi) in p.iter().zip(q.iter()) {
		let dp = Vector2::new(pi[0], pi[1]) - centroid_p;
		let dq = Vector2::new(qi[0], qi[1]) - centroid_q;
		cross_covariance += dp * dq.transpose();
	}

	let svd = cross_covariance.svd(true, true);
	let u = svd.u?;
	let v_t = svd.v_t?;
	let mut v = v_t.transpose();

	let mut rotation = v * u.transpose();
	if rotation.determinant() < 0.0 {
		v[(0, 1)] *= -1.0;
		v[(1, 1)] *= -1.0;
		rotation = v * u.transpose();
	}

	let translation = centroid_q - rotation * centroid_p;
	Some(AffineTransform::new(rotation[(0, 0)], rotation[(0, 1)], rotation[(1, 0)], rotation[(1, 1)], translation.x, translation.y))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn recovers_pure_translation() {
		let points_p = vec![[0.0, 0.0], [10.0, 0.0], [0.0, 10.0], [10.0, 10.0], [5.0, 5.0]];
		let points_q: Vec<[f64; 2]> = points_p.iter().map(|[x, y]| [x + 3.0, y - 2.0]).collect();
		let (model, mask) = ransac_euclidean(&points_p, &points_q, 3, &RansacParams::default()).unwrap();
		assert!(mask.iter().all(|&m| m));
		let predicted = model.apply_point([0.0, 0.0]);
		assert!((predicted[0] - 3.0).abs() < 1e-6);
		assert!((predicted[1] + 2.0).abs() < 1e-6);
	}

	#[test]
	fn rejects_outliers() {
		let mut points_p = vec![[0.0, 0.0], [10.0, 0.0], [0.0, 10.0], [10.0, 10.0], [5.0, 5.0], [2.0, 8.0]];
		let mut points_q: Vec<[f64; 2]> = points_p.iter().map(|[x, y]| [x + 3.0, y - 2.0]).collect();
		points_p.push([1.0, 1.0]);
		points_q.push([99.0, -42.0]);
		let params = RansacParams { residual_threshold: 1.0, max_trials: 500 };
		let (_, mask) = ransac_euclidean(&points_p, &points_q, 3, &params).unwrap();
		assert!(!mask[mask.len() - 1]);
	}

	#[test]
	fn too_few_points_returns_none() {
		let points = vec![[0.0, 0.0]];
		assert!(ransac_euclidean(&points, &points, 7, &RansacParams::default()).is_none());
	}
}
