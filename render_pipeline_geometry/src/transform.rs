use nalgebra::{Matrix2, Vector2};

/// A 2D affine transform `x' = M x + b`, matching the render server's `AffineModel`
/// (`M00 M01 / M10 M11`, `B0 B1`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
	pub m00: f64,
	pub m01: f64,
	pub m10: f64,
	pub m11: f64,
	pub b0: f64,
	pub b1: f64,
}

impl AffineTransform {
	pub const IDENTITY: AffineTransform = AffineTransform { m00: 1.0, m01: 0.0, m10: 0.0, m11: 1.0, b0: 0.0, b1: 0.0 };

	pub fn new(m00: f64, m01: f64, m10: f64, m11: f64, b0: f64, b1: f64) -> Self {
		AffineTransform { m00, m01, m10, m11, b0, b1 }
	}

	/// A translation-only transform, used to shift a sealed tile into section-relative
	/// world coordinates.
	pub fn translate(b0: f64, b1: f64) -> Self {
		AffineTransform { b0, b1, ..Self::IDENTITY }
	}

	/// A uniform y-axis rescale (used by the CLEM adaptor to correct for non-square pixels).
	pub fn scale_y(factor: f64) -> Self {
		AffineTransform { m11: factor, ..Self::IDENTITY }
	}

	fn matrix(&self) -> Matrix2<f64> {
		Matrix2::new(self.m00, self.m01, self.m10, self.m11)
	}

	fn translation(&self) -> Vector2<f64> {
		Vector2::new(self.b0, self.b1)
	}

	pub fn apply_point(&self, point: [f64; 2]) -> [f64; 2] {
		let p = self.matrix() * Vector2::new(point[0], point[1]) + self.translation();
		[p.x, p.y]
	}

	/// Returns the transform that applies `self` first, then `next`: `next(self(x))`.
	///
	/// Folding a list of transforms left-to-right with `then` reproduces the semantics of
	/// applying each transform in the list in order, which is how the original ingest
	/// adaptors compose a tile's local rotation/rescale with its final world-placement
	/// translation.
	pub fn then(&self, next: &AffineTransform) -> AffineTransform {
		let m = next.matrix() * self.matrix();
		let b = next.matrix() * self.translation() + next.translation();
		AffineTransform::new(m[(0, 0)], m[(0, 1)], m[(1, 0)], m[(1, 1)], b.x, b.y)
	}

	/// Applies the axis-aligned rectangle `[0, width] x [0, height]` through this transform
	/// and returns its bounding box as `(min_x, min_y, max_x, max_y)`.
	pub fn bounding_box(&self, width: f64, height: f64) -> (f64, f64, f64, f64) {
		let corners = [self.apply_point([0.0, 0.0]), self.apply_point([0.0, height]), self.apply_point([width, 0.0]), self.apply_point([width, height])];
		let mut min_x = f64::INFINITY;
		let mut min_y = f64::INFINITY;
		let mut max_x = f64::NEG_INFINITY;
		let mut max_y = f64::NEG_INFINITY;
		for [x, y] in corners {
			min_x = min_x.min(x);
			min_y = min_y.min(y);
			max_x = max_x.max(x);
			max_y = max_y.max(y);
		}
		(min_x, min_y, max_x, max_y)
	}
}

/// Composes a list of transforms in application order: `compose_all([a, b, c])(x) ==
/// c(b(a(x)))`. An empty list yields the identity.
pub fn compose_all(transforms: &[AffineTransform]) -> AffineTransform {
	transforms.iter().fold(AffineTransform::IDENTITY, |acc, t| acc.then(t))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identity_bbox() {
		let bbox = AffineTransform::IDENTITY.bounding_box(10.0, 20.0);
		assert_eq!(bbox, (0.0, 0.0, 10.0, 20.0));
	}

	#[test]
	fn translate_shifts_bbox() {
		let t = AffineTransform::translate(5.0, -3.0);
		let bbox = t.bounding_box(10.0, 20.0);
		assert_eq!(bbox, (5.0, -3.0, 15.0, 17.0));
	}

	#[test]
	fn compose_local_then_translate() {
		let scale = AffineTransform::scale_y(2.0);
		let translate = AffineTransform::translate(100.0, 200.0);
		let composed = compose_all(&[scale, translate]);
		let bbox = composed.bounding_box(10.0, 20.0);
		assert_eq!(bbox, (100.0, 200.0, 110.0, 240.0));
	}

	#[test]
	fn then_matches_sequential_point_application() {
		let scale = AffineTransform::scale_y(2.0);
		let translate = AffineTransform::translate(1.0, 1.0);
		let composed = scale.then(&translate);
		let direct = translate.apply_point(scale.apply_point([3.0, 4.0]));
		assert_eq!(composed.apply_point([3.0, 4.0]), direct);
	}
}
