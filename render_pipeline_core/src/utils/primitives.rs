use anyhow::{Result, anyhow, ensure};
use num_traits::{Bounded, Float, NumCast, PrimInt};
use std::any::type_name;

/// Rounds `value` and casts it into `I`, failing if the value is non-finite or out of range.
///
/// Used at the render-RPC boundary, where world-coordinate geometry (always `f64`) has to be
/// narrowed to the integer bounding boxes the server expects.
pub fn float_to_int<F, I>(value: F) -> Result<I>
where
	F: Float,
	I: PrimInt + Bounded,
{
	ensure!(value.is_finite(), "Value must be finite");

	let n = value.round();

	// Convert integer bounds into the float type for comparison.
	// This should always succeed for normal float+int combos, but we guard anyway.
	let min_f: F = NumCast::from(I::min_value())
		.ok_or_else(|| anyhow!("Cannot represent {}::MIN in float type", type_name::<I>()))?;
	let max_f: F = NumCast::from(I::max_value())
		.ok_or_else(|| anyhow!("Cannot represent {}::MAX in float type", type_name::<I>()))?;

	ensure!(n >= min_f && n <= max_f, "Number out of range for {}", type_name::<I>());

	// Now cast the rounded value to the integer type. If something weird happens, error.
	NumCast::from(n).ok_or_else(|| anyhow!("Failed converting rounded value to {}", type_name::<I>()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rounds_and_casts() {
		let v: i32 = float_to_int(4.6_f64).unwrap();
		assert_eq!(v, 5);
	}

	#[test]
	fn rejects_non_finite() {
		assert!(float_to_int::<f64, i32>(f64::NAN).is_err());
		assert!(float_to_int::<f64, i32>(f64::INFINITY).is_err());
	}

	#[test]
	fn rejects_out_of_range() {
		assert!(float_to_int::<f64, i8>(1000.0).is_err());
	}
}
