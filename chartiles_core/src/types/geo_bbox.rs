use crate::mercator::MAX_LATITUDE;
use anyhow::{Result, ensure};
use std::fmt::Debug;

/// A geographical bounding box `[west, south, east, north]` in degrees.
///
/// ```
/// use chartiles_core::GeoBBox;
///
/// let bbox = GeoBBox::from_points(&[(-10.0, 5.0), (10.0, -5.0), (8.0, 6.0)]).unwrap();
/// assert_eq!(bbox.as_array(), [-10.0, -5.0, 10.0, 6.0]);
/// ```
#[derive(Clone, Copy, PartialEq)]
pub struct GeoBBox {
	pub x_min: f64,
	pub y_min: f64,
	pub x_max: f64,
	pub y_max: f64,
}

impl GeoBBox {
	/// Creates a new `GeoBBox` from `west, south, east, north`.
	///
	/// # Errors
	/// Returns an error if a value is not finite, lies outside ±180°/±90°, or if min > max.
	pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Result<GeoBBox> {
		GeoBBox::new_unchecked(x_min, y_min, x_max, y_max).checked()
	}

	pub(crate) fn new_unchecked(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> GeoBBox {
		GeoBBox {
			x_min,
			y_min,
			x_max,
			y_max,
		}
	}

	/// Smallest bounding box containing all `points` given as `(lon, lat)`.
	///
	/// # Errors
	/// Returns an error if `points` is empty or the result is not a valid bbox.
	pub fn from_points(points: &[(f64, f64)]) -> Result<GeoBBox> {
		ensure!(!points.is_empty(), "cannot build a bbox from zero points");
		let mut bbox = GeoBBox::new_unchecked(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
		for &(x, y) in points {
			bbox.x_min = bbox.x_min.min(x);
			bbox.y_min = bbox.y_min.min(y);
			bbox.x_max = bbox.x_max.max(x);
			bbox.y_max = bbox.y_max.max(y);
		}
		bbox.checked()
	}

	fn checked(self) -> Result<GeoBBox> {
		let values = self.as_array();
		ensure!(values.iter().all(|v| v.is_finite()), "bbox {values:?} must be finite");
		ensure!(self.x_min >= -180., "x_min ({}) must be >= -180", self.x_min);
		ensure!(self.y_min >= -90., "y_min ({}) must be >= -90", self.y_min);
		ensure!(self.x_max <= 180., "x_max ({}) must be <= 180", self.x_max);
		ensure!(self.y_max <= 90., "y_max ({}) must be <= 90", self.y_max);
		ensure!(self.x_min <= self.x_max, "x_min ({}) must be <= x_max ({})", self.x_min, self.x_max);
		ensure!(self.y_min <= self.y_max, "y_min ({}) must be <= y_max ({})", self.y_min, self.y_max);
		Ok(self)
	}

	/// `true` if the bbox lies completely inside the Web Mercator square.
	pub fn is_within_mercator(&self) -> bool {
		self.y_min >= -MAX_LATITUDE && self.y_max <= MAX_LATITUDE
	}

	pub fn as_array(&self) -> [f64; 4] {
		[self.x_min, self.y_min, self.x_max, self.y_max]
	}

	/// Returns `west,south,east,north` as used by the MBTiles `bounds` metadata.
	///
	/// Values are printed with the shortest representation that round-trips, always keeping a
	/// decimal point:
	/// ```
	/// use chartiles_core::GeoBBox;
	///
	/// let bbox = GeoBBox::new(-170.0, 42.0, -150.0, 62.5).unwrap();
	/// assert_eq!(bbox.as_metadata_string(), "-170.0,42.0,-150.0,62.5");
	/// ```
	pub fn as_metadata_string(&self) -> String {
		format!("{:?},{:?},{:?},{:?}", self.x_min, self.y_min, self.x_max, self.y_max)
	}

	/// Parses `west,south,east,north`.
	///
	/// # Errors
	/// Returns an error if there are not exactly four numbers or the bbox is invalid.
	pub fn parse_metadata_string(value: &str) -> Result<GeoBBox> {
		let values = value
			.split(',')
			.map(|s| s.trim().parse::<f64>())
			.collect::<Result<Vec<f64>, _>>()?;
		ensure!(values.len() == 4, "bbox must contain exactly 4 numbers, got {value:?}");
		GeoBBox::new(values[0], values[1], values[2], values[3])
	}
}

impl Debug for GeoBBox {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "GeoBBox({})", self.as_metadata_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[test]
	fn from_points() {
		let bbox = GeoBBox::from_points(&[(-150.0, 62.0), (-170.0, 42.0), (-160.0, 50.0)]).unwrap();
		assert_eq!(bbox.as_array(), [-170.0, 42.0, -150.0, 62.0]);
		assert!(GeoBBox::from_points(&[]).is_err());
	}

	#[rstest]
	#[case(-181.0, 0.0, 0.0, 1.0)]
	#[case(0.0, -91.0, 1.0, 1.0)]
	#[case(1.0, 0.0, 0.0, 1.0)]
	#[case(0.0, 1.0, 1.0, 0.0)]
	#[case(f64::NAN, 0.0, 1.0, 1.0)]
	fn invalid(#[case] x_min: f64, #[case] y_min: f64, #[case] x_max: f64, #[case] y_max: f64) {
		assert!(GeoBBox::new(x_min, y_min, x_max, y_max).is_err());
	}

	#[test]
	fn metadata_string_round_trip() {
		let bbox = GeoBBox::new(-170.0, 42.0, -150.0, 62.0).unwrap();
		assert_eq!(bbox.as_metadata_string(), "-170.0,42.0,-150.0,62.0");
		assert_eq!(GeoBBox::parse_metadata_string("-170.0,42.0,-150.0,62.0").unwrap(), bbox);
		assert!(GeoBBox::parse_metadata_string("1,2,3").is_err());
	}

	#[test]
	fn within_mercator() {
		assert!(GeoBBox::new(0.0, 0.0, 10.0, 10.0).unwrap().is_within_mercator());
		assert!(!GeoBBox::new(0.0, 80.0, 1.0, 89.0).unwrap().is_within_mercator());
	}
}
