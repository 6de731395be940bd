//! Tile coordinates in a Web Mercator tile pyramid.
//!
//! [`TileCoord`] is always interpreted in **XYZ** numbering: row `y = 0` is the northernmost row of
//! a zoom level. MBTiles stores rows in **TMS** numbering (row 0 southernmost); the conversion is
//! [`TileCoord::to_tms`], which is its own inverse:
//!
//! ```
//! use chartiles_core::TileCoord;
//!
//! let xyz = TileCoord::new(3, 1, 2).unwrap();
//! let tms = xyz.to_tms();
//! assert_eq!(tms.y, 5); // (2^3 - 1) - 2
//! assert_eq!(tms.to_tms(), xyz);
//! ```

use anyhow::{Result, ensure};
use std::fmt::{self, Debug};

/// Deepest zoom level the pipeline accepts. 2^24 tiles per axis keeps every
/// pixel coordinate of a 4096 px tile inside `u64` and `f64` precision.
pub const MAX_ZOOM_LEVEL: u8 = 24;

#[derive(Eq, PartialEq, Clone, Hash, Copy)]
pub struct TileCoord {
	/// The zoom level of the tile.
	pub level: u8,
	/// The column of the tile.
	pub x: u32,
	/// The row of the tile.
	pub y: u32,
}

impl TileCoord {
	/// Create a new `TileCoord` at zoom `level` with column `x` and row `y`.
	///
	/// # Errors
	/// Returns an error if `level` > [`MAX_ZOOM_LEVEL`] or if `x`/`y` lie outside `0..2^level`.
	pub fn new(level: u8, x: u32, y: u32) -> Result<TileCoord> {
		ensure!(level <= MAX_ZOOM_LEVEL, "level ({level}) must be <= {MAX_ZOOM_LEVEL}");
		let max = 1u32 << level;
		ensure!(x < max, "x ({x}) out of bounds for level {level}");
		ensure!(y < max, "y ({y}) out of bounds for level {level}");
		Ok(TileCoord { level, x, y })
	}

	/// Largest valid column or row index at this level, `2^level - 1`.
	pub fn max_value(&self) -> u32 {
		(1u32 << self.level) - 1
	}

	/// Flip the row within the tile grid, converting between XYZ and TMS numbering.
	pub fn flip_y(&mut self) {
		self.y = self.max_value() - self.y;
	}

	/// Returns the same tile with its row flipped: `(2^level - 1) - y`.
	#[must_use]
	pub fn to_tms(&self) -> TileCoord {
		let mut coord = *self;
		coord.flip_y();
		coord
	}

	/// The four tiles one level down, in the order top-left, top-right, bottom-left, bottom-right.
	pub fn children(&self) -> [TileCoord; 4] {
		let level = self.level + 1;
		let (x, y) = (self.x * 2, self.y * 2);
		[
			TileCoord { level, x, y },
			TileCoord { level, x: x + 1, y },
			TileCoord { level, x, y: y + 1 },
			TileCoord {
				level,
				x: x + 1,
				y: y + 1,
			},
		]
	}
}

/// Custom `Debug` format as `TileCoord(z, [x, y])` for readability.
impl Debug for TileCoord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "TileCoord({}, [{}, {}])", self.level, self.x, self.y)
	}
}

/// Ordering by zoom `level`, then `y`, then `x`.
impl Ord for TileCoord {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		(self.level, self.y, self.x).cmp(&(other.level, other.y, other.x))
	}
}

impl PartialOrd for TileCoord {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[test]
	fn new_validates() {
		assert!(TileCoord::new(0, 0, 0).is_ok());
		assert!(TileCoord::new(2, 4, 0).is_err());
		assert!(TileCoord::new(2, 0, 4).is_err());
		assert!(TileCoord::new(MAX_ZOOM_LEVEL + 1, 0, 0).is_err());
	}

	#[rstest]
	#[case(0, 0, 0)]
	#[case(1, 0, 1)]
	#[case(3, 2, 5)]
	#[case(6, 63, 0)]
	#[case(8, 12, 243)]
	#[case(13, 1024, 7167)]
	fn tms_conversion(#[case] level: u8, #[case] y: u32, #[case] expected: u32) {
		let xyz = TileCoord::new(level, 0, y).unwrap();
		let tms = xyz.to_tms();
		assert_eq!(tms.y, expected);
		assert_eq!(tms.y, (2u32.pow(u32::from(level)) - 1) - y);
		assert_eq!(tms.to_tms(), xyz);
	}

	#[test]
	fn children() {
		let children = TileCoord::new(1, 1, 0).unwrap().children();
		assert_eq!(
			children,
			[
				TileCoord::new(2, 2, 0).unwrap(),
				TileCoord::new(2, 3, 0).unwrap(),
				TileCoord::new(2, 2, 1).unwrap(),
				TileCoord::new(2, 3, 1).unwrap(),
			]
		);
	}

	#[test]
	fn debug_and_order() {
		let a = TileCoord::new(4, 7, 8).unwrap();
		let b = TileCoord::new(4, 8, 7).unwrap();
		assert_eq!(format!("{a:?}"), "TileCoord(4, [7, 8])");
		assert!(b < a);
		assert!(TileCoord::new(3, 7, 7).unwrap() < b);
	}
}
