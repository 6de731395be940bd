//! This module defines the `TileBBox` struct, a rectangular range of tiles at one zoom level.
//!
//! The pyramid generator uses it to enumerate exactly the tiles that intersect a raster footprint,
//! so tiles fully outside the footprint are never computed.

use crate::{GeoBBox, MAX_ZOOM_LEVEL, TileCoord, mercator};
use anyhow::{Result, ensure};
use itertools::Itertools;
use std::fmt;

/// An inclusive range of tile columns and rows at a specific zoom level, in XYZ numbering.
///
/// A bbox with `x_max < x_min` or `y_max < y_min` contains no tiles.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TileBBox {
	/// Zoom level of the bounding box.
	pub level: u8,
	pub x_min: u32,
	pub y_min: u32,
	pub x_max: u32,
	pub y_max: u32,
}

impl TileBBox {
	/// Creates a new `TileBBox`.
	///
	/// # Errors
	///
	/// - If `level` > [`MAX_ZOOM_LEVEL`].
	/// - If any coordinate exceeds `2^level - 1`.
	/// - If `x_min > x_max` or `y_min > y_max`.
	pub fn new(level: u8, x_min: u32, y_min: u32, x_max: u32, y_max: u32) -> Result<TileBBox> {
		ensure!(level <= MAX_ZOOM_LEVEL, "level ({level}) must be <= {MAX_ZOOM_LEVEL}");
		let max = (1u32 << level) - 1;
		ensure!(x_max <= max, "x_max ({x_max}) must be <= max ({max})");
		ensure!(y_max <= max, "y_max ({y_max}) must be <= max ({max})");
		ensure!(x_min <= x_max, "x_min ({x_min}) must be <= x_max ({x_max})");
		ensure!(y_min <= y_max, "y_min ({y_min}) must be <= y_max ({y_max})");
		Ok(TileBBox {
			level,
			x_min,
			y_min,
			x_max,
			y_max,
		})
	}

	/// All tiles whose area intersects `bbox`.
	///
	/// A tile that only touches the bbox along an edge is not included. The bbox must lie inside
	/// the Web Mercator square.
	///
	/// ```
	/// use chartiles_core::{GeoBBox, TileBBox};
	///
	/// let bbox = GeoBBox::new(-170.0, 42.0, -150.0, 62.0).unwrap();
	/// let tiles = TileBBox::from_geo(6, &bbox).unwrap();
	/// assert_eq!((tiles.x_min, tiles.x_max), (1, 5));
	/// assert_eq!((tiles.y_min, tiles.y_max), (17, 23));
	/// ```
	///
	/// # Errors
	/// If `level` is invalid or the bbox reaches beyond the Web Mercator latitude limit.
	pub fn from_geo(level: u8, bbox: &GeoBBox) -> Result<TileBBox> {
		ensure!(level <= MAX_ZOOM_LEVEL, "level ({level}) must be <= {MAX_ZOOM_LEVEL}");
		ensure!(bbox.is_within_mercator(), "{bbox:?} exceeds the web mercator latitude limit");

		let scale = f64::from(1u32 << level);
		let (u_min, v_min) = mercator::lonlat_to_world(bbox.x_min, bbox.y_max);
		let (u_max, v_max) = mercator::lonlat_to_world(bbox.x_max, bbox.y_min);

		let max = (1u32 << level) - 1;
		let first = |w: f64| ((w * scale).floor().max(0.0) as u32).min(max);
		let last = |w: f64| (((w * scale).ceil() - 1.0).max(0.0) as u32).min(max);

		let x_min = first(u_min);
		let y_min = first(v_min);
		// degenerate boxes still cover the tile they lie in
		let x_max = last(u_max).max(x_min);
		let y_max = last(v_max).max(y_min);

		Self::new(level, x_min, y_min, x_max, y_max)
	}

	pub fn width(&self) -> u32 {
		if self.x_max < self.x_min {
			0
		} else {
			self.x_max - self.x_min + 1
		}
	}

	pub fn height(&self) -> u32 {
		if self.y_max < self.y_min {
			0
		} else {
			self.y_max - self.y_min + 1
		}
	}

	/// Number of tiles inside the bbox, `0` if it is empty.
	pub fn count_tiles(&self) -> u64 {
		u64::from(self.width()) * u64::from(self.height())
	}

	/// Iterates all tile coordinates in row-major order, north to south.
	pub fn iter_coords(&self) -> impl Iterator<Item = TileCoord> + '_ {
		let level = self.level;
		(self.y_min..=self.y_max)
			.cartesian_product(self.x_min..=self.x_max)
			.map(move |(y, x)| TileCoord { level, x, y })
	}
}

impl fmt::Debug for TileBBox {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{}: [{},{},{},{}] ({})",
			self.level,
			self.x_min,
			self.y_min,
			self.x_max,
			self.y_max,
			self.count_tiles()
		)
	}
}
