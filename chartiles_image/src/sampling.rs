//! Resampling of rasters into web mercator tiles.
//!
//! The deepest zoom level is rendered directly from the source with bilinear interpolation.
//! Every coarser tile is the 2×2 box average of its four children. Both kernels weight colors by
//! alpha, so transparent no-data pixels never darken the edges of a chart.

use crate::RasterSource;
use chartiles_core::{TileCoord, mercator};
use image::{Rgba, RgbaImage};

/// Renders tile `coord` with an edge length of `size` pixels from `source`.
///
/// Pixels whose centre falls outside the source grid are transparent.
pub fn render_tile(source: &dyn RasterSource, coord: &TileCoord, size: u32) -> RgbaImage {
	let scale = f64::from(size) * f64::from(1u32 << coord.level);
	let crs = source.crs();

	// lon only depends on the column and lat only on the row of the output pixel
	let xs: Vec<f64> = (0..size)
		.map(|px| {
			let u = (f64::from(coord.x) * f64::from(size) + f64::from(px) + 0.5) / scale;
			crs.from_lonlat(mercator::world_to_lonlat(u, 0.5).0, 0.0).0
		})
		.collect();
	let ys: Vec<f64> = (0..size)
		.map(|py| {
			let v = (f64::from(coord.y) * f64::from(size) + f64::from(py) + 0.5) / scale;
			crs.from_lonlat(0.0, mercator::world_to_lonlat(0.5, v).1).1
		})
		.collect();

	let transform = source.transform();
	let (width, height) = (f64::from(source.width()), f64::from(source.height()));

	RgbaImage::from_fn(size, size, |px, py| {
		let (col, row) = transform.crs_to_pixel(xs[px as usize], ys[py as usize]);
		if !(0.0..width).contains(&col) || !(0.0..height).contains(&row) {
			return Rgba([0, 0, 0, 0]);
		}
		Rgba(bilinear(source, col, row))
	})
}

/// Alpha-weighted bilinear interpolation around the fractional pixel position `(col, row)`.
///
/// Neighbours beyond the grid edge are clamped to the edge.
fn bilinear(source: &dyn RasterSource, col: f64, row: f64) -> [u8; 4] {
	let max_col = source.width() - 1;
	let max_row = source.height() - 1;

	// pixel centres lie at half-integer positions
	let fx = (col - 0.5).max(0.0);
	let fy = (row - 0.5).max(0.0);
	let x0 = (fx.floor() as u32).min(max_col);
	let y0 = (fy.floor() as u32).min(max_row);
	let x1 = (x0 + 1).min(max_col);
	let y1 = (y0 + 1).min(max_row);
	let tx = fx - fx.floor();
	let ty = fy - fy.floor();

	let mut acc = Accumulator::default();
	acc.add(source.rgba(x0, y0), (1.0 - tx) * (1.0 - ty));
	acc.add(source.rgba(x1, y0), tx * (1.0 - ty));
	acc.add(source.rgba(x0, y1), (1.0 - tx) * ty);
	acc.add(source.rgba(x1, y1), tx * ty);
	acc.finish(1.0)
}

/// Builds a tile from its four children, given in the order of [`TileCoord::children`].
///
/// Missing children are treated as fully transparent. All children must have the edge length
/// `size`.
pub fn downsample_tile(children: &[Option<RgbaImage>; 4], size: u32) -> RgbaImage {
	RgbaImage::from_fn(size, size, |ox, oy| {
		let mut acc = Accumulator::default();
		for my in [2 * oy, 2 * oy + 1] {
			for mx in [2 * ox, 2 * ox + 1] {
				let quadrant = (mx / size + 2 * (my / size)) as usize;
				if let Some(child) = &children[quadrant] {
					acc.add(child.get_pixel(mx % size, my % size).0, 1.0);
				}
			}
		}
		Rgba(acc.finish(4.0))
	})
}

/// Sums of alpha-premultiplied colors.
#[derive(Default)]
struct Accumulator {
	rgb: [f64; 3],
	alpha: f64,
}

impl Accumulator {
	fn add(&mut self, pixel: [u8; 4], weight: f64) {
		let a = f64::from(pixel[3]) * weight;
		for (sum, value) in self.rgb.iter_mut().zip(pixel) {
			*sum += f64::from(value) * a;
		}
		self.alpha += a;
	}

	/// Un-premultiplies the sums. `total_weight` is the sum of all weights passed to `add`.
	fn finish(&self, total_weight: f64) -> [u8; 4] {
		if self.alpha <= 0.0 {
			return [0, 0, 0, 0];
		}
		let [r, g, b] = self.rgb.map(|sum| (sum / self.alpha).round().clamp(0.0, 255.0) as u8);
		let alpha = (self.alpha / total_weight).round().clamp(0.0, 255.0) as u8;
		[r, g, b, alpha]
	}
}
