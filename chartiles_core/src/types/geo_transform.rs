//! Affine georeferencing of a pixel grid.

use anyhow::{Result, ensure};

/// Affine transform in GDAL ordering `[x0, dx, rx, y0, ry, dy]`.
///
/// Pixel `(col, row)` (the upper left corner of that pixel) maps to
/// `X = x0 + col·dx + row·rx`, `Y = y0 + col·ry + row·dy`.
///
/// ```
/// use chartiles_core::GeoTransform;
///
/// let transform = GeoTransform::new([-170.0, 0.01, 0.0, 62.0, 0.0, -0.01]).unwrap();
/// assert_eq!(transform.pixel_to_crs(0.0, 0.0), (-170.0, 62.0));
/// let [west, south, east, north] = transform.extent(2000, 2000);
/// assert!((west + 170.0).abs() < 1e-9 && (south - 42.0).abs() < 1e-9);
/// assert!((east + 150.0).abs() < 1e-9 && (north - 62.0).abs() < 1e-9);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
	/// # Errors
	/// If a coefficient is not finite or the transform is singular.
	pub fn new(coefficients: [f64; 6]) -> Result<GeoTransform> {
		ensure!(
			coefficients.iter().all(|c| c.is_finite()),
			"transform {coefficients:?} must be finite"
		);
		let transform = GeoTransform(coefficients);
		ensure!(transform.determinant() != 0.0, "transform {coefficients:?} is singular");
		Ok(transform)
	}

	/// North-up transform from the upper left corner and the pixel size.
	pub fn from_origin(x0: f64, y0: f64, pixel_width: f64, pixel_height: f64) -> Result<GeoTransform> {
		GeoTransform::new([x0, pixel_width, 0.0, y0, 0.0, -pixel_height])
	}

	fn determinant(&self) -> f64 {
		let [_, dx, rx, _, ry, dy] = self.0;
		dx * dy - rx * ry
	}

	pub fn pixel_to_crs(&self, col: f64, row: f64) -> (f64, f64) {
		let [x0, dx, rx, y0, ry, dy] = self.0;
		(x0 + col * dx + row * rx, y0 + col * ry + row * dy)
	}

	/// Inverse of [`GeoTransform::pixel_to_crs`], returning fractional pixel coordinates.
	pub fn crs_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
		let [x0, dx, rx, y0, ry, dy] = self.0;
		let det = self.determinant();
		let (x, y) = (x - x0, y - y0);
		((x * dy - y * rx) / det, (y * dx - x * ry) / det)
	}

	/// The four corners of a `width`×`height` grid in CRS units, clockwise from upper left.
	pub fn corners(&self, width: u32, height: u32) -> [(f64, f64); 4] {
		let (w, h) = (f64::from(width), f64::from(height));
		[
			self.pixel_to_crs(0.0, 0.0),
			self.pixel_to_crs(w, 0.0),
			self.pixel_to_crs(w, h),
			self.pixel_to_crs(0.0, h),
		]
	}

	/// Extent `[x_min, y_min, x_max, y_max]` over all four corners of a `width`×`height` grid.
	pub fn extent(&self, width: u32, height: u32) -> [f64; 4] {
		self.corners(width, height).iter().fold(
			[f64::MAX, f64::MAX, f64::MIN, f64::MIN],
			|[x_min, y_min, x_max, y_max], &(x, y)| [x_min.min(x), y_min.min(y), x_max.max(x), y_max.max(y)],
		)
	}
}
