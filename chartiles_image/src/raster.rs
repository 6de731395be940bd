//! In-memory georeferenced rasters and the [`RasterSource`] read interface.

use chartiles_core::{ChartError, GeoBBox, GeoTransform, mercator};
use std::fmt::Debug;

/// Coordinate reference system of a raster's affine transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RasterCrs {
	/// Longitude/latitude in degrees.
	Geographic,
	/// Spherical web mercator (EPSG:3857) in metres.
	WebMercator,
}

impl RasterCrs {
	/// Maps an EPSG code to a supported CRS.
	pub fn from_epsg(code: u32) -> Option<RasterCrs> {
		match code {
			4326 | 4269 | 4258 | 4152 | 4267 => Some(RasterCrs::Geographic),
			3857 | 3785 | 900913 => Some(RasterCrs::WebMercator),
			_ => None,
		}
	}

	pub fn to_lonlat(&self, x: f64, y: f64) -> (f64, f64) {
		match self {
			RasterCrs::Geographic => (x, y),
			RasterCrs::WebMercator => (mercator::x_to_lon(x), mercator::y_to_lat(y)),
		}
	}

	pub fn from_lonlat(&self, lon: f64, lat: f64) -> (f64, f64) {
		match self {
			RasterCrs::Geographic => (lon, lat),
			RasterCrs::WebMercator => (mercator::lon_to_x(lon), mercator::lat_to_y(lat)),
		}
	}
}

/// Pixel encodings a [`Raster`] can hold. Samples are stored row-major and interleaved.
#[derive(Clone, PartialEq)]
pub enum PixelData {
	/// 8-bit indices into a color table of RGB entries.
	Indexed { indices: Vec<u8>, color_table: Vec<[u8; 3]> },
	Gray8(Vec<u8>),
	Rgb8(Vec<u8>),
	Rgba8(Vec<u8>),
}

impl PixelData {
	pub fn channel_count(&self) -> usize {
		match self {
			PixelData::Indexed { .. } | PixelData::Gray8(_) => 1,
			PixelData::Rgb8(_) => 3,
			PixelData::Rgba8(_) => 4,
		}
	}

	fn samples(&self) -> &[u8] {
		match self {
			PixelData::Indexed { indices, .. } => indices,
			PixelData::Gray8(v) | PixelData::Rgb8(v) | PixelData::Rgba8(v) => v,
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			PixelData::Indexed { .. } => "palette",
			PixelData::Gray8(_) => "gray8",
			PixelData::Rgb8(_) => "rgb8",
			PixelData::Rgba8(_) => "rgba8",
		}
	}
}

impl Debug for PixelData {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			PixelData::Indexed { color_table, .. } => write!(f, "Indexed({} colors)", color_table.len()),
			other => f.write_str(other.name()),
		}
	}
}

/// Read access to a georeferenced grid of RGBA pixels.
///
/// Implementors only provide the raw accessors. Footprint and coordinate helpers are derived
/// from the transform and the CRS.
pub trait RasterSource: Debug + Send + Sync {
	fn width(&self) -> u32;
	fn height(&self) -> u32;
	fn transform(&self) -> &GeoTransform;
	fn crs(&self) -> RasterCrs;

	/// RGBA value of pixel `(col, row)`. Both must lie inside the grid.
	fn rgba(&self, col: u32, row: u32) -> [u8; 4];

	/// Extent `[x_min, y_min, x_max, y_max]` of the full pixel grid in CRS units.
	fn extent(&self) -> [f64; 4] {
		self.transform().extent(self.width(), self.height())
	}

	/// Geographic footprint of the raster, computed from all four corners.
	///
	/// Fails with [`ChartError::UnprojectableExtent`] if the footprint leaves the web mercator
	/// square or crosses the antimeridian.
	fn geo_bbox(&self) -> Result<GeoBBox, ChartError> {
		let corners = self
			.transform()
			.corners(self.width(), self.height())
			.map(|(x, y)| self.crs().to_lonlat(x, y));

		for &(lon, lat) in &corners {
			if !mercator::is_projectable(lon, lat) {
				return Err(ChartError::unprojectable(format!(
					"corner ({lon}, {lat}) lies outside the web mercator domain"
				)));
			}
		}
		GeoBBox::from_points(&corners).map_err(ChartError::unprojectable)
	}

	/// Fractional pixel position of a geographic point. Pixel `(c, r)` covers `[c, c+1) × [r, r+1)`.
	fn lonlat_to_pixel(&self, lon: f64, lat: f64) -> (f64, f64) {
		let (x, y) = self.crs().from_lonlat(lon, lat);
		self.transform().crs_to_pixel(x, y)
	}
}

/// A decoded chart: pixel samples plus georeferencing. Immutable once read.
#[derive(Clone, Debug)]
pub struct Raster {
	width: u32,
	height: u32,
	transform: GeoTransform,
	crs: RasterCrs,
	data: PixelData,
	nodata: Option<u8>,
}

impl Raster {
	/// # Errors
	/// [`ChartError::UnsupportedRasterFormat`] if the sample count does not match the dimensions.
	pub fn new(
		width: u32,
		height: u32,
		transform: GeoTransform,
		crs: RasterCrs,
		data: PixelData,
	) -> Result<Raster, ChartError> {
		let expected = width as usize * height as usize * data.channel_count();
		if width == 0 || height == 0 {
			return Err(ChartError::unsupported(format!("empty raster {width}x{height}")));
		}
		if data.samples().len() != expected {
			return Err(ChartError::unsupported(format!(
				"{:?} raster {width}x{height} needs {expected} samples, got {}",
				data,
				data.samples().len()
			)));
		}
		Ok(Raster {
			width,
			height,
			transform,
			crs,
			data,
			nodata: None,
		})
	}

	/// Marks samples with this value as transparent. For indexed rasters it is a palette index,
	/// otherwise it applies to every band.
	pub fn with_nodata(mut self, nodata: Option<u8>) -> Raster {
		self.nodata = nodata;
		self
	}

	pub fn nodata(&self) -> Option<u8> {
		self.nodata
	}

	pub fn data(&self) -> &PixelData {
		&self.data
	}

	pub fn is_indexed(&self) -> bool {
		matches!(self.data, PixelData::Indexed { .. })
	}

	pub fn is_true_color(&self) -> bool {
		matches!(self.data, PixelData::Rgb8(_) | PixelData::Rgba8(_))
	}

	fn offset(&self, col: u32, row: u32) -> usize {
		(row as usize * self.width as usize + col as usize) * self.data.channel_count()
	}

	/// Raw palette index of an indexed raster.
	pub(crate) fn index_at(&self, col: u32, row: u32) -> u8 {
		self.data.samples()[self.offset(col, row)]
	}
}

impl RasterSource for Raster {
	fn width(&self) -> u32 {
		self.width
	}

	fn height(&self) -> u32 {
		self.height
	}

	fn transform(&self) -> &GeoTransform {
		&self.transform
	}

	fn crs(&self) -> RasterCrs {
		self.crs
	}

	/// True-color pixels are returned as stored. Single-band rasters return the raw sample as
	/// grey; palette lookups are done by [`crate::PaletteView`].
	fn rgba(&self, col: u32, row: u32) -> [u8; 4] {
		let i = self.offset(col, row);
		let samples = self.data.samples();
		match &self.data {
			PixelData::Rgba8(_) => [samples[i], samples[i + 1], samples[i + 2], samples[i + 3]],
			PixelData::Rgb8(_) => {
				let (r, g, b) = (samples[i], samples[i + 1], samples[i + 2]);
				let alpha = match self.nodata {
					Some(n) if r == n && g == n && b == n => 0,
					_ => 255,
				};
				[r, g, b, alpha]
			}
			PixelData::Indexed { .. } | PixelData::Gray8(_) => {
				let v = samples[i];
				[v, v, v, if self.nodata == Some(v) { 0 } else { 255 }]
			}
		}
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use approx::assert_relative_eq;

	/// The "Anchorage" test chart: origin (-170, 62), 0.01° pixels.
	pub fn anchorage_transform() -> GeoTransform {
		GeoTransform::from_origin(-170.0, 62.0, 0.01, 0.01).unwrap()
	}

	pub fn rgb_raster(width: u32, height: u32) -> Raster {
		let data = (0..width * height)
			.flat_map(|i| [(i % 256) as u8, ((i / 256) % 256) as u8, 200])
			.collect();
		Raster::new(width, height, anchorage_transform(), RasterCrs::Geographic, PixelData::Rgb8(data)).unwrap()
	}

	#[test]
	fn rejects_wrong_sample_count() {
		let err = Raster::new(2, 2, anchorage_transform(), RasterCrs::Geographic, PixelData::Rgb8(vec![0; 11])).unwrap_err();
		assert!(err.is_skip());
		assert!(err.to_string().contains("needs 12 samples, got 11"));
	}

	#[test]
	fn rgb_pixels_and_nodata() {
		let raster = Raster::new(
			2,
			1,
			anchorage_transform(),
			RasterCrs::Geographic,
			PixelData::Rgb8(vec![0, 0, 0, 10, 20, 30]),
		)
		.unwrap()
		.with_nodata(Some(0));
		assert_eq!(raster.rgba(0, 0), [0, 0, 0, 0]);
		assert_eq!(raster.rgba(1, 0), [10, 20, 30, 255]);
	}

	#[test]
	fn geo_bbox_from_transform() {
		let bbox = rgb_raster(2000, 2000).geo_bbox().unwrap();
		assert_relative_eq!(bbox.x_min, -170.0, epsilon = 1e-9);
		assert_relative_eq!(bbox.y_min, 42.0, epsilon = 1e-9);
		assert_relative_eq!(bbox.x_max, -150.0, epsilon = 1e-9);
		assert_relative_eq!(bbox.y_max, 62.0, epsilon = 1e-9);
	}

	#[test]
	fn geo_bbox_web_mercator() {
		let half = mercator::HALF_CIRCUMFERENCE;
		let transform = GeoTransform::from_origin(0.0, half / 2.0, half / 100.0, half / 100.0).unwrap();
		let raster = Raster::new(50, 50, transform, RasterCrs::WebMercator, PixelData::Gray8(vec![0; 2500])).unwrap();
		let bbox = raster.geo_bbox().unwrap();
		assert_relative_eq!(bbox.x_min, 0.0, epsilon = 1e-9);
		assert_relative_eq!(bbox.x_max, 90.0, epsilon = 1e-9);
		assert_relative_eq!(bbox.y_min, 0.0, epsilon = 1e-9);
		assert_relative_eq!(bbox.y_max, mercator::y_to_lat(half / 2.0), epsilon = 1e-9);
	}

	#[test]
	fn polar_raster_is_unprojectable() {
		let transform = GeoTransform::from_origin(0.0, 89.0, 0.1, 0.1).unwrap();
		let raster = Raster::new(10, 10, transform, RasterCrs::Geographic, PixelData::Gray8(vec![0; 100])).unwrap();
		assert!(matches!(raster.geo_bbox(), Err(ChartError::UnprojectableExtent(_))));
	}

	#[test]
	fn antimeridian_is_unprojectable() {
		let transform = GeoTransform::from_origin(175.0, 10.0, 1.0, 1.0).unwrap();
		let raster = Raster::new(10, 10, transform, RasterCrs::Geographic, PixelData::Gray8(vec![0; 100])).unwrap();
		assert!(matches!(raster.geo_bbox(), Err(ChartError::UnprojectableExtent(_))));
	}

	#[test]
	fn lonlat_to_pixel() {
		let raster = rgb_raster(2000, 2000);
		let (col, row) = raster.lonlat_to_pixel(-160.0, 52.0);
		assert_relative_eq!(col, 1000.0, epsilon = 1e-6);
		assert_relative_eq!(row, 1000.0, epsilon = 1e-6);
	}

	#[test]
	fn epsg_codes() {
		assert_eq!(RasterCrs::from_epsg(4326), Some(RasterCrs::Geographic));
		assert_eq!(RasterCrs::from_epsg(3857), Some(RasterCrs::WebMercator));
		assert_eq!(RasterCrs::from_epsg(32633), None);
	}
}
