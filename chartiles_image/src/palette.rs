//! Palette expansion without materializing an RGBA copy of the raster.
//!
//! Charts are usually distributed as 8-bit palette images. Expanding such a chart eagerly would
//! quadruple its memory footprint, so [`PaletteView`] keeps the indices and resolves each pixel
//! through a 256-entry lookup table when it is read.
//!
//! ```
//! use chartiles_core::GeoTransform;
//! use chartiles_image::{PixelData, Raster, RasterCrs, RasterSource, expand_palette};
//! use std::sync::Arc;
//!
//! let data = PixelData::Indexed {
//! 	indices: vec![0, 1, 1, 0],
//! 	color_table: vec![[0, 0, 0], [255, 128, 0]],
//! };
//! let transform = GeoTransform::from_origin(10.0, 50.0, 0.5, 0.5).unwrap();
//! let raster = Raster::new(2, 2, transform, RasterCrs::Geographic, data).unwrap().with_nodata(Some(0));
//!
//! let view = expand_palette(Arc::new(raster)).unwrap();
//! assert_eq!(view.rgba(0, 0), [0, 0, 0, 0]);
//! assert_eq!(view.rgba(1, 0), [255, 128, 0, 255]);
//! ```

use crate::{PixelData, Raster, RasterCrs, RasterSource};
use chartiles_core::{ChartError, GeoTransform};
use std::{fmt::Debug, sync::Arc};

/// Returns an RGBA-capable source for `raster`.
///
/// True-color rasters are returned as they are. Palette-indexed rasters are wrapped in a
/// [`PaletteView`]. Every other pixel encoding fails with [`ChartError::UnsupportedRasterFormat`].
pub fn expand_palette(raster: Arc<Raster>) -> Result<Arc<dyn RasterSource>, ChartError> {
	if raster.is_true_color() {
		return Ok(raster);
	}
	if raster.is_indexed() {
		log::debug!("expanding palette raster {}x{} to rgba on read", raster.width(), raster.height());
		return Ok(Arc::new(PaletteView::new(raster)?));
	}
	Err(ChartError::unsupported(format!(
		"{} rasters cannot be expanded to rgba",
		raster.data().name()
	)))
}

/// Virtual RGBA view over a palette-indexed [`Raster`].
pub struct PaletteView {
	raster: Arc<Raster>,
	lut: [[u8; 4]; 256],
}

impl PaletteView {
	/// Builds the lookup table from the raster's color table and no-data index.
	///
	/// Indices beyond the color table resolve to transparent black.
	pub fn new(raster: Arc<Raster>) -> Result<PaletteView, ChartError> {
		let PixelData::Indexed { color_table, .. } = raster.data() else {
			return Err(ChartError::unsupported(format!(
				"{} raster has no color table",
				raster.data().name()
			)));
		};
		if color_table.is_empty() || color_table.len() > 256 {
			return Err(ChartError::unsupported(format!(
				"color table with {} entries",
				color_table.len()
			)));
		}

		let mut lut = [[0u8; 4]; 256];
		for (entry, &[r, g, b]) in lut.iter_mut().zip(color_table) {
			*entry = [r, g, b, 255];
		}
		if let Some(index) = raster.nodata() {
			lut[usize::from(index)][3] = 0;
		}

		Ok(PaletteView { raster, lut })
	}
}

impl Debug for PaletteView {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PaletteView").field("raster", &self.raster).finish()
	}
}

impl RasterSource for PaletteView {
	fn width(&self) -> u32 {
		self.raster.width()
	}

	fn height(&self) -> u32 {
		self.raster.height()
	}

	fn transform(&self) -> &GeoTransform {
		self.raster.transform()
	}

	fn crs(&self) -> RasterCrs {
		self.raster.crs()
	}

	fn rgba(&self, col: u32, row: u32) -> [u8; 4] {
		self.lut[usize::from(self.raster.index_at(col, row))]
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::raster::tests::{anchorage_transform, rgb_raster};
	use pretty_assertions::assert_eq;

	fn indexed(nodata: Option<u8>) -> Raster {
		let data = PixelData::Indexed {
			indices: vec![0, 1, 2, 3, 2, 1],
			color_table: vec![[0, 0, 0], [255, 0, 0], [0, 255, 0]],
		};
		Raster::new(3, 2, anchorage_transform(), RasterCrs::Geographic, data)
			.unwrap()
			.with_nodata(nodata)
	}

	#[test]
	fn true_color_is_not_wrapped() {
		let raster = Arc::new(rgb_raster(4, 4));
		let source = expand_palette(raster.clone()).unwrap();
		assert!(format!("{source:?}").starts_with("Raster"));
		assert_eq!(source.rgba(1, 0), raster.rgba(1, 0));
	}

	#[test]
	fn indexed_is_expanded_on_read() {
		let source = expand_palette(Arc::new(indexed(None))).unwrap();
		assert!(format!("{source:?}").starts_with("PaletteView"));
		let row0: Vec<[u8; 4]> = (0..3).map(|c| source.rgba(c, 0)).collect();
		assert_eq!(row0, vec![[0, 0, 0, 255], [255, 0, 0, 255], [0, 255, 0, 255]]);
		// index 3 is outside the color table
		assert_eq!(source.rgba(0, 1), [0, 0, 0, 0]);
		assert_eq!(source.width(), 3);
		assert_eq!(source.height(), 2);
		assert_eq!(source.transform(), &anchorage_transform());
	}

	#[test]
	fn nodata_index_is_transparent() {
		let source = expand_palette(Arc::new(indexed(Some(1)))).unwrap();
		assert_eq!(source.rgba(1, 0), [255, 0, 0, 0]);
		assert_eq!(source.rgba(0, 0), [0, 0, 0, 255]);
	}

	#[test]
	fn gray_is_unsupported() {
		let raster = Raster::new(
			2,
			2,
			anchorage_transform(),
			RasterCrs::Geographic,
			PixelData::Gray8(vec![0; 4]),
		)
		.unwrap();
		let err = expand_palette(Arc::new(raster)).unwrap_err();
		assert_eq!(
			err,
			ChartError::UnsupportedRasterFormat("gray8 rasters cannot be expanded to rgba".to_string())
		);
	}

	#[test]
	fn empty_color_table_is_unsupported() {
		let data = PixelData::Indexed {
			indices: vec![0],
			color_table: vec![],
		};
		let raster = Raster::new(1, 1, anchorage_transform(), RasterCrs::Geographic, data).unwrap();
		assert!(PaletteView::new(Arc::new(raster)).unwrap_err().is_skip());
	}
}
