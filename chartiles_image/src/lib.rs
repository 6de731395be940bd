//! Raster access and image codecs.
//!
//! - [`RasterSource`] is the read interface every stage of the pipeline consumes. [`Raster`] holds
//!   the pixels of one chart, [`PaletteView`] expands a palette-indexed raster to RGBA on read.
//! - [`read_geotiff`] loads a GeoTIFF into a [`Raster`].
//! - [`render_tile`] and [`downsample_tile`] produce the tiles of a web mercator pyramid.
//! - [`format`] encodes and decodes tiles.

pub mod format;
pub use format::{decode, encode, encode_tile};

mod geotiff;
pub use geotiff::*;

mod palette;
pub use palette::*;

mod raster;
pub use raster::*;

mod sampling;
pub use sampling::*;

pub mod traits;
