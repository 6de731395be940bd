//! GeoTIFF decoding into a [`Raster`].
//!
//! Georeferencing is taken from `ModelTransformation`, or from `ModelPixelScale` together with
//! `ModelTiepoint`. The CRS comes from the GeoKey directory: geographic models and the web
//! mercator projection are supported. Only 8-bit palette, grey, RGB and RGBA images are decoded.

use crate::{PixelData, Raster, RasterCrs};
use chartiles_core::{ChartError, GeoTransform};
use std::{fs::File, io::BufReader, path::Path};
use tiff::{
	ColorType, TiffError,
	decoder::{Decoder, DecodingResult, Limits},
	tags::Tag,
};

mod chunks;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED: u16 = 32767;

const PHOTOMETRIC_PALETTE: u16 = 3;

/// Reads a GeoTIFF file into memory.
///
/// # Errors
/// - [`ChartError::Io`] if the file cannot be opened or read.
/// - [`ChartError::UnsupportedRasterFormat`] for pixel encodings other than 8-bit palette, grey,
///   RGB or RGBA, for missing georeferencing and for unsupported coordinate systems.
pub fn read_geotiff(path: &Path) -> Result<Raster, ChartError> {
	log::debug!("reading GeoTIFF {path:?}");
	let file = File::open(path).map_err(|e| ChartError::io(format!("opening {path:?}: {e}")))?;
	let mut decoder = Decoder::new(BufReader::new(file))
		.map_err(classify)?
		.with_limits(Limits::unlimited());

	let (width, height) = decoder.dimensions().map_err(classify)?;
	let transform = read_transform(&mut decoder)?;
	let crs = read_crs(&mut decoder)?;
	let nodata = read_nodata(&mut decoder)?;

	let photometric = decoder
		.find_tag_unsigned::<u16>(Tag::PhotometricInterpretation)
		.map_err(classify)?;
	let data = if photometric == Some(PHOTOMETRIC_PALETTE) {
		let color_table = read_color_table(&mut decoder)?;
		let file = File::open(path).map_err(|e| ChartError::io(format!("opening {path:?}: {e}")))?;
		PixelData::Indexed {
			indices: chunks::read_samples_u8(&mut decoder, BufReader::new(file), width, height)?,
			color_table,
		}
	} else {
		match decoder.colortype().map_err(classify)? {
			ColorType::Gray(8) => PixelData::Gray8(read_u8(&mut decoder)?),
			ColorType::RGB(8) => PixelData::Rgb8(read_u8(&mut decoder)?),
			ColorType::RGBA(8) => PixelData::Rgba8(read_u8(&mut decoder)?),
			other => return Err(ChartError::unsupported(format!("pixel type {other:?} in {path:?}"))),
		}
	};

	let raster = Raster::new(width, height, transform, crs, data)?.with_nodata(nodata);
	log::debug!(
		"read {path:?}: {width}x{height} {:?}, {crs:?}, nodata {nodata:?}",
		raster.data()
	);
	Ok(raster)
}

fn classify(err: TiffError) -> ChartError {
	match err {
		TiffError::IoError(e) => ChartError::io(e),
		other => ChartError::unsupported(other),
	}
}

fn read_u8<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Result<Vec<u8>, ChartError> {
	match decoder.read_image().map_err(classify)? {
		DecodingResult::U8(data) => Ok(data),
		_ => Err(ChartError::unsupported("expected 8-bit samples")),
	}
}

fn read_f64s<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>, tag: Tag) -> Result<Option<Vec<f64>>, ChartError> {
	decoder
		.find_tag(tag)
		.map_err(classify)?
		.map(|value| value.into_f64_vec().map_err(classify))
		.transpose()
}

/// TIFF color maps store all red, then all green, then all blue values as 16-bit intensities.
fn read_color_table<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Result<Vec<[u8; 3]>, ChartError> {
	let map = decoder
		.find_tag(Tag::ColorMap)
		.map_err(classify)?
		.ok_or_else(|| ChartError::unsupported("palette image without ColorMap"))?
		.into_u16_vec()
		.map_err(classify)?;

	if map.is_empty() || map.len() % 3 != 0 {
		return Err(ChartError::unsupported(format!("ColorMap with {} values", map.len())));
	}
	let n = map.len() / 3;
	Ok((0..n)
		.map(|i| [(map[i] >> 8) as u8, (map[n + i] >> 8) as u8, (map[2 * n + i] >> 8) as u8])
		.collect())
}

fn read_transform<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform, ChartError> {
	let coefficients = if let Some(m) = read_f64s(decoder, Tag::ModelTransformationTag)? {
		if m.len() < 16 {
			return Err(ChartError::unsupported("ModelTransformation must have 16 values"));
		}
		// row-major 4x4 matrix, only the 2D affine part is used
		[m[3], m[0], m[1], m[7], m[4], m[5]]
	} else {
		let scale = read_f64s(decoder, Tag::ModelPixelScaleTag)?;
		let tiepoint = read_f64s(decoder, Tag::ModelTiepointTag)?;
		match (scale, tiepoint) {
			(Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => {
				let (i, j, x, y) = (t[0], t[1], t[3], t[4]);
				[x - i * s[0], s[0], 0.0, y + j * s[1], 0.0, -s[1]]
			}
			_ => return Err(ChartError::unsupported("image is not georeferenced")),
		}
	};
	let mut transform = GeoTransform::new(coefficients).map_err(ChartError::unsupported)?;

	if geo_key(decoder, GT_RASTER_TYPE)? == Some(RASTER_PIXEL_IS_POINT) {
		// tie points refer to pixel centres, shift the origin to the upper left corner
		let [x0, dx, rx, y0, ry, dy] = transform.0;
		transform = GeoTransform([x0 - 0.5 * (dx + rx), dx, rx, y0 - 0.5 * (ry + dy), ry, dy]);
	}
	Ok(transform)
}

/// Short value of a GeoKey stored directly in the key directory.
fn geo_key<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>, key: u16) -> Result<Option<u16>, ChartError> {
	let Some(directory) = decoder.find_tag(Tag::GeoKeyDirectoryTag).map_err(classify)? else {
		return Ok(None);
	};
	let directory = directory.into_u16_vec().map_err(classify)?;
	// header: version, revision, minor revision, number of keys
	Ok(directory
		.get(4..)
		.unwrap_or_default()
		.chunks_exact(4)
		.find(|entry| entry[0] == key && entry[1] == 0)
		.map(|entry| entry[3]))
}

fn read_crs<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Result<RasterCrs, ChartError> {
	match geo_key(decoder, GT_MODEL_TYPE)? {
		Some(MODEL_TYPE_GEOGRAPHIC) => match geo_key(decoder, GEOGRAPHIC_TYPE)? {
			None | Some(USER_DEFINED) => Ok(RasterCrs::Geographic),
			Some(code) => RasterCrs::from_epsg(u32::from(code))
				.filter(|crs| *crs == RasterCrs::Geographic)
				.ok_or_else(|| ChartError::unsupported(format!("geographic CRS EPSG:{code}"))),
		},
		Some(MODEL_TYPE_PROJECTED) => {
			let code = geo_key(decoder, PROJECTED_CS_TYPE)?;
			match code.and_then(|c| RasterCrs::from_epsg(u32::from(c))) {
				Some(RasterCrs::WebMercator) => Ok(RasterCrs::WebMercator),
				_ => Err(ChartError::unsupported(format!(
					"projected CRS {} (only web mercator is supported)",
					code.map_or_else(|| "user defined".to_string(), |c| format!("EPSG:{c}"))
				))),
			}
		}
		None => {
			log::warn!("GeoTIFF has no model type, assuming geographic coordinates");
			Ok(RasterCrs::Geographic)
		}
		Some(other) => Err(ChartError::unsupported(format!("model type {other}"))),
	}
}

/// GDAL stores the no-data value as ASCII. Only values representable as an 8-bit sample are used.
fn read_nodata<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Result<Option<u8>, ChartError> {
	let Some(value) = decoder.find_tag(Tag::GdalNodata).map_err(classify)? else {
		return Ok(None);
	};
	let text = value.into_string().map_err(classify)?;
	let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
	Ok(text
		.parse::<f64>()
		.ok()
		.filter(|v| v.fract() == 0.0 && (0.0..=255.0).contains(v))
		.map(|v| v as u8))
}
