//! Run configuration of the pipeline.
//!
//! A `PipelineConfig` is built once, validated, and handed to the [`crate::Orchestrator`]. It can
//! be read from YAML; every field is optional and unknown fields are rejected:
//!
//! ```yaml
//! min_zoom: 6
//! max_zoom: 13
//! tile_size: 512
//! format: jpeg
//! quality: 75
//! alpha_threshold: 1
//! raster_concurrency: 1
//! raster_timeout_secs: 7200
//! temp_root: ./tmp
//! batch_size: 500
//! ```

use anyhow::{Context, Result};
use chartiles_core::{ChartError, ConcurrencyLimits, MAX_ZOOM_LEVEL, TileFormat};
use serde::Deserialize;
use std::{
	fs::File,
	io::{BufReader, Read},
	path::{Path, PathBuf},
	time::Duration,
};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
	/// Lowest zoom level of the pyramid.
	pub min_zoom: u8,

	/// Highest zoom level of the pyramid, rendered directly from the raster.
	pub max_zoom: u8,

	/// Edge length of a tile in pixels.
	#[serde(alias = "tile_edge_length")]
	pub tile_size: u32,

	/// Encoding of the tiles inside the container.
	#[serde(alias = "image_format")]
	pub format: TileFormat,

	/// Encoder quality, 0..=100. Ignored for PNG.
	pub quality: u8,

	/// Tiles whose most opaque pixel has an alpha value up to this threshold are dropped.
	pub alpha_threshold: u8,

	/// Number of tiles rendered or encoded at the same time, shared by all rasters.
	pub workers: usize,

	/// Number of rasters processed at the same time.
	pub raster_concurrency: usize,

	/// Upper limit for processing a single raster.
	pub raster_timeout_secs: u64,

	/// Parent of the per-raster working directories. Defaults to the system temp directory.
	pub temp_root: Option<PathBuf>,

	/// Palette index treated as no-data, overriding the GeoTIFF's own no-data value.
	pub nodata_index: Option<u8>,

	/// Number of tiles per container transaction.
	pub batch_size: usize,
}

impl Default for PipelineConfig {
	fn default() -> Self {
		PipelineConfig {
			min_zoom: 6,
			max_zoom: 13,
			tile_size: 512,
			format: TileFormat::JPG,
			quality: 75,
			alpha_threshold: 1,
			workers: ConcurrencyLimits::default().cpu_bound,
			raster_concurrency: 1,
			raster_timeout_secs: 7200,
			temp_root: None,
			nodata_index: None,
			batch_size: 500,
		}
	}
}

impl PipelineConfig {
	pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
		Ok(serde_yaml_ng::from_reader(reader)?)
	}

	pub fn from_string(text: &str) -> Result<Self> {
		Ok(serde_yaml_ng::from_str(text)?)
	}

	/// Parses a YAML file. A relative `temp_root` is resolved against the file's directory.
	pub fn from_path(path: &Path) -> Result<Self> {
		let file = File::open(path).with_context(|| format!("opening config {path:?}"))?;
		let mut config =
			PipelineConfig::from_reader(BufReader::new(file)).with_context(|| format!("parsing config {path:?}"))?;

		if let (Some(temp_root), Some(base)) = (&config.temp_root, path.parent())
			&& temp_root.is_relative()
		{
			config.temp_root = Some(base.join(temp_root));
		}
		Ok(config)
	}

	/// Checks value ranges.
	///
	/// # Errors
	/// Returns [`ChartError::InvalidConfig`] describing the first invalid value.
	pub fn validate(&self) -> Result<(), ChartError> {
		let invalid = |message: String| Err(ChartError::InvalidConfig(message));

		if self.min_zoom > self.max_zoom {
			return invalid(format!(
				"min_zoom ({}) must not exceed max_zoom ({})",
				self.min_zoom, self.max_zoom
			));
		}
		if self.max_zoom > MAX_ZOOM_LEVEL {
			return invalid(format!("max_zoom ({}) must be <= {MAX_ZOOM_LEVEL}", self.max_zoom));
		}
		if !(1..=4096).contains(&self.tile_size) {
			return invalid(format!("tile_size ({}) must be within 1..=4096", self.tile_size));
		}
		if self.quality > 100 {
			return invalid(format!("quality ({}) must be within 0..=100", self.quality));
		}
		for (name, value) in [
			("workers", self.workers),
			("raster_concurrency", self.raster_concurrency),
			("batch_size", self.batch_size),
		] {
			if value == 0 {
				return invalid(format!("{name} must be at least 1"));
			}
		}
		if self.raster_timeout_secs == 0 {
			return invalid("raster_timeout_secs must be at least 1".to_string());
		}
		Ok(())
	}

	pub fn concurrency(&self) -> ConcurrencyLimits {
		ConcurrencyLimits::with_workers(self.workers)
	}

	pub fn raster_timeout(&self) -> Duration {
		Duration::from_secs(self.raster_timeout_secs)
	}

	pub fn temp_root(&self) -> PathBuf {
		self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
	}
}
