//! Tile pyramid generation.
//!
//! The [`PyramidGenerator`] cuts an RGBA raster into web mercator tiles for every zoom level of a
//! range and stores them as PNG files in a [`DirectoryWriter`] (`{z}/{x}/{y}.png`, XYZ rows).
//!
//! Levels are produced from the deepest to the coarsest:
//! - the **max zoom** is rendered from the raster with alpha-weighted bilinear sampling,
//! - every coarser tile is the 2×2 box average of its four children, read back from the
//!   directory.
//!
//! Only tiles intersecting the raster footprint are computed. Tiles that end up (almost) fully
//! transparent are not written.

use chartiles_container::DirectoryWriter;
use chartiles_core::{Blob, ChartError, GeoBBox, TileBBox, TileCoord, TileFormat};
use chartiles_image::{RasterSource, decode, downsample_tile, encode, render_tile, traits::DynamicImageTraitInfo};
use futures::{StreamExt, stream};
use image::{DynamicImage, RgbaImage};
use std::{fmt, sync::Arc};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Tiles written and dropped on one zoom level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LevelStats {
	pub level: u8,
	/// Tiles intersecting the footprint.
	pub tiles_total: u64,
	pub tiles_written: u64,
	/// Tiles skipped because of the alpha threshold.
	pub tiles_dropped: u64,
}

/// Result of [`PyramidGenerator::generate`].
#[derive(Clone, Debug, PartialEq)]
pub struct PyramidStats {
	pub footprint: GeoBBox,
	/// One entry per zoom level, ascending.
	pub levels: Vec<LevelStats>,
}

impl PyramidStats {
	pub fn tiles_written(&self) -> u64 {
		self.levels.iter().map(|l| l.tiles_written).sum()
	}

	pub fn tiles_dropped(&self) -> u64 {
		self.levels.iter().map(|l| l.tiles_dropped).sum()
	}

	/// Zoom levels with at least one written tile, ascending.
	pub fn produced_levels(&self) -> Vec<u8> {
		self.levels
			.iter()
			.filter(|l| l.tiles_written > 0)
			.map(|l| l.level)
			.collect()
	}
}

impl fmt::Display for PyramidStats {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let levels: Vec<String> = self
			.levels
			.iter()
			.map(|l| format!("z{}: {}/{}", l.level, l.tiles_written, l.tiles_total))
			.collect();
		write!(f, "{}", levels.join(", "))
	}
}

enum TileOutcome {
	Written,
	Dropped,
}

/// Renders the tile pyramid of one raster.
pub struct PyramidGenerator {
	source: Arc<dyn RasterSource>,
	min_zoom: u8,
	max_zoom: u8,
	tile_size: u32,
	alpha_threshold: u8,
	workers: Arc<Semaphore>,
	parallelism: usize,
	cancel: CancellationToken,
}

impl PyramidGenerator {
	/// `min_zoom..=max_zoom` is not checked against the raster's resolution: zoom levels finer
	/// than the source are upsampled.
	pub fn new(source: Arc<dyn RasterSource>, min_zoom: u8, max_zoom: u8, tile_size: u32) -> PyramidGenerator {
		let parallelism = chartiles_core::ConcurrencyLimits::default().cpu_bound;
		PyramidGenerator {
			source,
			min_zoom,
			max_zoom,
			tile_size,
			alpha_threshold: 1,
			workers: Arc::new(Semaphore::new(parallelism)),
			parallelism,
			cancel: CancellationToken::new(),
		}
	}

	pub fn with_alpha_threshold(mut self, alpha_threshold: u8) -> Self {
		self.alpha_threshold = alpha_threshold;
		self
	}

	/// Shares a worker pool with other generators. At most `parallelism` tiles of this pyramid
	/// are in flight, and each of them needs a permit of `workers` while it is computed.
	pub fn with_workers(mut self, workers: Arc<Semaphore>, parallelism: usize) -> Self {
		self.workers = workers;
		self.parallelism = parallelism.max(1);
		self
	}

	pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
		self.cancel = cancel;
		self
	}

	/// Tile range of `level` covering the raster footprint.
	///
	/// # Errors
	/// Returns [`ChartError::UnprojectableExtent`] if the footprint lies outside web mercator.
	pub fn tile_bbox(&self, level: u8) -> Result<TileBBox, ChartError> {
		TileBBox::from_geo(level, &self.source.geo_bbox()?).map_err(ChartError::unprojectable)
	}

	/// Renders all levels into `writer`, which must store PNG tiles.
	///
	/// # Errors
	/// - [`ChartError::UnprojectableExtent`] before any tile is written, if the footprint cannot
	///   be projected.
	/// - [`ChartError::Cancelled`] if the token is cancelled.
	/// - [`ChartError::Io`] if a tile cannot be encoded, written or read back.
	///
	/// Returns only after every tile worker it started has stopped, so the caller may remove the
	/// directory of `writer` right away, even on error.
	pub async fn generate(&self, writer: &DirectoryWriter) -> Result<PyramidStats, ChartError> {
		if writer.format() != TileFormat::PNG {
			return Err(ChartError::io(format!(
				"pyramid tiles must be stored as png, not {}",
				writer.format()
			)));
		}
		if self.min_zoom > self.max_zoom {
			return Err(ChartError::InvalidConfig(format!(
				"min_zoom ({}) must not exceed max_zoom ({})",
				self.min_zoom, self.max_zoom
			)));
		}

		let footprint = self.source.geo_bbox()?;
		log::debug!(
			"generating zoom {}..={} for footprint {footprint:?}",
			self.min_zoom,
			self.max_zoom
		);

		let mut levels = Vec::new();
		for level in (self.min_zoom..=self.max_zoom).rev() {
			let bbox = TileBBox::from_geo(level, &footprint).map_err(ChartError::unprojectable)?;
			let stats = self.generate_level(&bbox, level == self.max_zoom, writer).await?;
			log::debug!(
				"level {level}: {} of {} tiles written, {} dropped",
				stats.tiles_written,
				stats.tiles_total,
				stats.tiles_dropped
			);
			levels.push(stats);
		}
		levels.reverse();

		Ok(PyramidStats { footprint, levels })
	}

	async fn generate_level(
		&self,
		bbox: &TileBBox,
		from_source: bool,
		writer: &DirectoryWriter,
	) -> Result<LevelStats, ChartError> {
		let initial = LevelStats {
			level: bbox.level,
			tiles_total: bbox.count_tiles(),
			..LevelStats::default()
		};
		let coords: Vec<TileCoord> = bbox.iter_coords().collect();
		// stops the remaining tiles of this level after the first error
		let abort = self.cancel.child_token();

		let (stats, first_error) = stream::iter(coords)
			.map(|coord| {
				let source = Arc::clone(&self.source);
				let workers = Arc::clone(&self.workers);
				let abort = abort.clone();
				let writer = writer.clone();
				let (tile_size, alpha_threshold) = (self.tile_size, self.alpha_threshold);

				async move {
					if abort.is_cancelled() {
						return Err(ChartError::Cancelled);
					}
					let _permit = workers.acquire_owned().await.map_err(|_| ChartError::Cancelled)?;
					if abort.is_cancelled() {
						return Err(ChartError::Cancelled);
					}

					tokio::task::spawn_blocking(move || {
						let tile = if from_source {
							render_tile(source.as_ref(), &coord, tile_size)
						} else {
							downsample_tile(&read_children(&writer, &coord, tile_size)?, tile_size)
						};
						if abort.is_cancelled() {
							return Err(ChartError::Cancelled);
						}
						store_tile(&writer, &coord, tile, alpha_threshold)
					})
					.await
					.map_err(|e| ChartError::io(format!("tile worker for {coord:?} failed: {e}")))?
				}
			})
			.buffer_unordered(self.parallelism)
			.fold((initial, None), |(mut stats, mut first_error), outcome| {
				match outcome {
					Ok(TileOutcome::Written) => stats.tiles_written += 1,
					Ok(TileOutcome::Dropped) => stats.tiles_dropped += 1,
					Err(err) => {
						abort.cancel();
						first_error.get_or_insert(err);
					}
				}
				futures::future::ready((stats, first_error))
			})
			.await;

		match first_error {
			Some(err) => Err(err),
			None => Ok(stats),
		}
	}
}

/// Loads the four children of `coord` in the order of [`TileCoord::children`].
fn read_children(writer: &DirectoryWriter, coord: &TileCoord, tile_size: u32) -> Result<[Option<RgbaImage>; 4], ChartError> {
	let mut children: [Option<RgbaImage>; 4] = Default::default();
	for (slot, child) in children.iter_mut().zip(coord.children()) {
		let Some(blob) = writer.read_tile(&child)? else {
			continue;
		};
		let image = decode(&blob, TileFormat::PNG)
			.map_err(|e| ChartError::io(format!("reading back tile {child:?}: {e:#}")))?
			.to_rgba8();
		if image.dimensions() != (tile_size, tile_size) {
			return Err(ChartError::io(format!(
				"tile {child:?} is {}x{} pixels, expected {tile_size}",
				image.width(),
				image.height()
			)));
		}
		*slot = Some(image);
	}
	Ok(children)
}

fn store_tile(
	writer: &DirectoryWriter,
	coord: &TileCoord,
	tile: RgbaImage,
	alpha_threshold: u8,
) -> Result<TileOutcome, ChartError> {
	let image = DynamicImage::ImageRgba8(tile);
	if image.is_transparent(alpha_threshold) {
		log::trace!("dropping transparent tile {coord:?}");
		return Ok(TileOutcome::Dropped);
	}
	writer.write_tile(coord, &encode_intermediate(&image, coord)?)?;
	Ok(TileOutcome::Written)
}

/// Intermediate tiles are part of the working directory, failing to store one fails the raster.
fn encode_intermediate(image: &DynamicImage, coord: &TileCoord) -> Result<Blob, ChartError> {
	encode(image, TileFormat::PNG, None).map_err(|e| ChartError::io(format!("storing tile {coord:?} as png: {e:#}")))
}

#[cfg(test)]
mod tests {
	use super::*;
	use anyhow::Result;
	use assert_fs::TempDir;
	use chartiles_core::{ChartErrorKind, GeoTransform};
	use chartiles_image::{PixelData, Raster, RasterCrs};
	use pretty_assertions::assert_eq;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	/// Opaque raster covering `[-170, -150] × [42, 62]`.
	fn anchorage() -> Arc<dyn RasterSource> {
		let transform = GeoTransform::from_origin(-170.0, 62.0, 0.1, 0.1).unwrap();
		let data = PixelData::Rgb8([40u8, 90, 160].repeat(200 * 200));
		Arc::new(Raster::new(200, 200, transform, RasterCrs::Geographic, data).unwrap())
	}

	#[tokio::test]
	async fn writes_every_level() -> Result<()> {
		let dir = TempDir::new()?;
		let writer = DirectoryWriter::new(dir.path(), TileFormat::PNG)?;
		let generator = PyramidGenerator::new(anchorage(), 3, 5, 64);

		let stats = generator.generate(&writer).await?;
		assert_eq!(stats.produced_levels(), vec![3, 4, 5]);
		for level in &stats.levels {
			assert_eq!(level.tiles_written, generator.tile_bbox(level.level)?.count_tiles());
			assert_eq!(level.tiles_dropped, 0);
		}

		// z3 tile 0/2 holds the whole chart
		let tile = writer.read_tile(&TileCoord::new(3, 0, 2)?)?.expect("tile exists");
		let image = decode(&tile, TileFormat::PNG).unwrap();
		assert_eq!((image.width(), image.height()), (64, 64));
		assert!(!image.is_empty());
		Ok(())
	}

	#[tokio::test]
	async fn drops_transparent_tiles() -> Result<()> {
		let transform = GeoTransform::from_origin(-170.0, 62.0, 0.1, 0.1).unwrap();
		let raster = Raster::new(200, 200, transform, RasterCrs::Geographic, PixelData::Rgba8(vec![0; 200 * 200 * 4]))?;
		let dir = TempDir::new()?;
		let writer = DirectoryWriter::new(dir.path(), TileFormat::PNG)?;

		let stats = PyramidGenerator::new(Arc::new(raster), 4, 4, 32).generate(&writer).await?;
		assert_eq!(stats.tiles_written(), 0);
		assert_eq!(stats.tiles_dropped(), stats.levels[0].tiles_total);
		assert!(stats.produced_levels().is_empty());
		Ok(())
	}

	#[tokio::test]
	async fn unprojectable_footprint() -> Result<()> {
		let transform = GeoTransform::from_origin(-10.0, 89.0, 0.1, 0.1).unwrap();
		let raster = Raster::new(10, 10, transform, RasterCrs::Geographic, PixelData::Rgb8(vec![0; 300]))?;
		let dir = TempDir::new()?;
		let writer = DirectoryWriter::new(dir.path(), TileFormat::PNG)?;

		let err = PyramidGenerator::new(Arc::new(raster), 1, 2, 32).generate(&writer).await.unwrap_err();
		assert!(matches!(err, ChartError::UnprojectableExtent(_)), "{err}");
		assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
		Ok(())
	}

	#[tokio::test]
	async fn cancelled_before_start() -> Result<()> {
		let dir = TempDir::new()?;
		let writer = DirectoryWriter::new(dir.path(), TileFormat::PNG)?;
		let cancel = CancellationToken::new();
		cancel.cancel();

		let err = PyramidGenerator::new(anchorage(), 2, 4, 32)
			.with_cancellation(cancel)
			.generate(&writer)
			.await
			.unwrap_err();
		assert_eq!(err, ChartError::Cancelled);
		Ok(())
	}

	/// Cancels the run on its first pixel read.
	#[derive(Debug)]
	struct CancelOnRead {
		inner: Raster,
		cancel: CancellationToken,
		reads: AtomicUsize,
	}

	impl RasterSource for CancelOnRead {
		fn width(&self) -> u32 {
			self.inner.width()
		}
		fn height(&self) -> u32 {
			self.inner.height()
		}
		fn transform(&self) -> &GeoTransform {
			self.inner.transform()
		}
		fn crs(&self) -> RasterCrs {
			self.inner.crs()
		}
		fn rgba(&self, col: u32, row: u32) -> [u8; 4] {
			self.cancel.cancel();
			self.reads.fetch_add(1, Ordering::SeqCst);
			self.inner.rgba(col, row)
		}
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn cancelled_while_rendering_writes_nothing() -> Result<()> {
		let dir = TempDir::new()?;
		let writer = DirectoryWriter::new(dir.path(), TileFormat::PNG)?;
		let cancel = CancellationToken::new();
		let transform = GeoTransform::from_origin(-170.0, 62.0, 0.1, 0.1).unwrap();
		let source = Arc::new(CancelOnRead {
			inner: Raster::new(200, 200, transform, RasterCrs::Geographic, PixelData::Rgb8(vec![90; 200 * 200 * 3]))?,
			cancel: cancel.clone(),
			reads: AtomicUsize::new(0),
		});

		let err = PyramidGenerator::new(Arc::clone(&source) as Arc<dyn RasterSource>, 6, 7, 64)
			.with_workers(Arc::new(Semaphore::new(4)), 4)
			.with_cancellation(cancel)
			.generate(&writer)
			.await
			.unwrap_err();
		assert_eq!(err, ChartError::Cancelled);

		// every started render has finished and none of them stored its tile
		let reads = source.reads.load(Ordering::SeqCst);
		tokio::time::sleep(Duration::from_millis(200)).await;
		assert_eq!(source.reads.load(Ordering::SeqCst), reads);
		assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
		Ok(())
	}

	#[test]
	fn intermediate_encoding_failure_is_io() {
		let coord = TileCoord::new(4, 1, 5).unwrap();
		let err = encode_intermediate(&DynamicImage::new_rgba16(2, 2), &coord).unwrap_err();
		assert_eq!(err.kind(), ChartErrorKind::Io);
		assert!(err.to_string().contains("TileCoord(4, [1, 5])"), "{err}");
	}

	#[tokio::test]
	async fn rejects_non_png_directory() -> Result<()> {
		let dir = TempDir::new()?;
		let writer = DirectoryWriter::new(dir.path(), TileFormat::JPG)?;
		let err = PyramidGenerator::new(anchorage(), 2, 2, 32).generate(&writer).await.unwrap_err();
		assert_eq!(err.kind(), ChartErrorKind::Io);
		Ok(())
	}

	#[test]
	fn stats_display() {
		let stats = PyramidStats {
			footprint: GeoBBox::new(-170.0, 42.0, -150.0, 62.0).unwrap(),
			levels: vec![
				LevelStats {
					level: 6,
					tiles_total: 35,
					tiles_written: 35,
					tiles_dropped: 0,
				},
				LevelStats {
					level: 7,
					tiles_total: 117,
					tiles_written: 116,
					tiles_dropped: 1,
				},
			],
		};
		assert_eq!(stats.to_string(), "z6: 35/35, z7: 116/117");
		assert_eq!(stats.tiles_written(), 151);
	}
}
