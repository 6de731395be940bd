//! Packing a tile directory into an MBTiles container.
//!
//! The [`ContainerBuilder`] scans the `{z}/{x}/{y}.<ext>` directory of one raster, re-encodes
//! every tile of the requested zoom range on the shared worker pool and hands the results to a
//! single writer task:
//!
//! ```text
//! directory ──▶ decode + encode (N workers) ──▶ TileSink ──▶ writer task ──▶ MBTilesWriter
//! ```
//!
//! Only the writer task touches the database. It owns the [`MBTilesWriter`], the workers only
//! hold a [`TileSink`]. A tile that cannot be decoded or encoded is skipped and counted; every
//! other error aborts the container and nothing is published.

use chartiles_container::{DirectoryReader, MBTilesMetadata, MBTilesWriter};
use chartiles_core::{Blob, ChartError, ConcurrencyLimits, GeoBBox, TileCoord, TileFormat};
use chartiles_image::{decode, encode_tile, traits::DynamicImageTraitInfo};
use futures::{StreamExt, future, stream};
use std::{
	ops::RangeInclusive,
	path::{Path, PathBuf},
	sync::Arc,
};
use tokio::{
	sync::{Semaphore, mpsc},
	task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// Sending half of the channel towards the container writer task.
#[derive(Clone)]
pub struct TileSink {
	sender: mpsc::Sender<(TileCoord, Blob)>,
}

impl TileSink {
	/// Queues an encoded tile, waiting while the queue is full.
	///
	/// # Errors
	/// Fails if the writer task has stopped, e.g. after a duplicate key.
	pub async fn send(&self, coord: TileCoord, blob: Blob) -> Result<(), ChartError> {
		self.sender
			.send((coord, blob))
			.await
			.map_err(|_| ChartError::io("container writer has stopped"))
	}
}

/// Moves `writer` onto a blocking thread that inserts every tile received through the returned
/// sink. The task ends when all sinks are dropped and returns the writer, ready to be finished.
pub fn spawn_container_writer(
	mut writer: MBTilesWriter,
	queue_capacity: usize,
) -> (TileSink, JoinHandle<Result<MBTilesWriter, ChartError>>) {
	let (sender, mut receiver) = mpsc::channel::<(TileCoord, Blob)>(queue_capacity.max(1));
	let handle = tokio::task::spawn_blocking(move || {
		while let Some((coord, blob)) = receiver.blocking_recv() {
			writer.add_tile(coord, blob)?;
		}
		Ok(writer)
	});
	(TileSink { sender }, handle)
}

/// Counters of one container build.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BuildStats {
	pub path: PathBuf,
	pub tiles_written: usize,
	/// Tiles skipped because they could not be decoded or re-encoded.
	pub encoding_failures: Vec<ChartError>,
	/// Tiles skipped because they are transparent.
	pub tiles_dropped: usize,
	pub min_zoom: u8,
	pub max_zoom: u8,
}

enum TileOutcome {
	Sent,
	Transparent,
	Failed(ChartError),
}

/// Re-encodes a tile directory into an MBTiles container.
pub struct ContainerBuilder {
	format: TileFormat,
	quality: u8,
	alpha_threshold: u8,
	batch_size: usize,
	workers: Arc<Semaphore>,
	limits: ConcurrencyLimits,
	cancel: CancellationToken,
}

impl ContainerBuilder {
	pub fn new(format: TileFormat, quality: u8) -> ContainerBuilder {
		let limits = ConcurrencyLimits::default();
		ContainerBuilder {
			format,
			quality,
			alpha_threshold: 0,
			batch_size: 500,
			workers: Arc::new(Semaphore::new(limits.cpu_bound)),
			limits,
			cancel: CancellationToken::new(),
		}
	}

	/// Tiles whose alpha never exceeds `alpha_threshold` are not stored.
	pub fn with_alpha_threshold(mut self, alpha_threshold: u8) -> Self {
		self.alpha_threshold = alpha_threshold;
		self
	}

	pub fn with_batch_size(mut self, batch_size: usize) -> Self {
		self.batch_size = batch_size;
		self
	}

	pub fn with_workers(mut self, workers: Arc<Semaphore>, limits: ConcurrencyLimits) -> Self {
		self.workers = workers;
		self.limits = limits;
		self
	}

	pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
		self.cancel = cancel;
		self
	}

	/// Builds the container `destination` from the tiles of `tile_dir` within `zoom_range`.
	///
	/// `bounds` is written as metadata unchanged; it must be the geographic extent of the source
	/// raster. `name` is used for the `name` and `description` entries.
	///
	/// # Errors
	/// - [`ChartError::DuplicateTileKey`] if two files map to the same tile.
	/// - [`ChartError::NoTilesWritten`] if no tile could be stored.
	/// - [`ChartError::Cancelled`] if the token is cancelled.
	/// - [`ChartError::Io`] for every other failure.
	///
	/// In all these cases no file is created at `destination`. The token is checked once more
	/// right before the container is renamed into place. Every worker has stopped when this
	/// returns.
	pub async fn build(
		&self,
		tile_dir: &Path,
		zoom_range: RangeInclusive<u8>,
		name: &str,
		bounds: GeoBBox,
		destination: &Path,
	) -> Result<BuildStats, ChartError> {
		let reader = DirectoryReader::open_path(tile_dir)?;
		let Some(source_format) = reader.format() else {
			return Err(ChartError::NoTilesWritten(name.to_string()));
		};
		let tiles: Vec<(TileCoord, PathBuf)> = reader.tiles(zoom_range.clone()).cloned().collect();
		log::debug!(
			"packing {} of {} tiles from {tile_dir:?} into {destination:?}",
			tiles.len(),
			reader.len()
		);

		let writer = MBTilesWriter::create(destination, self.batch_size)?;
		let (sink, writer_task) = spawn_container_writer(writer, self.limits.queue_capacity);

		// stops the remaining tiles after the first error
		let abort = self.cancel.child_token();
		let (mut stats, first_error) = stream::iter(tiles)
			.map(|(coord, path)| self.process_tile(coord, path, source_format, sink.clone(), &abort))
			.buffer_unordered(self.limits.cpu_bound)
			.fold((BuildStats::default(), None), |(mut stats, mut first_error), outcome| {
				match outcome {
					Ok(TileOutcome::Sent) => stats.tiles_written += 1,
					Ok(TileOutcome::Transparent) => stats.tiles_dropped += 1,
					Ok(TileOutcome::Failed(err)) => {
						log::warn!("skipping tile: {err}");
						stats.encoding_failures.push(err);
					}
					Err(err) => {
						abort.cancel();
						first_error.get_or_insert(err);
					}
				}
				future::ready((stats, first_error))
			})
			.await;

		// closing the channel lets the writer task finish
		drop(sink);
		let writer = writer_task
			.await
			.map_err(|e| ChartError::io(format!("container writer task failed: {e}")))?;

		// a failing writer explains why sending failed, so its error takes precedence
		let writer = writer?;
		if let Some(err) = first_error {
			return Err(err);
		}

		if self.cancel.is_cancelled() {
			return Err(ChartError::Cancelled);
		}

		let (min_zoom, max_zoom) = writer.zoom_range().unwrap_or((*zoom_range.start(), *zoom_range.end()));
		let metadata = MBTilesMetadata::new(name, self.format, bounds);
		let cancel = self.cancel.clone();
		stats.path = tokio::task::spawn_blocking(move || writer.finish_unless(&metadata, || cancel.is_cancelled()))
			.await
			.map_err(|e| ChartError::io(format!("publishing container failed: {e}")))??;
		stats.min_zoom = min_zoom;
		stats.max_zoom = max_zoom;

		log::debug!(
			"wrote {} tiles to {:?}, {} failed, {} transparent",
			stats.tiles_written,
			stats.path,
			stats.encoding_failures.len(),
			stats.tiles_dropped
		);
		Ok(stats)
	}

	async fn process_tile(
		&self,
		coord: TileCoord,
		path: PathBuf,
		source_format: TileFormat,
		sink: TileSink,
		abort: &CancellationToken,
	) -> Result<TileOutcome, ChartError> {
		if abort.is_cancelled() {
			return Err(ChartError::Cancelled);
		}
		let permit = Arc::clone(&self.workers)
			.acquire_owned()
			.await
			.map_err(|_| ChartError::Cancelled)?;
		if abort.is_cancelled() {
			return Err(ChartError::Cancelled);
		}

		let (format, quality, alpha_threshold) = (self.format, self.quality, self.alpha_threshold);
		let encoded = tokio::task::spawn_blocking(move || -> Result<Option<Blob>, ChartError> {
			let blob = DirectoryReader::read(&path)?;
			let image = decode(&blob, source_format).map_err(|e| ChartError::encoding(coord, e))?;
			if image.is_transparent(alpha_threshold) {
				return Ok(None);
			}
			let blob = encode_tile(&image, format, Some(quality)).map_err(|e| ChartError::encoding(coord, e))?;
			Ok(Some(blob))
		})
		.await
		.map_err(|e| ChartError::io(format!("encoding worker for {coord:?} failed: {e}")))?;
		drop(permit);

		match encoded {
			Ok(Some(blob)) => {
				sink.send(coord, blob).await?;
				Ok(TileOutcome::Sent)
			}
			Ok(None) => Ok(TileOutcome::Transparent),
			Err(err @ ChartError::EncodingFailure { .. }) => Ok(TileOutcome::Failed(err)),
			Err(err) => Err(err),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use anyhow::Result;
	use assert_fs::TempDir;
	use chartiles_container::{DirectoryWriter, MBTilesReader};
	use chartiles_image::encode;
	use image::{DynamicImage, Rgba, RgbaImage};
	use pretty_assertions::assert_eq;

	fn bounds() -> GeoBBox {
		GeoBBox::new(-170.0, 42.0, -150.0, 62.0).unwrap()
	}

	fn png(color: [u8; 4]) -> Blob {
		let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba(color)));
		encode(&image, TileFormat::PNG, None).unwrap()
	}

	fn write_tiles(dir: &Path, coords: &[(u8, u32, u32)]) -> Result<()> {
		let writer = DirectoryWriter::new(dir, TileFormat::PNG)?;
		for &(z, x, y) in coords {
			writer.write_tile(&TileCoord::new(z, x, y)?, &png([200, 100, 50, 255]))?;
		}
		Ok(())
	}

	#[tokio::test]
	async fn packs_directory() -> Result<()> {
		let tiles = TempDir::new()?;
		let out = TempDir::new()?;
		write_tiles(tiles.path(), &[(5, 3, 10), (6, 6, 20), (6, 7, 21), (7, 12, 40)])?;
		let destination = out.path().join("chart.mbtiles");

		let stats = ContainerBuilder::new(TileFormat::WEBP, 75)
			.build(tiles.path(), 6..=7, "chart", bounds(), &destination)
			.await?;
		assert_eq!(stats.tiles_written, 3);
		assert_eq!((stats.min_zoom, stats.max_zoom), (6, 7));
		assert_eq!(stats.path, destination);

		let reader = MBTilesReader::open_path(&destination)?;
		reader.verify()?;
		assert_eq!(reader.metadata()["format"], "webp");
		assert_eq!(reader.metadata()["bounds"], "-170.0,42.0,-150.0,62.0");
		assert_eq!(reader.level_counts()?, vec![(6, 2), (7, 1)]);
		let tile = reader.get_tile(&TileCoord::new(6, 6, 20)?)?.expect("tile exists");
		assert_eq!(decode(&tile, TileFormat::WEBP)?.width(), 16);
		Ok(())
	}

	#[tokio::test]
	async fn transparent_tiles_are_dropped() -> Result<()> {
		let tiles = TempDir::new()?;
		let out = TempDir::new()?;
		let writer = DirectoryWriter::new(tiles.path(), TileFormat::PNG)?;
		writer.write_tile(&TileCoord::new(4, 1, 1)?, &png([0, 0, 0, 0]))?;
		writer.write_tile(&TileCoord::new(4, 1, 2)?, &png([9, 9, 9, 255]))?;

		let stats = ContainerBuilder::new(TileFormat::PNG, 75)
			.with_alpha_threshold(1)
			.build(tiles.path(), 0..=24, "chart", bounds(), &out.path().join("a.mbtiles"))
			.await?;
		assert_eq!(stats.tiles_written, 1);
		assert_eq!(stats.tiles_dropped, 1);
		Ok(())
	}

	#[tokio::test]
	async fn empty_directory_is_not_published() -> Result<()> {
		let tiles = TempDir::new()?;
		let out = TempDir::new()?;
		write_tiles(tiles.path(), &[(3, 1, 1)])?;

		let err = ContainerBuilder::new(TileFormat::JPG, 75)
			.build(tiles.path(), 6..=8, "empty", bounds(), &out.path().join("empty.mbtiles"))
			.await
			.unwrap_err();
		assert_eq!(err, ChartError::NoTilesWritten("empty".to_string()));
		assert_eq!(std::fs::read_dir(out.path())?.count(), 0);
		Ok(())
	}

	#[tokio::test]
	async fn cancellation_prevents_publishing() -> Result<()> {
		let tiles = TempDir::new()?;
		let out = TempDir::new()?;
		write_tiles(tiles.path(), &[(6, 6, 20), (6, 7, 21)])?;
		let cancel = CancellationToken::new();
		cancel.cancel();

		let err = ContainerBuilder::new(TileFormat::PNG, 75)
			.with_cancellation(cancel)
			.build(tiles.path(), 6..=6, "chart", bounds(), &out.path().join("c.mbtiles"))
			.await
			.unwrap_err();
		assert_eq!(err, ChartError::Cancelled);
		assert_eq!(std::fs::read_dir(out.path())?.count(), 0);
		Ok(())
	}

	#[tokio::test]
	async fn sink_fails_after_writer_stopped() -> Result<()> {
		let out = TempDir::new()?;
		let writer = MBTilesWriter::create(&out.path().join("dup.mbtiles"), 500)?;
		let (sink, handle) = spawn_container_writer(writer, 1);
		let coord = TileCoord::new(2, 1, 1)?;
		sink.send(coord, Blob::from("a")).await?;
		sink.send(coord, Blob::from("b")).await?;

		let err = handle.await?.err().expect("writer fails");
		assert_eq!(err, ChartError::DuplicateTileKey(coord.to_tms()));
		assert!(sink.send(coord, Blob::from("c")).await.is_err());
		assert_eq!(std::fs::read_dir(out.path())?.count(), 0);
		Ok(())
	}
}
