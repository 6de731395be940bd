//! Converting a batch of rasters into containers.
//!
//! For every [`RasterJob`] the [`Orchestrator`] runs
//! `read GeoTIFF → expand palette → generate pyramid → build container → verify`
//! inside a private working directory below the configured temp root. Rasters are independent:
//! one failing raster never stops the batch, and its outcome is reported in the
//! [`RunSummary`].

use crate::{ContainerBuilder, PipelineConfig, PyramidGenerator, PyramidStats, layer_name_from_stem};
use chartiles_container::{DirectoryWriter, MBTilesReader};
use chartiles_core::{ChartError, ChartErrorKind, TileFormat};
use chartiles_image::{Raster, expand_palette, read_geotiff};
use futures::{StreamExt, stream};
use std::{
	collections::BTreeMap,
	fmt,
	path::{Path, PathBuf},
	sync::Arc,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// One raster to convert.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterJob {
	pub input: PathBuf,
	pub output: PathBuf,
	/// Layer name written into the container metadata.
	pub name: String,
}

impl RasterJob {
	/// Names the layer after the output file.
	pub fn new(input: &Path, output: &Path) -> RasterJob {
		let stem = output.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
		RasterJob {
			input: input.to_path_buf(),
			output: output.to_path_buf(),
			name: layer_name_from_stem(&stem),
		}
	}

	/// Converts `input` into `<output_dir>/<input stem>.mbtiles`.
	pub fn into_dir(input: &Path, output_dir: &Path) -> RasterJob {
		let stem = input.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
		RasterJob::new(input, &output_dir.join(format!("{stem}.mbtiles")))
	}
}

/// Details of a published container.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterReport {
	pub output: PathBuf,
	pub pyramid: PyramidStats,
	pub tiles_written: usize,
	pub tiles_dropped: usize,
	pub encoding_failures: Vec<ChartError>,
	pub min_zoom: u8,
	pub max_zoom: u8,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RasterOutcome {
	Succeeded(RasterReport),
	/// The raster cannot be converted: unsupported format, unprojectable extent or missing file.
	Skipped(ChartError),
	Failed(ChartError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RasterResult {
	pub job: RasterJob,
	pub outcome: RasterOutcome,
}

/// Outcomes of all jobs of a run, in job order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
	pub results: Vec<RasterResult>,
}

impl RunSummary {
	pub fn succeeded(&self) -> usize {
		self.count(|o| matches!(o, RasterOutcome::Succeeded(_)))
	}

	pub fn skipped(&self) -> usize {
		self.count(|o| matches!(o, RasterOutcome::Skipped(_)))
	}

	pub fn failed(&self) -> usize {
		self.count(|o| matches!(o, RasterOutcome::Failed(_)))
	}

	fn count(&self, predicate: impl Fn(&RasterOutcome) -> bool) -> usize {
		self.results.iter().filter(|r| predicate(&r.outcome)).count()
	}

	/// Number of errors per kind, including the per-tile encoding failures of successful rasters.
	pub fn error_counts(&self) -> BTreeMap<ChartErrorKind, usize> {
		let mut counts = BTreeMap::new();
		for result in &self.results {
			match &result.outcome {
				RasterOutcome::Succeeded(report) => {
					for err in &report.encoding_failures {
						*counts.entry(err.kind()).or_default() += 1;
					}
				}
				RasterOutcome::Skipped(err) | RasterOutcome::Failed(err) => {
					*counts.entry(err.kind()).or_default() += 1;
				}
			}
		}
		counts
	}

	pub fn is_success(&self) -> bool {
		self.failed() == 0
	}
}

impl fmt::Display for RunSummary {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{} succeeded, {} skipped, {} failed",
			self.succeeded(),
			self.skipped(),
			self.failed()
		)
	}
}

/// Runs raster jobs with one configuration and one shared worker pool.
pub struct Orchestrator {
	config: Arc<PipelineConfig>,
	workers: Arc<Semaphore>,
	cancel: CancellationToken,
}

impl Orchestrator {
	/// # Errors
	/// Returns [`ChartError::InvalidConfig`] if the configuration is invalid.
	pub fn new(config: PipelineConfig) -> Result<Orchestrator, ChartError> {
		config.validate()?;
		Ok(Orchestrator {
			workers: Arc::new(Semaphore::new(config.workers)),
			config: Arc::new(config),
			cancel: CancellationToken::new(),
		})
	}

	pub fn config(&self) -> &PipelineConfig {
		&self.config
	}

	/// Cancels all running and future jobs. Cancelled jobs publish nothing.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Processes all jobs, `raster_concurrency` at a time.
	pub async fn run(&self, jobs: Vec<RasterJob>) -> RunSummary {
		log::info!("converting {} rasters", jobs.len());
		let results = stream::iter(jobs)
			.map(|job| self.process(job))
			.buffered(self.config.raster_concurrency)
			.collect()
			.await;
		let summary = RunSummary { results };
		log::info!("{summary}");
		summary
	}

	/// Processes a single job. Never fails; errors are reported as the outcome.
	///
	/// A job that exceeds `raster_timeout_secs` is cancelled like any other job: it returns once
	/// its workers have stopped and its working directory is removed.
	pub async fn process(&self, job: RasterJob) -> RasterResult {
		self.process_with(job, |_: &Path| {}).await
	}

	/// Like [`Orchestrator::process`], calling `on_tiles` with the tile directory once the pyramid
	/// is complete.
	async fn process_with<F: Fn(&Path) + Sync>(&self, job: RasterJob, on_tiles: F) -> RasterResult {
		let outcome = if job.input.is_file() {
			let token = self.cancel.child_token();
			let timeout = self.config.raster_timeout();
			let convert = self.convert(&job, token.clone(), &on_tiles);
			tokio::pin!(convert);

			let mut timed_out = false;
			let result = tokio::select! {
				result = &mut convert => result,
				() = tokio::time::sleep(timeout) => {
					log::warn!("{:?} timed out after {} s, cancelling", job.input, timeout.as_secs());
					timed_out = true;
					token.cancel();
					convert.await
				}
			};
			match result {
				Ok(report) => RasterOutcome::Succeeded(report),
				Err(err) if err.is_skip() => RasterOutcome::Skipped(err),
				Err(_) if timed_out => RasterOutcome::Failed(ChartError::Cancelled),
				Err(err) => RasterOutcome::Failed(err),
			}
		} else {
			RasterOutcome::Skipped(ChartError::io(format!("input {:?} does not exist", job.input)))
		};

		match &outcome {
			RasterOutcome::Succeeded(report) => log::info!(
				"{:?}: {} tiles, zoom {}..={}, {} encoding failures",
				report.output,
				report.tiles_written,
				report.min_zoom,
				report.max_zoom,
				report.encoding_failures.len()
			),
			RasterOutcome::Skipped(err) => log::warn!("skipped {:?}: {err}", job.input),
			RasterOutcome::Failed(err) => log::error!("failed {:?}: {err}", job.input),
		}
		RasterResult { job, outcome }
	}

	async fn convert(
		&self,
		job: &RasterJob,
		cancel: CancellationToken,
		on_tiles: &(dyn Fn(&Path) + Sync),
	) -> Result<RasterReport, ChartError> {
		let config = Arc::clone(&self.config);
		let input = job.input.clone();
		let raster = tokio::task::spawn_blocking(move || load_raster(&input, config.nodata_index))
			.await
			.map_err(|e| ChartError::io(format!("reading {:?} failed: {e}", job.input)))??;

		let source = expand_palette(Arc::new(raster))?;
		let bounds = source.geo_bbox()?;
		log::debug!("{:?}: footprint {bounds:?}", job.input);

		let temp_root = absolute(&self.config.temp_root())?;
		std::fs::create_dir_all(&temp_root)?;
		let work_dir = tempfile::Builder::new()
			.prefix("chartiles-")
			.tempdir_in(&temp_root)
			.map_err(|e| ChartError::io(format!("creating working directory in {temp_root:?}: {e}")))?;
		let tile_dir = work_dir.path().join("tiles");
		let tile_writer = DirectoryWriter::new(&tile_dir, TileFormat::PNG)?;

		let limits = self.config.concurrency();
		let pyramid = PyramidGenerator::new(source, self.config.min_zoom, self.config.max_zoom, self.config.tile_size)
			.with_alpha_threshold(self.config.alpha_threshold)
			.with_workers(Arc::clone(&self.workers), limits.cpu_bound)
			.with_cancellation(cancel.clone())
			.generate(&tile_writer)
			.await?;
		log::debug!("{:?}: pyramid {pyramid}", job.input);
		on_tiles(&tile_dir);

		let destination = absolute(&job.output)?;
		let stats = ContainerBuilder::new(self.config.format, self.config.quality)
			.with_alpha_threshold(self.config.alpha_threshold)
			.with_batch_size(self.config.batch_size)
			.with_workers(Arc::clone(&self.workers), limits)
			.with_cancellation(cancel)
			.build(
				&tile_dir,
				self.config.min_zoom..=self.config.max_zoom,
				&job.name,
				bounds,
				&destination,
			)
			.await?;

		let path = stats.path.clone();
		tokio::task::spawn_blocking(move || MBTilesReader::open_path(&path)?.verify())
			.await
			.map_err(|e| ChartError::io(format!("verifying {destination:?} failed: {e}")))?
			.map_err(|e| ChartError::io(format!("verifying {destination:?}: {e:#}")))?;

		Ok(RasterReport {
			output: stats.path,
			pyramid,
			tiles_written: stats.tiles_written,
			tiles_dropped: stats.tiles_dropped,
			encoding_failures: stats.encoding_failures,
			min_zoom: stats.min_zoom,
			max_zoom: stats.max_zoom,
		})
	}
}

fn load_raster(path: &Path, nodata_index: Option<u8>) -> Result<Raster, ChartError> {
	let raster = read_geotiff(path)?;
	Ok(match nodata_index {
		Some(index) if raster.is_indexed() => raster.with_nodata(Some(index)),
		_ => raster,
	})
}

fn absolute(path: &Path) -> Result<PathBuf, ChartError> {
	std::path::absolute(path).map_err(|e| ChartError::io(format!("resolving {path:?}: {e}")))
}

#[cfg(test)]
mod tests {
	use super::*;
	use chartiles_core::TileCoord;
	use pretty_assertions::assert_eq;
	use std::io::Cursor;
	use tempfile::TempDir;
	use tiff::{
		encoder::{TiffEncoder, colortype},
		tags::Tag,
	};

	/// Writes an opaque RGB GeoTIFF in WGS 84 with its upper left corner at `origin` (lon, lat).
	fn write_rgb_geotiff(path: &Path, size: u32, origin: (f64, f64), pixel_size: f64) {
		let pixels: Vec<u8> = (0..size * size).flat_map(|i| [(i % 251) as u8, 90, 160]).collect();
		let mut buffer = Cursor::new(Vec::new());
		{
			let mut encoder = TiffEncoder::new(&mut buffer).unwrap();
			let mut image = encoder.new_image::<colortype::RGB8>(size, size).unwrap();
			let dir = image.encoder();
			dir.write_tag(Tag::ModelPixelScaleTag, &[pixel_size, pixel_size, 0.0][..])
				.unwrap();
			dir.write_tag(Tag::ModelTiepointTag, &[0.0, 0.0, 0.0, origin.0, origin.1, 0.0][..])
				.unwrap();
			let keys: [u16; 16] = [1, 1, 0, 3, 1024, 0, 1, 2, 1025, 0, 1, 1, 2048, 0, 1, 4326];
			dir.write_tag(Tag::GeoKeyDirectoryTag, &keys[..]).unwrap();
			image.write_data(&pixels).unwrap();
		}
		std::fs::write(path, buffer.into_inner()).unwrap();
	}

	/// Overwrites the first tile of the lowest level in a `{z}/{x}/{y}.png` directory.
	fn corrupt_first_tile(tile_dir: &Path) {
		let mut path = tile_dir.to_path_buf();
		for _ in 0..3 {
			path = std::fs::read_dir(&path)
				.unwrap()
				.map(|entry| entry.unwrap().path())
				.min()
				.unwrap();
		}
		std::fs::write(&path, b"not a png").unwrap();
	}

	fn result(outcome: RasterOutcome) -> RasterResult {
		RasterResult {
			job: RasterJob::new(Path::new("/in/chart.tif"), Path::new("/out/S_chart.mbtiles")),
			outcome,
		}
	}

	#[test]
	fn job_names() {
		let job = RasterJob::new(Path::new("/in/a.tif"), Path::new("/out/T_Denver.mbtiles"));
		assert_eq!(job.name, "Denver");
		let job = RasterJob::into_dir(Path::new("/in/S_Seattle.tif"), Path::new("/out"));
		assert_eq!(job.output, PathBuf::from("/out/S_Seattle.mbtiles"));
		assert_eq!(job.name, "Seattle");
	}

	#[test]
	fn summary_counts() {
		let report = RasterReport {
			output: PathBuf::from("/out/S_chart.mbtiles"),
			pyramid: PyramidStats {
				footprint: chartiles_core::GeoBBox::new(0.0, 0.0, 1.0, 1.0).unwrap(),
				levels: vec![],
			},
			tiles_written: 10,
			tiles_dropped: 0,
			encoding_failures: vec![ChartError::encoding(TileCoord::new(1, 0, 0).unwrap(), "corrupt")],
			min_zoom: 1,
			max_zoom: 2,
		};
		let summary = RunSummary {
			results: vec![
				result(RasterOutcome::Succeeded(report)),
				result(RasterOutcome::Skipped(ChartError::unsupported("gray8"))),
				result(RasterOutcome::Failed(ChartError::Cancelled)),
				result(RasterOutcome::Failed(ChartError::Cancelled)),
			],
		};
		assert_eq!(summary.to_string(), "1 succeeded, 1 skipped, 2 failed");
		assert!(!summary.is_success());
		assert_eq!(
			summary.error_counts(),
			BTreeMap::from([
				(ChartErrorKind::UnsupportedRasterFormat, 1),
				(ChartErrorKind::EncodingFailure, 1),
				(ChartErrorKind::Cancelled, 2),
			])
		);
	}

	#[test]
	fn invalid_config_is_rejected() {
		let config = PipelineConfig {
			min_zoom: 9,
			max_zoom: 8,
			..PipelineConfig::default()
		};
		assert!(matches!(Orchestrator::new(config), Err(ChartError::InvalidConfig(_))));
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn corrupt_tile_is_counted_once() {
		let dir = TempDir::new().unwrap();
		let input = dir.path().join("Kodiak.tif");
		write_rgb_geotiff(&input, 512, (-154.0, 58.0), 0.01);
		let output = dir.path().join("S_Kodiak.mbtiles");
		let orchestrator = Orchestrator::new(PipelineConfig {
			min_zoom: 6,
			max_zoom: 7,
			tile_size: 256,
			temp_root: Some(dir.path().join("scratch")),
			..PipelineConfig::default()
		})
		.unwrap();

		let result = orchestrator
			.process_with(RasterJob::new(&input, &output), corrupt_first_tile)
			.await;
		let summary = RunSummary { results: vec![result] };
		assert!(summary.is_success());
		assert_eq!(
			summary.error_counts(),
			BTreeMap::from([(ChartErrorKind::EncodingFailure, 1)])
		);

		let RasterOutcome::Succeeded(report) = &summary.results[0].outcome else {
			panic!("expected success, got {:?}", summary.results[0].outcome);
		};
		assert_eq!(report.tiles_written as u64, report.pyramid.tiles_written() - 1);
		assert_eq!(
			MBTilesReader::open_path(&output).unwrap().tile_count().unwrap(),
			report.tiles_written as u64
		);
	}

	#[tokio::test]
	async fn missing_input_is_skipped() {
		let orchestrator = Orchestrator::new(PipelineConfig::default()).unwrap();
		let result = orchestrator
			.process(RasterJob::new(Path::new("/does/not/exist.tif"), Path::new("/tmp/x.mbtiles")))
			.await;
		assert!(matches!(result.outcome, RasterOutcome::Skipped(ChartError::Io(_))));
	}
}
