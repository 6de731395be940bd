use anyhow::{Context, Result, bail};
use chartiles_core::TileFormat;
use chartiles_pipeline::{Orchestrator, PipelineConfig, RasterJob, output_filename};
use std::path::{Path, PathBuf};

#[derive(clap::Args, Debug)]
#[command(arg_required_else_help = true, disable_version_flag = true)]
pub struct Subcommand {
	/// GeoTIFF files, or directories containing *.tif files
	#[arg(required = true)]
	inputs: Vec<PathBuf>,

	/// directory receiving one *.mbtiles container per input
	#[arg(long, short, value_name = "DIR")]
	output_dir: PathBuf,

	/// YAML file with pipeline settings, overridden by the flags below
	#[arg(long, short, value_name = "FILE")]
	config: Option<PathBuf>,

	/// chart type, e.g. "sectional" or "terminal", used to prefix the output file names
	#[arg(long, value_name = "TYPE")]
	chart_type: Option<String>,

	/// minimum zoom level
	#[arg(long, value_name = "int", display_order = 1)]
	min_zoom: Option<u8>,

	/// maximum zoom level
	#[arg(long, value_name = "int", display_order = 1)]
	max_zoom: Option<u8>,

	/// tile edge length in pixels
	#[arg(long, value_name = "int", display_order = 1)]
	tile_size: Option<u32>,

	/// encoding of the stored tiles
	#[arg(long, short, value_enum, display_order = 2)]
	format: Option<TileFormat>,

	/// encoder quality, 0-100
	#[arg(long, value_name = "int", display_order = 2)]
	quality: Option<u8>,

	/// number of tiles rendered or encoded in parallel
	#[arg(long, value_name = "int", display_order = 3)]
	workers: Option<usize>,

	/// number of charts converted in parallel
	#[arg(long, value_name = "int", display_order = 3)]
	raster_concurrency: Option<usize>,

	/// parent directory of the temporary working directories
	#[arg(long, value_name = "DIR", display_order = 3)]
	temp_dir: Option<PathBuf>,
}

impl Subcommand {
	fn config(&self) -> Result<PipelineConfig> {
		let mut config = match &self.config {
			Some(path) => PipelineConfig::from_path(path)?,
			None => PipelineConfig::default(),
		};

		if let Some(v) = self.min_zoom {
			config.min_zoom = v;
		}
		if let Some(v) = self.max_zoom {
			config.max_zoom = v;
		}
		if let Some(v) = self.tile_size {
			config.tile_size = v;
		}
		if let Some(v) = self.format {
			config.format = v;
		}
		if let Some(v) = self.quality {
			config.quality = v;
		}
		if let Some(v) = self.workers {
			config.workers = v;
		}
		if let Some(v) = self.raster_concurrency {
			config.raster_concurrency = v;
		}
		if let Some(v) = &self.temp_dir {
			config.temp_root = Some(v.clone());
		}
		Ok(config)
	}

	fn jobs(&self) -> Result<Vec<RasterJob>> {
		let mut jobs = Vec::new();
		for input in &self.inputs {
			let files = if input.is_dir() {
				list_rasters(input)?
			} else {
				vec![input.clone()]
			};
			for file in files {
				jobs.push(self.job(&file));
			}
		}
		Ok(jobs)
	}

	fn job(&self, input: &Path) -> RasterJob {
		match &self.chart_type {
			Some(chart_type) => {
				let stem = input.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
				RasterJob::new(input, &self.output_dir.join(output_filename(&stem, chart_type)))
			}
			None => RasterJob::into_dir(input, &self.output_dir),
		}
	}
}

/// GeoTIFF files directly inside `dir`, sorted by name.
fn list_rasters(dir: &Path) -> Result<Vec<PathBuf>> {
	let mut files = Vec::new();
	for entry in dir.read_dir().with_context(|| format!("reading directory {dir:?}"))? {
		let path = entry?.path();
		let is_tiff = path
			.extension()
			.is_some_and(|ext| ext.eq_ignore_ascii_case("tif") || ext.eq_ignore_ascii_case("tiff"));
		if is_tiff && path.is_file() {
			files.push(path);
		}
	}
	files.sort();
	log::debug!("found {} rasters in {dir:?}", files.len());
	Ok(files)
}

#[tokio::main]
pub async fn run(arguments: &Subcommand) -> Result<()> {
	let config = arguments.config()?;
	let jobs = arguments.jobs()?;
	if jobs.is_empty() {
		bail!("no GeoTIFF files found in {:?}", arguments.inputs);
	}

	eprintln!("convert {} charts into {:?}", jobs.len(), arguments.output_dir);

	let orchestrator = Orchestrator::new(config)?;
	let summary = orchestrator.run(jobs).await;

	for (kind, count) in summary.error_counts() {
		eprintln!("  {kind:?}: {count}");
	}
	eprintln!("finished: {summary}");

	if !summary.is_success() {
		bail!("{} of {} charts failed", summary.failed(), summary.results.len());
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tests::run_command;
	use clap::Parser;
	use pretty_assertions::assert_eq;

	#[derive(Parser, Debug)]
	struct Wrapper {
		#[command(flatten)]
		convert: Subcommand,
	}

	fn parse(args: &[&str]) -> Subcommand {
		Wrapper::try_parse_from(std::iter::once("convert").chain(args.iter().copied()))
			.unwrap()
			.convert
	}

	#[test]
	fn flags_override_defaults() {
		let arguments = parse(&[
			"--min-zoom=3",
			"--max-zoom=5",
			"-f",
			"webp",
			"--quality",
			"60",
			"--temp-dir=/scratch",
			"-o",
			"/out",
			"a.tif",
		]);
		let config = arguments.config().unwrap();
		assert_eq!(
			config,
			PipelineConfig {
				min_zoom: 3,
				max_zoom: 5,
				format: TileFormat::WEBP,
				quality: 60,
				temp_root: Some(PathBuf::from("/scratch")),
				..PipelineConfig::default()
			}
		);
	}

	#[test]
	fn output_names() {
		let arguments = parse(&["-o", "/out", "--chart-type", "sectional", "/in/Anchorage SEC.tif"]);
		let jobs = arguments.jobs().unwrap();
		assert_eq!(jobs.len(), 1);
		assert_eq!(jobs[0].output, PathBuf::from("/out/S_Anchorage_SEC.mbtiles"));
		assert_eq!(jobs[0].name, "Anchorage_SEC");

		let arguments = parse(&["-o", "/out", "/in/Seattle.tif"]);
		assert_eq!(arguments.jobs().unwrap()[0].output, PathBuf::from("/out/Seattle.mbtiles"));
	}

	#[test]
	fn directory_inputs() {
		let dir = tempfile::tempdir().unwrap();
		for name in ["b.tif", "a.TIFF", "notes.txt"] {
			std::fs::write(dir.path().join(name), b"").unwrap();
		}
		let files = list_rasters(dir.path()).unwrap();
		assert_eq!(files, vec![dir.path().join("a.TIFF"), dir.path().join("b.tif")]);
	}

	#[test]
	fn invalid_config_is_rejected() {
		let err = run_command(vec![
			"chartiles",
			"convert",
			"--min-zoom=9",
			"--max-zoom=8",
			"-o",
			"/tmp",
			"/does/not/exist.tif",
		])
		.unwrap_err();
		assert_eq!(err.to_string(), "invalid configuration: min_zoom (9) must not exceed max_zoom (8)");
	}
}
