//! Scans a tile directory produced by the pyramid generator.
//!
//! The directory path must be **absolute**. Tile files must follow the naming pattern:
//! ```text
//! <root>/<z>/<x>/<y>.<format>
//! ```
//! where `<z>`, `<x>` and `<y>` are decimal numbers in XYZ numbering and `<format>` is one of
//! `png`, `jpg`/`jpeg` or `webp`.
//!
//! | Path               | Result                              |
//! |--------------------|-------------------------------------|
//! | `/tiles/3/2/1.png` | tile `3/2/1`                        |
//! | `/tiles/3/2/a.png` | ignored, name is not numeric        |
//! | `/tiles/3/2/1.txt` | ignored, unknown extension          |
//! | `/tiles/3/9/1.png` | ignored with a warning, `x` ≥ 2^3   |
//!
//! All tiles must share the same format. Names are parsed as numbers, so `20.png` and `020.png`
//! are both listed as row 20; the container writer rejects the second one as a duplicate key.

use anyhow::{Context, Result, bail, ensure};
use chartiles_core::{Blob, TileCoord, TileFormat};
use itertools::Itertools;
use std::{
	fmt::Debug,
	fs,
	ops::RangeInclusive,
	path::{Path, PathBuf},
};

/// All tile files found below a directory, ordered by coordinate.
pub struct DirectoryReader {
	dir: PathBuf,
	format: Option<TileFormat>,
	tiles: Vec<(TileCoord, PathBuf)>,
}

impl DirectoryReader {
	/// Scans `dir` for tile files.
	///
	/// An existing directory without any tile is not an error; the result is simply empty.
	///
	/// # Errors
	/// Returns an error if the directory is not absolute, does not exist or contains tiles of
	/// more than one format.
	pub fn open_path(dir: &Path) -> Result<DirectoryReader> {
		log::trace!("scan {dir:?}");

		ensure!(dir.is_absolute(), "path {dir:?} must be absolute");
		ensure!(dir.is_dir(), "path {dir:?} is not a directory");

		Self::scan(dir).with_context(|| format!("scanning tile directory {dir:?}"))
	}

	fn scan(dir: &Path) -> Result<DirectoryReader> {
		let mut tiles = Vec::new();
		let mut format: Option<TileFormat> = None;

		for (level, level_path) in numeric_entries::<u8>(dir)? {
			for (x, x_path) in numeric_entries::<u32>(&level_path)? {
				for entry in fs::read_dir(&x_path)? {
					let entry = entry?;
					let Ok(mut filename) = entry.file_name().into_string() else {
						continue;
					};
					let Some(file_format) = TileFormat::from_filename(&mut filename) else {
						continue;
					};
					let Ok(y) = filename.parse::<u32>() else {
						continue;
					};

					match format {
						Some(f) if f != file_format => {
							let mut formats = [f, file_format];
							formats.sort();
							bail!("found multiple tile formats: {formats:?}");
						}
						Some(_) => {}
						None => format = Some(file_format),
					}

					match TileCoord::new(level, x, y) {
						Ok(coord) => tiles.push((coord, entry.path())),
						Err(err) => log::warn!("ignoring {:?}: {err}", entry.path()),
					}
				}
			}
		}

		tiles.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
		log::debug!("found {} tiles in {dir:?}", tiles.len());

		Ok(DirectoryReader {
			dir: dir.to_path_buf(),
			format,
			tiles,
		})
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Format shared by all tiles, `None` if the directory holds no tile.
	pub fn format(&self) -> Option<TileFormat> {
		self.format
	}

	pub fn len(&self) -> usize {
		self.tiles.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tiles.is_empty()
	}

	/// Distinct zoom levels, ascending.
	pub fn levels(&self) -> Vec<u8> {
		self.tiles.iter().map(|(coord, _)| coord.level).dedup().collect()
	}

	/// Tiles whose zoom level lies in `zoom_range`, ordered by coordinate.
	pub fn tiles(&self, zoom_range: RangeInclusive<u8>) -> impl Iterator<Item = &(TileCoord, PathBuf)> + '_ {
		self.tiles.iter().filter(move |(coord, _)| zoom_range.contains(&coord.level))
	}

	pub fn read(path: &Path) -> Result<Blob> {
		Ok(Blob::from(fs::read(path).with_context(|| format!("reading tile {path:?}"))?))
	}
}

/// Subdirectories of `dir` whose names parse as `T`, in no particular order.
fn numeric_entries<T: std::str::FromStr>(dir: &Path) -> Result<Vec<(T, PathBuf)>> {
	let mut entries = Vec::new();
	for entry in fs::read_dir(dir)? {
		let entry = entry?;
		if !entry.file_type()?.is_dir() {
			continue;
		}
		if let Some(value) = entry.file_name().to_str().and_then(|name| name.parse::<T>().ok()) {
			entries.push((value, entry.path()));
		}
	}
	Ok(entries)
}

impl Debug for DirectoryReader {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DirectoryReader")
			.field("dir", &self.dir)
			.field("format", &self.format)
			.field("tiles", &self.tiles.len())
			.finish()
	}
}
