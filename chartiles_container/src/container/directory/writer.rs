//! Writes single tiles into a `<root>/<z>/<x>/<y>.<format>` directory.
//!
//! ```text
//! /tmp/chart/6/3/20.png
//! /tmp/chart/7/6/40.png
//! ```
//!
//! The writer is shared by the parallel render workers. Every tile goes to its own file, so no
//! synchronization is needed beyond creating the parent directories.

use anyhow::{Context, Result, ensure};
use chartiles_core::{Blob, TileCoord, TileFormat};
use std::{
	fs,
	io::ErrorKind,
	path::{Path, PathBuf},
};

#[derive(Clone, Debug)]
pub struct DirectoryWriter {
	dir: PathBuf,
	format: TileFormat,
}

impl DirectoryWriter {
	/// Creates the root directory if necessary. `dir` must be absolute.
	pub fn new(dir: &Path, format: TileFormat) -> Result<DirectoryWriter> {
		ensure!(dir.is_absolute(), "path {dir:?} must be absolute");
		fs::create_dir_all(dir).with_context(|| format!("creating tile directory {dir:?}"))?;
		Ok(DirectoryWriter {
			dir: dir.to_path_buf(),
			format,
		})
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	pub fn format(&self) -> TileFormat {
		self.format
	}

	pub fn tile_path(&self, coord: &TileCoord) -> PathBuf {
		self.dir
			.join(coord.level.to_string())
			.join(coord.x.to_string())
			.join(format!("{}{}", coord.y, self.format.as_extension()))
	}

	/// Writes the tile, creating the `<z>/<x>` directories as needed.
	pub fn write_tile(&self, coord: &TileCoord, blob: &Blob) -> Result<()> {
		let path = self.tile_path(coord);
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).with_context(|| format!("creating directory {parent:?}"))?;
		}
		fs::write(&path, blob.as_slice()).with_context(|| format!("writing tile {coord:?} to {path:?}"))?;
		Ok(())
	}

	/// Reads back a tile written earlier, `None` if it does not exist.
	pub fn read_tile(&self, coord: &TileCoord) -> Result<Option<Blob>> {
		let path = self.tile_path(coord);
		match fs::read(&path) {
			Ok(data) => Ok(Some(Blob::from(data))),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e).with_context(|| format!("reading tile {coord:?} from {path:?}")),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use assert_fs::TempDir;

	#[test]
	fn write_and_read_back() -> Result<()> {
		let dir = TempDir::new()?;
		let writer = DirectoryWriter::new(dir.path(), TileFormat::PNG)?;
		let coord = TileCoord::new(6, 3, 20)?;

		assert_eq!(writer.read_tile(&coord)?, None);
		writer.write_tile(&coord, &Blob::from("tile"))?;

		assert_eq!(writer.tile_path(&coord), dir.path().join("6/3/20.png"));
		assert_eq!(writer.read_tile(&coord)?, Some(Blob::from("tile")));
		Ok(())
	}

	#[test]
	fn relative_path_is_rejected() {
		assert!(DirectoryWriter::new(Path::new("tiles"), TileFormat::PNG).is_err());
	}
}
