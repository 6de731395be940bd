//! Read tiles and metadata from an MBTiles (SQLite) database.
//!
//! The `MBTilesReader` opens a published container read-only. The pipeline uses it to verify a
//! container right after publishing it, and the `probe` command uses it to describe one.
//!
//! Tiles are addressed with **XYZ** coordinates; the row is flipped to the stored TMS row before
//! querying.
//!
//! ## Errors
//! - Returns errors if the path is not absolute or the file does not exist.
//! - Returns errors if the database is unreadable or lacks the `metadata` or `tiles` table.

use super::{MBTILES_TYPE, MBTILES_VERSION};
use anyhow::{Context, Result, bail, ensure};
use chartiles_core::{Blob, GeoBBox, TileCoord, TileFormat};
use r2d2::Pool;
use r2d2_sqlite::{
	SqliteConnectionManager,
	rusqlite::{OpenFlags, OptionalExtension, params},
};
use std::{
	collections::BTreeMap,
	path::{Path, PathBuf},
};

/// Metadata entries every overlay container must carry.
const REQUIRED_KEYS: [&str; 8] = [
	"name",
	"type",
	"version",
	"description",
	"format",
	"bounds",
	"minzoom",
	"maxzoom",
];

/// Read-only view of an MBTiles container.
pub struct MBTilesReader {
	path: PathBuf,
	pool: Pool<SqliteConnectionManager>,
	metadata: BTreeMap<String, String>,
}

impl MBTilesReader {
	/// Opens an MBTiles database from an **absolute** filesystem path and loads its metadata.
	pub fn open_path(path: &Path) -> Result<MBTilesReader> {
		log::debug!("open {path:?}");

		ensure!(path.exists(), "file {path:?} does not exist");
		ensure!(path.is_absolute(), "path {path:?} must be absolute");

		Self::load_from_sqlite(path).with_context(|| format!("opening MBTiles at '{}'", path.display()))
	}

	fn load_from_sqlite(path: &Path) -> Result<MBTilesReader> {
		let manager = SqliteConnectionManager::file(path)
			.with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX);
		let pool = Pool::builder().max_size(4).build(manager)?;

		let metadata = {
			let conn = pool.get()?;
			let mut statement = conn.prepare("SELECT name, value FROM metadata")?;
			statement
				.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
				.collect::<Result<BTreeMap<_, _>, _>>()?
		};
		log::trace!("metadata of {path:?}: {metadata:?}");

		Ok(MBTilesReader {
			path: path.to_path_buf(),
			pool,
			metadata,
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// All entries of the `metadata` table.
	pub fn metadata(&self) -> &BTreeMap<String, String> {
		&self.metadata
	}

	fn metadata_value(&self, key: &str) -> Result<&str> {
		self.metadata
			.get(key)
			.map(String::as_str)
			.with_context(|| format!("metadata entry '{key}' is missing"))
	}

	pub fn format(&self) -> Result<TileFormat> {
		TileFormat::try_from_str(self.metadata_value("format")?)
	}

	pub fn bounds(&self) -> Result<GeoBBox> {
		GeoBBox::parse_metadata_string(self.metadata_value("bounds")?)
	}

	pub fn tile_count(&self) -> Result<u64> {
		let count: i64 = self
			.pool
			.get()?
			.query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get(0))?;
		Ok(count as u64)
	}

	/// Number of tiles per zoom level, ascending by level.
	pub fn level_counts(&self) -> Result<Vec<(u8, u64)>> {
		let conn = self.pool.get()?;
		let mut statement =
			conn.prepare("SELECT zoom_level, COUNT(*) FROM tiles GROUP BY zoom_level ORDER BY zoom_level")?;
		let counts = statement
			.query_map([], |row| Ok((row.get::<_, u8>(0)?, row.get::<_, i64>(1)? as u64)))?
			.collect::<Result<Vec<_>, _>>()?;
		Ok(counts)
	}

	/// Lowest and highest zoom level present in the `tiles` table.
	pub fn zoom_range(&self) -> Result<Option<(u8, u8)>> {
		let range: (Option<u8>, Option<u8>) = self.pool.get()?.query_row(
			"SELECT MIN(zoom_level), MAX(zoom_level) FROM tiles",
			[],
			|row| Ok((row.get(0)?, row.get(1)?)),
		)?;
		Ok(match range {
			(Some(min), Some(max)) => Some((min, max)),
			_ => None,
		})
	}

	/// Fetches the tile at the XYZ coordinate `coord`.
	pub fn get_tile(&self, coord: &TileCoord) -> Result<Option<Blob>> {
		let key = coord.to_tms();
		let data: Option<Vec<u8>> = self
			.pool
			.get()?
			.query_row(
				"SELECT tile_data FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
				params![key.level, key.x, key.y],
				|row| row.get(0),
			)
			.optional()
			.with_context(|| format!("reading tile {coord:?}"))?;
		Ok(data.map(Blob::from))
	}

	/// Stored `(zoom_level, tile_column, tile_row)` keys without row conversion.
	#[cfg(test)]
	pub(crate) fn raw_keys(&self) -> Result<Vec<(u8, u32, u32)>> {
		let conn = self.pool.get()?;
		let mut statement =
			conn.prepare("SELECT zoom_level, tile_column, tile_row FROM tiles ORDER BY zoom_level, tile_column, tile_row")?;
		let keys = statement
			.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
			.collect::<Result<Vec<_>, _>>()?;
		Ok(keys)
	}

	/// Checks that the container is a complete overlay container.
	///
	/// All required metadata entries must exist, `type` and `version` must be `overlay` and
	/// `1.1`, `format` and `bounds` must parse, and `minzoom`/`maxzoom` must equal the zoom range
	/// of the stored tiles.
	pub fn verify(&self) -> Result<()> {
		for key in REQUIRED_KEYS {
			self.metadata_value(key)?;
		}
		ensure!(
			self.metadata_value("type")? == MBTILES_TYPE,
			"type is '{}', expected '{MBTILES_TYPE}'",
			self.metadata_value("type")?
		);
		ensure!(
			self.metadata_value("version")? == MBTILES_VERSION,
			"version is '{}', expected '{MBTILES_VERSION}'",
			self.metadata_value("version")?
		);
		self.format()?;
		self.bounds()?;

		let min_zoom: u8 = self.metadata_value("minzoom")?.parse().context("parsing minzoom")?;
		let max_zoom: u8 = self.metadata_value("maxzoom")?.parse().context("parsing maxzoom")?;
		let Some(observed) = self.zoom_range()? else {
			bail!("container {:?} holds no tiles", self.path);
		};
		ensure!(
			observed == (min_zoom, max_zoom),
			"metadata zoom range {min_zoom}..={max_zoom} differs from stored tiles {}..={}",
			observed.0,
			observed.1
		);
		Ok(())
	}
}

impl std::fmt::Debug for MBTilesReader {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MBTilesReader").field("path", &self.path).finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{MBTilesMetadata, MBTilesWriter};
	use assert_fs::TempDir;
	use pretty_assertions::assert_eq;
	use r2d2_sqlite::rusqlite::Connection;

	fn write_container(dir: &Path, levels: &[u8]) -> Result<PathBuf> {
		let path = dir.join("test.mbtiles");
		let mut writer = MBTilesWriter::create(&path, 500)?;
		for &level in levels {
			let max = (1u32 << level) - 1;
			writer.add_tile(TileCoord::new(level, 0, 0)?, Blob::from("nw"))?;
			writer.add_tile(TileCoord::new(level, max, max)?, Blob::from("se"))?;
		}
		let bounds = GeoBBox::new(-170.0, 42.0, -150.0, 62.0)?;
		Ok(writer.finish(&MBTilesMetadata::new("test", TileFormat::WEBP, bounds))?)
	}

	#[test]
	fn reads_metadata_and_tiles() -> Result<()> {
		let dir = TempDir::new()?;
		let reader = MBTilesReader::open_path(&write_container(dir.path(), &[8, 6, 7])?)?;

		assert_eq!(reader.metadata()["type"], "overlay");
		assert_eq!(reader.metadata()["minzoom"], "6");
		assert_eq!(reader.metadata()["maxzoom"], "8");
		assert_eq!(reader.format()?, TileFormat::WEBP);
		assert_eq!(reader.bounds()?.as_array(), [-170.0, 42.0, -150.0, 62.0]);
		assert_eq!(reader.tile_count()?, 6);
		assert_eq!(reader.level_counts()?, vec![(6, 2), (7, 2), (8, 2)]);
		assert_eq!(reader.zoom_range()?, Some((6, 8)));
		assert_eq!(reader.get_tile(&TileCoord::new(7, 0, 0)?)?, Some(Blob::from("nw")));
		assert_eq!(reader.get_tile(&TileCoord::new(7, 127, 127)?)?, Some(Blob::from("se")));
		assert_eq!(reader.get_tile(&TileCoord::new(7, 1, 0)?)?, None);
		reader.verify()
	}

	#[test]
	fn verify_detects_inconsistent_zoom_range() -> Result<()> {
		let dir = TempDir::new()?;
		let path = write_container(dir.path(), &[6, 7])?;
		Connection::open(&path)?.execute("UPDATE metadata SET value = '5' WHERE name = 'minzoom'", [])?;

		let err = MBTilesReader::open_path(&path)?.verify().unwrap_err();
		assert_eq!(
			err.to_string(),
			"metadata zoom range 5..=7 differs from stored tiles 6..=7"
		);
		Ok(())
	}

	#[test]
	fn verify_detects_missing_entry() -> Result<()> {
		let dir = TempDir::new()?;
		let path = write_container(dir.path(), &[6])?;
		Connection::open(&path)?.execute("DELETE FROM metadata WHERE name = 'bounds'", [])?;

		let err = MBTilesReader::open_path(&path)?.verify().unwrap_err();
		assert_eq!(err.to_string(), "metadata entry 'bounds' is missing");
		Ok(())
	}

	#[test]
	fn missing_file() {
		let err = MBTilesReader::open_path(Path::new("/does/not/exist.mbtiles")).unwrap_err();
		assert!(err.to_string().contains("does not exist"));
	}
}
