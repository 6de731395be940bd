//! Write tiles and metadata into a new MBTiles (SQLite) database.
//!
//! The `MBTilesWriter` builds an overlay container following MBTiles 1.1. Tiles are handed in
//! with **XYZ** coordinates and stored in the **TMS** layout
//! (`tile_row = 2^z - 1 - y`).
//!
//! ## Publishing
//! The database is built under a unique temporary name next to the destination:
//!
//! ```text
//! /data/charts/.Anchorage.mbtiles.5f0c…​.tmp   while writing
//! /data/charts/Anchorage.mbtiles             after finish()
//! ```
//!
//! Only [`MBTilesWriter::finish`] renames it to the destination. A writer that is dropped
//! without finishing, or whose `finish` fails, deletes the temporary file, so a partial
//! container is never visible under the destination name. Because of that the connection runs
//! with `journal_mode=MEMORY` and `synchronous=OFF`.
//!
//! ## Keys
//! Every `(zoom_level, tile_column, tile_row)` can be inserted once. A second insert fails with
//! [`ChartError::DuplicateTileKey`] and never replaces the first tile.
//!
//! ## Example
//! ```rust,no_run
//! use chartiles_container::{MBTilesMetadata, MBTilesWriter};
//! use chartiles_core::{Blob, GeoBBox, TileCoord, TileFormat};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), chartiles_core::ChartError> {
//! let mut writer = MBTilesWriter::create(Path::new("/data/charts/Anchorage.mbtiles"), 500)?;
//! writer.add_tile(TileCoord::new(6, 3, 20).unwrap(), Blob::from(vec![0xff, 0xd8]))?;
//!
//! let bounds = GeoBBox::new(-170.0, 42.0, -150.0, 62.0).unwrap();
//! let path = writer.finish(&MBTilesMetadata::new("Anchorage", TileFormat::JPG, bounds))?;
//! # Ok(())
//! # }
//! ```

use super::MBTilesMetadata;
use anyhow::{Context, Result, ensure};
use chartiles_core::{Blob, ChartError, TileCoord};
use r2d2::Pool;
use r2d2_sqlite::{
	SqliteConnectionManager,
	rusqlite::{self, ErrorCode, params},
};
use std::{
	collections::HashSet,
	fs,
	io::ErrorKind,
	path::{Path, PathBuf},
};

/// Single writer of one MBTiles container.
///
/// All methods take `&mut self`: the writer is owned by exactly one task, which receives the
/// tiles of all encoding workers.
pub struct MBTilesWriter {
	destination: PathBuf,
	temp_path: PathBuf,
	pool: Option<Pool<SqliteConnectionManager>>,
	batch: Vec<(TileCoord, Blob)>,
	batch_size: usize,
	/// TMS coordinates of every tile accepted so far.
	keys: HashSet<TileCoord>,
	zoom_range: Option<(u8, u8)>,
	published: bool,
}

impl MBTilesWriter {
	/// Creates the temporary database next to `destination` and initializes the schema.
	///
	/// Tiles are committed in transactions of `batch_size` tiles.
	///
	/// # Errors
	/// Returns [`ChartError::Io`] if `destination` is not absolute or the database cannot be
	/// created.
	pub fn create(destination: &Path, batch_size: usize) -> Result<MBTilesWriter, ChartError> {
		Ok(Self::create_internal(destination, batch_size)
			.with_context(|| format!("creating MBTiles container '{}'", destination.display()))?)
	}

	fn create_internal(destination: &Path, batch_size: usize) -> Result<MBTilesWriter> {
		ensure!(destination.is_absolute(), "path {destination:?} must be absolute");
		let file_name = destination
			.file_name()
			.with_context(|| format!("path {destination:?} has no file name"))?
			.to_string_lossy()
			.to_string();
		let parent = destination
			.parent()
			.with_context(|| format!("path {destination:?} has no parent directory"))?;
		fs::create_dir_all(parent).with_context(|| format!("creating directory {parent:?}"))?;

		let temp_path = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));
		log::debug!("building {destination:?} in {temp_path:?}");

		let manager = SqliteConnectionManager::file(&temp_path).with_init(|conn| {
			conn.pragma_update_and_check(None, "journal_mode", "MEMORY", |row| row.get::<_, String>(0))?;
			conn.pragma_update(None, "synchronous", "OFF")
		});

		let mut writer = MBTilesWriter {
			destination: destination.to_path_buf(),
			temp_path,
			pool: None,
			batch: Vec::new(),
			batch_size: batch_size.max(1),
			keys: HashSet::new(),
			zoom_range: None,
			published: false,
		};

		// from here on, Drop removes the temporary file on error
		let pool = Pool::builder().max_size(1).build(manager)?;
		pool.get()?.execute_batch(
			"CREATE TABLE metadata (name TEXT, value TEXT, UNIQUE (name));
			CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB);
			CREATE UNIQUE INDEX tile_index ON tiles (zoom_level, tile_column, tile_row);",
		)?;
		writer.pool = Some(pool);

		Ok(writer)
	}

	/// Queues one tile for insertion. `coord` is in XYZ numbering.
	///
	/// # Errors
	/// Returns [`ChartError::DuplicateTileKey`] (with the TMS key) if the tile was added before,
	/// or [`ChartError::Io`] if committing a full batch fails.
	pub fn add_tile(&mut self, coord: TileCoord, blob: Blob) -> Result<(), ChartError> {
		let key = coord.to_tms();
		if !self.keys.insert(key) {
			return Err(ChartError::DuplicateTileKey(key));
		}

		self.zoom_range = Some(match self.zoom_range {
			None => (key.level, key.level),
			Some((min, max)) => (min.min(key.level), max.max(key.level)),
		});

		self.batch.push((key, blob));
		if self.batch.len() >= self.batch_size {
			self.flush()?;
		}
		Ok(())
	}

	/// Number of tiles accepted so far.
	pub fn tile_count(&self) -> usize {
		self.keys.len()
	}

	/// Lowest and highest zoom level of all accepted tiles.
	pub fn zoom_range(&self) -> Option<(u8, u8)> {
		self.zoom_range
	}

	pub fn temp_path(&self) -> &Path {
		&self.temp_path
	}

	/// Commits the queued tiles in a single transaction.
	fn flush(&mut self) -> Result<(), ChartError> {
		if self.batch.is_empty() {
			return Ok(());
		}
		let batch = std::mem::take(&mut self.batch);
		log::trace!("committing {} tiles to {:?}", batch.len(), self.temp_path);

		let mut conn = self.pool()?.get().map_err(ChartError::io)?;
		let transaction = conn.transaction().map_err(ChartError::io)?;
		{
			let mut statement = transaction
				.prepare_cached("INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (?1, ?2, ?3, ?4)")
				.map_err(ChartError::io)?;
			for (key, blob) in &batch {
				statement
					.execute(params![key.level, key.x, key.y, blob.as_slice()])
					.map_err(|err| insert_error(err, *key))?;
			}
		}
		transaction.commit().map_err(ChartError::io)?;
		Ok(())
	}

	fn pool(&self) -> Result<&Pool<SqliteConnectionManager>, ChartError> {
		self.pool
			.as_ref()
			.ok_or_else(|| ChartError::io(format!("container {:?} is already closed", self.destination)))
	}

	/// Commits all tiles, writes the metadata and atomically renames the database to its
	/// destination.
	///
	/// `minzoom` and `maxzoom` are the lowest and highest zoom level that was actually inserted.
	///
	/// # Errors
	/// Returns [`ChartError::NoTilesWritten`] if no tile was added, or [`ChartError::Io`] if
	/// committing or renaming fails. In both cases the temporary file is removed and nothing is
	/// published.
	pub fn finish(self, metadata: &MBTilesMetadata) -> Result<PathBuf, ChartError> {
		self.finish_unless(metadata, || false)
	}

	/// Like [`finish`](Self::finish), but asks `cancelled` right before the rename. If it returns
	/// `true`, the container is discarded with [`ChartError::Cancelled`] and nothing is published.
	pub fn finish_unless(
		mut self,
		metadata: &MBTilesMetadata,
		cancelled: impl Fn() -> bool,
	) -> Result<PathBuf, ChartError> {
		self.flush()?;

		let Some((min_zoom, max_zoom)) = self.zoom_range else {
			return Err(ChartError::NoTilesWritten(metadata.name.clone()));
		};

		self.write_metadata(&metadata.entries(min_zoom, max_zoom))
			.with_context(|| format!("writing metadata of {:?}", self.destination))?;

		// all connections must be closed before the file is moved
		self.pool = None;

		if cancelled() {
			log::debug!("cancelled before publishing {:?}", self.destination);
			return Err(ChartError::Cancelled);
		}

		fs::rename(&self.temp_path, &self.destination)
			.with_context(|| format!("publishing {:?} as {:?}", self.temp_path, self.destination))?;
		self.published = true;

		log::debug!(
			"published {:?} with {} tiles, zoom {min_zoom}..={max_zoom}",
			self.destination,
			self.tile_count()
		);
		Ok(self.destination.clone())
	}

	fn write_metadata(&self, entries: &[(&str, String)]) -> Result<()> {
		let mut conn = self.pool()?.get()?;
		let transaction = conn.transaction()?;
		for (name, value) in entries {
			transaction
				.execute("INSERT INTO metadata (name, value) VALUES (?1, ?2)", params![name, value])
				.with_context(|| format!("setting metadata key '{name}' = '{value}'"))?;
		}
		transaction.commit()?;
		Ok(())
	}
}

/// A unique constraint violation on insert is a duplicate key, everything else is I/O.
fn insert_error(err: rusqlite::Error, key: TileCoord) -> ChartError {
	if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
		ChartError::DuplicateTileKey(key)
	} else {
		ChartError::io(format!("inserting tile {key:?}: {err}"))
	}
}

impl std::fmt::Debug for MBTilesWriter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MBTilesWriter")
			.field("destination", &self.destination)
			.field("tiles", &self.keys.len())
			.finish()
	}
}

impl Drop for MBTilesWriter {
	fn drop(&mut self) {
		if self.published {
			return;
		}
		self.pool = None;
		match fs::remove_file(&self.temp_path) {
			Ok(()) => log::debug!("removed unpublished container {:?}", self.temp_path),
			Err(err) if err.kind() == ErrorKind::NotFound => {}
			Err(err) => log::warn!("failed to remove temporary container {:?}: {err}", self.temp_path),
		}
	}
}
