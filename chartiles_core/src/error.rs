//! Error taxonomy of the raster-to-container pipeline.
//!
//! Every component boundary returns a [`ChartError`]. The variant decides how far a failure
//! propagates:
//!
//! | Variant                   | Scope      | Effect                                        |
//! |---------------------------|------------|-----------------------------------------------|
//! | `UnsupportedRasterFormat` | raster     | raster is skipped and reported                |
//! | `UnprojectableExtent`     | raster     | raster is skipped and reported                |
//! | `EncodingFailure`         | tile       | tile is skipped, container build continues    |
//! | `DuplicateTileKey`        | raster     | container build aborts, nothing is published  |
//! | `Io`                      | raster     | container build aborts, nothing is published  |
//! | `NoTilesWritten`          | raster     | container build aborts, nothing is published  |
//! | `Cancelled`               | raster     | container build aborts, nothing is published  |
//! | `InvalidConfig`           | run        | rejected before any raster is touched         |

use crate::TileCoord;
use std::fmt::Display;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChartError {
	/// The raster's pixel encoding is neither palette-indexed nor 8-bit true-color,
	/// or its georeferencing cannot be interpreted.
	#[error("unsupported raster format: {0}")]
	UnsupportedRasterFormat(String),

	/// The raster footprint lies outside the Web Mercator domain.
	#[error("raster extent cannot be projected to web mercator: {0}")]
	UnprojectableExtent(String),

	/// A single tile could not be decoded or re-encoded.
	#[error("failed to encode tile {coord:?}: {reason}")]
	EncodingFailure { coord: TileCoord, reason: String },

	/// The same `(zoom_level, tile_column, tile_row)` was inserted twice.
	#[error("duplicate tile key (zoom_level={}, tile_column={}, tile_row={})", .0.level, .0.x, .0.y)]
	DuplicateTileKey(TileCoord),

	#[error("I/O failure: {0}")]
	Io(String),

	#[error("no tiles were written for '{0}'")]
	NoTilesWritten(String),

	#[error("processing was cancelled")]
	Cancelled,

	#[error("invalid configuration: {0}")]
	InvalidConfig(String),
}

/// Coarse classification of a [`ChartError`], used to aggregate run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChartErrorKind {
	UnsupportedRasterFormat,
	UnprojectableExtent,
	EncodingFailure,
	DuplicateTileKey,
	Io,
	NoTilesWritten,
	Cancelled,
	InvalidConfig,
}

impl ChartError {
	/// Wraps any displayable error as an [`ChartError::Io`].
	///
	/// The alternate formatter is used so that `anyhow` context chains are preserved.
	pub fn io(err: impl Display) -> Self {
		ChartError::Io(format!("{err:#}"))
	}

	pub fn unsupported(reason: impl Display) -> Self {
		ChartError::UnsupportedRasterFormat(reason.to_string())
	}

	pub fn unprojectable(reason: impl Display) -> Self {
		ChartError::UnprojectableExtent(reason.to_string())
	}

	pub fn encoding(coord: TileCoord, reason: impl Display) -> Self {
		ChartError::EncodingFailure {
			coord,
			reason: format!("{reason:#}"),
		}
	}

	pub fn kind(&self) -> ChartErrorKind {
		match self {
			ChartError::UnsupportedRasterFormat(_) => ChartErrorKind::UnsupportedRasterFormat,
			ChartError::UnprojectableExtent(_) => ChartErrorKind::UnprojectableExtent,
			ChartError::EncodingFailure { .. } => ChartErrorKind::EncodingFailure,
			ChartError::DuplicateTileKey(_) => ChartErrorKind::DuplicateTileKey,
			ChartError::Io(_) => ChartErrorKind::Io,
			ChartError::NoTilesWritten(_) => ChartErrorKind::NoTilesWritten,
			ChartError::Cancelled => ChartErrorKind::Cancelled,
			ChartError::InvalidConfig(_) => ChartErrorKind::InvalidConfig,
		}
	}

	/// `true` if the raster should be reported as skipped rather than failed.
	pub fn is_skip(&self) -> bool {
		matches!(
			self,
			ChartError::UnsupportedRasterFormat(_) | ChartError::UnprojectableExtent(_)
		)
	}
}

impl From<std::io::Error> for ChartError {
	fn from(err: std::io::Error) -> Self {
		ChartError::io(err)
	}
}

impl From<anyhow::Error> for ChartError {
	/// Recovers a `ChartError` that was carried through an `anyhow` chain, otherwise treats the
	/// error as an I/O failure.
	fn from(err: anyhow::Error) -> Self {
		match err.downcast::<ChartError>() {
			Ok(chart_error) => chart_error,
			Err(other) => ChartError::io(other),
		}
	}
}
