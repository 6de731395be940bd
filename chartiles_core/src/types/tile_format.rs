//! This module defines the `TileFormat` enum, the image encodings a container can hold.
//!
//! # Examples
//!
//! ```rust
//! use chartiles_core::TileFormat;
//!
//! let format = TileFormat::try_from_str("JPEG").unwrap();
//! assert_eq!(format, TileFormat::JPG);
//! assert_eq!(format.as_extension(), ".jpg");
//! assert_eq!(format.as_metadata_str(), "jpeg");
//!
//! let mut filename = String::from("17.png");
//! assert_eq!(TileFormat::from_filename(&mut filename), Some(TileFormat::PNG));
//! assert_eq!(filename, "17");
//! ```

use anyhow::{Result, bail};
#[cfg(feature = "cli")]
use clap::ValueEnum;
use serde::{Deserialize, Deserializer};
use std::fmt::{Display, Formatter};

/// Raster tile encodings.
///
/// - `JPG` - lossy, no alpha channel (including `.jpeg`)
/// - `PNG` - lossless, keeps alpha
/// - `WEBP` - lossy, keeps alpha
#[allow(clippy::upper_case_acronyms)]
#[cfg_attr(feature = "cli", derive(ValueEnum))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TileFormat {
	JPG,
	PNG,
	WEBP,
}

impl TileFormat {
	pub fn as_str(&self) -> &str {
		match self {
			TileFormat::JPG => "jpg",
			TileFormat::PNG => "png",
			TileFormat::WEBP => "webp",
		}
	}

	/// Value of the MBTiles `format` metadata entry.
	pub fn as_metadata_str(&self) -> &str {
		match self {
			TileFormat::JPG => "jpeg",
			TileFormat::PNG => "png",
			TileFormat::WEBP => "webp",
		}
	}

	/// Canonical file extension, with a leading dot.
	pub fn as_extension(&self) -> &str {
		match self {
			TileFormat::JPG => ".jpg",
			TileFormat::PNG => ".png",
			TileFormat::WEBP => ".webp",
		}
	}

	/// `true` if the encoding can store transparency.
	pub fn supports_alpha(&self) -> bool {
		!matches!(self, TileFormat::JPG)
	}

	/// Parses a format name (case-insensitive, `jpeg` and `jpg` are both accepted).
	pub fn try_from_str(value: &str) -> Result<Self> {
		Ok(match value.to_lowercase().trim() {
			"jpeg" | "jpg" => TileFormat::JPG,
			"png" => TileFormat::PNG,
			"webp" => TileFormat::WEBP,
			_ => bail!("Unknown tile format: '{}'", value),
		})
	}

	/// Extracts the format from the extension of `filename` and strips the extension.
	///
	/// Returns `None` and leaves `filename` untouched if the extension is unknown.
	pub fn from_filename(filename: &mut String) -> Option<Self> {
		let index = filename.rfind('.')?;
		let format = match filename[index..].to_lowercase().as_str() {
			".jpg" | ".jpeg" => TileFormat::JPG,
			".png" => TileFormat::PNG,
			".webp" => TileFormat::WEBP,
			_ => return None,
		};
		filename.truncate(index);
		Some(format)
	}
}

impl Display for TileFormat {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl<'de> Deserialize<'de> for TileFormat {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let value = String::deserialize(deserializer)?;
		TileFormat::try_from_str(&value).map_err(serde::de::Error::custom)
	}
}
