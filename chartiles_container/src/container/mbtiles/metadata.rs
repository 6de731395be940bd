use chartiles_core::{GeoBBox, TileFormat};

/// Value of the `type` metadata entry. Charts are always drawn on top of a base map.
pub const MBTILES_TYPE: &str = "overlay";

/// Value of the `version` metadata entry.
pub const MBTILES_VERSION: &str = "1.1";

/// The caller-provided part of an MBTiles `metadata` table.
///
/// `minzoom` and `maxzoom` are not part of it: the writer derives them from the tiles it actually
/// inserted.
#[derive(Clone, Debug, PartialEq)]
pub struct MBTilesMetadata {
	pub name: String,
	pub description: String,
	pub format: TileFormat,
	/// Geographic extent of the source raster, written as `west,south,east,north`.
	pub bounds: GeoBBox,
}

impl MBTilesMetadata {
	pub fn new(name: &str, format: TileFormat, bounds: GeoBBox) -> MBTilesMetadata {
		MBTilesMetadata {
			name: name.to_string(),
			description: name.to_string(),
			format,
			bounds,
		}
	}

	/// All entries in insertion order, completed by the observed zoom range.
	pub(super) fn entries(&self, min_zoom: u8, max_zoom: u8) -> Vec<(&'static str, String)> {
		vec![
			("name", self.name.clone()),
			("type", MBTILES_TYPE.to_string()),
			("version", MBTILES_VERSION.to_string()),
			("description", self.description.clone()),
			("format", self.format.as_metadata_str().to_string()),
			("bounds", self.bounds.as_metadata_string()),
			("minzoom", min_zoom.to_string()),
			("maxzoom", max_zoom.to_string()),
		]
	}
}
