//! `SQLite` file `*.mbtiles` as tile container
//!
//! - `MBTilesWriter`: builds a new container under a temporary name and publishes it atomically.
//! - `MBTilesReader`: reads metadata and tiles back, used to verify and probe containers.
//! - `MBTilesMetadata`: the descriptive metadata entries of an overlay container.

mod metadata;
mod reader;
mod writer;

pub use metadata::{MBTILES_TYPE, MBTILES_VERSION, MBTilesMetadata};
pub use reader::MBTilesReader;
pub use writer::MBTilesWriter;
