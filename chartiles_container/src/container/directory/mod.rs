//! Use a directory as a tile container
//!
//! Tiles are stored as `<root>/<z>/<x>/<y>.<format>` in XYZ numbering. The pyramid generator
//! writes this layout with [`DirectoryWriter`], the container builder scans it with
//! [`DirectoryReader`].

mod reader;
mod writer;

pub use reader::DirectoryReader;
pub use writer::DirectoryWriter;
