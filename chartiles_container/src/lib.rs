//! Tile containers: the intermediate `{z}/{x}/{y}.<ext>` directory layout and MBTiles files.

mod container;
pub use container::*;
