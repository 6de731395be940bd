//! Tile codecs (JPEG, PNG, WebP).
//!
//! Each submodule bridges the `image`/`webp` crates and [`chartiles_core::Blob`]. The `all`
//! module dispatches on [`chartiles_core::TileFormat`].

mod all;

pub mod jpeg;
pub mod png;
pub mod webp;
pub use all::*;
