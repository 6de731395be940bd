//! Contains types like tile coordinates, bounding boxes, affine transforms, formats and the error taxonomy
//! shared by all chartiles crates.

mod concurrency;
pub use concurrency::*;

mod error;
pub use error::*;

pub mod mercator;

pub mod types;
pub use types::*;
