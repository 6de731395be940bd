//! Contains types like coordinates, bounding boxes (bboxes), affine transforms and format types.

mod blob;
pub use blob::*;

mod geo_bbox;
pub use geo_bbox::*;

mod geo_transform;
pub use geo_transform::*;

mod tile_bbox;
pub use tile_bbox::*;

mod tile_coord;
pub use tile_coord::*;

mod tile_format;
pub use tile_format::*;
