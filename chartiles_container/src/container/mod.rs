mod directory;
pub use directory::*;

mod mbtiles;
pub use mbtiles::*;
