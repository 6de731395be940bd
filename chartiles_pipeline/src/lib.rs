//! The raster-to-container pipeline.
//!
//! - [`PyramidGenerator`] renders a raster into a directory of PNG tiles.
//! - [`ContainerBuilder`] packs such a directory into an MBTiles container.
//! - [`Orchestrator`] runs both for a batch of GeoTIFF files, as configured by a
//!   [`PipelineConfig`].
//!
//! ```rust,no_run
//! use chartiles_pipeline::{Orchestrator, PipelineConfig, RasterJob};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = Orchestrator::new(PipelineConfig::default())?;
//!     let job = RasterJob::into_dir(Path::new("/data/Anchorage SEC.tif"), Path::new("/data/out"));
//!     let summary = orchestrator.run(vec![job]).await;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

mod config;
pub use config::*;

mod container_builder;
pub use container_builder::*;

mod naming;
pub use naming::*;

mod orchestrator;
pub use orchestrator::*;

mod pyramid;
pub use pyramid::*;
