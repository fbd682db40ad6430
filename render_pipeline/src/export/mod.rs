//! Export sinks: turns a finished render stack into a CATMAID tile tree or a WebKnossos
//! dataset for downstream viewers.

pub mod catmaid;
pub mod webknossos;

pub use catmaid::{BoxRenderer, CatmaidExportParams, ExternalBoxRenderer, compute_max_level, export_catmaid};
pub use webknossos::{ExternalWkCuber, VoxelSize, WkCuber, export_webknossos};
