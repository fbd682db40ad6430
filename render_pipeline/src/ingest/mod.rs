//! Source-specific ingest adaptors: each knows how to walk one kind of acquisition's on-disk
//! layout and turn it into [`Tile`](render_pipeline_geometry::tile::Tile) records, but shares
//! the concurrent driver and pyramid-writing machinery in [`crate::mipmap`].

pub mod catmaid_replay;
pub mod clem;
pub mod fastem;

use std::collections::BTreeMap;

/// How a FASTEM (or similar grid) ingest run decides where each tile sits in world space.
///
/// The reference importer represents this as a dict that is either absent (`None`, meaning
/// "place tiles on a grid") or populated with per-filename coordinates read from
/// `positions.txt`; a single container whose *shape* carries the meaning invites exactly the
/// `AttributeError`-driven type dispatch this pipeline avoids elsewhere, so placement is a
/// tagged variant instead.
#[derive(Debug, Clone)]
pub enum PositionSource {
	/// No-overlap grid placement: tile `(row, col)` sits at `(col * width, row * height)`.
	Grid,
	/// Explicit per-file world coordinates parsed from `positions.txt`.
	FromFile(BTreeMap<String, (f64, f64)>),
}
