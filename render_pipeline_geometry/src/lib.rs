//! The data model shared by every stage of the pipeline: [`Axis`], [`Tile`], [`Section`],
//! [`Stack`], their affine-transform algebra, and the tile-adjacency graph the stitcher uses
//! to keep only the largest connected component of a montage.
//!
//! Everything here is pure-functional: constructing an `Axis`, adding a `Tile` to a
//! `Section`, or sealing a `Section` into a `Stack` never touches the network or disk.

pub mod axis;
pub mod connectivity;
pub mod pyramid;
pub mod section;
pub mod stack;
pub mod tile;
pub mod transform;

pub use axis::Axis;
pub use connectivity::{Edge, largest_connected_component};
pub use pyramid::ImagePyramid;
pub use section::Section;
pub use stack::Stack;
pub use tile::{Tile, TileLayout, TileSpec};
pub use transform::AffineTransform;
