//! Spatial indices.
//!
//! Pellets and hazards (viruses and ejected cells) live in uniform grids;
//! everything else lives in the loose quadtree.

mod grid;
mod quadtree;

pub use grid::Grid;
pub use quadtree::QuadTree;
