//! Deterministic procedural terrain.
//!
//! The server and the browser client derive ground height from the same
//! seed and algorithm, so a [`HeightGrid`] built here matches the one the
//! client renders and collides against cell for cell.

pub mod grid;
pub mod noise;

pub use grid::{HeightGrid, TerrainConfig, OUT_OF_BOUNDS};
pub use noise::GradientNoise;
