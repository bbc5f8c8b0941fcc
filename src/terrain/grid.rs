use serde::{Deserialize, Serialize};

use super::noise::{GradientNoise, DEFAULT_SEED};

/// Returned by [`HeightGrid::height_at`] for coordinates outside the world
pub const OUT_OF_BOUNDS: f32 = -999.0;

/// Terrain generation parameters.
///
/// Defaults match the browser client's world settings; both sides must
/// use the same values to agree on ground height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainConfig {
    /// Noise seed
    pub seed: u32,
    /// Grid cells per side
    pub world_size: usize,
    /// World units per block
    pub block_size: f32,
    /// Number of fBm layers
    pub octaves: u32,
    /// Amplitude multiplier per octave
    pub persistence: f64,
    /// Grid-to-noise coordinate scale (lower = smoother)
    pub scale: f64,
    /// Maximum terrain height in blocks (before the +1 floor)
    pub height_cap: u32,
    /// Extra height above ground at the spawn point
    pub spawn_y_offset: f32,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            world_size: 60,
            block_size: 5.0,
            octaves: 3,
            persistence: 0.5,
            scale: 0.08,
            height_cap: 4,
            spawn_y_offset: 20.0,
        }
    }
}

impl TerrainConfig {
    /// Side length of the world in world units
    pub fn world_extent(&self) -> f32 {
        self.world_size as f32 * self.block_size
    }
}

/// Deterministic heightmap: `world_size * world_size` heights in world units,
/// stored x-major (`x * world_size + z`).
#[derive(Debug, Clone, PartialEq)]
pub struct HeightGrid {
    config: TerrainConfig,
    /// Integer block counts per cell (always >= 1)
    blocks: Vec<u32>,
    /// `blocks * block_size` per cell
    heights: Vec<f32>,
}

impl HeightGrid {
    /// Generate the grid. Pure function of `config`.
    pub fn generate(config: &TerrainConfig) -> Self {
        let noise = GradientNoise::new(config.seed);
        let size = config.world_size;
        let mut blocks = Vec::with_capacity(size * size);
        let mut heights = Vec::with_capacity(size * size);

        for x in 0..size {
            for z in 0..size {
                let value = noise.fbm(
                    x as f64 * config.scale,
                    z as f64 * config.scale,
                    config.octaves,
                    config.persistence,
                );
                let block_height = block_height(value, config.height_cap);
                blocks.push(block_height);
                heights.push(block_height as f32 * config.block_size);
            }
        }

        Self {
            config: config.clone(),
            blocks,
            heights,
        }
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn size(&self) -> usize {
        self.config.world_size
    }

    /// Height in world units of grid cell (x, z), if in range
    pub fn cell(&self, x: usize, z: usize) -> Option<f32> {
        if x >= self.size() || z >= self.size() {
            return None;
        }
        self.heights.get(x * self.size() + z).copied()
    }

    /// Block count of grid cell (x, z), if in range
    pub fn blocks_at(&self, x: usize, z: usize) -> Option<u32> {
        if x >= self.size() || z >= self.size() {
            return None;
        }
        self.blocks.get(x * self.size() + z).copied()
    }

    /// Ground height under a world-space position.
    ///
    /// Rounds to the nearest grid cell; returns [`OUT_OF_BOUNDS`] outside
    /// the world.
    pub fn height_at(&self, world_x: f32, world_z: f32) -> f32 {
        let gx = round_half_up(world_x / self.config.block_size);
        let gz = round_half_up(world_z / self.config.block_size);
        let size = self.size() as f32;

        if !(gx >= 0.0 && gx < size && gz >= 0.0 && gz < size) {
            return OUT_OF_BOUNDS;
        }

        self.cell(gx as usize, gz as usize).unwrap_or(OUT_OF_BOUNDS)
    }

    /// Ground height at the world centre plus the spawn offset
    pub fn spawn_height(&self) -> f32 {
        let centre = self.size() / 2;
        self.cell(centre, centre).unwrap_or(0.0) + self.config.spawn_y_offset
    }

    /// Spawn position `[x, y, z]` in world units
    pub fn spawn_point(&self) -> [f32; 3] {
        let half = self.config.world_extent() / 2.0;
        [half, self.spawn_height(), half]
    }

    /// Raw heights, x-major
    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    /// Total number of blocks in the world
    pub fn total_blocks(&self) -> u64 {
        self.blocks.iter().map(|b| *b as u64).sum()
    }
}

/// Round with ties toward positive infinity, like the client's `Math.round`
#[inline]
fn round_half_up(v: f32) -> f32 {
    (v + 0.5).floor()
}

/// Map normalized noise to a block count in `1..=height_cap + 1`
#[inline]
pub fn block_height(noise: f64, height_cap: u32) -> u32 {
    let normalized = ((noise + 1.0) / 2.0).clamp(0.0, 1.0);
    (normalized * height_cap as f64).floor() as u32 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_deterministic() {
        let config = TerrainConfig::default();
        let a = HeightGrid::generate(&config);
        let b = HeightGrid::generate(&config);
        assert_eq!(a, b);

        let bytes_a: Vec<u8> = a.heights().iter().flat_map(|h| h.to_le_bytes()).collect();
        let bytes_b: Vec<u8> = b.heights().iter().flat_map(|h| h.to_le_bytes()).collect();
        assert_eq!(bytes_a, bytes_b);
    }

    #[test]
    fn test_generate_deterministic_across_parameters() {
        for (seed, size, octaves, persistence, scale) in [
            (1u32, 16usize, 1u32, 0.5f64, 0.1f64),
            (42, 32, 4, 0.35, 0.05),
            (9001, 8, 6, 0.8, 0.3),
        ] {
            let config = TerrainConfig {
                seed,
                world_size: size,
                octaves,
                persistence,
                scale,
                ..Default::default()
            };
            assert_eq!(HeightGrid::generate(&config), HeightGrid::generate(&config));
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = HeightGrid::generate(&TerrainConfig { seed: 1, ..Default::default() });
        let b = HeightGrid::generate(&TerrainConfig { seed: 2, ..Default::default() });
        assert_ne!(a.heights(), b.heights());
    }

    #[test]
    fn test_minimum_height_is_one_block() {
        let config = TerrainConfig::default();
        let grid = HeightGrid::generate(&config);
        for x in 0..grid.size() {
            for z in 0..grid.size() {
                let blocks = grid.blocks_at(x, z).unwrap();
                assert!(blocks >= 1);
                assert!(blocks <= config.height_cap + 1);
                assert_eq!(grid.cell(x, z).unwrap(), blocks as f32 * config.block_size);
            }
        }
    }

    #[test]
    fn test_block_height_mapping() {
        assert_eq!(block_height(-1.0, 4), 1);
        assert_eq!(block_height(0.0, 4), 3);
        assert_eq!(block_height(0.999, 4), 4);
        assert_eq!(block_height(1.0, 4), 5);
    }

    #[test]
    fn test_height_at_rounds_to_nearest_cell() {
        let grid = HeightGrid::generate(&TerrainConfig::default());
        // block_size 5: 7.4 / 5 = 1.48 -> 1, 7.6 / 5 = 1.52 -> 2
        assert_eq!(grid.height_at(7.4, 0.0), grid.cell(1, 0).unwrap());
        assert_eq!(grid.height_at(7.6, 0.0), grid.cell(2, 0).unwrap());
        assert_eq!(grid.height_at(0.0, 12.6), grid.cell(0, 3).unwrap());
    }

    #[test]
    fn test_height_at_out_of_bounds() {
        let grid = HeightGrid::generate(&TerrainConfig::default());
        let extent = grid.config().world_extent();
        assert_eq!(grid.height_at(-5.0, 10.0), OUT_OF_BOUNDS);
        assert_eq!(grid.height_at(10.0, -5.0), OUT_OF_BOUNDS);
        assert_eq!(grid.height_at(extent, 10.0), OUT_OF_BOUNDS);
        assert_eq!(grid.height_at(f32::NAN, 0.0), OUT_OF_BOUNDS);
        // -2.4 and -2.5 both round to cell 0
        assert_ne!(grid.height_at(-2.4, 0.0), OUT_OF_BOUNDS);
        assert_eq!(grid.height_at(-2.5, 0.0), grid.cell(0, 0).unwrap());
    }

    #[test]
    fn test_spawn_point_is_centre_above_ground() {
        let config = TerrainConfig::default();
        let grid = HeightGrid::generate(&config);
        let [x, y, z] = grid.spawn_point();
        assert_eq!(x, 150.0);
        assert_eq!(z, 150.0);
        assert_eq!(y, grid.cell(30, 30).unwrap() + config.spawn_y_offset);
    }

    #[test]
    fn test_empty_world() {
        let grid = HeightGrid::generate(&TerrainConfig {
            world_size: 0,
            ..Default::default()
        });
        assert!(grid.heights().is_empty());
        assert_eq!(grid.height_at(0.0, 0.0), OUT_OF_BOUNDS);
        assert_eq!(grid.total_blocks(), 0);
    }
}
