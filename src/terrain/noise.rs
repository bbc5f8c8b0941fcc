//! Seeded 2D gradient noise and fractal Brownian motion.
//!
//! The browser client carries an identical implementation, so every
//! arithmetic step here is done in `f64` and mirrors the client's order of
//! operations. Changing any constant desyncs client physics from the server.

/// Seed used when the caller passes 0 (the client treats 0 as "unset")
pub const DEFAULT_SEED: u32 = 12345;

const LCG_MULTIPLIER: f64 = 1_103_515_245.0;
const LCG_INCREMENT: f64 = 12_345.0;
const LCG_MASK: u32 = 0x7fff_ffff;
const TWO_POW_32: f64 = 4_294_967_296.0;

/// Linear congruential generator driving the permutation shuffle.
///
/// The multiply runs in double precision and is then reduced modulo 2^32,
/// exactly like a JavaScript `(s * a + c) & mask` expression. The product
/// exceeds 2^53, so an integer implementation would produce a different
/// table.
#[derive(Debug, Clone)]
struct ShuffleRng {
    state: u32,
}

impl ShuffleRng {
    fn new(seed: u32) -> Self {
        let state = if seed == 0 { DEFAULT_SEED } else { seed };
        Self { state }
    }

    /// Next value in [0, 1]
    fn next_unit(&mut self) -> f64 {
        let product = self.state as f64 * LCG_MULTIPLIER + LCG_INCREMENT;
        let wrapped = product.rem_euclid(TWO_POW_32) as u32;
        self.state = wrapped & LCG_MASK;
        self.state as f64 / LCG_MASK as f64
    }
}

/// Permutation table of 256 entries, duplicated to 512 so corner hashing
/// never needs to wrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermutationTable {
    p: [u8; 512],
}

impl PermutationTable {
    /// Build the table with a seeded Fisher-Yates shuffle
    pub fn new(seed: u32) -> Self {
        let mut perm = [0u8; 256];
        for (i, slot) in perm.iter_mut().enumerate() {
            *slot = i as u8;
        }

        let mut rng = ShuffleRng::new(seed);
        for i in (1..256usize).rev() {
            let j = (rng.next_unit() * (i + 1) as f64).floor() as usize;
            // next_unit() can return exactly 1.0
            let j = j.min(i);
            perm.swap(i, j);
        }

        let mut p = [0u8; 512];
        for (i, slot) in p.iter_mut().enumerate() {
            *slot = perm[i & 255];
        }

        Self { p }
    }

    #[inline]
    fn at(&self, index: usize) -> usize {
        self.p[index] as usize
    }
}

/// Quintic fade curve `6t^5 - 15t^4 + 10t^3`
#[inline]
pub fn fade(t: f64) -> f64 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

#[inline]
fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + t * (b - a)
}

/// Dot product of the offset with one of four hashed diagonal gradients
#[inline]
fn grad(hash: usize, x: f64, y: f64) -> f64 {
    let h = hash & 3;
    let (u, v) = if h < 2 { (x, y) } else { (y, x) };
    let u = if h & 1 == 0 { u } else { -u };
    let v = if h & 2 == 0 { v } else { -v };
    u + v
}

/// Gradient noise generator bound to one permutation table
#[derive(Debug, Clone)]
pub struct GradientNoise {
    table: PermutationTable,
}

impl GradientNoise {
    pub fn new(seed: u32) -> Self {
        Self {
            table: PermutationTable::new(seed),
        }
    }

    pub fn table(&self) -> &PermutationTable {
        &self.table
    }

    /// Single-octave noise value at (x, y), roughly in [-1, 1]
    pub fn sample(&self, x: f64, y: f64) -> f64 {
        let fx = x.floor();
        let fy = y.floor();
        let cx = (fx as i64 & 255) as usize;
        let cy = (fy as i64 & 255) as usize;

        let x = x - fx;
        let y = y - fy;

        let u = fade(x);
        let v = fade(y);

        let a = self.table.at(cx) + cy;
        let b = self.table.at(cx + 1) + cy;

        lerp(
            lerp(
                grad(self.table.at(a), x, y),
                grad(self.table.at(b), x - 1.0, y),
                u,
            ),
            lerp(
                grad(self.table.at(a + 1), x, y - 1.0),
                grad(self.table.at(b + 1), x - 1.0, y - 1.0),
                u,
            ),
            v,
        )
    }

    /// Fractal sum of `octaves` layers, normalized by the total amplitude.
    ///
    /// Each layer doubles frequency and scales amplitude by `persistence`.
    /// Returns 0 when `octaves` is 0.
    pub fn fbm(&self, x: f64, y: f64, octaves: u32, persistence: f64) -> f64 {
        let mut total = 0.0;
        let mut frequency = 1.0;
        let mut amplitude = 1.0;
        let mut max_value = 0.0;

        for _ in 0..octaves {
            total += self.sample(x * frequency, y * frequency) * amplitude;
            max_value += amplitude;
            amplitude *= persistence;
            frequency *= 2.0;
        }

        if max_value == 0.0 {
            return 0.0;
        }
        total / max_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fade_endpoints() {
        assert_eq!(fade(0.0), 0.0);
        assert_eq!(fade(1.0), 1.0);
        assert!((fade(0.5) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_table_is_permutation() {
        let table = PermutationTable::new(12345);
        let mut seen = [false; 256];
        for i in 0..256 {
            seen[table.at(i)] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_table_duplicated() {
        let table = PermutationTable::new(777);
        for i in 0..256 {
            assert_eq!(table.at(i), table.at(i + 256));
        }
    }

    #[test]
    fn test_same_seed_same_table() {
        assert_eq!(PermutationTable::new(42), PermutationTable::new(42));
        assert_ne!(PermutationTable::new(42), PermutationTable::new(43));
    }

    #[test]
    fn test_zero_seed_uses_default() {
        assert_eq!(PermutationTable::new(0), PermutationTable::new(DEFAULT_SEED));
    }

    #[test]
    fn test_lcg_matches_double_precision_reference() {
        // First outputs of the client's generator for seed 12345
        let mut rng = ShuffleRng::new(12345);
        rng.next_unit();
        let expected = ((12345.0f64 * 1103515245.0 + 12345.0).rem_euclid(4294967296.0) as u32)
            & 0x7fff_ffff;
        assert_eq!(rng.state, expected);
    }

    #[test]
    fn test_noise_zero_at_lattice_points() {
        let noise = GradientNoise::new(12345);
        for x in 0..10 {
            for y in 0..10 {
                assert_eq!(noise.sample(x as f64, y as f64), 0.0);
            }
        }
    }

    #[test]
    fn test_noise_bounded() {
        let noise = GradientNoise::new(99);
        for i in 0..500 {
            let x = i as f64 * 0.173;
            let y = i as f64 * 0.291;
            let v = noise.sample(x, y);
            assert!(v.is_finite());
            assert!((-2.0..=2.0).contains(&v), "sample out of range: {}", v);
        }
    }

    #[test]
    fn test_noise_handles_negative_coordinates() {
        let noise = GradientNoise::new(5);
        assert!(noise.sample(-3.7, -12.2).is_finite());
    }

    #[test]
    fn test_fbm_normalized() {
        let noise = GradientNoise::new(12345);
        for i in 0..200 {
            let v = noise.fbm(i as f64 * 0.08, i as f64 * 0.05, 3, 0.5);
            assert!(v.abs() <= 1.0 + 1e-9, "fbm out of range: {}", v);
        }
    }

    #[test]
    fn test_fbm_zero_octaves() {
        let noise = GradientNoise::new(12345);
        assert_eq!(noise.fbm(1.3, 2.7, 0, 0.5), 0.0);
    }
}
