//! Display colours for joining players.
//!
//! Hue is drawn uniformly while saturation and lightness stay in a band
//! that reads well on the world's fog, so two players never both end up
//! with near-black or washed-out grey.

use rand::Rng;

/// Fixed colour for admin sessions
pub const ADMIN_COLOR: &str = "#FF0000";

const SATURATION: (f32, f32) = (0.55, 0.9);
const LIGHTNESS: (f32, f32) = (0.45, 0.65);

/// Random player colour as `#rrggbb`
pub fn random_color() -> String {
    let mut rng = rand::thread_rng();
    let hue = rng.gen_range(0.0..360.0);
    let saturation = rng.gen_range(SATURATION.0..SATURATION.1);
    let lightness = rng.gen_range(LIGHTNESS.0..LIGHTNESS.1);
    hsl_to_hex(hue, saturation, lightness)
}

/// Convert HSL (hue in degrees, s/l in [0, 1]) to `#rrggbb`
pub fn hsl_to_hex(hue: f32, saturation: f32, lightness: f32) -> String {
    let (r, g, b) = hsl_to_rgb(hue, saturation, lightness);
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

fn hsl_to_rgb(hue: f32, saturation: f32, lightness: f32) -> (u8, u8, u8) {
    let h = hue.rem_euclid(360.0) / 60.0;
    let s = saturation.clamp(0.0, 1.0);
    let l = lightness.clamp(0.0, 1.0);

    let chroma = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let x = chroma * (1.0 - (h % 2.0 - 1.0).abs());
    let m = l - chroma / 2.0;

    let (r, g, b) = match h as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };

    let to_byte = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    (to_byte(r), to_byte(g), to_byte(b))
}
