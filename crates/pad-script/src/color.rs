//! CIE76 color difference

/// An 8-bit RGB triple
pub type Rgb = [u8; 3];

fn linearize(c: f64) -> f64 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// sRGB to CIE XYZ (D65)
fn rgb_to_xyz(rgb: Rgb) -> [f64; 3] {
    let [r, g, b] = rgb.map(|c| linearize(f64::from(c) / 255.0));
    [
        r * 0.4124564 + g * 0.3575761 + b * 0.1804375,
        r * 0.2126729 + g * 0.7151522 + b * 0.0721750,
        r * 0.0193339 + g * 0.1191920 + b * 0.9503041,
    ]
}

fn lab_f(t: f64) -> f64 {
    const DELTA: f64 = 6.0 / 29.0;
    if t > DELTA.powi(3) {
        t.cbrt()
    } else {
        t / (3.0 * DELTA * DELTA) + 4.0 / 29.0
    }
}

/// sRGB to CIE L*a*b* (D65 white point)
pub fn rgb_to_lab(rgb: Rgb) -> [f64; 3] {
    const WHITE: [f64; 3] = [0.95047, 1.0, 1.08883];
    let [x, y, z] = rgb_to_xyz(rgb);
    let fx = lab_f(x / WHITE[0]);
    let fy = lab_f(y / WHITE[1]);
    let fz = lab_f(z / WHITE[2]);
    [116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

/// Euclidean distance in L*a*b*
pub fn delta_e_cie76(a: Rgb, b: Rgb) -> f64 {
    let [l1, a1, b1] = rgb_to_lab(a);
    let [l2, a2, b2] = rgb_to_lab(b);
    ((l1 - l2).powi(2) + (a1 - a2).powi(2) + (b1 - b2).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_colors() {
        assert_eq!(delta_e_cie76([12, 200, 99], [12, 200, 99]), 0.0);
    }

    #[test]
    fn test_white_and_black_lightness() {
        let [l, a, b] = rgb_to_lab([255, 255, 255]);
        assert!((l - 100.0).abs() < 0.01, "{l}");
        assert!(a.abs() < 0.01 && b.abs() < 0.01);

        let [l, _, _] = rgb_to_lab([0, 0, 0]);
        assert!(l.abs() < 0.01, "{l}");
    }

    #[test]
    fn test_black_white_distance() {
        let d = delta_e_cie76([0, 0, 0], [255, 255, 255]);
        assert!((d - 100.0).abs() < 0.01, "{d}");
    }

    #[test]
    fn test_near_colors_are_close() {
        assert!(delta_e_cie76([200, 30, 30], [202, 31, 29]) < 2.0);
        assert!(delta_e_cie76([200, 30, 30], [30, 30, 200]) > 50.0);
    }
}
