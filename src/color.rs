/* Color model: RGB as configured by the user, HSV as spoken by the firmware.
 *
 * QMK/Vial scale every HSV channel to 0..=255 (hue is not degrees), so both
 * directions work on normalized floats and quantize back to a byte. A round
 * trip is lossy by a few units per channel. */

/* Additive color as written in the configuration. */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/* Device-native color, every channel 0..=255. */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HsvColor {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

impl HsvColor {
    /* All channels zero: the LED is dark. */
    pub const OFF: Self = Self { h: 0, s: 0, v: 0 };

    pub const fn new(h: u8, s: u8, v: u8) -> Self {
        Self { h, s, v }
    }

    pub fn to_rgb(self) -> RgbColor {
        hsv_to_rgb(self.h, self.s, self.v)
    }
}

impl RgbColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_hsv(self) -> HsvColor {
        rgb_to_hsv(self.r, self.g, self.b)
    }
}

impl std::fmt::Display for RgbColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/* Scale a 0.0..=1.0 fraction to a byte, rounding to nearest. */
fn quantize(x: f64) -> u8 {
    (x * 255.0).round().clamp(0.0, 255.0) as u8
}

/* Convert RGB to 8-bit HSV. Black has S = 0, any gray has H = 0. */
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> HsvColor {
    let rf = f64::from(r) / 255.0;
    let gf = f64::from(g) / 255.0;
    let bf = f64::from(b) / 255.0;

    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let s = if max == 0.0 { 0.0 } else { delta / max };

    let h = if delta == 0.0 {
        0.0
    } else {
        let sector = if max == rf {
            let h = (gf - bf) / delta;
            if gf < bf { h + 6.0 } else { h }
        } else if max == gf {
            2.0 + (bf - rf) / delta
        } else {
            4.0 + (rf - gf) / delta
        };
        sector / 6.0
    };

    HsvColor {
        h: quantize(h),
        s: quantize(s),
        v: quantize(max),
    }
}

/* Convert 8-bit HSV to RGB using the six-sector algorithm. */
pub fn hsv_to_rgb(h: u8, s: u8, v: u8) -> RgbColor {
    if s == 0 {
        return RgbColor { r: v, g: v, b: v };
    }

    let hf = f64::from(h) / 255.0 * 6.0;
    let sf = f64::from(s) / 255.0;
    let vf = f64::from(v) / 255.0;

    let sector = hf.floor();
    let f = hf - sector;

    let p = vf * (1.0 - sf);
    let q = vf * (1.0 - sf * f);
    let t = vf * (1.0 - sf * (1.0 - f));

    let (r, g, b) = match sector as u8 % 6 {
        0 => (vf, t, p),
        1 => (q, vf, p),
        2 => (p, vf, t),
        3 => (p, q, vf),
        4 => (t, p, vf),
        _ => (vf, p, q),
    };

    RgbColor {
        r: quantize(r),
        g: quantize(g),
        b: quantize(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: u8, b: u8, tolerance: u8) -> bool {
        a.abs_diff(b) <= tolerance
    }

    #[test]
    fn test_rgb_to_hsv_primaries() {
        let cases = [
            ((255, 0, 0), HsvColor::new(0, 255, 255)),
            ((0, 255, 0), HsvColor::new(85, 255, 255)),
            ((0, 0, 255), HsvColor::new(170, 255, 255)),
        ];
        for ((r, g, b), want) in cases {
            let got = rgb_to_hsv(r, g, b);
            assert!(
                close(got.h, want.h, 1) && got.s == want.s && got.v == want.v,
                "rgb({r},{g},{b}) -> {got:?}, want ~{want:?}"
            );
        }
    }

    #[test]
    fn test_rgb_to_hsv_achromatic() {
        assert_eq!(rgb_to_hsv(255, 255, 255), HsvColor::new(0, 0, 255));
        assert_eq!(rgb_to_hsv(0, 0, 0), HsvColor::OFF);
        assert_eq!(rgb_to_hsv(128, 128, 128), HsvColor::new(0, 0, 128));
    }

    #[test]
    fn test_hsv_to_rgb_gray_when_unsaturated() {
        for v in [0u8, 1, 77, 200, 255] {
            assert_eq!(hsv_to_rgb(123, 0, v), RgbColor::new(v, v, v));
        }
    }

    #[test]
    fn test_hsv_to_rgb_primaries() {
        assert_eq!(hsv_to_rgb(0, 255, 255), RgbColor::new(255, 0, 0));
        assert_eq!(hsv_to_rgb(85, 255, 255), RgbColor::new(0, 255, 0));
        assert_eq!(hsv_to_rgb(170, 255, 255), RgbColor::new(0, 0, 255));
    }

    #[test]
    fn test_roundtrip_within_tolerance() {
        /* Steps of 3 hit both 0 and 255 on every channel */
        for r in (0..=255u8).step_by(3) {
            for g in (0..=255u8).step_by(3) {
                for b in (0..=255u8).step_by(3) {
                    let back = rgb_to_hsv(r, g, b).to_rgb();
                    assert!(
                        close(back.r, r, 5) && close(back.g, g, 5) && close(back.b, b, 5),
                        "rgb({r},{g},{b}) came back as {back:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_full_turn_hue_is_red() {
        assert_eq!(hsv_to_rgb(255, 255, 255), hsv_to_rgb(0, 255, 255));
    }
}
