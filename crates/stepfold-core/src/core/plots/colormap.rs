use plotters::style::RGBColor;

/// Anchor colors of a dark-to-light sequential map (black-purple through red to cream).
const ROCKET: [(f64, (u8, u8, u8)); 6] = [
    (0.0, (3, 5, 26)),
    (0.2, (76, 29, 75)),
    (0.4, (161, 26, 91)),
    (0.6, (228, 57, 59)),
    (0.8, (243, 140, 100)),
    (1.0, (250, 235, 221)),
];

/// Maps `value` within `[min, max]` to a color. Values outside the range are clamped and
/// NaN maps to the low end.
pub fn sequential_color(value: f64, min: f64, max: f64) -> RGBColor {
    let span = max - min;
    let t = if span > 0.0 && !value.is_nan() {
        ((value - min) / span).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let upper = ROCKET
        .iter()
        .position(|&(stop, _)| t <= stop)
        .unwrap_or(ROCKET.len() - 1)
        .max(1);
    let (t0, c0) = ROCKET[upper - 1];
    let (t1, c1) = ROCKET[upper];
    let f = (t - t0) / (t1 - t0);
    RGBColor(lerp(c0.0, c1.0, f), lerp(c0.1, c1.1, f), lerp(c0.2, c1.2, f))
}

fn lerp(a: u8, b: u8, f: f64) -> u8 {
    (f64::from(a) + (f64::from(b) - f64::from(a)) * f).round() as u8
}
