use image::Rgba;

/// (lowest count, highest count, radius in px), both bounds inclusive.
const RADIUS_BUCKETS: [(i64, i64, u32); 14] = [
    (1, 5, 4),
    (6, 15, 10),
    (16, 30, 15),
    (31, 50, 18),
    (51, 70, 22),
    (71, 100, 25),
    (101, 150, 30),
    (151, 200, 35),
    (201, 250, 40),
    (251, 300, 45),
    (301, 400, 50),
    (401, 500, 55),
    (501, 600, 60),
    (601, 700, 65),
];

pub const MAX_RADIUS: u32 = 70;

/// Marker radius in pixels for a region's case count.
///
/// Counts above 700 get the largest marker. So do counts of zero or below:
/// they miss every bucket and land in the catch-all, which is how the
/// dashboard has always drawn them.
pub fn marker_radius(case_count: i64) -> u32 {
    RADIUS_BUCKETS
        .iter()
        .find(|(low, high, _)| (*low..=*high).contains(&case_count))
        .map(|&(_, _, radius)| radius)
        .unwrap_or(MAX_RADIUS)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerStyle {
    pub radius: u32,
    pub fill: Rgba<u8>,
    pub stroke: Rgba<u8>,
    pub stroke_width: u32,
}

impl MarkerStyle {
    pub fn for_cases(case_count: i64) -> Self {
        Self {
            radius: marker_radius(case_count),
            // rgba(220,53,69,.75)
            fill: Rgba([220, 53, 69, 191]),
            stroke: hex_to_rgba("#dc3545"),
            stroke_width: 2,
        }
    }

    /// Outer edge of the drawn circle, stroke included.
    pub fn outer_radius(&self) -> f64 {
        self.radius as f64 + self.stroke_width as f64 / 2.0
    }
}

pub fn hex_to_rgba(hex: &str) -> Rgba<u8> {
    let hex = hex.trim_start_matches('#');
    let channel = |range: std::ops::Range<usize>| {
        hex.get(range)
            .and_then(|h| u8::from_str_radix(h, 16).ok())
            .unwrap_or(0)
    };
    Rgba([channel(0..2), channel(2..4), channel(4..6), 255])
}
