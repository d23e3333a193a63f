//! The fixed 16 color canvas palette and nearest-color quantization.

use std::{fmt, str::FromStr};

/// Index into [`PALETTE`]; this is the value the canvas speaks.
pub type PaletteCode = u8;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

// the position in this table *is* the palette code
pub const PALETTE: [Rgb; 16] = [
    Rgb(255, 255, 255),
    Rgb(228, 228, 228),
    Rgb(136, 136, 136),
    Rgb(34, 34, 34),
    Rgb(255, 167, 209),
    Rgb(229, 0, 0),
    Rgb(229, 149, 0),
    Rgb(160, 106, 66),
    Rgb(229, 217, 0),
    Rgb(148, 224, 68),
    Rgb(2, 190, 1),
    Rgb(0, 211, 211),
    Rgb(0, 131, 199),
    Rgb(0, 0, 234),
    Rgb(207, 110, 228),
    Rgb(130, 0, 128),
];

/// Distance metric used to pick the nearest palette entry.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Metric {
    /// Plain Euclidean distance over the three channels.
    #[default]
    Euclidean,

    /// Euclidean distance with every channel scaled by its luma weight
    /// (299 / 587 / 114), so green differences count the most.
    Weighted,
}

impl Metric {
    /// Squared distance. Comparing squares picks the same entry as comparing
    /// the real distances and keeps everything in integers.
    #[inline]
    pub fn distance(self, a: Rgb, b: Rgb) -> u64 {
        let dr = (i64::from(a.0) - i64::from(b.0)).unsigned_abs();
        let dg = (i64::from(a.1) - i64::from(b.1)).unsigned_abs();
        let db = (i64::from(a.2) - i64::from(b.2)).unsigned_abs();

        match self {
            Self::Euclidean => dr * dr + dg * dg + db * db,
            Self::Weighted => 299 * dr * dr + 587 * dg * dg + 114 * db * db,
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" | "rgb" => Ok(Self::Euclidean),
            "weighted" | "luma" => Ok(Self::Weighted),
            other => Err(format!("unknown metric `{other}`, expected `euclidean` or `weighted`")),
        }
    }
}

/// Nearest palette code by Euclidean distance.
#[inline]
pub fn quantize(color: Rgb) -> PaletteCode {
    quantize_with(Metric::Euclidean, color)
}

/// Nearest palette code under `metric`. Ties go to the lower code.
pub fn quantize_with(metric: Metric, color: Rgb) -> PaletteCode {
    let mut best = (0, u64::MAX);
    for (code, entry) in PALETTE.iter().enumerate() {
        let distance = metric.distance(*entry, color);
        if distance < best.1 {
            best = (code, distance);
        }
    }

    best.0 as PaletteCode
}
