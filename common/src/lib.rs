pub mod palette;
pub mod partition;
pub mod source;

pub use self::palette::{Metric, PALETTE, PaletteCode, Rgb, quantize, quantize_with};
pub use self::partition::{Coordinate, Share, shuffle_2d, traversal};
pub use self::source::{ImageLoadError, SourceImage};
