//! Randomized traversal order over the source image.

use rand::{Rng, seq::SliceRandom};

/// Pixel position relative to the source image's top-left corner.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Coordinate {
    pub x: u32,
    pub y: u32,
}

impl Coordinate {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Which part of the image a worker walks.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Share {
    /// Every worker walks the whole image in its own order.
    #[default]
    Full,

    /// Worker `slot` of `of` walks the rows with `y % of == slot`.
    Rows { slot: usize, of: usize },
}

impl Share {
    #[inline]
    fn owns_row(self, y: u32) -> bool {
        match self {
            Self::Full => true,
            Self::Rows { slot, of } => of == 0 || y as usize % of == slot,
        }
    }
}

/// Shuffle every element of a 2-D grid across the whole grid, keeping the
/// length of each row.
pub fn shuffle_2d<T, R>(rows: Vec<Vec<T>>, rng: &mut R) -> Vec<Vec<T>>
where
    R: Rng + ?Sized,
{
    let lengths: Vec<usize> = rows.iter().map(Vec::len).collect();
    let mut flat: Vec<T> = rows.into_iter().flatten().collect();
    flat.shuffle(rng);

    let mut flat = flat.into_iter();
    lengths
        .into_iter()
        .map(|len| flat.by_ref().take(len).collect())
        .collect()
}

/// Every coordinate of a `width` x `height` image that `share` covers, in a
/// fresh uniformly random order.
pub fn traversal<R>(width: u32, height: u32, share: Share, rng: &mut R) -> Vec<Coordinate>
where
    R: Rng + ?Sized,
{
    let grid: Vec<Vec<Coordinate>> = (0..height)
        .filter(|y| share.owns_row(*y))
        .map(|y| (0..width).map(|x| Coordinate::new(x, y)).collect())
        .collect();

    shuffle_2d(grid, rng).into_iter().flatten().collect()
}
