#[macro_use]
extern crate tracing;

use image::{Rgba, RgbaImage};
use itertools::Itertools;
use placer_common::{Coordinate, Metric, PALETTE, PaletteCode, Rgb, SourceImage, quantize_with};
use std::path::PathBuf;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(argh::FromArgs)]
/// render an image the way the placer will paint it
struct Args {
    #[argh(positional)]
    /// path to the target image
    path: PathBuf,

    #[argh(option)]
    /// path to output png
    output: PathBuf,

    #[argh(option, default = "Metric::Euclidean")]
    /// color distance used for quantization: euclidean or weighted
    metric: Metric,
}

/// Palette code of every opaque pixel, row by row.
fn quantized_codes(source: &SourceImage, metric: Metric) -> Vec<(Coordinate, PaletteCode)> {
    (0..source.height())
        .cartesian_product(0..source.width())
        .map(|(y, x)| Coordinate::new(x, y))
        .filter_map(|at| source.opaque(at).map(|color| (at, quantize_with(metric, color))))
        .collect()
}

fn render(source: &SourceImage, codes: &[(Coordinate, PaletteCode)]) -> RgbaImage {
    let mut out = RgbaImage::new(source.width(), source.height());
    for (at, code) in codes {
        let Rgb(r, g, b) = PALETTE[*code as usize];
        out.put_pixel(at.x, at.y, Rgba([r, g, b, 255]));
    }
    out
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args: Args = argh::from_env();

    let source = SourceImage::open(&args.path)?;
    let codes = quantized_codes(&source, args.metric);

    for (code, count) in codes.iter().map(|(_, code)| *code).counts().into_iter().sorted() {
        info!(code, color = %PALETTE[code as usize], count, "palette usage");
    }

    render(&source, &codes).save(&args.output)?;
    info!(
        opaque = codes.len(),
        output = %args.output.display(),
        "wrote preview"
    );

    Ok(())
}
