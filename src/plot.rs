//! PNG rendering of the output histogram.

use std::ops::Range;
use std::path::Path;

use plotters::prelude::*;

use crate::error::{Error, Result};
use crate::histogram::Histogram;

const SIZE: (u32, u32) = (800, 600);

/// Vertical axis scale of a rendered histogram.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Scale {
    Linear,
    Log,
}

/// Draw `hist` as filled bars to a PNG at `path`.
///
/// On the log scale, bins with non-positive content are left empty.
pub fn render_histogram(hist: &Histogram, path: &Path, title: &str, scale: Scale) -> Result<()> {
    draw(hist, path, title, scale).map_err(|e| Error::Render(e.to_string()))?;
    tracing::info!(path = %path.display(), ?scale, "histogram rendered");
    Ok(())
}

fn draw(
    hist: &Histogram,
    path: &Path,
    title: &str,
    scale: Scale,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let edges = hist.edges();
    let x_range = edges[0]..edges[edges.len() - 1];
    let y_range = y_range(hist, scale);
    let base = bar_base(&y_range, scale);

    let root = BitMapBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let bars = hist
        .bins()
        .filter(|(_, _, content)| scale == Scale::Linear || *content > 0.0)
        .map(|(lo, hi, content)| {
            Rectangle::new([(lo, base), (hi, content)], BLUE.mix(0.6).filled())
        });

    match scale {
        Scale::Linear => {
            let mut chart = ChartBuilder::on(&root)
                .caption(title, ("sans-serif", 24))
                .margin(10)
                .x_label_area_size(40)
                .y_label_area_size(60)
                .build_cartesian_2d(x_range, y_range)?;
            chart
                .configure_mesh()
                .x_desc(format!("{title} [GeV]"))
                .y_desc("Events")
                .draw()?;
            chart.draw_series(bars)?;
        }
        Scale::Log => {
            let mut chart = ChartBuilder::on(&root)
                .caption(title, ("sans-serif", 24))
                .margin(10)
                .x_label_area_size(40)
                .y_label_area_size(60)
                .build_cartesian_2d(x_range, y_range.log_scale())?;
            chart
                .configure_mesh()
                .x_desc(format!("{title} [GeV]"))
                .y_desc("Events")
                .draw()?;
            chart.draw_series(bars)?;
        }
    }
    root.present()?;
    Ok(())
}

/// Bars grow from zero; on the log axis, from the bottom of the plot.
fn bar_base(y_range: &Range<f64>, scale: Scale) -> f64 {
    match scale {
        Scale::Linear => 0.0,
        Scale::Log => y_range.start,
    }
}

fn y_range(hist: &Histogram, scale: Scale) -> Range<f64> {
    let contents = hist.bin_contents();
    let max = contents.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    match scale {
        Scale::Linear => {
            let min = contents.iter().copied().fold(0.0, f64::min);
            let top = if max > 0.0 { max * 1.1 } else { 1.0 };
            min..top
        }
        Scale::Log => {
            let min_positive = contents
                .iter()
                .copied()
                .filter(|c| *c > 0.0)
                .fold(f64::INFINITY, f64::min);
            if min_positive.is_finite() {
                (min_positive * 0.5)..(max * 2.0)
            } else {
                0.1..1.0
            }
        }
    }
}
