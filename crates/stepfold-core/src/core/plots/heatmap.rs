use super::PlotError;
use super::colormap::sequential_color;
use nalgebra::DMatrix;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::Path;
use tracing::debug;

/// Upper end of the fixed color scale in Ångström; larger errors share the brightest color.
pub const PAE_COLOR_MAX: f64 = 20.0;

const SIZE: (u32, u32) = (800, 600);
const CHART_WIDTH: u32 = 690;
const COLOR_BAR_STEPS: usize = 100;

/// Draws a predicted-aligned-error matrix as a heatmap with a color bar.
///
/// Row 0 is drawn at the top. Matrices wider than `max_cells` are averaged over square
/// blocks first; axes keep residue units either way.
pub fn render_pae_heatmap(
    path: &Path,
    matrix: &DMatrix<f64>,
    title: &str,
    max_cells: usize,
) -> Result<(), PlotError> {
    let n = matrix.nrows();
    if n == 0 || matrix.ncols() != n {
        return Err(PlotError::EmptyData("error matrix must be square and non-empty"));
    }
    let (grid, block) = aggregate(matrix, max_cells);
    if block > 1 {
        debug!(
            residues = n,
            block,
            "Averaging error matrix over {}x{} blocks.",
            block,
            block
        );
    }

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let (main, bar) = root.split_horizontally(CHART_WIDTH);

    let extent = n as f64;
    let mut chart = ChartBuilder::on(&main)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0f64..extent, 0f64..extent)?;

    let residue_label = |v: &f64| format!("{:.0}", v);
    let flipped_label = |v: &f64| format!("{:.0}", extent - v);
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("Residue")
        .y_desc("Residue")
        .x_label_formatter(&residue_label)
        .y_label_formatter(&flipped_label)
        .draw()?;

    let cells = (0..grid.nrows()).flat_map(|r| (0..grid.ncols()).map(move |c| (r, c)));
    chart.draw_series(cells.map(|(r, c)| {
        let (x0, x1) = block_span(c, block, n);
        let (top, bottom) = block_span(r, block, n);
        let color = sequential_color(grid[(r, c)], 0.0, PAE_COLOR_MAX);
        Rectangle::new(
            [(x0, extent - bottom), (x1, extent - top)],
            color.filled(),
        )
    }))?;

    draw_color_bar(&bar)?;
    root.present()?;
    Ok(())
}

fn draw_color_bar(area: &DrawingArea<SVGBackend<'_>, Shift>) -> Result<(), PlotError> {
    let mut scale = ChartBuilder::on(area)
        .margin_top(40)
        .margin_bottom(50)
        .margin_right(10)
        .right_y_label_area_size(60)
        .build_cartesian_2d(0f64..1f64, 0f64..PAE_COLOR_MAX)?;

    scale
        .configure_mesh()
        .disable_mesh()
        .disable_x_axis()
        .x_labels(0)
        .y_labels(5)
        .y_desc("Expected position error (Å)")
        .draw()?;

    let step = PAE_COLOR_MAX / COLOR_BAR_STEPS as f64;
    scale.draw_series((0..COLOR_BAR_STEPS).map(|k| {
        let low = k as f64 * step;
        let color = sequential_color(low + step / 2.0, 0.0, PAE_COLOR_MAX);
        Rectangle::new([(0.0, low), (1.0, low + step)], color.filled())
    }))?;
    Ok(())
}

/// Residue range `[start, end)` covered by block `index`, as plot coordinates.
fn block_span(index: usize, block: usize, n: usize) -> (f64, f64) {
    let start = index * block;
    let end = ((index + 1) * block).min(n);
    (start as f64, end as f64)
}

/// Averages `matrix` over `block x block` tiles so that no side exceeds `max_cells`.
///
/// Returns the reduced matrix and the block size. Edge tiles may be smaller and are
/// averaged over the cells they actually cover.
pub fn aggregate(matrix: &DMatrix<f64>, max_cells: usize) -> (DMatrix<f64>, usize) {
    let n = matrix.nrows().max(matrix.ncols());
    let block = n.div_ceil(max_cells.max(1)).max(1);
    if block == 1 {
        return (matrix.clone(), 1);
    }
    let rows = matrix.nrows().div_ceil(block);
    let cols = matrix.ncols().div_ceil(block);
    let grid = DMatrix::from_fn(rows, cols, |r, c| {
        let row_end = ((r + 1) * block).min(matrix.nrows());
        let col_end = ((c + 1) * block).min(matrix.ncols());
        let tile = matrix.view((r * block, c * block), (row_end - r * block, col_end - c * block));
        tile.sum() / tile.len() as f64
    });
    (grid, block)
}
