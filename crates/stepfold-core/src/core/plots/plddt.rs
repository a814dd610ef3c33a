use super::PlotError;
use plotters::prelude::*;
use std::path::Path;

const SIZE: (u32, u32) = (1200, 400);
const PLDDT_MAX: f64 = 100.0;
const BAR_HALF_WIDTH: f64 = 0.4;
const BAR_COLOR: RGBColor = RGBColor(31, 119, 180);

/// Draws one bar per residue showing its pLDDT.
pub fn render_plddt_chart(path: &Path, plddt: &[f64], title: &str) -> Result<(), PlotError> {
    if plddt.is_empty() {
        return Err(PlotError::EmptyData("model has no residues"));
    }

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE)?;

    let y_max = plddt
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(PLDDT_MAX, f64::max);
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-1f64..plddt.len() as f64, 0f64..y_max)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc("Residue")
        .y_desc("pLDDT")
        .draw()?;

    chart.draw_series(plddt.iter().enumerate().map(|(i, &value)| {
        let x = i as f64;
        let height = if value.is_finite() { value.max(0.0) } else { 0.0 };
        Rectangle::new(
            [(x - BAR_HALF_WIDTH, 0.0), (x + BAR_HALF_WIDTH, height)],
            BAR_COLOR.filled(),
        )
    }))?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn renders_one_bar_per_residue() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model_3_plddt.svg");
        render_plddt_chart(&path, &[90.0, 75.5, 40.0], "model_3 rank=1").unwrap();

        let svg = fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("model_3 rank=1"));
        assert!(svg.contains("pLDDT"));
    }

    #[test]
    fn non_finite_values_do_not_break_rendering() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nan.svg");
        render_plddt_chart(&path, &[f64::NAN, 50.0, f64::INFINITY], "nan").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn empty_model_is_rejected() {
        let dir = tempdir().unwrap();
        let err = render_plddt_chart(&dir.path().join("e.svg"), &[], "e").unwrap_err();
        assert!(matches!(err, PlotError::EmptyData(_)));
    }
}
