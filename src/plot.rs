//! PNG charts of the death-age series using the [`plotters`] bitmap backend.
//!
//! Four charts are produced: death-age quartiles and mean with and without
//! infant mortality, total deaths, the infant share of deaths, and a heatmap
//! of how adult deaths spread over ages.

use plotters::coord::types::RangedCoordf64;
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::stats::series::for_population;
use crate::stats::CohortStats;
use crate::table::Population;

/// Errors that can occur during plot generation
#[derive(Error, Debug)]
pub enum PlotError {
    #[error("Failed to create drawing area: {0}")]
    DrawingArea(String),

    #[error("Failed to configure chart: {0}")]
    ChartConfig(String),

    #[error("Failed to draw chart elements: {0}")]
    Drawing(String),

    #[error("Failed to save plot to file: {0}")]
    FileSave(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

type Result<T> = core::result::Result<T, PlotError>;

type Chart<'a, 'b> =
    ChartContext<'a, BitMapBackend<'b>, Cartesian2d<RangedCoordf64, RangedCoordf64>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotSettings {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    /// Population shown in the adult-distribution heatmap.
    pub heatmap_population: Population,
    pub title: String,
}

impl Default for PlotSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 1200,
            height: 800,
            heatmap_population: Population::Male,
            title: "Evolution of death age".into(),
        }
    }
}

// matplotlib "tab" palette
const TAB_BLUE: RGBColor = RGBColor(31, 119, 180);
const TAB_ORANGE: RGBColor = RGBColor(255, 127, 14);
const TAB_GREEN: RGBColor = RGBColor(44, 160, 44);
const TAB_RED: RGBColor = RGBColor(214, 39, 40);
const TAB_PURPLE: RGBColor = RGBColor(148, 103, 189);

/// Opacity of the all-ages curves, drawn behind the adult ones.
const WITH_INFANT_ALPHA: f64 = 0.6;

fn population_color(population: Population) -> RGBColor {
    match population {
        Population::Female => TAB_RED,
        Population::Male => TAB_BLUE,
        Population::Both => BLACK,
    }
}

/// Splits a series with gaps into contiguous runs of defined points.
pub fn segments<I>(points: I) -> Vec<Vec<(f64, f64)>>
where
    I: IntoIterator<Item = (f64, Option<f64>)>,
{
    let mut out = Vec::new();
    let mut current = Vec::new();
    for (x, y) in points {
        match y {
            Some(y) if y.is_finite() => current.push((x, y)),
            _ => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn year_range(series: &[CohortStats]) -> Result<(f64, f64)> {
    let first = series.iter().map(|s| s.year).min();
    let last = series.iter().map(|s| s.year).max();
    match (first, last) {
        (Some(a), Some(b)) if a == b => Ok((a as f64 - 0.5, b as f64 + 0.5)),
        (Some(a), Some(b)) => Ok((a as f64, b as f64)),
        _ => Err(PlotError::InvalidData("series cannot be empty".to_string())),
    }
}

fn populations_in(series: &[CohortStats]) -> Vec<Population> {
    let mut pops = Vec::new();
    for s in series {
        if !pops.contains(&s.population) {
            pops.push(s.population);
        }
    }
    pops
}

fn new_chart<'a, 'b: 'a>(
    area: &'a DrawingArea<BitMapBackend<'b>, plotters::coord::Shift>,
    title: &str,
    x: (f64, f64),
    y: (f64, f64),
    y_desc: &str,
) -> Result<Chart<'a, 'b>> {
    area.fill(&WHITE)
        .map_err(|e| PlotError::DrawingArea(e.to_string()))?;

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 36))
        .margin(20)
        .x_label_area_size(60)
        .y_label_area_size(80)
        .build_cartesian_2d(x.0..x.1, y.0..y.1)
        .map_err(|e| PlotError::ChartConfig(e.to_string()))?;

    chart
        .configure_mesh()
        .x_desc("year")
        .y_desc(y_desc)
        .x_label_formatter(&|x| format!("{:.0}", x))
        .label_style(("sans-serif", 22))
        .draw()
        .map_err(|e| PlotError::Drawing(e.to_string()))?;

    Ok(chart)
}

fn draw_curve<'a, 'b: 'a>(
    chart: &mut Chart<'a, 'b>,
    points: Vec<(f64, f64)>,
    style: ShapeStyle,
    dashed: bool,
) -> Result<()> {
    let drawn = if dashed {
        chart
            .draw_series(DashedLineSeries::new(points, 10, 6, style))
            .map(|_| ())
    } else {
        chart.draw_series(LineSeries::new(points, style)).map(|_| ())
    };
    drawn.map_err(|e| PlotError::Drawing(e.to_string()))
}

/// Adds a legend entry without drawing any data.
fn legend_entry<'a, 'b: 'a>(
    chart: &mut Chart<'a, 'b>,
    label: &str,
    color: RGBColor,
) -> Result<()> {
    chart
        .draw_series(LineSeries::new(Vec::<(f64, f64)>::new(), color.stroke_width(2)))
        .map_err(|e| PlotError::Drawing(e.to_string()))?
        .label(label)
        .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    Ok(())
}

fn draw_legend<'a, 'b: 'a>(chart: &mut Chart<'a, 'b>) -> Result<()> {
    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::LowerRight)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .label_font(("sans-serif", 20))
        .draw()
        .map_err(|e| PlotError::Drawing(e.to_string()))
}

/// Quartiles and mean of the age of death per year. Adult curves are opaque,
/// all-ages curves translucent; females are dashed.
pub fn plot_death_age(series: &[CohortStats], path: &Path, settings: &PlotSettings) -> Result<()> {
    let x = year_range(series)?;
    let root = BitMapBackend::new(path, (settings.width, settings.height)).into_drawing_area();
    let mut chart = new_chart(&root, &settings.title, x, (0.0, 100.0), "age")?;

    let metrics: [(&str, RGBColor, fn(&crate::stats::AgeSummary) -> f64); 4] = [
        ("25%", TAB_BLUE, |s| s.q25),
        ("50%", TAB_ORANGE, |s| s.median),
        ("75%", TAB_GREEN, |s| s.q75),
        ("mean", TAB_PURPLE, |s| s.mean),
    ];

    for population in populations_in(series) {
        let dashed = population == Population::Female;
        for (_, color, metric) in metrics {
            let width = if color == TAB_PURPLE { 3 } else { 2 };
            let adult = segments(
                for_population(series, population)
                    .map(|s| (s.year as f64, s.adult.as_ref().map(metric))),
            );
            for run in adult {
                draw_curve(&mut chart, run, color.stroke_width(width), dashed)?;
            }
            let all_ages = segments(
                for_population(series, population)
                    .map(|s| (s.year as f64, s.all_ages.as_ref().map(metric))),
            );
            for run in all_ages {
                draw_curve(
                    &mut chart,
                    run,
                    color.mix(WITH_INFANT_ALPHA).stroke_width(width),
                    dashed,
                )?;
            }
        }
    }

    for (label, color, _) in metrics {
        legend_entry(&mut chart, label, color)?;
    }
    for population in populations_in(series) {
        legend_entry(&mut chart, population.as_str(), population_color(population))?;
    }
    draw_legend(&mut chart)?;

    root.present()
        .map_err(|e| PlotError::Drawing(e.to_string()))?;
    debug!(path = %path.display(), "wrote death-age chart");
    Ok(())
}

/// Total recorded deaths per year.
pub fn plot_total_deaths(series: &[CohortStats], path: &Path, settings: &PlotSettings) -> Result<()> {
    let x = year_range(series)?;
    let max = series.iter().map(|s| s.total_deaths).fold(0.0, f64::max);
    let y_max = if max > 0.0 { max * 1.05 } else { 1.0 };

    let root = BitMapBackend::new(path, (settings.width, settings.height)).into_drawing_area();
    let mut chart = new_chart(&root, "Total deaths", x, (0.0, y_max), "total deaths")?;

    for population in populations_in(series) {
        let color = population_color(population);
        let points: Vec<(f64, f64)> = for_population(series, population)
            .map(|s| (s.year as f64, s.total_deaths))
            .collect();
        draw_curve(&mut chart, points, color.stroke_width(2), false)?;
        legend_entry(&mut chart, population.as_str(), color)?;
    }
    draw_legend(&mut chart)?;

    root.present()
        .map_err(|e| PlotError::Drawing(e.to_string()))?;
    Ok(())
}

/// Percentage of each year's deaths that fall below the adult threshold.
pub fn plot_infant_share(
    series: &[CohortStats],
    threshold: u32,
    path: &Path,
    settings: &PlotSettings,
) -> Result<()> {
    let x = year_range(series)?;
    let root = BitMapBackend::new(path, (settings.width, settings.height)).into_drawing_area();
    let title = format!("Share of deaths before age {}", threshold);
    let mut chart = new_chart(&root, &title, x, (0.0, 100.0), "%")?;

    for population in populations_in(series) {
        let color = population_color(population);
        let runs = segments(
            for_population(series, population).map(|s| (s.year as f64, s.infant_share())),
        );
        for run in runs {
            draw_curve(&mut chart, run, color.stroke_width(2), false)?;
        }
        legend_entry(&mut chart, population.as_str(), color)?;
    }
    draw_legend(&mut chart)?;

    root.present()
        .map_err(|e| PlotError::Drawing(e.to_string()))?;
    Ok(())
}

/// Blue → white → red scale for a value in `[0, 1]`.
pub fn diverging_color(t: f64) -> RGBColor {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let lerp = |a: u8, b: u8, f: f64| (a as f64 + (b as f64 - a as f64) * f).round() as u8;
    let (cold, mid, hot) = ((59, 76, 192), (221, 221, 221), (180, 4, 38));
    let (from, to, f): ((u8, u8, u8), (u8, u8, u8), f64) = if t < 0.5 {
        (cold, mid, t * 2.0)
    } else {
        (mid, hot, (t - 0.5) * 2.0)
    };
    RGBColor(lerp(from.0, to.0, f), lerp(from.1, to.1, f), lerp(from.2, to.2, f))
}

/// Heatmap of adult death proportions by (year, age), as produced by
/// [`crate::stats::adult_proportions`].
pub fn plot_adult_heatmap(
    cells: &[(i32, u32, f64)],
    population: Population,
    path: &Path,
    settings: &PlotSettings,
) -> Result<()> {
    if cells.is_empty() {
        return Err(PlotError::InvalidData("no adult deaths to draw".to_string()));
    }

    let mut ages: Vec<u32> = cells.iter().map(|(_, a, _)| *a).collect();
    ages.sort_unstable();
    ages.dedup();
    let next_age = |age: u32| -> f64 {
        let i = ages.partition_point(|&a| a <= age);
        ages.get(i).map(|&a| a as f64).unwrap_or(age as f64 + 1.0)
    };

    let year_min = cells.iter().map(|(y, _, _)| *y).min().unwrap_or(0) as f64;
    let year_max = cells.iter().map(|(y, _, _)| *y).max().unwrap_or(0) as f64 + 1.0;
    let age_min = ages[0] as f64;
    let age_max = next_age(ages[ages.len() - 1]);
    let p_max = cells.iter().map(|(_, _, p)| *p).fold(0.0, f64::max);

    let root = BitMapBackend::new(path, (settings.width, settings.height)).into_drawing_area();
    let title = format!("Relative adult mortality ({})", population);
    let mut chart = new_chart(&root, &title, (year_min, year_max), (age_min, age_max), "age")?;

    chart
        .draw_series(cells.iter().map(|&(year, age, p)| {
            let t = if p_max > 0.0 { p / p_max } else { 0.0 };
            Rectangle::new(
                [(year as f64, age as f64), (year as f64 + 1.0, next_age(age))],
                diverging_color(t).filled(),
            )
        }))
        .map_err(|e| PlotError::Drawing(e.to_string()))?;

    root.present()
        .map_err(|e| PlotError::Drawing(e.to_string()))?;
    Ok(())
}

/// Renders every chart into `out_dir` and returns the written paths.
pub fn render_all(
    series: &[CohortStats],
    heatmap: &[(i32, u32, f64)],
    threshold: u32,
    out_dir: &Path,
    settings: &PlotSettings,
) -> Result<Vec<PathBuf>> {
    if series.is_empty() {
        return Err(PlotError::InvalidData("series cannot be empty".to_string()));
    }
    std::fs::create_dir_all(out_dir)?;

    let death_age = out_dir.join("death_age.png");
    plot_death_age(series, &death_age, settings)?;
    let totals = out_dir.join("total_deaths.png");
    plot_total_deaths(series, &totals, settings)?;
    let infant = out_dir.join("infant_share.png");
    plot_infant_share(series, threshold, &infant, settings)?;

    let mut written = vec![death_age, totals, infant];
    if heatmap.is_empty() {
        info!("no adult deaths for the heatmap population; skipping heatmap");
    } else {
        let path = out_dir.join("adult_distribution.png");
        plot_adult_heatmap(heatmap, settings.heatmap_population, &path, settings)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{adult_proportions, available_populations, compute_series, StatsOptions};
    use crate::table::{load_inputs, LoadOptions};
    use tempfile::tempdir;

    #[test]
    fn segments_break_on_gaps() {
        let runs = segments(vec![
            (1.0, Some(1.0)),
            (2.0, None),
            (3.0, Some(3.0)),
            (4.0, Some(4.0)),
            (5.0, Some(f64::NAN)),
        ]);
        assert_eq!(runs, vec![vec![(1.0, 1.0)], vec![(3.0, 3.0), (4.0, 4.0)]]);
        assert!(segments(Vec::new()).is_empty());
    }

    #[test]
    fn diverging_scale_endpoints() {
        assert_eq!(diverging_color(0.0), RGBColor(59, 76, 192));
        assert_eq!(diverging_color(0.5), RGBColor(221, 221, 221));
        assert_eq!(diverging_color(1.0), RGBColor(180, 4, 38));
        assert_eq!(diverging_color(f64::NAN), RGBColor(59, 76, 192));
    }

    #[test]
    fn empty_inputs_are_rejected() {
        let dir = tempdir().unwrap();
        let settings = PlotSettings::default();
        let err = render_all(&[], &[], 15, dir.path(), &settings).unwrap_err();
        assert!(matches!(err, PlotError::InvalidData(_)));
        let err = plot_adult_heatmap(&[], Population::Male, &dir.path().join("h.png"), &settings)
            .unwrap_err();
        assert!(matches!(err, PlotError::InvalidData(_)));
    }

    #[test]
    fn single_year_range_is_widened() {
        let stats = CohortStats {
            year: 1850,
            population: Population::Both,
            total_deaths: 0.0,
            infant_deaths: 0.0,
            all_ages: None,
            adult: None,
        };
        assert_eq!(year_range(&[stats]).unwrap(), (1849.5, 1850.5));
    }

    #[test]
    fn render_all_writes_every_chart() -> anyhow::Result<()> {
        let fixture = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data/france_1850.csv");
        let (table, _) = load_inputs(&fixture.display().to_string(), &LoadOptions::default())?;
        let opts = StatsOptions::default();
        let populations =
            available_populations(&table, &[Population::Female, Population::Male]);
        let series = compute_series(&table, &populations, &opts);
        let cells = adult_proportions(&table, Population::Male, opts.adult_threshold);

        let dir = tempdir()?;
        let written = render_all(
            &series,
            &cells,
            opts.adult_threshold,
            dir.path(),
            &PlotSettings::default(),
        )?;

        let names: Vec<_> = written
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                "death_age.png",
                "total_deaths.png",
                "infant_share.png",
                "adult_distribution.png"
            ]
        );
        for path in &written {
            assert!(path.starts_with(dir.path()));
            assert!(std::fs::metadata(path)?.len() > 0, "{} is empty", path.display());
        }
        Ok(())
    }
}
