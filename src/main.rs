use anyhow::{bail, Context, Result};
use clap::Parser;
use deathage::{
    config::Config,
    output::{self, Report},
    plot,
    stats::{self, CohortStats, QuantileMethod},
    table::{load_inputs, AgeClasses, Population},
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Command-line args. Anything given here overrides the config file.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Mean and median age of death, with and without infant mortality"
)]
struct Args {
    /// YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Mortality file, zip archive or glob pattern
    #[arg(short, long)]
    input: Option<String>,

    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Youngest age counted as adult (inclusive)
    #[arg(long)]
    threshold: Option<u32>,

    #[arg(long, value_enum)]
    quantile_method: Option<QuantileMethod>,

    /// Group ages into the 0, 1, 5, 10, ..., 105 classes
    #[arg(long)]
    abridged: bool,

    /// Fail on the first malformed row
    #[arg(long)]
    strict: bool,

    /// Comma-separated populations: both, female, male
    #[arg(long, value_delimiter = ',')]
    populations: Vec<Population>,

    /// Print the statistics of this year to stdout
    #[arg(long)]
    year: Option<i32>,

    #[arg(long)]
    no_plots: bool,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(input) = self.input {
            config.input = Some(input);
        }
        if let Some(dir) = self.out_dir {
            config.output_dir = dir;
        }
        if let Some(t) = self.threshold {
            config.adult_threshold = t;
        }
        if let Some(m) = self.quantile_method {
            config.quantile_method = m;
        }
        if self.abridged {
            config.age_classes = AgeClasses::Abridged;
        }
        if self.strict {
            config.strict = true;
        }
        if !self.populations.is_empty() {
            config.populations = self.populations;
        }
        if self.no_plots {
            config.plots.enabled = false;
        }
    }
}

fn fmt_stat(v: Option<f64>) -> String {
    v.map(|v| format!("{:.1}", v))
        .unwrap_or_else(|| "undefined".to_string())
}

fn print_year(series: &[CohortStats], year: i32, threshold: u32) {
    let mut found = false;
    for s in series.iter().filter(|s| s.year == year) {
        found = true;
        println!("{} {} ({:.0} deaths)", s.year, s.population, s.total_deaths);
        println!("  mean age of death, all ages:      {}", fmt_stat(s.mean_all()));
        println!("  median age of death, all ages:    {}", fmt_stat(s.median_all()));
        println!(
            "  mean age of death, ages {:>3}+:     {}",
            threshold,
            fmt_stat(s.mean_adult())
        );
        println!(
            "  median age of death, ages {:>3}+:   {}",
            threshold,
            fmt_stat(s.median_adult())
        );
    }
    if !found {
        println!("{}: not in the table", year);
    }
}

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {:?}", info);
    }));

    // ─── 2) configuration ────────────────────────────────────────────
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let year = args.year;
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let Some(input) = config.input.clone() else {
        bail!("no input given: pass --input or set `input` in the config file");
    };

    // ─── 3) load the mortality table ─────────────────────────────────
    let (table, report) = load_inputs(&input, &config.load_options())?;
    if table.is_empty() {
        bail!("no usable rows in {}", input);
    }
    if report.rows_malformed > 0 {
        warn!(rows = report.rows_malformed, "skipped malformed rows");
    }
    let years = table.years();
    info!(
        cells = table.len(),
        first_year = years.first().copied(),
        last_year = years.last().copied(),
        kept = report.rows_kept,
        filtered = report.rows_filtered,
        "table loaded"
    );

    // ─── 4) statistics ───────────────────────────────────────────────
    let stats_opts = config.stats_options();
    let populations = stats::available_populations(&table, &config.populations);
    let series = stats::compute_series(&table, &populations, &stats_opts);
    info!(
        rows = series.len(),
        threshold = stats_opts.adult_threshold,
        method = stats_opts.method.as_str(),
        "series computed"
    );

    if let Some(year) = year {
        print_year(&series, year, stats_opts.adult_threshold);
    }

    // ─── 5) exports ──────────────────────────────────────────────────
    let run_report = Report::new(&input, &stats_opts, &report, &series);
    for name in &config.series_outputs {
        let path = config.output_dir.join(name);
        output::write_series(&path, &series, &run_report)?;
    }

    // ─── 6) charts ───────────────────────────────────────────────────
    if config.plots.enabled {
        let heatmap_population = if populations.contains(&config.plots.heatmap_population) {
            config.plots.heatmap_population
        } else {
            populations[0]
        };
        let mut settings = config.plots.clone();
        settings.heatmap_population = heatmap_population;
        let cells =
            stats::adult_proportions(&table, heatmap_population, stats_opts.adult_threshold);
        let written = plot::render_all(
            &series,
            &cells,
            stats_opts.adult_threshold,
            &config.output_dir,
            &settings,
        )?;
        for path in written {
            info!(path = %path.display(), "wrote chart");
        }
    }

    info!("all done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "
input: data/deaths.csv
adult_threshold: 20
strict: true
quantile_method: interpolated
populations: [female, male]
";

    #[test]
    fn cli_flags_override_config_file() -> Result<()> {
        let mut config = Config::from_yaml_str(FILE)?;
        let args = Args::try_parse_from([
            "deathage",
            "--threshold",
            "15",
            "--abridged",
            "--populations",
            "both",
        ])?;
        args.apply(&mut config);

        assert_eq!(config.adult_threshold, 15);
        assert_eq!(config.age_classes, AgeClasses::Abridged);
        assert_eq!(config.populations, vec![Population::Both]);
        // not given on the command line
        assert_eq!(config.input.as_deref(), Some("data/deaths.csv"));
        assert!(config.strict);
        assert_eq!(config.quantile_method, QuantileMethod::Interpolated);
        assert!(config.plots.enabled);
        Ok(())
    }

    #[test]
    fn bare_command_line_keeps_config_file() -> Result<()> {
        let file = Config::from_yaml_str(FILE)?;
        let mut config = file.clone();
        Args::try_parse_from(["deathage"])?.apply(&mut config);
        assert_eq!(config, file);

        Args::try_parse_from(["deathage", "--populations", "female,male", "--no-plots"])?
            .apply(&mut config);
        assert_eq!(config.populations, vec![Population::Female, Population::Male]);
        assert!(!config.plots.enabled);
        Ok(())
    }
}
