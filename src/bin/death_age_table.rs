use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

use deathage::{
    config::Config,
    stats::{cohort_stats, resolve_population, CohortStats},
    table::{load_inputs, Population},
};

use prettytable::{format, Cell, Row, Table};
use tracing::warn;

/// Prints mean/median age of death per year as a table.
#[derive(Parser, Debug)]
struct Args {
    /// Mortality file, zip archive or glob pattern
    #[arg(short, long)]
    input: Option<String>,

    /// YAML config file (input, columns, threshold, ...)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "both")]
    population: Population,

    #[arg(long)]
    threshold: Option<u32>,

    /// First year shown
    #[arg(long)]
    from: Option<i32>,

    /// Last year shown
    #[arg(long)]
    to: Option<i32>,

    /// Show every n-th year
    #[arg(long, default_value_t = 1)]
    step: usize,
}

fn cell(v: Option<f64>) -> Cell {
    match v {
        Some(v) => Cell::new(&format!("{:.1}", v)).style_spec("r"),
        None => Cell::new("-").style_spec("c"),
    }
}

fn header(label: &str) -> Cell {
    Cell::new(label).style_spec("bFg")
}

fn row(s: &CohortStats) -> Row {
    Row::new(vec![
        Cell::new(&s.year.to_string()),
        Cell::new(&format!("{:.0}", s.total_deaths)).style_spec("r"),
        cell(s.infant_share()),
        cell(s.mean_all()),
        cell(s.median_all()),
        cell(s.mean_adult()),
        cell(s.median_adult()),
    ])
}

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(input) = args.input.clone() {
        config.input = Some(input);
    }
    if let Some(t) = args.threshold {
        config.adult_threshold = t;
    }
    config.validate().context("invalid configuration")?;
    let input = config
        .input
        .clone()
        .context("no input given: pass --input or set `input` in the config file")?;

    let (table, _) = load_inputs(&input, &config.load_options())?;
    let opts = config.stats_options();
    tracing::info!(cells = table.len(), "table loaded");

    let population = resolve_population(&table, args.population);
    if population != args.population {
        warn!(
            requested = %args.population,
            shown = %population,
            "input has no sex breakdown; showing the combined population"
        );
    }

    let years: Vec<i32> = table
        .years()
        .into_iter()
        .filter(|y| args.from.map_or(true, |from| *y >= from))
        .filter(|y| args.to.map_or(true, |to| *y <= to))
        .step_by(args.step.max(1))
        .collect();

    if years.is_empty() {
        println!("No years in range.");
        return Ok(());
    }

    let mut out = Table::new();
    out.set_format(*format::consts::FORMAT_BOX_CHARS);
    let adult = format!("{}+", opts.adult_threshold);
    out.add_row(Row::new(vec![
        header("Year"),
        header("Deaths"),
        header(&format!("Under {} (%)", opts.adult_threshold)),
        header("Mean"),
        header("Median"),
        header(&format!("Mean {}", adult)),
        header(&format!("Median {}", adult)),
    ]));
    for year in years {
        out.add_row(row(&cohort_stats(&table, year, population, &opts)));
    }

    println!(
        "\n--- Age of death ({}, {} quantiles) ---",
        population,
        opts.method.as_str()
    );
    out.printstd();
    Ok(())
}
