// src/config.rs

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs::File, path::Path, path::PathBuf};

use crate::output::SeriesFormat;
use crate::plot::PlotSettings;
use crate::stats::{QuantileMethod, StatsOptions};
use crate::table::{AgeClasses, ColumnNames, LoadOptions, Population};

/// Run configuration. Every field has a default, so an empty YAML document
/// (or no file at all) is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path, zip archive or glob pattern of the mortality input.
    pub input: Option<String>,
    pub output_dir: PathBuf,
    pub columns: ColumnNames,
    pub delimiter: char,
    pub whole_territory_only: bool,
    pub strict: bool,
    pub age_classes: AgeClasses,
    pub adult_threshold: u32,
    pub quantile_method: QuantileMethod,
    pub populations: Vec<Population>,
    /// Series exports, written into `output_dir`; format follows the extension.
    pub series_outputs: Vec<String>,
    pub plots: PlotSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: None,
            output_dir: PathBuf::from("output"),
            columns: ColumnNames::default(),
            delimiter: ',',
            whole_territory_only: true,
            strict: false,
            age_classes: AgeClasses::Single,
            adult_threshold: 15,
            quantile_method: QuantileMethod::Step,
            populations: vec![Population::Female, Population::Male],
            series_outputs: vec!["death_age.csv".into(), "death_age.parquet".into()],
            plots: PlotSettings::default(),
        }
    }
}

impl Config {
    /// Reads a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening config {}", path.display()))?;
        let config: Config = serde_yaml::from_reader(file)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s).context("parsing config")
    }

    pub fn validate(&self) -> Result<()> {
        if !self.delimiter.is_ascii() {
            bail!("delimiter must be a single ASCII character, got {:?}", self.delimiter);
        }
        if self.populations.is_empty() {
            bail!("at least one population is required");
        }
        self.age_classes.validate()?;
        for name in &self.series_outputs {
            SeriesFormat::from_path(Path::new(name))?;
        }
        if self.plots.width == 0 || self.plots.height == 0 {
            bail!(
                "plot size must be non-zero, got {}x{}",
                self.plots.width,
                self.plots.height
            );
        }
        Ok(())
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            columns: self.columns.clone(),
            delimiter: self.delimiter as u8,
            whole_territory_only: self.whole_territory_only,
            strict: self.strict,
            age_classes: self.age_classes.clone(),
        }
    }

    pub fn stats_options(&self) -> StatsOptions {
        StatsOptions {
            adult_threshold: self.adult_threshold,
            method: self.quantile_method,
        }
    }
}
