// src/output/mod.rs

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};
use tracing::info;

use crate::stats::{AgeSummary, CohortStats, StatsOptions};
use crate::table::LoadReport;

pub mod columnar;

/// Export format, picked from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesFormat {
    Csv,
    Parquet,
    Json,
}

impl SeriesFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match ext.as_deref() {
            Some("csv") => Ok(SeriesFormat::Csv),
            Some("parquet") => Ok(SeriesFormat::Parquet),
            Some("json") => Ok(SeriesFormat::Json),
            _ => bail!(
                "unsupported series output {:?}: expected .csv, .parquet or .json",
                path
            ),
        }
    }
}

/// Flat, one-line-per-cohort view of `CohortStats`. Undefined statistics stay empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesRow {
    pub year: i32,
    pub population: String,
    pub total_deaths: f64,
    pub infant_deaths: f64,
    pub infant_share: Option<f64>,
    pub mean_all: Option<f64>,
    pub q25_all: Option<f64>,
    pub median_all: Option<f64>,
    pub q75_all: Option<f64>,
    pub mean_adult: Option<f64>,
    pub q25_adult: Option<f64>,
    pub median_adult: Option<f64>,
    pub q75_adult: Option<f64>,
}

fn pick(summary: Option<AgeSummary>, f: fn(&AgeSummary) -> f64) -> Option<f64> {
    summary.as_ref().map(f)
}

impl From<&CohortStats> for SeriesRow {
    fn from(s: &CohortStats) -> Self {
        Self {
            year: s.year,
            population: s.population.as_str().to_string(),
            total_deaths: s.total_deaths,
            infant_deaths: s.infant_deaths,
            infant_share: s.infant_share(),
            mean_all: pick(s.all_ages, |a| a.mean),
            q25_all: pick(s.all_ages, |a| a.q25),
            median_all: pick(s.all_ages, |a| a.median),
            q75_all: pick(s.all_ages, |a| a.q75),
            mean_adult: pick(s.adult, |a| a.mean),
            q25_adult: pick(s.adult, |a| a.q25),
            median_adult: pick(s.adult, |a| a.median),
            q75_adult: pick(s.adult, |a| a.q75),
        }
    }
}

pub fn rows(series: &[CohortStats]) -> Vec<SeriesRow> {
    series.iter().map(SeriesRow::from).collect()
}

/// Run metadata written with the JSON export.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub generated_at: DateTime<Utc>,
    pub input: &'a str,
    pub adult_threshold: u32,
    pub quantile_method: &'a str,
    pub load: &'a LoadReport,
    pub series: Vec<SeriesRow>,
}

impl<'a> Report<'a> {
    pub fn new(
        input: &'a str,
        opts: &'a StatsOptions,
        load: &'a LoadReport,
        series: &[CohortStats],
    ) -> Self {
        Self {
            generated_at: Utc::now(),
            input,
            adult_threshold: opts.adult_threshold,
            quantile_method: opts.method.as_str(),
            load,
            series: rows(series),
        }
    }
}

/// Writes through a hidden tmp file next to `path`, then renames over it.
pub(crate) fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(File) -> Result<()>,
{
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("output path has no file name")?;
    let tmp_path = dir.join(format!(".{}.tmp", name));

    let tmp = File::create(&tmp_path).with_context(|| format!("creating {:?}", tmp_path))?;
    if let Err(e) = write(tmp) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.context(format!("writing {:?}", tmp_path)));
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming {:?} -> {:?}", tmp_path, path))?;
    Ok(())
}

pub fn write_csv(path: &Path, series: &[CohortStats]) -> Result<()> {
    write_atomic(path, |file| {
        let mut wtr = csv::Writer::from_writer(BufWriter::new(file));
        for row in rows(series) {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        Ok(())
    })
}

pub fn write_json(path: &Path, report: &Report<'_>) -> Result<()> {
    write_atomic(path, |file| {
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, report)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    })
}

/// Writes `report.series` to `path` in the format its extension names.
pub fn write_series(path: &Path, series: &[CohortStats], report: &Report<'_>) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    match SeriesFormat::from_path(path)? {
        SeriesFormat::Csv => write_csv(path, series)?,
        SeriesFormat::Parquet => columnar::write_parquet(path, series)?,
        SeriesFormat::Json => write_json(path, report)?,
    }
    info!(path = %path.display(), rows = series.len(), "wrote series");
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::table::Population;
    use tempfile::tempdir;

    pub(crate) fn sample_series() -> Vec<CohortStats> {
        let summary = |mean, median| AgeSummary {
            mean,
            q25: median - 10.0,
            median,
            q75: median + 10.0,
        };
        vec![
            CohortStats {
                year: 1850,
                population: Population::Female,
                total_deaths: 100.0,
                infant_deaths: 40.0,
                all_ages: Some(summary(35.0, 30.0)),
                adult: Some(summary(57.0, 55.0)),
            },
            CohortStats {
                year: 1851,
                population: Population::Female,
                total_deaths: 0.0,
                infant_deaths: 0.0,
                all_ages: None,
                adult: None,
            },
        ]
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(
            SeriesFormat::from_path(Path::new("a/b.CSV")).unwrap(),
            SeriesFormat::Csv
        );
        assert_eq!(
            SeriesFormat::from_path(Path::new("x.parquet")).unwrap(),
            SeriesFormat::Parquet
        );
        assert!(SeriesFormat::from_path(Path::new("x")).is_err());
    }

    #[test]
    fn csv_leaves_undefined_statistics_empty() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested/series.csv");
        let series = sample_series();
        let load = LoadReport::default();
        let opts = StatsOptions::default();
        write_series(&path, &series, &Report::new("in.csv", &opts, &load, &series))?;

        let mut rdr = csv::Reader::from_path(&path)?;
        let headers = rdr.headers()?.clone();
        assert_eq!(&headers[0], "year");
        assert_eq!(headers.len(), 13);
        let records: Vec<csv::StringRecord> = rdr.records().collect::<Result<_, _>>()?;
        assert_eq!(records.len(), 2);
        assert_eq!(&records[0][1], "female");
        assert_eq!(&records[0][7], "30.0");
        assert_eq!(&records[1][7], "");
        assert!(!dir.path().join("nested/.series.csv.tmp").exists());
        Ok(())
    }

    #[test]
    fn failed_write_leaves_no_tmp_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("series.csv");
        let err = write_atomic(&path, |mut file| {
            file.write_all(b"year,")?;
            bail!("disk full")
        })
        .unwrap_err();
        assert!(format!("{:#}", err).contains("disk full"));
        assert!(!dir.path().join(".series.csv.tmp").exists());
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn json_report_carries_metadata() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("report.json");
        let series = sample_series();
        let load = LoadReport {
            files: 1,
            rows_read: 10,
            rows_kept: 8,
            rows_filtered: 2,
            rows_malformed: 0,
        };
        let opts = StatsOptions::default();
        write_series(&path, &series, &Report::new("in.csv", &opts, &load, &series))?;

        let value: serde_json::Value = serde_json::from_reader(File::open(&path)?)?;
        assert_eq!(value["adult_threshold"], 15);
        assert_eq!(value["quantile_method"], "step");
        assert_eq!(value["load"]["rows_kept"], 8);
        assert_eq!(value["series"][0]["median_adult"], 55.0);
        assert!(value["series"][1]["median_adult"].is_null());
        assert!(value["generated_at"].is_string());
        Ok(())
    }
}
