// src/table/load.rs
use anyhow::{anyhow, bail, Context, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use glob::glob;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Cursor, Read},
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use super::{AgeClasses, MortalityTable, Sex};

/// Header names of the input columns. Matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub year: String,
    pub age: String,
    pub deaths: String,
    /// Optional: without it every row is `Sex::Unspecified`.
    pub sex: String,
    /// Optional: only used for the whole-territory filter.
    pub area: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            year: "Year".into(),
            age: "Age".into(),
            deaths: "Deaths".into(),
            sex: "Sex".into(),
            area: "Area".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub columns: ColumnNames,
    pub delimiter: u8,
    /// Keep only rows whose area code is a multiple of 10 (national totals).
    pub whole_territory_only: bool,
    /// Fail on the first malformed row instead of skipping it.
    pub strict: bool,
    pub age_classes: AgeClasses,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            columns: ColumnNames::default(),
            delimiter: b',',
            whole_territory_only: true,
            strict: false,
            age_classes: AgeClasses::Single,
        }
    }
}

/// Row accounting for one or more loaded files.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub files: u64,
    pub rows_read: u64,
    pub rows_kept: u64,
    /// Aggregate, regional or combined-sex rows, skipped by design of the input.
    pub rows_filtered: u64,
    pub rows_malformed: u64,
}

impl LoadReport {
    fn absorb(&mut self, other: LoadReport) {
        self.files += other.files;
        self.rows_read += other.rows_read;
        self.rows_kept += other.rows_kept;
        self.rows_filtered += other.rows_filtered;
        self.rows_malformed += other.rows_malformed;
    }
}

/// Resolved column positions for one file.
struct ColumnIndex {
    year: usize,
    age: usize,
    deaths: usize,
    sex: Option<usize>,
    area: Option<usize>,
}

impl ColumnIndex {
    fn resolve(headers: &StringRecord, names: &ColumnNames, source: &str) -> Result<Self> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name.trim()))
        };
        let required = |name: &str| {
            find(name).ok_or_else(|| {
                anyhow!(
                    "{}: missing required column {:?} (headers: {:?})",
                    source,
                    name,
                    headers.iter().collect::<Vec<_>>()
                )
            })
        };
        Ok(Self {
            year: required(&names.year)?,
            age: required(&names.age)?,
            deaths: required(&names.deaths)?,
            sex: find(&names.sex),
            area: find(&names.area),
        })
    }
}

enum Row {
    Kept {
        year: i32,
        age: u32,
        sex: Sex,
        deaths: f64,
    },
    Filtered(&'static str),
    Malformed(String),
}

/// Ages are integers; an open-ended class such as `105+` reads as its lower end.
/// `TOT`, `UNK` and friends are not ages.
fn parse_age(raw: &str) -> Option<u32> {
    raw.trim().trim_end_matches('+').parse::<u32>().ok()
}

fn parse_row(record: &StringRecord, idx: &ColumnIndex, opts: &LoadOptions) -> Row {
    let field = |i: usize| record.get(i).map(str::trim);

    let (Some(year_raw), Some(age_raw), Some(deaths_raw)) =
        (field(idx.year), field(idx.age), field(idx.deaths))
    else {
        return Row::Malformed(format!("too few fields ({})", record.len()));
    };

    let Ok(year) = year_raw.parse::<i32>() else {
        return Row::Filtered("non-numeric year");
    };

    let sex = match idx.sex {
        Some(i) => match field(i).and_then(Sex::from_code) {
            Some(sex) => sex,
            None => return Row::Filtered("combined or unknown sex"),
        },
        None => Sex::Unspecified,
    };

    if opts.whole_territory_only {
        if let Some(i) = idx.area {
            match field(i).map(|a| a.parse::<i64>()) {
                Some(Ok(area)) if area % 10 == 0 => {}
                Some(Ok(_)) => return Row::Filtered("regional area"),
                _ => return Row::Malformed(format!("bad area code {:?}", field(i))),
            }
        }
    }

    let Some(age) = parse_age(age_raw) else {
        return Row::Filtered("non-numeric age");
    };

    match deaths_raw.parse::<f64>() {
        Ok(d) if d.is_finite() && d >= 0.0 => Row::Kept {
            year,
            age: opts.age_classes.classify(age),
            sex,
            deaths: d,
        },
        _ => Row::Malformed(format!("bad death count {:?}", deaths_raw)),
    }
}

/// Reads one delimited text stream into `table`, updating `report`.
pub fn read_table<R: Read>(
    reader: R,
    source: &str,
    opts: &LoadOptions,
    table: &mut MortalityTable,
    report: &mut LoadReport,
) -> Result<()> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(opts.delimiter)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .with_context(|| format!("reading header of {}", source))?
        .clone();
    let idx = ColumnIndex::resolve(&headers, &opts.columns, source)?;
    if idx.sex.is_none() {
        debug!(source, "no sex column; rows recorded as unspecified");
    }

    for result in rdr.records() {
        let record = result.with_context(|| format!("CSV parse error in {}", source))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        report.rows_read += 1;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        match parse_row(&record, &idx, opts) {
            Row::Kept {
                year,
                age,
                sex,
                deaths,
            } => {
                table.add(year, age, sex, deaths)?;
                report.rows_kept += 1;
            }
            Row::Filtered(reason) => {
                report.rows_filtered += 1;
                tracing::trace!(source, line, reason, "filtered row");
            }
            Row::Malformed(reason) => {
                if opts.strict {
                    bail!("{}: line {}: {}", source, line, reason);
                }
                warn!(source, line, %reason, "skipping malformed row");
                report.rows_malformed += 1;
            }
        }
    }
    Ok(())
}

/// Reads every `.csv`/`.txt` entry of a zip archive, in archive order.
fn read_zip(
    path: &Path,
    opts: &LoadOptions,
    table: &mut MortalityTable,
    report: &mut LoadReport,
) -> Result<()> {
    let file =
        File::open(path).with_context(|| format!("Failed to open ZIP file: {:?}", path))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("Failed to read ZIP archive: {:?}", path))?;

    let mut found = false;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to access ZIP entry #{} in {:?}", i, path))?;
        let name = entry.name().to_string();
        let lower = name.to_lowercase();
        if !entry.is_file() || !(lower.ends_with(".csv") || lower.ends_with(".txt")) {
            continue;
        }
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut buf)
            .with_context(|| format!("Failed to read {} into memory", name))?;
        let source = format!("{}!{}", path.display(), name);
        read_table(Cursor::new(buf), &source, opts, table, report)?;
        found = true;
    }
    if !found {
        bail!("no .csv or .txt entries in {:?}", path);
    }
    Ok(())
}

/// Loads one file (plain text or zip) into a fresh table.
#[tracing::instrument(level = "info", skip(path, opts), fields(path = %path.display()))]
pub fn load_path(path: &Path, opts: &LoadOptions) -> Result<(MortalityTable, LoadReport)> {
    let mut table = MortalityTable::new();
    let mut report = LoadReport {
        files: 1,
        ..LoadReport::default()
    };

    let is_zip = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
    if is_zip {
        read_zip(path, opts, &mut table, &mut report)?;
    } else {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        read_table(
            BufReader::new(file),
            &path.display().to_string(),
            opts,
            &mut table,
            &mut report,
        )?;
    }
    Ok((table, report))
}

/// Loads a path or glob pattern, merging every match into one table.
pub fn load_inputs(input: &str, opts: &LoadOptions) -> Result<(MortalityTable, LoadReport)> {
    let paths: Vec<PathBuf> = if input.contains(['*', '?', '[']) {
        let mut paths: Vec<PathBuf> = glob(input)
            .with_context(|| format!("Failed to parse glob pattern: {}", input))?
            .filter_map(|p| p.ok())
            .collect();
        paths.sort();
        paths
    } else {
        vec![PathBuf::from(input)]
    };
    if paths.is_empty() {
        bail!("no input files match {}", input);
    }

    let mut table = MortalityTable::new();
    let mut report = LoadReport::default();
    for path in &paths {
        let (t, r) = load_path(path, opts)?;
        info!(
            path = %path.display(),
            kept = r.rows_kept,
            filtered = r.rows_filtered,
            malformed = r.rows_malformed,
            "loaded"
        );
        table.merge(t);
        report.absorb(r);
    }
    Ok((table, report))
}
