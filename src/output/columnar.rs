use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, Float64Array, Int32Array, StringArray},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use parquet::{
    arrow::ArrowWriter,
    basic::{BrotliLevel, Compression},
    file::properties::WriterProperties,
};
use std::{path::Path, sync::Arc};

use super::{rows, write_atomic, SeriesRow};
use crate::stats::CohortStats;

const FLOAT_COLUMNS: [&str; 11] = [
    "total_deaths",
    "infant_deaths",
    "infant_share",
    "mean_all",
    "q25_all",
    "median_all",
    "q75_all",
    "mean_adult",
    "q25_adult",
    "median_adult",
    "q75_adult",
];

/// Arrow schema of the exported series: year, population, then nullable floats.
pub fn series_schema() -> Schema {
    let mut fields = vec![
        Field::new("year", DataType::Int32, false),
        Field::new("population", DataType::Utf8, false),
    ];
    fields.extend(
        FLOAT_COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Float64, true)),
    );
    Schema::new(fields)
}

fn float_column(rows: &[SeriesRow], f: impl Fn(&SeriesRow) -> Option<f64>) -> ArrayRef {
    Arc::new(Float64Array::from(rows.iter().map(f).collect::<Vec<_>>()))
}

pub fn to_record_batch(series: &[CohortStats]) -> Result<RecordBatch> {
    let rows = rows(series);
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int32Array::from(
            rows.iter().map(|r| r.year).collect::<Vec<_>>(),
        )),
        Arc::new(StringArray::from(
            rows.iter().map(|r| r.population.as_str()).collect::<Vec<_>>(),
        )),
        float_column(&rows, |r| Some(r.total_deaths)),
        float_column(&rows, |r| Some(r.infant_deaths)),
        float_column(&rows, |r| r.infant_share),
        float_column(&rows, |r| r.mean_all),
        float_column(&rows, |r| r.q25_all),
        float_column(&rows, |r| r.median_all),
        float_column(&rows, |r| r.q75_all),
        float_column(&rows, |r| r.mean_adult),
        float_column(&rows, |r| r.q25_adult),
        float_column(&rows, |r| r.median_adult),
        float_column(&rows, |r| r.q75_adult),
    ];
    RecordBatch::try_new(Arc::new(series_schema()), columns).context("building series record batch")
}

pub fn write_parquet(path: &Path, series: &[CohortStats]) -> Result<()> {
    let batch = to_record_batch(series)?;
    write_atomic(path, |file| {
        let props = WriterProperties::builder()
            .set_compression(Compression::BROTLI(BrotliLevel::try_new(5)?))
            .build();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
            .context("creating parquet writer")?;
        writer.write(&batch).context("writing batch to parquet")?;
        writer.close().context("closing parquet writer")?;
        Ok(())
    })
}
