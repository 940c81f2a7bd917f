// src/stats/series.rs

use tracing::{debug, warn};

use super::{cohort_stats, CohortStats, StatsOptions};
use crate::table::{MortalityTable, Population};

/// Drops female/male populations when the table carries no sex breakdown,
/// falling back to the combined population if nothing is left.
pub fn available_populations(table: &MortalityTable, requested: &[Population]) -> Vec<Population> {
    let has_sexes = table.has_sex_breakdown();
    let mut out = Vec::with_capacity(requested.len());
    for &p in requested {
        if p != Population::Both && !has_sexes {
            warn!(population = %p, "input has no sex column; skipping population");
            continue;
        }
        if !out.contains(&p) {
            out.push(p);
        }
    }
    if out.is_empty() {
        out.push(Population::Both);
    }
    out
}

/// `requested` when the table can answer it, otherwise the combined population.
pub fn resolve_population(table: &MortalityTable, requested: Population) -> Population {
    available_populations(table, &[requested])
        .first()
        .copied()
        .unwrap_or(Population::Both)
}

/// One `CohortStats` per (population, year), populations in the requested
/// order and years ascending within each.
pub fn compute_series(
    table: &MortalityTable,
    populations: &[Population],
    opts: &StatsOptions,
) -> Vec<CohortStats> {
    let years = table.years();
    let mut series = Vec::with_capacity(years.len() * populations.len());
    for &population in populations {
        for &year in &years {
            let stats = cohort_stats(table, year, population, opts);
            if stats.all_ages.is_none() {
                debug!(year, population = %population, "no deaths recorded");
            }
            series.push(stats);
        }
    }
    series
}

/// The entries of `series` for one population, in year order.
pub fn for_population(
    series: &[CohortStats],
    population: Population,
) -> impl Iterator<Item = &CohortStats> {
    series.iter().filter(move |s| s.population == population)
}

/// Share of each year's adult deaths falling at each age (sums to one per
/// year with deaths). Years without adult deaths are left out.
pub fn adult_proportions(
    table: &MortalityTable,
    population: Population,
    threshold: u32,
) -> Vec<(i32, u32, f64)> {
    let mut out = Vec::new();
    for year in table.years() {
        let adult: Vec<(u32, f64)> = table
            .distribution(year, population)
            .into_iter()
            .filter(|(age, _)| *age >= threshold)
            .collect();
        let total: f64 = adult.iter().map(|(_, d)| d).sum();
        if total <= 0.0 {
            continue;
        }
        out.extend(adult.into_iter().map(|(age, d)| (year, age, d / total)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::QuantileMethod;
    use crate::table::{load_inputs, LoadOptions, Sex};
    use anyhow::Result;
    use std::path::Path;

    fn france_1850() -> Result<MortalityTable> {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data/france_1850.csv");
        let (table, report) = load_inputs(&path.display().to_string(), &LoadOptions::default())?;
        assert_eq!(report.rows_malformed, 0);
        Ok(table)
    }

    fn close(actual: Option<f64>, expected: f64, tol: f64) {
        let actual = actual.expect("statistic should be defined");
        assert!(
            (actual - expected).abs() <= tol,
            "{} not within {} of {}",
            actual,
            tol,
            expected
        );
    }

    #[test]
    fn france_1850_reference_values() -> Result<()> {
        let table = france_1850()?;
        let stats = cohort_stats(&table, 1850, Population::Both, &StatsOptions::default());

        close(stats.median_all(), 30.0, 3.0);
        close(stats.median_adult(), 55.0, 3.0);
        close(stats.mean_all(), 35.0, 3.0);
        close(stats.mean_adult(), 57.0, 3.0);
        close(stats.infant_share(), 42.0, 0.5);
        assert_eq!(stats.total_deaths, 400_000.0);
        Ok(())
    }

    #[test]
    fn france_1850_interpolated_quartiles() -> Result<()> {
        let table = france_1850()?;
        let opts = StatsOptions {
            method: QuantileMethod::Interpolated,
            ..StatsOptions::default()
        };
        let stats = cohort_stats(&table, 1850, Population::Both, &opts);
        let all = stats.all_ages.unwrap();
        let adult = stats.adult.unwrap();
        assert!(all.q25 < all.median && all.median < all.q75);
        close(Some(all.median), 29.2, 0.1);
        close(Some(adult.median), 55.75, 0.1);
        assert!(adult.q25 >= 15.0);
        Ok(())
    }

    #[test]
    fn series_covers_every_year_and_population() -> Result<()> {
        let table = france_1850()?;
        let pops = available_populations(
            &table,
            &[Population::Both, Population::Female, Population::Male, Population::Both],
        );
        assert_eq!(pops, vec![Population::Both, Population::Female, Population::Male]);

        let series = compute_series(&table, &pops, &StatsOptions::default());
        assert_eq!(series.len(), 6);
        let women: Vec<i32> = for_population(&series, Population::Female)
            .map(|s| s.year)
            .collect();
        assert_eq!(women, vec![1850, 1851]);
        for s in &series {
            assert!(s.median_adult().unwrap() >= s.median_all().unwrap());
        }
        Ok(())
    }

    #[test]
    fn sexless_tables_only_offer_both() -> Result<()> {
        let mut table = MortalityTable::new();
        table.add(1900, 50, Sex::Unspecified, 1.0)?;
        let pops = available_populations(&table, &[Population::Female, Population::Both]);
        assert_eq!(pops, vec![Population::Both]);
        let pops = available_populations(&table, &[Population::Female, Population::Male]);
        assert_eq!(pops, vec![Population::Both]);
        Ok(())
    }

    #[test]
    fn single_population_falls_back_without_sexes() -> Result<()> {
        let mut sexless = MortalityTable::new();
        sexless.add(1900, 50, Sex::Unspecified, 1.0)?;
        assert_eq!(resolve_population(&sexless, Population::Female), Population::Both);
        assert_eq!(resolve_population(&sexless, Population::Both), Population::Both);

        let table = france_1850()?;
        assert_eq!(resolve_population(&table, Population::Male), Population::Male);
        Ok(())
    }

    #[test]
    fn adult_proportions_sum_to_one() -> Result<()> {
        let table = france_1850()?;
        let props = adult_proportions(&table, Population::Male, 15);
        for year in [1850, 1851] {
            let sum: f64 = props
                .iter()
                .filter(|(y, _, _)| *y == year)
                .map(|(_, _, p)| p)
                .sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
        assert!(props.iter().all(|(_, age, _)| *age >= 15));
        Ok(())
    }
}
