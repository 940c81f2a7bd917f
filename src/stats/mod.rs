//! Age-of-death statistics for one year of a [`MortalityTable`].
//!
//! Every age on the table's age axis is weighted by its death count. The
//! "adult" variant drops ages below the threshold before anything is summed,
//! so its weights are renormalised over the remaining ages. A distribution
//! with no deaths has no statistics: callers get `None`, never zero.

use serde::{Deserialize, Serialize};

use crate::table::{MortalityTable, Population};

pub mod series;

pub use series::{
    adult_proportions, available_populations, compute_series, for_population, resolve_population,
};

/// Quartile points reported alongside the mean.
pub const QUARTILES: [f64; 3] = [0.25, 0.5, 0.75];

// Cumulative sums drift; a target reached up to this relative error counts as reached.
const CUM_EPSILON: f64 = 1e-12;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum QuantileMethod {
    /// Smallest age at which the cumulative count reaches the quantile.
    #[default]
    Step,
    /// Root of the linearly interpolated cumulative proportion.
    Interpolated,
}

impl QuantileMethod {
    pub fn as_str(&self) -> &str {
        match self {
            QuantileMethod::Step => "step",
            QuantileMethod::Interpolated => "interpolated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsOptions {
    /// Youngest age counted as adult (inclusive).
    pub adult_threshold: u32,
    pub method: QuantileMethod,
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self {
            adult_threshold: 15,
            method: QuantileMethod::Step,
        }
    }
}

/// Mean and quartiles of the age of death.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AgeSummary {
    pub mean: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
}

/// Statistics of one (year, population) cohort, with and without deaths
/// below the adult threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortStats {
    pub year: i32,
    pub population: Population,
    pub total_deaths: f64,
    /// Deaths strictly below the adult threshold.
    pub infant_deaths: f64,
    pub all_ages: Option<AgeSummary>,
    pub adult: Option<AgeSummary>,
}

impl CohortStats {
    pub fn mean_all(&self) -> Option<f64> {
        self.all_ages.map(|s| s.mean)
    }

    pub fn median_all(&self) -> Option<f64> {
        self.all_ages.map(|s| s.median)
    }

    pub fn mean_adult(&self) -> Option<f64> {
        self.adult.map(|s| s.mean)
    }

    pub fn median_adult(&self) -> Option<f64> {
        self.adult.map(|s| s.median)
    }

    /// Percentage of the year's deaths that fall below the threshold.
    pub fn infant_share(&self) -> Option<f64> {
        (self.total_deaths > 0.0).then(|| 100.0 * self.infant_deaths / self.total_deaths)
    }
}

fn total(dist: &[(u32, f64)]) -> f64 {
    dist.iter().map(|(_, d)| d).sum()
}

/// Mean age weighted by deaths. `None` when there are no deaths.
pub fn weighted_mean(dist: &[(u32, f64)]) -> Option<f64> {
    let total = total(dist);
    if total <= 0.0 {
        return None;
    }
    let weighted: f64 = dist.iter().map(|&(age, d)| age as f64 * d).sum();
    Some(weighted / total)
}

/// Age at which the cumulative proportion of deaths reaches `q` (0 < q ≤ 1).
/// `dist` must be sorted by age. `None` when there are no deaths.
pub fn weighted_quantile(dist: &[(u32, f64)], q: f64, method: QuantileMethod) -> Option<f64> {
    let total = total(dist);
    if total <= 0.0 || dist.is_empty() {
        return None;
    }
    let target = q * total * (1.0 - CUM_EPSILON);

    let mut cum = 0.0;
    let mut prev_age: Option<u32> = None;
    for &(age, deaths) in dist {
        let before = cum;
        cum += deaths;
        if cum >= target {
            return Some(match (method, prev_age) {
                (QuantileMethod::Step, _) | (QuantileMethod::Interpolated, None) => age as f64,
                (QuantileMethod::Interpolated, Some(prev)) => {
                    let frac = (q * total - before) / (cum - before);
                    prev as f64 + frac.clamp(0.0, 1.0) * (age - prev) as f64
                }
            });
        }
        prev_age = Some(age);
    }
    // only reachable through rounding with q == 1
    dist.last().map(|&(age, _)| age as f64)
}

/// Mean and quartiles of a distribution, or `None` if it has no deaths.
pub fn summarize(dist: &[(u32, f64)], method: QuantileMethod) -> Option<AgeSummary> {
    let mean = weighted_mean(dist)?;
    let [q25, median, q75] = QUARTILES.map(|q| weighted_quantile(dist, q, method));
    Some(AgeSummary {
        mean,
        q25: q25?,
        median: median?,
        q75: q75?,
    })
}

/// The four statistics (plus quartiles) of `year` for `population`.
pub fn cohort_stats(
    table: &MortalityTable,
    year: i32,
    population: Population,
    opts: &StatsOptions,
) -> CohortStats {
    let dist = table.distribution(year, population);
    let (adult, young): (Vec<(u32, f64)>, Vec<(u32, f64)>) = dist
        .iter()
        .copied()
        .partition(|(age, _)| *age >= opts.adult_threshold);

    CohortStats {
        year,
        population,
        total_deaths: total(&dist),
        infant_deaths: total(&young),
        all_ages: summarize(&dist, opts.method),
        adult: summarize(&adult, opts.method),
    }
}
