// src/table/mod.rs

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub mod ages;
pub mod load;

pub use ages::AgeClasses;
pub use load::{load_inputs, read_table, ColumnNames, LoadOptions, LoadReport};

/// Sex of a death record, as reported by the input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Female,
    Male,
    /// Rows coming from a file without a sex column.
    Unspecified,
}

impl Sex {
    pub fn as_str(&self) -> &str {
        match self {
            Sex::Female => "female",
            Sex::Male => "male",
            Sex::Unspecified => "unspecified",
        }
    }

    /// Parses the sex codes used by mortality.org input files.
    /// The combined `b` code is deliberately not recognised: those rows are totals.
    pub fn from_code(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "f" | "female" => Some(Sex::Female),
            "m" | "male" => Some(Sex::Male),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Sex::Female => 0,
            Sex::Male => 1,
            Sex::Unspecified => 2,
        }
    }
}

/// Which sexes a statistic is computed over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Population {
    Both,
    Female,
    Male,
}

impl Population {
    pub fn as_str(&self) -> &str {
        match self {
            Population::Both => "both",
            Population::Female => "female",
            Population::Male => "male",
        }
    }

    pub fn includes(&self, sex: Sex) -> bool {
        match self {
            Population::Both => true,
            Population::Female => sex == Sex::Female,
            Population::Male => sex == Sex::Male,
        }
    }
}

impl std::fmt::Display for Population {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Population {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "both" | "all" => Ok(Population::Both),
            "female" | "f" | "women" => Ok(Population::Female),
            "male" | "m" | "men" => Ok(Population::Male),
            other => bail!("unknown population {:?}", other),
        }
    }
}

const SEXES: [Sex; 3] = [Sex::Female, Sex::Male, Sex::Unspecified];

/// Deaths by (year, age), split by sex. Read-only once loaded.
#[derive(Debug, Default, Clone)]
pub struct MortalityTable {
    /// (year, age) → deaths indexed by `Sex::index`
    cells: BTreeMap<(i32, u32), [f64; 3]>,
    /// Every age observed in any year
    ages: BTreeSet<u32>,
}

impl MortalityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `deaths` to the (year, age, sex) cell. Repeated cells accumulate.
    pub fn add(&mut self, year: i32, age: u32, sex: Sex, deaths: f64) -> Result<()> {
        if !deaths.is_finite() || deaths < 0.0 {
            bail!(
                "invalid death count {} for year {} age {} ({})",
                deaths,
                year,
                age,
                sex.as_str()
            );
        }
        let cell = self.cells.entry((year, age)).or_insert([0.0; 3]);
        cell[sex.index()] += deaths;
        self.ages.insert(age);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of populated (year, age) cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Distinct years, ascending.
    pub fn years(&self) -> Vec<i32> {
        let years: BTreeSet<i32> = self.cells.keys().map(|(y, _)| *y).collect();
        years.into_iter().collect()
    }

    /// The age axis: every age observed in the table, ascending.
    pub fn ages(&self) -> Vec<u32> {
        self.ages.iter().copied().collect()
    }

    pub fn max_age(&self) -> Option<u32> {
        self.ages.iter().next_back().copied()
    }

    /// Deaths in one cell for `population`. Missing cells count as zero.
    pub fn deaths(&self, year: i32, age: u32, population: Population) -> f64 {
        self.cells
            .get(&(year, age))
            .map(|cell| sum_population(cell, population))
            .unwrap_or(0.0)
    }

    /// Deaths of `year` across the full age axis, zero-filled where a cell is missing.
    pub fn distribution(&self, year: i32, population: Population) -> Vec<(u32, f64)> {
        self.ages
            .iter()
            .map(|&age| (age, self.deaths(year, age, population)))
            .collect()
    }

    pub fn total(&self, year: i32, population: Population) -> f64 {
        self.cells
            .range((year, 0)..=(year, u32::MAX))
            .map(|(_, cell)| sum_population(cell, population))
            .sum()
    }

    /// True when the table holds any female or male counts.
    pub fn has_sex_breakdown(&self) -> bool {
        self.cells
            .values()
            .any(|c| c[Sex::Female.index()] > 0.0 || c[Sex::Male.index()] > 0.0)
    }

    /// Folds another table into this one.
    pub fn merge(&mut self, other: MortalityTable) {
        for (key, cell) in other.cells {
            let target = self.cells.entry(key).or_insert([0.0; 3]);
            for (t, v) in target.iter_mut().zip(cell.iter()) {
                *t += v;
            }
        }
        self.ages.extend(other.ages);
    }
}

fn sum_population(cell: &[f64; 3], population: Population) -> f64 {
    SEXES
        .iter()
        .filter(|s| population.includes(**s))
        .map(|s| cell[s.index()])
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_repeated_cells() -> Result<()> {
        let mut t = MortalityTable::new();
        t.add(1850, 30, Sex::Female, 10.0)?;
        t.add(1850, 30, Sex::Female, 5.0)?;
        t.add(1850, 30, Sex::Male, 7.0)?;
        assert_eq!(t.deaths(1850, 30, Population::Female), 15.0);
        assert_eq!(t.deaths(1850, 30, Population::Male), 7.0);
        assert_eq!(t.deaths(1850, 30, Population::Both), 22.0);
        assert_eq!(t.len(), 1);
        Ok(())
    }

    #[test]
    fn rejects_negative_and_nan_counts() {
        let mut t = MortalityTable::new();
        assert!(t.add(1850, 1, Sex::Male, -1.0).is_err());
        assert!(t.add(1850, 1, Sex::Male, f64::NAN).is_err());
        assert!(t.is_empty());
    }

    #[test]
    fn distribution_is_zero_filled_over_the_age_axis() -> Result<()> {
        let mut t = MortalityTable::new();
        t.add(1850, 0, Sex::Unspecified, 3.0)?;
        t.add(1851, 40, Sex::Unspecified, 2.0)?;
        assert_eq!(t.years(), vec![1850, 1851]);
        assert_eq!(t.ages(), vec![0, 40]);
        assert_eq!(t.distribution(1850, Population::Both), vec![(0, 3.0), (40, 0.0)]);
        assert_eq!(t.total(1851, Population::Both), 2.0);
        // unspecified rows only appear in the combined population
        assert_eq!(t.total(1851, Population::Female), 0.0);
        assert!(!t.has_sex_breakdown());
        Ok(())
    }

    #[test]
    fn merge_sums_cells_and_axes() -> Result<()> {
        let mut a = MortalityTable::new();
        a.add(1900, 10, Sex::Female, 1.0)?;
        let mut b = MortalityTable::new();
        b.add(1900, 10, Sex::Female, 2.0)?;
        b.add(1900, 80, Sex::Male, 4.0)?;
        a.merge(b);
        assert_eq!(a.deaths(1900, 10, Population::Female), 3.0);
        assert_eq!(a.max_age(), Some(80));
        Ok(())
    }

    #[test]
    fn sex_codes() {
        assert_eq!(Sex::from_code(" F "), Some(Sex::Female));
        assert_eq!(Sex::from_code("male"), Some(Sex::Male));
        assert_eq!(Sex::from_code("b"), None);
        assert_eq!("men".parse::<Population>().unwrap(), Population::Male);
        assert!("x".parse::<Population>().is_err());
    }
}
