//! Age-of-death statistics from historical mortality tables.
//!
//! Loads deaths by year, age and sex ([`table`]), computes mean and quartile
//! ages of death with and without deaths below an adult threshold
//! ([`stats`]), and exports the per-year series ([`output`]) and charts
//! ([`plot`]).

pub mod config;
pub mod output;
pub mod plot;
pub mod stats;
pub mod table;

pub use config::Config;
pub use stats::{cohort_stats, CohortStats, QuantileMethod, StatsOptions};
pub use table::{MortalityTable, Population, Sex};
