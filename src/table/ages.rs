use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Upper bounds of the abridged life-table classes: 0, 1, 5, 10, ..., 105.
pub fn abridged_bounds() -> Vec<u32> {
    let mut bounds = vec![0, 1];
    bounds.extend((5..=105).step_by(5));
    bounds
}

/// How single-year ages are grouped before they enter the table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeClasses {
    /// Keep every age as reported.
    #[default]
    Single,
    /// Standard abridged classes, see [`abridged_bounds`].
    Abridged,
    /// Ascending class upper bounds.
    Custom(Vec<u32>),
}

impl AgeClasses {
    pub fn validate(&self) -> Result<()> {
        if let AgeClasses::Custom(bounds) = self {
            if bounds.is_empty() {
                bail!("custom age classes need at least one bound");
            }
            if bounds.windows(2).any(|w| w[0] >= w[1]) {
                bail!("custom age class bounds must be strictly ascending: {:?}", bounds);
            }
        }
        Ok(())
    }

    /// Maps an age to its class: the smallest bound ≥ age, or the last bound
    /// for ages past the end of the grouping.
    pub fn classify(&self, age: u32) -> u32 {
        match self {
            AgeClasses::Single => age,
            AgeClasses::Abridged => classify_bounds(&abridged_bounds(), age),
            AgeClasses::Custom(bounds) => classify_bounds(bounds, age),
        }
    }
}

fn classify_bounds(bounds: &[u32], age: u32) -> u32 {
    let idx = bounds.partition_point(|&b| b < age);
    match bounds.get(idx) {
        Some(&b) => b,
        None => bounds.last().copied().unwrap_or(age),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abridged_mapping() {
        let c = AgeClasses::Abridged;
        assert_eq!(c.classify(0), 0);
        assert_eq!(c.classify(1), 1);
        assert_eq!(c.classify(2), 5);
        assert_eq!(c.classify(5), 5);
        assert_eq!(c.classify(6), 10);
        assert_eq!(c.classify(14), 15);
        assert_eq!(c.classify(105), 105);
        assert_eq!(c.classify(120), 105);
    }

    #[test]
    fn single_is_identity() {
        assert_eq!(AgeClasses::Single.classify(37), 37);
    }

    #[test]
    fn custom_bounds_are_validated() {
        assert!(AgeClasses::Custom(vec![0, 15, 65]).validate().is_ok());
        assert!(AgeClasses::Custom(vec![0, 15, 15]).validate().is_err());
        assert!(AgeClasses::Custom(vec![]).validate().is_err());
        assert_eq!(AgeClasses::Custom(vec![0, 15, 65]).classify(30), 65);
    }
}
