use std::ops::AddAssign;

use serde::Serialize;

/// Leaf pages recovered out of leaf pages seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Fraction {
    pub decoded: u64,
    pub corrupted: u64,
}

impl Fraction {
    pub fn new(decoded: u64, corrupted: u64) -> Self {
        Self { decoded, corrupted }
    }

    pub fn total(&self) -> u64 {
        self.decoded + self.corrupted
    }

    /// In `[0, 1]`; a source with no leaf pages at all scores 0.
    pub fn value(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.decoded as f64 / total as f64,
        }
    }
}

impl AddAssign for Fraction {
    fn add_assign(&mut self, other: Self) {
        self.decoded += other.decoded;
        self.corrupted += other.corrupted;
    }
}

/// Each size's share of the total. Uniform when every size is 0.
pub fn normalize_weights(sizes: &[u64]) -> Vec<f64> {
    if sizes.is_empty() {
        return Vec::new();
    }
    let total: u128 = sizes.iter().map(|&size| u128::from(size)).sum();
    if total == 0 {
        let weight = 1.0 / sizes.len() as f64;
        return vec![weight; sizes.len()];
    }
    sizes
        .iter()
        .map(|&size| (u128::from(size) as f64) / (total as f64))
        .collect()
}

/// Σ weight × score.
pub fn weighted_score(parts: impl IntoIterator<Item = (f64, f64)>) -> f64 {
    parts
        .into_iter()
        .map(|(weight, score)| weight * score)
        .sum::<f64>()
        .clamp(0.0, 1.0)
}
