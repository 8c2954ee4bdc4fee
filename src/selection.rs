//! Event selection over the global propensity list.
//!
//! Both strategies return the first entry whose cumulative sum exceeds the
//! draw, so they agree on ties. Zero-propensity entries are never selected.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Cumulative scan, O(n) per event.
    #[default]
    Linear,
    /// Binary sum tree rebuilt from the fresh propensities each event.
    Indexed,
}

pub(crate) fn select_linear(propensities: &[f64], target: f64) -> usize {
    let mut cumulative = 0.0;
    let mut last_positive = 0;
    for (idx, &value) in propensities.iter().enumerate() {
        if value > 0.0 {
            cumulative += value;
            last_positive = idx;
            if cumulative > target {
                return idx;
            }
        }
    }
    // Rounding can leave `target` a hair above the accumulated sum.
    last_positive
}

#[derive(Clone, Debug)]
pub(crate) struct PropensityTree {
    len: usize,
    leaf_count: usize,
    data: Vec<f64>,
}

impl PropensityTree {
    pub(crate) fn new(len: usize) -> Self {
        let base = len.max(1);
        let leaf_count = base.next_power_of_two();
        Self {
            len,
            leaf_count,
            data: vec![0.0; leaf_count * 2],
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn rebuild(&mut self, values: &[f64]) {
        debug_assert_eq!(values.len(), self.len);
        self.data.fill(0.0);
        for (idx, &value) in values.iter().enumerate() {
            self.data[self.leaf_count + idx] = value;
        }
        for idx in (1..self.leaf_count).rev() {
            self.data[idx] = self.data[idx << 1] + self.data[idx << 1 | 1];
        }
    }

    pub(crate) fn total(&self) -> f64 {
        self.data[1]
    }

    pub(crate) fn select(&self, mut target: f64) -> usize {
        debug_assert!(self.len > 0);
        debug_assert!(target >= 0.0);
        let mut node = 1usize;
        while node < self.leaf_count {
            let left = self.data[node << 1];
            if target < left {
                node <<= 1;
            } else {
                target -= left;
                node = (node << 1) | 1;
            }
        }
        let idx = (node - self.leaf_count).min(self.len - 1);
        if self.data[self.leaf_count + idx] > 0.0 {
            return idx;
        }
        // Rounding walked us onto an empty leaf; fall back to the last live one.
        (0..idx)
            .rev()
            .find(|&i| self.data[self.leaf_count + i] > 0.0)
            .unwrap_or(idx)
    }
}
