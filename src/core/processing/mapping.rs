// src/core/processing/mapping.rs
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Bidirectional correspondence between original and transformed line
/// numbers (both 1-based).
///
/// Each transformed line maps to the original lines it was produced from;
/// merged lines map to several. The first original line is the primary one
/// and is what execution traces are reported against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineMapping {
    /// Index `t - 1` holds the original lines of transformed line `t`
    to_original: Vec<Vec<usize>>,
    /// Original line -> transformed lines derived from it
    to_transformed: BTreeMap<usize, Vec<usize>>,
}

impl LineMapping {
    /// Mapping where every line maps onto itself
    pub fn identity(line_count: usize) -> Self {
        Self::from_sources((1..=line_count).map(|l| vec![l]).collect())
    }

    /// Build a mapping from, for each output line, the input lines it came from.
    pub fn from_sources(sources: Vec<Vec<usize>>) -> Self {
        let mut to_transformed: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (index, originals) in sources.iter().enumerate() {
            for &original in originals {
                to_transformed.entry(original).or_default().push(index + 1);
            }
        }

        Self {
            to_original: sources,
            to_transformed,
        }
    }

    /// Chain `self` (original -> intermediate) with `next`
    /// (intermediate -> output) into original -> output.
    pub fn compose(&self, next: &LineMapping) -> LineMapping {
        let sources = next
            .to_original
            .iter()
            .map(|intermediates| {
                let mut originals = Vec::new();
                for &mid in intermediates {
                    for &original in self.originals(mid) {
                        if !originals.contains(&original) {
                            originals.push(original);
                        }
                    }
                }
                originals
            })
            .collect();

        Self::from_sources(sources)
    }

    /// Primary original line of a transformed line
    pub fn original(&self, transformed: usize) -> Option<usize> {
        self.originals(transformed).first().copied()
    }

    /// Every original line merged into a transformed line
    pub fn originals(&self, transformed: usize) -> &[usize] {
        transformed
            .checked_sub(1)
            .and_then(|index| self.to_original.get(index))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Transformed lines an original line ended up in
    pub fn transformed(&self, original: usize) -> &[usize] {
        self.to_transformed
            .get(&original)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Set of original line numbers covered by the mapping
    pub fn original_domain(&self) -> BTreeSet<usize> {
        self.to_transformed.keys().copied().collect()
    }

    pub fn transformed_len(&self) -> usize {
        self.to_original.len()
    }

    /// Transformed lines with no original line behind them
    pub fn orphans(&self) -> Vec<usize> {
        self.to_original
            .iter()
            .enumerate()
            .filter(|(_, originals)| originals.is_empty())
            .map(|(index, _)| index + 1)
            .collect()
    }

    pub fn is_identity(&self) -> bool {
        self.to_original
            .iter()
            .enumerate()
            .all(|(index, originals)| originals.as_slice() == [index + 1])
    }
}
