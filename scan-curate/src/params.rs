//! Thresholds controlling marker detection and cluster merging

use anyhow::{bail, Error};

/// Per-gene detection thresholds used to decide whether a gene marks one cluster over another.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MarkerParams {
    /// A cell detects a gene when its expression is strictly greater than this value
    pub expression_threshold: f64,
    /// Minimum fraction of the marked cluster's cells that must detect the gene
    pub target_proportion: f64,
    /// Maximum fraction of the other cluster's cells allowed to detect the gene
    pub other_proportion: f64,
}

impl MarkerParams {
    /// Check ranges: threshold finite and non-negative, proportions within [0, 1]
    pub fn validate(&self) -> Result<(), Error> {
        if !self.expression_threshold.is_finite() || self.expression_threshold < 0.0 {
            bail!(
                "expression_threshold must be a finite value >= 0, got {}",
                self.expression_threshold
            );
        }
        check_proportion("target_proportion", self.target_proportion)?;
        check_proportion("other_proportion", self.other_proportion)?;
        Ok(())
    }
}

fn check_proportion(name: &str, v: f64) -> Result<(), Error> {
    if !(0.0..=1.0).contains(&v) {
        bail!("{} must be within [0, 1], got {}", name, v);
    }
    Ok(())
}

/// Full parameter set for `curate_clusters`.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CurationParams {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub markers: MarkerParams,
    /// Pairs with fewer marker genes (in the weaker direction) than this are merged
    pub min_marker_genes: usize,
    /// Pairs whose smaller cluster has fewer cells than this are merged
    pub min_cluster_size: usize,
    /// Safety cap on the number of passes. Defaults to the initial number of clusters.
    #[cfg_attr(feature = "serde", serde(default))]
    pub max_passes: Option<usize>,
}

impl CurationParams {
    pub fn validate(&self) -> Result<(), Error> {
        self.markers.validate()?;
        if self.min_cluster_size == 0 {
            bail!("min_cluster_size must be a positive integer");
        }
        if self.max_passes == Some(0) {
            bail!("max_passes must be positive when set");
        }
        Ok(())
    }
}
