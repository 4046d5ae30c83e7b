//! Per-cluster detection counts

use anyhow::{bail, format_err, Error};
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use scan_types::{ClusterAssignment, ExpressionMatrix};
use sprs::CsMat;
use std::collections::BTreeMap;

/// Number of cells in each cluster that express each gene above a threshold.
#[derive(Clone, Debug)]
pub struct DetectionTable<L> {
    labels: Vec<L>,
    sizes: Vec<usize>,
    detected: Array2<u32>,
}

impl<L: Ord + Clone + Send + Sync> DetectionTable<L> {
    /// Scan `matrix` (genes x cells, CSR) once. `cells[i]` is the column holding the cell
    /// labelled `labels[i]`; columns not listed in `cells` are ignored.
    pub fn compute(matrix: &CsMat<f64>, cells: &[usize], labels: &[L], threshold: f64) -> Result<Self, Error> {
        if !matrix.is_csr() {
            bail!("detection counts require a gene-major (CSR) matrix");
        }
        if cells.len() != labels.len() {
            bail!("{} cell columns but {} labels", cells.len(), labels.len());
        }

        let mut sizes_by_label = BTreeMap::<&L, usize>::default();
        for l in labels {
            *sizes_by_label.entry(l).or_insert(0) += 1;
        }
        let index = sizes_by_label
            .keys()
            .enumerate()
            .map(|(k, &l)| (l, k))
            .collect::<BTreeMap<_, _>>();

        let mut cluster_of = vec![None; matrix.cols()];
        for (&c, l) in cells.iter().zip(labels) {
            let slot = cluster_of
                .get_mut(c)
                .ok_or_else(|| format_err!("cell column {} out of range for {} cells", c, matrix.cols()))?;
            if slot.is_some() {
                bail!("cell column {} is assigned more than once", c);
            }
            *slot = Some(index[l]);
        }

        let mut detected = Array2::<u32>::zeros((matrix.rows(), sizes_by_label.len()));
        detected
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(g, mut counts)| {
                if let Some(row) = matrix.outer_view(g) {
                    for (c, &v) in row.iter() {
                        if v > threshold {
                            if let Some(k) = cluster_of[c] {
                                counts[k] += 1;
                            }
                        }
                    }
                }
            });

        let (labels, sizes) = sizes_by_label.into_iter().map(|(l, n)| (l.clone(), n)).unzip();
        Ok(DetectionTable {
            labels,
            sizes,
            detected,
        })
    }
}

impl<L> DetectionTable<L> {
    /// Cluster labels in sorted order; cluster `k` below refers to `labels()[k]`.
    pub fn labels(&self) -> &[L] {
        &self.labels
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn num_genes(&self) -> usize {
        self.detected.nrows()
    }

    pub fn num_clusters(&self) -> usize {
        self.labels.len()
    }

    pub fn detected(&self, gene: usize, cluster: usize) -> u32 {
        self.detected[[gene, cluster]]
    }

    /// Fraction of the cluster's cells detecting the gene.
    pub fn fraction(&self, gene: usize, cluster: usize) -> f64 {
        self.detected[[gene, cluster]] as f64 / self.sizes[cluster] as f64
    }
}

impl<L: Ord> DetectionTable<L> {
    pub fn cluster_index(&self, label: &L) -> Option<usize> {
        self.labels.binary_search(label).ok()
    }
}

/// Column of the expression matrix holding each assigned cell, in assignment order.
pub fn cell_columns<L: Ord + Clone>(matrix: &ExpressionMatrix, assignment: &ClusterAssignment<L>) -> Result<Vec<usize>, Error> {
    let index = matrix.barcode_index();
    assignment
        .barcodes()
        .iter()
        .map(|b| {
            index
                .get(b.as_str())
                .copied()
                .ok_or_else(|| format_err!("cell {} is not present in the expression matrix", b))
        })
        .collect()
}

/// Reject empty matrices and values that are negative or not finite.
pub(crate) fn check_matrix(matrix: &CsMat<f64>) -> Result<(), Error> {
    let (rows, cols) = matrix.shape();
    if rows == 0 || cols == 0 {
        bail!("expression matrix is empty ({} genes x {} cells)", rows, cols);
    }
    if let Some(v) = matrix.data().iter().find(|v| !v.is_finite() || **v < 0.0) {
        bail!("expression values must be finite and non-negative, found {}", v);
    }
    Ok(())
}
