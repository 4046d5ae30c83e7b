//! Directional marker-gene counts between clusters

use crate::detection::{cell_columns, DetectionTable};
use crate::params::MarkerParams;
use anyhow::{bail, Error};
use itertools::Itertools;
use rayon::prelude::*;
use scan_types::{ClusterAssignment, ExpressionMatrix};

/// Marker statistics for one unordered pair of clusters, `cl1 < cl2`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MarkerPairStats<L> {
    pub cl1: L,
    pub cl2: L,
    /// genes marking `cl1` over `cl2`
    pub dex_count_a_to_b: usize,
    /// genes marking `cl2` over `cl1`
    pub dex_count_b_to_a: usize,
    pub min_dex_count: usize,
    pub min_size: usize,
}

/// True if `gene` marks cluster `a` over cluster `b`: detected in at least `target_proportion`
/// of `a` and in at most `other_proportion` of `b`.
#[inline]
pub fn is_marker<L>(table: &DetectionTable<L>, params: &MarkerParams, gene: usize, a: usize, b: usize) -> bool {
    table.fraction(gene, a) >= params.target_proportion && table.fraction(gene, b) <= params.other_proportion
}

/// Statistics for every pair of clusters in `table`, enumerated in sorted label order:
/// `(l0, l1), (l0, l2), ..., (l1, l2), ...`. Pairs are evaluated in parallel, the output order
/// does not depend on scheduling.
pub fn pair_stats<L>(table: &DetectionTable<L>, params: &MarkerParams) -> Vec<MarkerPairStats<L>>
where
    L: Clone + Send + Sync,
{
    let pairs = (0..table.num_clusters()).tuple_combinations::<(usize, usize)>().collect::<Vec<_>>();
    pairs
        .par_iter()
        .map(|&(a, b)| {
            let mut a_to_b = 0;
            let mut b_to_a = 0;
            for g in 0..table.num_genes() {
                if is_marker(table, params, g, a, b) {
                    a_to_b += 1;
                }
                if is_marker(table, params, g, b, a) {
                    b_to_a += 1;
                }
            }
            MarkerPairStats {
                cl1: table.labels()[a].clone(),
                cl2: table.labels()[b].clone(),
                dex_count_a_to_b: a_to_b,
                dex_count_b_to_a: b_to_a,
                min_dex_count: a_to_b.min(b_to_a),
                min_size: table.sizes()[a].min(table.sizes()[b]),
            }
        })
        .collect()
}

/// Indices of the genes marking cluster `a` over cluster `b`. `None` if either label is absent.
pub fn marker_genes<L: Ord>(table: &DetectionTable<L>, params: &MarkerParams, a: &L, b: &L) -> Option<Vec<usize>> {
    let a = table.cluster_index(a)?;
    let b = table.cluster_index(b)?;
    Some((0..table.num_genes()).filter(|&g| is_marker(table, params, g, a, b)).collect())
}

/// Count marker genes in both directions for every pair of clusters in `assignment`.
/// A single cluster yields no pairs.
pub fn count_marker_genes<L>(
    matrix: &ExpressionMatrix,
    assignment: &ClusterAssignment<L>,
    params: &MarkerParams,
) -> Result<Vec<MarkerPairStats<L>>, Error>
where
    L: Ord + Clone + Send + Sync,
{
    params.validate()?;
    if assignment.is_empty() {
        bail!("cluster assignment is empty");
    }
    let cells = cell_columns(matrix, assignment)?;
    let table = DetectionTable::compute(&matrix.matrix, &cells, assignment.labels(), params.expression_threshold)?;
    Ok(pair_stats(&table, params))
}
